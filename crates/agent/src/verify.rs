//! Post-execution semantic verification.
//!
//! After a tool runs, a quick semantic check catches silently-wrong results
//! (a "successful" write that never landed, an empty read). Failures attach
//! suggestions to the result text the model sees next iteration. Tools
//! without a strategy are skipped, as are results that already failed.

use std::path::Path;

use sov_domain::message::{ToolParams, ToolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct Verification {
    pub status: VerificationStatus,
    pub message: String,
    pub suggestions: Vec<String>,
}

impl Verification {
    fn passed(message: impl Into<String>) -> Self {
        Self {
            status: VerificationStatus::Passed,
            message: message.into(),
            suggestions: Vec::new(),
        }
    }

    fn failed(message: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self {
            status: VerificationStatus::Failed,
            message: message.into(),
            suggestions,
        }
    }

    fn skipped(message: impl Into<String>) -> Self {
        Self {
            status: VerificationStatus::Skipped,
            message: message.into(),
            suggestions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct VerificationCounters {
    pub total_checks: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl VerificationCounters {
    pub fn success_rate(&self) -> f64 {
        if self.total_checks == 0 {
            return 0.0;
        }
        self.passed as f64 / self.total_checks as f64
    }
}

#[derive(Default)]
pub struct Verifier {
    counters: VerificationCounters,
}

impl Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> VerificationCounters {
        self.counters
    }

    /// Verify a tool execution result, recording the outcome.
    pub fn verify(&mut self, tool: &str, params: &ToolParams, result: &ToolResult) -> Verification {
        let verification = if !result.success {
            Verification::skipped(format!("{tool} failed, skipping verification"))
        } else {
            match tool {
                "read_file" => verify_read_file(params, result),
                "write_file" => verify_write_file(params),
                "str_replace" => verify_str_replace(params),
                "list_directory" => Verification::passed("directory listed"),
                "code_search" => verify_code_search(result),
                _ => Verification::skipped(format!("no verification strategy for {tool}")),
            }
        };

        self.counters.total_checks += 1;
        match verification.status {
            VerificationStatus::Passed => self.counters.passed += 1,
            VerificationStatus::Failed => self.counters.failed += 1,
            VerificationStatus::Skipped => self.counters.skipped += 1,
        }

        if verification.status == VerificationStatus::Failed {
            tracing::warn!(tool, message = %verification.message, "verification failed");
        }

        verification
    }
}

fn verify_read_file(params: &ToolParams, result: &ToolResult) -> Verification {
    let path = params.get("path").map(String::as_str).unwrap_or("");
    if result.output.trim().is_empty() {
        return Verification::failed(
            format!("file {path} appears empty"),
            vec![
                "Check if the file path is correct".into(),
                "Verify the file has content".into(),
                "Try listing the directory to see what files exist".into(),
            ],
        );
    }
    Verification::passed(format!("read {} bytes from {path}", result.output.len()))
}

/// The write claims success; confirm the file exists and holds exactly the
/// declared content.
fn verify_write_file(params: &ToolParams) -> Verification {
    let path = params.get("path").map(String::as_str).unwrap_or("");
    let expected = params.get("content").map(String::as_str).unwrap_or("");

    if !Path::new(path).exists() {
        return Verification::failed(
            format!("write_file reported success but {path} does not exist"),
            vec!["Retry the write with the full intended content".into()],
        );
    }

    match std::fs::read_to_string(path) {
        Ok(actual) if actual == expected => {
            Verification::passed(format!("verified {} bytes at {path}", actual.len()))
        }
        Ok(actual) => Verification::failed(
            format!(
                "content mismatch at {path}: wrote {} bytes, found {}",
                expected.len(),
                actual.len()
            ),
            vec!["Re-read the file and write it again".into()],
        ),
        Err(e) => Verification::failed(
            format!("could not re-read {path}: {e}"),
            vec!["Check the path and retry".into()],
        ),
    }
}

/// Confirm the replacement text is now present in the file.
fn verify_str_replace(params: &ToolParams) -> Verification {
    let path = params.get("path").map(String::as_str).unwrap_or("");
    let new_str = params.get("new_str").map(String::as_str).unwrap_or("");

    match std::fs::read_to_string(path) {
        Ok(content) if new_str.is_empty() || content.contains(new_str) => {
            Verification::passed(format!("replacement present in {path}"))
        }
        Ok(_) => Verification::failed(
            format!("replacement text not found in {path} after str_replace"),
            vec![
                "Re-read the file to see its current state".into(),
                "Copy old_str exactly from the file contents".into(),
            ],
        ),
        Err(e) => Verification::failed(
            format!("could not re-read {path}: {e}"),
            vec!["Check the path and retry".into()],
        ),
    }
}

fn verify_code_search(result: &ToolResult) -> Verification {
    if result.output.contains("No matches found") {
        let mut v = Verification::passed("search completed with no matches");
        v.suggestions = vec![
            "Broaden the pattern or try a simpler substring".into(),
            "List the directory to confirm you are searching the right place".into(),
        ];
        return v;
    }
    Verification::passed("search returned matches")
}
