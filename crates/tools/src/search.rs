//! Recursive code search over the workspace.

use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use sov_domain::message::{ToolParams, ToolResult};
use walkdir::WalkDir;

use crate::fs_ops::PathPolicy;
use crate::{require_param, ParamSpec, ParamType, Tool};

/// Stop collecting matches beyond this to keep results promptable.
const MAX_MATCHES: usize = 200;
/// Skip files larger than this (likely binaries or bundles).
const MAX_FILE_BYTES: u64 = 1_000_000;

pub struct CodeSearchTool {
    policy: Arc<PathPolicy>,
}

impl CodeSearchTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait::async_trait]
impl Tool for CodeSearchTool {
    fn name(&self) -> &str {
        "code_search"
    }

    fn description(&self) -> &str {
        "Search file contents recursively with a regex pattern"
    }

    fn parameters(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::required("pattern", ParamType::String, "Regex pattern to search for"),
            ParamSpec::required("path", ParamType::String, "Directory to search under"),
        ];
        PARAMS
    }

    async fn execute(&self, params: &ToolParams) -> ToolResult {
        let pattern = match require_param(params, "pattern") {
            Ok(p) => p,
            Err(failure) => return failure,
        };
        let requested = match require_param(params, "path") {
            Ok(p) => p,
            Err(failure) => return failure,
        };

        let root = match self.policy.resolve(requested) {
            Ok(p) => p,
            Err(e) => return ToolResult::err(e),
        };

        let regex = match Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return ToolResult::err(format!("invalid pattern: {e}")),
        };

        // The walk is synchronous and bounded; run it off the async worker.
        let result = tokio::task::spawn_blocking(move || search_dir(&root, &regex)).await;

        match result {
            Ok(matches) if matches.is_empty() => ToolResult::ok("No matches found"),
            Ok(matches) => ToolResult::ok(matches.join("\n")),
            Err(e) => ToolResult::err(format!("search task failed: {e}")),
        }
    }
}

fn search_dir(root: &Path, regex: &Regex) -> Vec<String> {
    let mut matches = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(|e| e.ok())
    {
        if matches.len() >= MAX_MATCHES {
            matches.push(format!("[search truncated at {MAX_MATCHES} matches]"));
            break;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
            continue;
        }

        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            // Non-UTF-8 file, skip.
            continue;
        };

        for (line_no, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                matches.push(format!(
                    "{}:{}: {}",
                    entry.path().display(),
                    line_no + 1,
                    line.trim_end()
                ));
                if matches.len() >= MAX_MATCHES {
                    break;
                }
            }
        }
    }

    matches
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.') && s.len() > 1)
        .unwrap_or(false)
}
