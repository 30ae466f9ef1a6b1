//! Error recovery suggestions.
//!
//! Tool failures are classified by substring patterns (or tool identity)
//! into coarse kinds, each mapped to an ordered list of recovery actions.
//! The rendered, numbered list is appended to the failed result so the
//! model can choose a different approach on the next iteration.

use std::collections::HashMap;

use sov_domain::message::ToolParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    Retry,
    Fallback,
    Alternative,
    Skip,
    Abort,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::Retry => "retry",
            RecoveryStrategy::Fallback => "fallback",
            RecoveryStrategy::Alternative => "alternative",
            RecoveryStrategy::Skip => "skip",
            RecoveryStrategy::Abort => "abort",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryAction {
    pub strategy: RecoveryStrategy,
    pub description: String,
    /// Optional hints (e.g. the tool to try instead).
    pub params: ToolParams,
}

impl RecoveryAction {
    fn new(strategy: RecoveryStrategy, description: &str) -> Self {
        Self {
            strategy,
            description: description.to_string(),
            params: ToolParams::new(),
        }
    }

    fn with_tool(mut self, tool: &str) -> Self {
        self.params.insert("tool".into(), tool.into());
        self
    }
}

/// Context about a failure being classified.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub tool_name: String,
    pub error_message: String,
    pub params: ToolParams,
    pub attempt_number: u32,
}

/// Coarse error kinds, matched by substring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    FileNotFound,
    PathNotAllowed,
    PermissionDenied,
    GitError,
    SearchNoResults,
    Timeout,
    EmptyFile,
    TypeError,
    Unknown,
}

pub fn classify(ctx: &ErrorContext) -> ErrorKind {
    let msg = ctx.error_message.to_lowercase();

    if msg.contains("not found") || msg.contains("does not exist") {
        ErrorKind::FileNotFound
    } else if msg.contains("not allowed") {
        ErrorKind::PathNotAllowed
    } else if msg.contains("permission") || msg.contains("denied") {
        ErrorKind::PermissionDenied
    } else if msg.contains("git") || ctx.tool_name.starts_with("git") {
        ErrorKind::GitError
    } else if msg.contains("no matches") || msg.contains("no results") {
        ErrorKind::SearchNoResults
    } else if msg.contains("timeout") || msg.contains("timed out") {
        ErrorKind::Timeout
    } else if msg.contains("empty") {
        ErrorKind::EmptyFile
    } else if msg.contains("type") {
        ErrorKind::TypeError
    } else {
        ErrorKind::Unknown
    }
}

pub struct ErrorRecoveryManager {
    patterns: HashMap<ErrorKind, Vec<RecoveryAction>>,
    history: Vec<ErrorContext>,
}

impl Default for ErrorRecoveryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorRecoveryManager {
    pub fn new() -> Self {
        use ErrorKind::*;
        use RecoveryStrategy::*;

        let mut patterns: HashMap<ErrorKind, Vec<RecoveryAction>> = HashMap::new();
        patterns.insert(
            FileNotFound,
            vec![
                RecoveryAction::new(Alternative, "List the directory to see available files")
                    .with_tool("list_directory"),
                RecoveryAction::new(Alternative, "Search for similar file names")
                    .with_tool("code_search"),
            ],
        );
        patterns.insert(
            PathNotAllowed,
            vec![
                RecoveryAction::new(Alternative, "Use a path within allowed directories"),
                RecoveryAction::new(Skip, "Skip this operation and continue with the next step"),
            ],
        );
        patterns.insert(
            PermissionDenied,
            vec![
                RecoveryAction::new(Alternative, "Try reading the file instead of writing")
                    .with_tool("read_file"),
                RecoveryAction::new(Skip, "Skip this operation"),
            ],
        );
        patterns.insert(
            GitError,
            vec![
                RecoveryAction::new(Alternative, "Check repository status first")
                    .with_tool("git_status"),
                RecoveryAction::new(Skip, "Continue without the git operation"),
            ],
        );
        patterns.insert(
            SearchNoResults,
            vec![
                RecoveryAction::new(Alternative, "Try a broader search pattern"),
                RecoveryAction::new(Alternative, "List directory contents instead")
                    .with_tool("list_directory"),
            ],
        );
        patterns.insert(
            Timeout,
            vec![
                RecoveryAction::new(Retry, "Retry the operation"),
                RecoveryAction::new(Alternative, "Try a simpler operation"),
            ],
        );
        patterns.insert(
            EmptyFile,
            vec![
                RecoveryAction::new(Alternative, "The file may be empty; create content first"),
                RecoveryAction::new(Skip, "Skip this file and continue"),
            ],
        );
        patterns.insert(
            TypeError,
            vec![
                RecoveryAction::new(Alternative, "Add type annotations to fix type errors"),
                RecoveryAction::new(Skip, "Type errors are non-blocking, continue"),
            ],
        );

        Self {
            patterns,
            history: Vec::new(),
        }
    }

    pub fn record_error(&mut self, ctx: ErrorContext) {
        self.history.push(ctx);
    }

    pub fn error_count(&self) -> usize {
        self.history.len()
    }

    /// Suggest recovery actions for an error. Retries are suppressed once
    /// the same operation has been attempted three times.
    pub fn suggest_recovery(&self, ctx: &ErrorContext) -> Vec<RecoveryAction> {
        let kind = classify(ctx);
        let mut actions = self.patterns.get(&kind).cloned().unwrap_or_else(|| {
            vec![
                RecoveryAction::new(RecoveryStrategy::Retry, "Retry the operation once more"),
                RecoveryAction::new(RecoveryStrategy::Alternative, "Try a different approach"),
                RecoveryAction::new(RecoveryStrategy::Skip, "Skip and continue with the next step"),
            ]
        });

        if ctx.attempt_number >= 3 {
            actions.retain(|a| a.strategy != RecoveryStrategy::Retry);
        }

        actions
    }

    /// Advisory check for failures severe enough to stop the turn.
    pub fn should_abort(&self, ctx: &ErrorContext) -> bool {
        const CRITICAL: &[&str] = &["syntax error", "invalid syntax", "fatal", "critical"];
        let msg = ctx.error_message.to_lowercase();
        CRITICAL.iter().any(|p| msg.contains(p))
    }

    /// Render suggestions as a numbered list for the model.
    pub fn format_suggestions(&self, actions: &[RecoveryAction]) -> String {
        if actions.is_empty() {
            return "No specific recovery suggestions available.".to_string();
        }
        let mut lines = vec!["Recovery options:".to_string()];
        for (i, action) in actions.iter().enumerate() {
            lines.push(format!(
                "{}. [{}] {}",
                i + 1,
                action.strategy.as_str(),
                action.description
            ));
        }
        lines.join("\n")
    }
}
