//! Tool contract and reference tools.
//!
//! Every capability exposed to the model implements [`Tool`]: a stable name,
//! a one-line description, declared parameters (with explicit `required`
//! flags; the executor relies on them for validation), and an async
//! `execute`. Tools must be re-entrant across sessions.

mod fs_ops;
mod registry;
mod search;

pub use fs_ops::{ListDirectoryTool, PathPolicy, ReadFileTool, StrReplaceTool, WriteFileTool};
pub use registry::ToolRegistry;
pub use search::CodeSearchTool;

use std::path::Path;
use std::sync::Arc;

use sov_domain::message::{ToolParams, ToolResult};

/// Registry with the standard filesystem/search toolset rooted at
/// `working_dir`.
pub fn default_registry(working_dir: &Path) -> ToolRegistry {
    let policy = Arc::new(PathPolicy::new(working_dir));
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ReadFileTool::new(policy.clone())));
    registry.register(Arc::new(WriteFileTool::new(policy.clone())));
    registry.register(Arc::new(StrReplaceTool::new(policy.clone())));
    registry.register(Arc::new(ListDirectoryTool::new(policy.clone())));
    registry.register(Arc::new(CodeSearchTool::new(policy)));
    registry
}

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Boolean,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
        }
    }
}

/// A declared tool parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamType,
    pub description: &'static str,
    pub required: bool,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamType, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: ParamType, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: false,
        }
    }
}

/// A capability exposed to the model.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Stable string id used in tool-call spans.
    fn name(&self) -> &str;

    /// One-line human description for the catalog.
    fn description(&self) -> &str;

    fn parameters(&self) -> &[ParamSpec];

    /// Execute with string-keyed string parameters. Failures are returned
    /// as `ToolResult { success: false, .. }`, never panics.
    async fn execute(&self, params: &ToolParams) -> ToolResult;

    /// Render the definition block injected into the system prompt.
    fn to_prompt_format(&self) -> String {
        let mut out = String::from("<tool_definition>\n");
        out.push_str(&format!("name: {}\n", self.name()));
        out.push_str(&format!("description: {}\n", self.description()));
        if !self.parameters().is_empty() {
            out.push_str("parameters:\n");
            for param in self.parameters() {
                out.push_str(&format!(
                    "  - {} ({}, {}): {}\n",
                    param.name,
                    param.kind.as_str(),
                    if param.required { "required" } else { "optional" },
                    param.description,
                ));
            }
        }
        out.push_str("</tool_definition>");
        out
    }
}

/// Fetch a required parameter or produce the failure the executor threads
/// back to the model.
pub fn require_param<'a>(params: &'a ToolParams, name: &str) -> Result<&'a str, ToolResult> {
    match params.get(name).map(String::as_str) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ToolResult::err(format!("missing required parameter: {name}"))),
    }
}
