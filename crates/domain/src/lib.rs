//! Shared domain types for the sovereign agent runtime.
//!
//! Everything the other crates agree on lives here: conversation messages,
//! tool call/result types, the crate-wide error enum, and the configuration
//! tree with its environment-variable overrides.

pub mod config;
pub mod error;
pub mod logging;
pub mod message;

pub use config::Config;
pub use error::{Error, Result};
pub use message::{Message, Role, ToolCall, ToolResult};
