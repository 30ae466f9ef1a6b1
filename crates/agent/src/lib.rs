//! The sovereign agent kernel.
//!
//! Everything between a user request and a [`TurnResult`] lives here: the
//! request classifiers, the model router, prompt assembly under a token
//! budget, the tool-call parser, and the executor stack (cache, bounded
//! parallelism, verification, error recovery) driven by the turn loop in
//! [`turn`].

pub mod analyzer;
pub mod cache;
pub mod cancel;
pub mod context;
pub mod metrics;
pub mod parallel;
pub mod parser;
pub mod planner;
pub mod prompts;
pub mod recovery;
pub mod retrieve;
pub mod router;
pub mod turn;
pub mod verify;

pub use analyzer::{analyze_complexity, detect_task_type, Complexity, TaskType};
pub use cancel::CancelToken;
pub use retrieve::ContextRetriever;
pub use router::{ModelTier, Router};
pub use turn::{Agent, ExecutedToolCall, TurnResult};
