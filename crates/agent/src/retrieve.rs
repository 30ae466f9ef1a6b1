//! Context retrieval seam.
//!
//! The vector store and knowledge base live outside the core; the agent
//! only sees this trait. Retrieved snippets are folded into the system
//! prompt's retrieved-context section.

use sov_domain::error::Result;

/// External collaborator that returns context snippets for a query.
#[async_trait::async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<String>>;
}

/// Retriever that returns nothing; used when retrieval is disabled.
pub struct NullRetriever;

#[async_trait::async_trait]
impl ContextRetriever for NullRetriever {
    async fn retrieve(&self, _query: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
