//! Name-keyed tool registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::Tool;

/// Holds every registered tool with O(1) lookup by name. Iteration follows
/// registration order so the rendered catalog is stable.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    by_name: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Re-registering a name replaces the previous tool
    /// but keeps its catalog position.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.by_name.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.by_name.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = Arc<dyn Tool>> + '_ {
        self.order
            .iter()
            .filter_map(move |name| self.by_name.get(name).cloned())
    }

    /// Render the full tool catalog for the system prompt.
    pub fn render_catalog(&self) -> String {
        self.iter()
            .map(|tool| tool.to_prompt_format())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
