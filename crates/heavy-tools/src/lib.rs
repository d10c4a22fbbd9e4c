//! heavy-tools: Built-in tools for heavy
//!
//! This crate provides the default tools available to agents:
//! - Completion: the `mark_task_complete` sentinel that ends an agent run
//! - Calculator: arithmetic expression evaluation
//! - Search: web search through DuckDuckGo's HTML endpoint

pub mod calculator;
pub mod complete;
pub mod search;

use std::sync::Arc;

use heavy_core::{Tool, ToolRegistry};

pub use calculator::CalculatorTool;
pub use complete::MarkTaskCompleteTool;
pub use search::SearchTool;

/// Create all built-in tools.
pub fn create_default_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(MarkTaskCompleteTool),
        Arc::new(CalculatorTool),
        Arc::new(SearchTool::new()),
    ]
}

/// A registry holding every built-in tool.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for tool in create_default_tools() {
        registry.register(tool);
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = default_registry();
        assert_eq!(
            registry.names(),
            vec!["calculator", "mark_task_complete", "search"]
        );
    }
}
