use std::collections::HashMap;
use std::sync::Arc;

use ziwei_core::tools::ToolDefinition;

use crate::tool::ToolHandler;

/// Name → handler table. Adding a tool is a registration, not a change to
/// the dispatch path.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a handler. A handler with the same name is replaced.
    pub fn register(&mut self, tool: Arc<dyn ToolHandler>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).map(Arc::clone)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions handed to the generation step, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ziwei_core::tools::ToolResult;

    use crate::tool::{ToolContext, ToolError};

    struct DummyTool {
        name: String,
    }

    impl DummyTool {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
            }
        }
    }

    #[async_trait]
    impl ToolHandler for DummyTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "A dummy tool for testing"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::success("ok"))
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool::new("explain_star")));

        assert!(registry.contains("explain_star"));
        assert!(!registry.contains("explain_palace"));
        assert_eq!(registry.count(), 1);
        assert!(registry.get("explain_star").is_some());
    }

    #[test]
    fn register_same_name_replaces() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool::new("a")));
        registry.register(Arc::new(DummyTool::new("a")));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn unregister() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool::new("a")));
        assert!(registry.unregister("a"));
        assert!(!registry.contains("a"));
        assert!(!registry.unregister("a")); // second time returns false
    }

    #[test]
    fn names_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool::new("generate_chart")));
        registry.register(Arc::new(DummyTool::new("explain_star")));
        registry.register(Arc::new(DummyTool::new("explain_palace")));

        assert_eq!(
            registry.names(),
            vec!["explain_palace", "explain_star", "generate_chart"]
        );
    }

    #[test]
    fn definitions_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool::new("b")));
        registry.register(Arc::new(DummyTool::new("a")));

        let defs = registry.definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "a");
        assert_eq!(defs[1].name, "b");
        assert_eq!(defs[0].description, "A dummy tool for testing");
    }
}
