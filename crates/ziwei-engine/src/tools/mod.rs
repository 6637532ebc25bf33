pub mod explain_palace;
pub mod explain_star;
pub mod generate_chart;

use std::sync::Arc;

use crate::registry::ToolRegistry;

/// Create a ToolRegistry with the built-in tools.
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    // Produces the chart artifact
    registry.register(Arc::new(generate_chart::GenerateChartTool::new()));

    // Lookups
    registry.register(Arc::new(explain_palace::ExplainPalaceTool));
    registry.register(Arc::new(explain_star::ExplainStarTool));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_reference_tools() {
        let registry = create_default_registry();
        assert_eq!(
            registry.names(),
            vec!["explain_palace", "explain_star", "generate_chart"]
        );
        for def in registry.definitions() {
            assert!(!def.description.is_empty());
            assert_eq!(def.parameters_schema["type"], "object");
        }
    }
}
