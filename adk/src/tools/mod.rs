//! Tool catalog: named executable capabilities agents may invoke.
//!
//! Each [`ToolDefinition`] carries a parameter schema for the planner, an
//! execution kind, and the payload the sandbox resolves. The registry is
//! seeded with builtins before serving and is read-mostly afterwards.

mod builtin;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named executable capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name, snake_case.
    pub name: String,

    /// What the tool does; shown to the planner.
    pub description: String,

    /// JSON-Schema object describing the arguments.
    pub parameters: Value,

    /// How the sandbox resolves an invocation.
    #[serde(flatten)]
    pub execution: Execution,

    /// Whether the sandbox leaves networking enabled for this tool.
    #[serde(default)]
    pub requires_network: bool,
}

/// Execution kind and payload, discriminated by `executionType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "executionType", content = "payload", rename_all = "kebab-case")]
pub enum Execution {
    /// Source code exposing a single entry `execute(**args)`, run inside
    /// the sandbox image.
    InlineCode(String),

    /// A command-line template with named `{placeholder}` substitutions,
    /// run as `sh -c` inside the sandbox.
    ShellTemplate(String),

    /// An HTTP request with a substitutable URL template.
    #[serde(rename_all = "camelCase")]
    HttpRequest {
        /// Request method.
        method: HttpMethod,
        /// URL with named `{placeholder}` substitutions.
        url_template: String,
    },
}

/// HTTP method for [`Execution::HttpRequest`] tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET; arguments travel as query parameters.
    Get,
    /// POST; arguments travel as a JSON body.
    Post,
    /// PUT; arguments travel as a JSON body.
    Put,
    /// DELETE; arguments travel as query parameters.
    Delete,
}

/// The slice of a definition the planner sees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolView {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// Parameter schema.
    pub parameters: Value,
}

/// Name-to-definition mapping with per-agent views.
///
/// Mutations happen before the controller starts serving; concurrent
/// readers afterwards need no coordination.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDefinition>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry seeded with the builtin tools.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for tool in builtin::all() {
            registry.register(tool);
        }
        registry
    }

    /// Insert or replace a definition by name.
    pub fn register(&mut self, tool: ToolDefinition) {
        self.tools.insert(tool.name.clone(), tool);
    }

    /// Look up a definition by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    /// All registered tool names, in stable order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// The planner-facing view for one agent.
    ///
    /// An empty `allowed` set means every registered tool; otherwise the
    /// intersection. Order is stable by name so prompts are deterministic.
    #[must_use]
    pub fn view_for(&self, allowed: &[String]) -> Vec<ToolView> {
        self.tools
            .values()
            .filter(|tool| allowed.is_empty() || allowed.iter().any(|name| *name == tool.name))
            .map(|tool| ToolView {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: format!("{name} tool"),
            parameters: json!({"type": "object", "properties": {}}),
            execution: Execution::ShellTemplate("true".into()),
            requires_network: false,
        }
    }

    #[test]
    fn builtins_are_seeded() {
        let registry = ToolRegistry::with_builtins();
        for name in [
            "read_file",
            "write_file",
            "list_directory",
            "shell",
            "python_eval",
            "http_get",
            "search_files",
            "calculator",
        ] {
            assert!(registry.get(name).is_some(), "missing builtin {name}");
        }
    }

    #[test]
    fn empty_allow_list_views_everything() {
        let registry = ToolRegistry::with_builtins();
        let all = registry.view_for(&[]);
        assert_eq!(all.len(), registry.names().len());
    }

    #[test]
    fn allow_list_intersects() {
        let registry = ToolRegistry::with_builtins();
        let view = registry.view_for(&[
            "calculator".to_string(),
            "list_directory".to_string(),
            "not-a-tool".to_string(),
        ]);
        let names: Vec<&str> = view.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["calculator", "list_directory"]);
    }

    #[test]
    fn register_replaces_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(minimal("probe"));
        let mut replacement = minimal("probe");
        replacement.description = "replaced".into();
        registry.register(replacement);
        assert_eq!(registry.get("probe").unwrap().description, "replaced");
        assert_eq!(registry.names().len(), 1);
    }

    #[test]
    fn execution_wire_shape() {
        let tool = ToolDefinition {
            name: "fetch".into(),
            description: "fetch".into(),
            parameters: json!({"type": "object"}),
            execution: Execution::HttpRequest {
                method: HttpMethod::Get,
                url_template: "https://example.com/{path}".into(),
            },
            requires_network: true,
        };
        let value = serde_json::to_value(&tool).unwrap();
        assert_eq!(value["executionType"], "http-request");
        assert_eq!(value["payload"]["method"], "GET");
        assert_eq!(value["payload"]["urlTemplate"], "https://example.com/{path}");
    }
}
