use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: ToolParameters,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: ToolParameters::default(),
        }
    }

    pub fn with_parameters(mut self, parameters: ToolParameters) -> Self {
        self.parameters = parameters;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameters {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: HashMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(rename = "additionalProperties", default)]
    pub additional_properties: bool,
}

impl Default for ToolParameters {
    fn default() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: HashMap::new(),
            required: Vec::new(),
            additional_properties: false,
        }
    }
}

impl ToolParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_property(
        mut self,
        name: impl Into<String>,
        schema: PropertySchema,
        required: bool,
    ) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), schema);
        if required {
            self.required.push(name);
        }
        self
    }

    /// Check an argument payload against this schema.
    ///
    /// The payload must be an object (null counts as empty), every required
    /// property must be present and non-null, and declared properties must
    /// have the declared JSON type.
    pub fn validate(&self, arguments: &Value) -> Result<(), String> {
        let empty = serde_json::Map::new();
        let object = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => return Err(format!("arguments must be an object, got {}", json_type(other))),
        };

        for name in &self.required {
            match object.get(name) {
                None | Some(Value::Null) => {
                    return Err(format!("missing required argument '{}'", name));
                }
                Some(_) => {}
            }
        }

        for (name, value) in object {
            let Some(schema) = self.properties.get(name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            if !schema.accepts(value) {
                return Err(format!(
                    "argument '{}' must be {}, got {}",
                    name,
                    schema.schema_type,
                    json_type(value)
                ));
            }
        }

        Ok(())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertySchema>>,
}

impl PropertySchema {
    fn typed(schema_type: &str, description: impl Into<String>) -> Self {
        Self {
            schema_type: schema_type.to_string(),
            description: Some(description.into()),
            enum_values: None,
            default: None,
            items: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::typed("string", description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::typed("integer", description)
    }

    pub fn number(description: impl Into<String>) -> Self {
        Self::typed("number", description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::typed("boolean", description)
    }

    pub fn array(description: impl Into<String>, items: PropertySchema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::typed("array", description)
        }
    }

    pub fn enum_string(description: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            enum_values: Some(values),
            ..Self::typed("string", description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    fn accepts(&self, value: &Value) -> bool {
        let type_ok = match self.schema_type.as_str() {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !type_ok {
            return false;
        }
        match (&self.enum_values, value.as_str()) {
            (Some(allowed), Some(s)) => allowed.iter().any(|a| a == s),
            _ => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn definition(&self) -> ToolDefinition;

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, Error>;
}

/// Name-keyed set of tools.
///
/// Cloning is cheap (tools are shared), so each agent run can own and
/// shrink its own copy without affecting other runs.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Remove a tool by name. Returns true if it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Keep only the named tools.
    pub fn retain(&mut self, names: &[&str]) {
        self.tools.retain(|name, _| names.contains(&name.as_str()));
    }

    /// Tool definitions, sorted by name so requests are deterministic.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "test tool"
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(self.0, "test tool")
        }

        async fn execute(&self, _arguments: Value) -> Result<ToolOutput, Error> {
            Ok(ToolOutput::success(self.0))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(NamedTool("search")));
        registry.register(Arc::new(NamedTool("calculator")));
        registry.register(Arc::new(NamedTool("mark_task_complete")));
        registry
    }

    #[test]
    fn test_tool_definition() {
        let def = ToolDefinition::new("read_file", "Read contents of a file")
            .with_parameters(
                ToolParameters::new()
                    .add_property("path", PropertySchema::string("Path to the file"), true),
            );

        assert_eq!(def.name, "read_file");
        assert!(def.parameters.required.contains(&"path".to_string()));
    }

    #[test]
    fn test_validate_required_and_types() {
        let params = ToolParameters::new()
            .add_property("query", PropertySchema::string("q"), true)
            .add_property("limit", PropertySchema::integer("n"), false);

        assert!(params.validate(&json!({"query": "rust"})).is_ok());
        assert!(params.validate(&json!({"query": "rust", "limit": 3})).is_ok());

        let missing = params.validate(&json!({"limit": 3})).unwrap_err();
        assert!(missing.contains("query"));

        let wrong_type = params.validate(&json!({"query": "rust", "limit": "3"})).unwrap_err();
        assert!(wrong_type.contains("limit"));

        assert!(params.validate(&json!("rust")).is_err());
        assert!(params.validate(&Value::Null).is_err());
    }

    #[test]
    fn test_validate_null_without_required() {
        assert!(ToolParameters::new().validate(&Value::Null).is_ok());
    }

    #[test]
    fn test_validate_enum() {
        let params = ToolParameters::new().add_property(
            "mode",
            PropertySchema::enum_string("m", vec!["fast".to_string(), "slow".to_string()]),
            true,
        );
        assert!(params.validate(&json!({"mode": "fast"})).is_ok());
        assert!(params.validate(&json!({"mode": "medium"})).is_err());
    }

    #[test]
    fn test_registry_remove_and_retain() {
        let mut tools = registry();
        assert!(tools.remove("calculator"));
        assert!(!tools.remove("calculator"));
        assert_eq!(tools.names(), vec!["mark_task_complete", "search"]);

        let mut subset = registry();
        subset.retain(&["search", "missing"]);
        assert_eq!(subset.names(), vec!["search"]);
    }

    #[test]
    fn test_registry_clone_is_independent() {
        let original = registry();
        let mut copy = original.clone();
        copy.retain(&[]);
        assert!(copy.is_empty());
        assert_eq!(original.len(), 3);
    }

    #[test]
    fn test_definitions_sorted() {
        let names: Vec<String> = registry().definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["calculator", "mark_task_complete", "search"]);
    }
}
