//! Tool registry: the agent runtime's sole view of invokable tools.
//!
//! A [`ToolRegistry`] is a flat mapping from a stable string name to a [`ToolBinding`]. Each
//! binding advertises a typed [`ArgSchema`] (used both to validate incoming arguments and to
//! describe the tool to a backend's native tool-calling channel) and an [`Invoker`] closure that
//! performs the side-effecting work.
//!
//! Argument names are matched case-insensitively and with camelCase→snake_case normalization
//! applied once here, at the registry boundary, so individual tool implementations never need to
//! special-case how a particular backend happened to spell an argument.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Scalar types a tool argument may take. Mirrors the JSON Schema primitive types a backend's
/// native tool-calling channel understands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

/// One field in a tool's argument schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgField {
    pub name: String,
    #[serde(rename = "type")]
    pub arg_type: ArgType,
    pub description: Option<String>,
    pub required: bool,
    pub default: Option<serde_json::Value>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<serde_json::Value>>,
}

impl ArgField {
    pub fn new(name: impl Into<String>, arg_type: ArgType) -> Self {
        Self {
            name: name.into(),
            arg_type,
            description: None,
            required: false,
            default: None,
            enum_values: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_enum(mut self, values: Vec<serde_json::Value>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// Ordered collection of typed argument fields declared by a tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArgSchema {
    pub fields: Vec<ArgField>,
}

impl ArgSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, field: ArgField) -> Self {
        self.fields.push(field);
        self
    }

    /// Render as an OpenAI-style JSON Schema object, for advertising the tool over a backend's
    /// native tool-calling channel.
    pub fn to_json_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            let mut prop = serde_json::json!({ "type": match field.arg_type {
                ArgType::String => "string",
                ArgType::Number => "number",
                ArgType::Integer => "integer",
                ArgType::Boolean => "boolean",
                ArgType::Array => "array",
                ArgType::Object => "object",
            }});
            if let Some(desc) = &field.description {
                prop["description"] = serde_json::Value::String(desc.clone());
            }
            if let Some(values) = &field.enum_values {
                prop["enum"] = serde_json::Value::Array(values.clone());
            }
            properties.insert(field.name.clone(), prop);
            if field.required {
                required.push(serde_json::Value::String(field.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Normalize and validate a raw arguments object against this schema.
    ///
    /// Keys are matched case-insensitively after converting camelCase to snake_case. Unknown
    /// keys are dropped silently. A missing required key produces [`ValidationError`].
    pub fn normalize(&self, raw: &serde_json::Value) -> Result<serde_json::Value, ValidationError> {
        let raw_map = raw.as_object().cloned().unwrap_or_default();
        let mut normalized: HashMap<String, serde_json::Value> = HashMap::new();
        for (key, value) in raw_map {
            normalized.insert(to_snake_case(&key), value);
        }

        let mut out = serde_json::Map::new();
        let mut missing = Vec::new();
        for field in &self.fields {
            let field_key = to_snake_case(&field.name);
            match normalized.remove(&field_key) {
                Some(value) => {
                    out.insert(field.name.clone(), value);
                }
                None => {
                    if let Some(default) = &field.default {
                        out.insert(field.name.clone(), default.clone());
                    } else if field.required {
                        missing.push(field.name.clone());
                    }
                }
            }
        }

        if !missing.is_empty() {
            return Err(ValidationError(format!(
                "missing required argument(s): {}",
                missing.join(", ")
            )));
        }

        Ok(serde_json::Value::Object(out))
    }
}

/// camelCase/PascalCase -> snake_case, then lowercased, so comparisons are case-insensitive too.
fn to_snake_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    for (i, ch) in input.chars().enumerate() {
        if ch.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// A tool's invocation failed to validate its arguments. Never a hard request-level failure: the
/// agent runtime feeds this back to the model as a `tool` observation.
#[derive(Debug, Clone)]
pub struct ValidationError(pub String);

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ValidationError {}

/// The result of a tool invocation: `content` is fed back into the agent loop, `artifact` is a
/// user-facing trace string (possibly containing a public artifact URL) surfaced alongside it.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    pub artifact: Option<String>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            artifact: None,
        }
    }

    pub fn with_artifact(content: impl Into<String>, artifact: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            artifact: Some(artifact.into()),
        }
    }
}

/// A tool failed after its arguments validated. Converted to a `tool` observation by the agent
/// runtime, never propagated to the HTTP layer.
#[derive(Debug, Clone)]
pub struct InvocationError(pub String);

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for InvocationError {}

/// One invokable unit. Implementations must be safe to call concurrently from multiple requests;
/// any external resource a tool holds is owned and lifecycle-managed by the implementation.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, args: serde_json::Value) -> Result<ToolOutput, InvocationError>;
}

/// Blanket impl so a plain async closure can be registered without a bespoke struct.
#[async_trait]
impl<F, Fut> Invoker for F
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<ToolOutput, InvocationError>> + Send,
{
    async fn invoke(&self, args: serde_json::Value) -> Result<ToolOutput, InvocationError> {
        (self)(args).await
    }
}

/// `{name, arg_schema, invoker}` — the unit the registry resolves names to.
pub struct ToolBinding {
    pub name: String,
    pub description: String,
    pub arg_schema: ArgSchema,
    invoker: Arc<dyn Invoker>,
}

impl ToolBinding {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        arg_schema: ArgSchema,
        invoker: Arc<dyn Invoker>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            arg_schema,
            invoker,
        }
    }

    /// Normalize/validate `raw_args` and invoke. Returns [`ValidationError`] before ever calling
    /// the underlying invoker.
    pub async fn call(&self, raw_args: &serde_json::Value) -> Result<ToolOutput, ToolCallError> {
        let args = self
            .arg_schema
            .normalize(raw_args)
            .map_err(ToolCallError::Validation)?;
        self.invoker
            .invoke(args)
            .await
            .map_err(ToolCallError::Invocation)
    }
}

/// Either half of a tool call's two recoverable failure modes, both of which the agent runtime
/// converts into a `tool` observation rather than a request-level error.
#[derive(Debug, Clone)]
pub enum ToolCallError {
    Validation(ValidationError),
    Invocation(InvocationError),
}

impl fmt::Display for ToolCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolCallError::Validation(e) => write!(f, "{}", e),
            ToolCallError::Invocation(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ToolCallError {}

/// Read-only-after-startup mapping from tool name to binding.
///
/// Built once via explicit constructor wiring at process start (see the completion manager's
/// construction in `main.rs`); there is no runtime registration after that point.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    bindings: HashMap<String, Arc<ToolBinding>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, binding: ToolBinding) -> Self {
        self.bindings.insert(binding.name.clone(), Arc::new(binding));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ToolBinding> {
        self.bindings.get(name).map(|b| b.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Builds the sub-registry a single model definition's `tools`/`agents` catalog resolves to
    /// (§3 invariant iii: unresolved names fail the request at dispatch, not at configuration
    /// load). Returns the names that couldn't be resolved, if any, instead of a partial registry.
    pub fn scoped(&self, names: &[String]) -> Result<ToolRegistry, Vec<String>> {
        let mut bindings = HashMap::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            match self.bindings.get(name) {
                Some(binding) => {
                    bindings.insert(name.clone(), Arc::clone(binding));
                }
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(missing);
        }
        Ok(ToolRegistry { bindings })
    }

    /// Tool declarations in the shape a backend client forwards to the upstream model, one per
    /// registered tool, in registration order is not guaranteed (HashMap-backed); callers that
    /// need a stable order should sort by name.
    pub fn declarations(&self) -> Vec<crate::gateway::client_wrapper::ToolDeclaration> {
        self.bindings
            .values()
            .map(|b| crate::gateway::client_wrapper::ToolDeclaration {
                name: b.name.clone(),
                description: b.description.clone(),
                parameters_schema: b.arg_schema.to_json_schema(),
            })
            .collect()
    }

    /// Invoke a named tool, surfacing "unknown tool" as an [`InvocationError`] so callers can
    /// treat it uniformly with other tool-call failures.
    pub async fn invoke(
        &self,
        name: &str,
        raw_args: &serde_json::Value,
    ) -> Result<ToolOutput, ToolCallError> {
        match self.bindings.get(name) {
            Some(binding) => binding.call(raw_args).await,
            None => Err(ToolCallError::Invocation(InvocationError(format!(
                "unknown tool: {}",
                name
            )))),
        }
    }
}
