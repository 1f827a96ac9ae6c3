//! Model definition data model.
//!
//! A [`ModelDefinition`] is the persisted, immutable-per-refresh record the configuration store
//! loads from JSON files. A [`ConfigSnapshot`] is an ordered collection of these plus the load
//! timestamp that produced them.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Which provider the completion manager should dispatch a model definition to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    /// Pass-through proxy to an external OpenAI-compatible upstream.
    Openai,
    /// Tool-using agent runtime bound to a concrete chat backend.
    Langchain,
}

/// `{provider, model_id}` identifying which concrete chat backend a definition binds to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendRef {
    pub provider: String,
    pub model_id: String,
}

/// One `{role, content}` entry prepended to a conversation when the client supplies no system
/// messages of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPrompt {
    pub role: String,
    pub content: String,
}

/// One `{key, value}` header forwarded to the backend for authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub key: String,
    pub value: String,
}

/// One entry in a model definition's tool/agent catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRef {
    pub name: String,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

/// User-visible help content returned when a client sends the literal message `help`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamplePrompt {
    pub content: String,
}

/// A configuration record naming a logical model and describing how to bind it to a concrete
/// backend, tools, and prompts.
///
/// Invariants: `name` is unique within one snapshot; `type=langchain` requires a non-null
/// `backend`; tool names are resolved against the tool registry at dispatch time, not at load
/// time — an unresolvable name fails the request, not the configuration load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub owner: String,
    #[serde(rename = "type")]
    pub model_type: ModelType,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub backend: Option<BackendRef>,
    #[serde(default)]
    pub system_prompts: Vec<SystemPrompt>,
    #[serde(default)]
    pub model_parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub headers: Vec<HeaderEntry>,
    #[serde(default)]
    pub tools: Vec<ToolRef>,
    #[serde(default)]
    pub agents: Vec<ToolRef>,
    #[serde(default)]
    pub example_prompts: Vec<ExamplePrompt>,
    #[serde(default)]
    pub url: Option<String>,
}

impl ModelDefinition {
    /// The effective tool catalog: `agents` takes precedence over `tools` when both are present,
    /// mirroring the original's `get_agents()` fallback (agents if set, else tools, else empty).
    pub fn effective_tools(&self) -> &[ToolRef] {
        if !self.agents.is_empty() {
            &self.agents
        } else {
            &self.tools
        }
    }

    /// Help-command response body: description followed by a blank line and each example
    /// prompt's content, one per line under an "Example prompts:" header.
    pub fn help_text(&self) -> String {
        if self.example_prompts.is_empty() {
            return self.description.clone();
        }
        let examples: Vec<&str> = self
            .example_prompts
            .iter()
            .map(|p| p.content.as_str())
            .collect();
        format!(
            "{}\n\nExample prompts:\n{}",
            self.description,
            examples.join("\n")
        )
    }
}

/// An immutable ordered collection of model definitions produced by one load cycle of the
/// configuration store.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub definitions: Vec<ModelDefinition>,
    pub loaded_at: Instant,
}

impl ConfigSnapshot {
    pub fn new(mut definitions: Vec<ModelDefinition>) -> Self {
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            definitions,
            loaded_at: Instant::now(),
        }
    }

    pub fn empty() -> Self {
        Self {
            definitions: Vec::new(),
            loaded_at: Instant::now(),
        }
    }

    /// Case-insensitive lookup by display name.
    pub fn find(&self, name: &str) -> Option<&ModelDefinition> {
        self.definitions
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str) -> ModelDefinition {
        ModelDefinition {
            id: name.to_string(),
            name: name.to_string(),
            description: "desc".to_string(),
            owner: "owner".to_string(),
            model_type: ModelType::Langchain,
            disabled: false,
            backend: None,
            system_prompts: vec![],
            model_parameters: serde_json::Map::new(),
            headers: vec![],
            tools: vec![],
            agents: vec![],
            example_prompts: vec![],
            url: None,
        }
    }

    #[test]
    fn snapshot_sorts_by_name_ascending() {
        let snap = ConfigSnapshot::new(vec![def("Zebra"), def("Alpha"), def("Mid")]);
        let names: Vec<&str> = snap.definitions.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Mid", "Zebra"]);
    }

    #[test]
    fn find_is_case_insensitive() {
        let snap = ConfigSnapshot::new(vec![def("General Purpose")]);
        assert!(snap.find("general purpose").is_some());
    }

    #[test]
    fn agents_take_precedence_over_tools() {
        let mut d = def("x");
        d.tools = vec![ToolRef {
            name: "calculator".to_string(),
            parameters: None,
        }];
        d.agents = vec![ToolRef {
            name: "current_time".to_string(),
            parameters: None,
        }];
        assert_eq!(d.effective_tools()[0].name, "current_time");
    }

    #[test]
    fn help_text_includes_example_prompts() {
        let mut d = def("General Purpose");
        d.description = "General chat".to_string();
        d.example_prompts = vec![ExamplePrompt {
            content: "Summarize this.".to_string(),
        }];
        assert_eq!(
            d.help_text(),
            "General chat\n\nExample prompts:\nSummarize this."
        );
    }
}
