//! Built-in tools shipped with the registry (§4.B): `calculator` and `current_time`.
//!
//! Every model definition's `tools`/`agents` list names these by string; a registry holding only
//! what's listed here is enough to run the example configs shipped under `configs/`.

use crate::gateway::tool_registry::{ArgSchema, InvocationError, Invoker, ToolBinding, ToolOutput};
use async_trait::async_trait;
use std::sync::Arc;

pub mod calculator;

pub use calculator::Calculator;

struct CurrentTime;

#[async_trait]
impl Invoker for CurrentTime {
    async fn invoke(&self, _args: serde_json::Value) -> Result<ToolOutput, InvocationError> {
        Ok(ToolOutput::text(chrono::Utc::now().to_rfc3339()))
    }
}

fn current_time_binding() -> ToolBinding {
    ToolBinding::new(
        "current_time",
        "Returns the current date and time as an RFC 3339 timestamp. Takes no arguments.",
        ArgSchema::new(),
        Arc::new(CurrentTime),
    )
}

/// A registry pre-loaded with every built-in tool the gateway ships.
pub fn builtin_registry() -> crate::gateway::tool_registry::ToolRegistry {
    crate::gateway::tool_registry::ToolRegistry::new()
        .with_tool(calculator::binding())
        .with_tool(current_time_binding())
}
