// src/lib.rs

//! `llm_gateway`: an OpenAI-compatible HTTP gateway fronting heterogeneous LLM backends.
//!
//! The binary entry point (`src/main.rs`) wires the components declared here into an
//! `axum::Router` and serves it. See [`gateway::http::build_router`] for the assembled surface.

pub mod gateway;

pub use gateway::client_wrapper::{Message, Role, ToolCall, ToolDeclaration};
pub use gateway::error::GatewayError;
