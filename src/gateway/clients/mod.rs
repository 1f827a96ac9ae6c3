// src/gateway/clients/mod.rs
//!
//! Concrete [`BackendClient`](crate::gateway::backend_client::BackendClient) implementations.
//! Only the OpenAI-compatible HTTP shape is implemented: every self-hosted model server this
//! gateway fronts in practice speaks the same Chat Completions wire format, so one client covers
//! cloud and self-hosted backends alike — the distinction is just which `base_url` and headers a
//! model definition supplies. Vendor-specific clients (Claude, Gemini, Grok) from the teacher
//! crate are dropped here: see `DESIGN.md` for the rationale.

pub mod http_pool;
pub mod openai;
