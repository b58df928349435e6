//! Conversation message model shared with the host agent loop.
//!
//! The LLM client itself lives outside this crate; these are the types it
//! exchanges with the message processor and tool registry.

pub mod types;

pub use types::*;
