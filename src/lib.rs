//! contentforge - Core Library
//!
//! A content-generation backend that routes free-text prompts to specialized
//! agents, enriches them with web/academic search, and streams results back
//! over Server-Sent Events.

pub mod agents;
pub mod cli;
pub mod llm;
pub mod memory;
pub mod middleware;
pub mod orchestrator;
pub mod plan;
pub mod search;
pub mod server;
pub mod settings;
pub mod telemetry;
pub mod tools;

pub use agents::Agent;
pub use orchestrator::Orchestrator;
