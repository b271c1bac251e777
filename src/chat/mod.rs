//! Retrieval-augmented chat turns.

pub mod instructions;
mod orchestrator;

pub use orchestrator::{ChatError, ChatTurn, RagOrchestrator};
