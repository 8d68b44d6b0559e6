//! Conversation state and turn orchestration

pub mod chunking;
pub mod orchestrator;
pub mod types;

pub use chunking::{SpeechChunker, is_natural_pause};
pub use orchestrator::{GREETING, Orchestrator, TurnHandle};
pub use types::{ConversationState, Originator, TurnPhase, Utterance};
