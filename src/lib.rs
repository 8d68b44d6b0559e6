//! Laasya - voice-first Telugu medical assistant core
//!
//! This library provides the conversational engine behind Doctor Laasya:
//! - Streaming completions with phrase-by-phrase speech output
//! - Emergency detection on user input and model output
//! - Ordered speech synthesis with a local fallback voice
//! - Hands-free activation through a wake word
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Front-end (CLI)                    │
//! │     typed input  │  state rendering  │  commands     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                Conversation Orchestrator             │
//! │   Emergency  │  Completion stream  │  Chunking       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                        Voice                         │
//! │   Wake word  │  Recognition  │  TTS  │  Playback     │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod assistant;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod emergency;
pub mod error;
pub mod markers;
pub mod voice;

pub use assistant::{Assistant, AssistantOptions};
pub use config::Config;
pub use conversation::{ConversationState, Orchestrator, TurnHandle};
pub use emergency::{EmergencyClassifier, EmergencyTier};
pub use error::{Error, Result};
