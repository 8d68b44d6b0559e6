//! Conversation data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::emergency::EmergencyTier;

/// Who produced an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Originator {
    User,
    Assistant,
}

/// One entry in the conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    /// Unique identifier
    pub id: Uuid,
    /// Display text, markers removed once finalized
    pub text: String,
    /// Producer of the text
    pub originator: Originator,
    /// Reply carried the emergency marker
    pub emergency: bool,
    /// Reply suggested a photo
    pub show_camera: bool,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// No further edits allowed
    pub finalized: bool,
}

impl Utterance {
    /// Create a finalized user utterance
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(text.into(), Originator::User, true)
    }

    /// Create a finalized assistant utterance
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(text.into(), Originator::Assistant, true)
    }

    /// Create an assistant utterance that is still being streamed
    #[must_use]
    pub fn streaming(text: impl Into<String>) -> Self {
        Self::new(text.into(), Originator::Assistant, false)
    }

    fn new(text: String, originator: Originator, finalized: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            text,
            originator,
            emergency: false,
            show_camera: false,
            timestamp: Utc::now(),
            finalized,
        }
    }

    /// Whether the utterance came from the user
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.originator == Originator::User
    }
}

/// Where the orchestrator is in the current turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    #[default]
    Idle,
    AwaitingClassification,
    Streaming,
    Finalizing,
}

/// Observable conversation state
///
/// Published by the orchestrator as read-only snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationState {
    /// Ordered conversation log
    pub log: Vec<Utterance>,
    /// Text the user is composing
    pub pending_input_text: String,
    /// Microphone is capturing
    pub is_listening: bool,
    /// A reply is being generated
    pub is_generating: bool,
    /// Current severity, sticky until dismissed
    pub emergency_tier: EmergencyTier,
    /// Camera follow-up should be offered
    pub pending_camera_prompt: bool,
    /// Turn phase
    pub phase: TurnPhase,
    /// Last turn failure, cleared on the next submit
    pub error: Option<String>,
}

impl ConversationState {
    /// Whether the emergency overlay should be shown
    #[must_use]
    pub const fn emergency_active(&self) -> bool {
        self.emergency_tier.is_critical()
    }

    /// Most recent assistant utterance, if any
    #[must_use]
    pub fn last_reply(&self) -> Option<&Utterance> {
        self.log
            .iter()
            .rev()
            .find(|u| u.originator == Originator::Assistant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let user = Utterance::user("నమస్కారం");
        assert!(user.is_user());
        assert!(user.finalized);

        let partial = Utterance::streaming("అర్థ");
        assert_eq!(partial.originator, Originator::Assistant);
        assert!(!partial.finalized);
        assert_ne!(user.id, partial.id);
    }

    #[test]
    fn test_last_reply() {
        let mut state = ConversationState::default();
        assert!(state.last_reply().is_none());

        state.log.push(Utterance::assistant("one"));
        state.log.push(Utterance::user("two"));
        assert_eq!(state.last_reply().map(|u| u.text.as_str()), Some("one"));
        assert!(!state.emergency_active());
    }
}
