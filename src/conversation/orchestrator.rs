//! Conversation orchestrator
//!
//! Single writer of [`ConversationState`]. Each submitted message starts a
//! turn: classify the input, stream the reply, speak it phrase by phrase,
//! then finalize the reply from its markers. A new submit supersedes the
//! running turn.
//!
//! ```text
//! Idle ─submit─► AwaitingClassification ─► Streaming ─end─► Finalizing ─► Idle
//!                                              │
//!                                              └─error/cancel─► Idle
//! ```
//!
//! Every write made by a turn task is checked against the current turn id,
//! so a superseded turn can never touch the state again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::chunking::SpeechChunker;
use super::types::{ConversationState, Originator, TurnPhase, Utterance};
use crate::completion::{Attachment, CompletionBackend, CompletionRequest, UserMessage};
use crate::emergency::{EmergencyClassifier, EmergencyTier};
use crate::markers::{parse_reply, strip_markers, trim_open_bracket};
use crate::voice::{RecognitionEvent, SpeechPipeline};

/// Opening line spoken when the assistant starts
pub const GREETING: &str =
    "నమస్కారమండి! నేను డాక్టర్ లాస్యని. మీకు ఏం సమస్యగా ఉందో చెప్పండి అండి. 🌸";

struct ActiveTurn {
    id: u64,
    cancel: CancellationToken,
}

struct Inner {
    state: watch::Sender<ConversationState>,
    backend: Arc<dyn CompletionBackend>,
    speech: SpeechPipeline,
    classifier: EmergencyClassifier,
    system_prompt: String,
    current_turn: AtomicU64,
    active: Mutex<Option<ActiveTurn>>,
}

impl Inner {
    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveTurn>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, turn: u64) -> bool {
        self.current_turn.load(Ordering::SeqCst) == turn
    }

    /// Apply `f` only while `turn` is still current
    fn update(&self, turn: u64, f: impl FnOnce(&mut ConversationState)) -> bool {
        let mut applied = false;
        self.state.send_if_modified(|state| {
            if self.is_current(turn) {
                f(state);
                applied = true;
            }
            applied
        });
        applied
    }

    /// Speak on behalf of `turn`, serialized against supersession
    fn speak_for(&self, turn: u64, text: &str) {
        let _active = self.lock_active();
        if self.is_current(turn) {
            self.speech.speak(text);
        }
    }

    fn fail(&self, turn: u64, message: String) {
        tracing::warn!(turn, error = %message, "turn failed");
        self.update(turn, |state| {
            freeze_open_reply(state);
            state.is_generating = false;
            state.phase = TurnPhase::Idle;
            state.error = Some(message);
        });
    }

    fn finalize(&self, turn: u64) {
        if !self.update(turn, |state| state.phase = TurnPhase::Finalizing) {
            return;
        }

        let classifier = &self.classifier;
        self.update(turn, |state| {
            if let Some(reply) = open_reply(state) {
                let tier = classifier.analyze_output(&reply.text);
                let (text, flags) = parse_reply(&reply.text);
                reply.text = text;
                reply.show_camera = flags.show_camera;
                reply.emergency = tier.is_critical();
                reply.finalized = true;

                if flags.show_camera {
                    state.pending_camera_prompt = true;
                }
                state.emergency_tier = state.emergency_tier.escalate(tier);
            }
            state.is_generating = false;
            state.phase = TurnPhase::Idle;
        });

        tracing::debug!(turn, "turn finalized");
    }
}

/// The reply still being streamed, if any
fn open_reply(state: &mut ConversationState) -> Option<&mut Utterance> {
    state
        .log
        .iter_mut()
        .rev()
        .find(|u| u.originator == Originator::Assistant && !u.finalized)
}

/// Freeze a partially streamed reply, markers and any half marker removed
fn freeze_open_reply(state: &mut ConversationState) {
    if let Some(reply) = open_reply(state) {
        let text = strip_markers(&reply.text);
        reply.text = trim_open_bracket(&text).trim().to_string();
        reply.finalized = true;
    }
}

/// Handle to a running turn
pub struct TurnHandle {
    id: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TurnHandle {
    /// Turn identifier
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Whether the turn has been superseded or cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the turn task to exit
    pub async fn finished(self) {
        if let Err(e) = self.task.await {
            tracing::error!(turn = self.id, error = %e, "turn task failed");
        }
    }
}

/// Drives conversation turns and publishes their state
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Create an orchestrator with an empty conversation
    #[must_use]
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        speech: SpeechPipeline,
        classifier: EmergencyClassifier,
        system_prompt: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(ConversationState::default());
        Self {
            inner: Arc::new(Inner {
                state,
                backend,
                speech,
                classifier,
                system_prompt: system_prompt.into(),
                current_turn: AtomicU64::new(0),
                active: Mutex::new(None),
            }),
        }
    }

    /// Observe state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.inner.state.subscribe()
    }

    /// Current state
    #[must_use]
    pub fn snapshot(&self) -> ConversationState {
        self.inner.state.borrow().clone()
    }

    /// Speech pipeline used for replies
    #[must_use]
    pub fn speech(&self) -> &SpeechPipeline {
        &self.inner.speech
    }

    /// Add and speak the opening greeting
    pub fn greet(&self) {
        self.inner.state.send_modify(|state| {
            state.log.push(Utterance::assistant(GREETING));
        });
        self.inner.speech.speak(GREETING);
    }

    /// Submit a user message
    ///
    /// Blank text is ignored and returns `None`. Otherwise any running turn
    /// is cancelled and a new one starts.
    pub fn submit(&self, text: &str) -> Option<TurnHandle> {
        self.start_turn(text, None)
    }

    /// Submit a user message with an inline image
    pub fn submit_with_attachment(&self, text: &str, attachment: Attachment) -> Option<TurnHandle> {
        self.start_turn(text, Some(attachment))
    }

    fn start_turn(&self, text: &str, attachment: Option<Attachment>) -> Option<TurnHandle> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let inner = &self.inner;
        let cancel = CancellationToken::new();

        let (turn, history) = {
            let mut active = inner.lock_active();
            if let Some(previous) = active.take() {
                tracing::debug!(turn = previous.id, "superseding running turn");
                previous.cancel.cancel();
            }

            let turn = inner.current_turn.fetch_add(1, Ordering::SeqCst) + 1;
            inner.speech.stop();

            let mut history = Vec::new();
            let has_attachment = attachment.is_some();
            inner.state.send_modify(|state| {
                freeze_open_reply(state);
                history = state.log.clone();
                state.log.push(Utterance::user(text));
                state.pending_input_text.clear();
                state.is_generating = true;
                state.is_listening = false;
                state.error = None;
                // Only an emergency outlives its turn
                if !state.emergency_tier.is_critical() {
                    state.emergency_tier = EmergencyTier::Normal;
                }
                if has_attachment {
                    state.pending_camera_prompt = false;
                }
                state.phase = TurnPhase::AwaitingClassification;
            });

            *active = Some(ActiveTurn {
                id: turn,
                cancel: cancel.clone(),
            });
            (turn, history)
        };

        let tier = inner.classifier.analyze(text);
        inner.update(turn, |state| {
            state.emergency_tier = state.emergency_tier.escalate(tier);
        });
        if tier == EmergencyTier::Critical {
            tracing::warn!(turn, "critical input, emergency raised");
        }

        let request = CompletionRequest {
            system_prompt: inner.system_prompt.clone(),
            history,
            message: UserMessage {
                text: text.to_string(),
                attachment,
            },
        };

        tracing::info!(turn, %tier, "turn started");
        let task = tokio::spawn(run_turn(Arc::clone(inner), turn, cancel.clone(), request));

        Some(TurnHandle { id: turn, cancel, task })
    }

    /// Stop the running turn, keeping what was already streamed
    pub fn cancel_turn(&self) {
        let inner = &self.inner;
        let mut active = inner.lock_active();
        let Some(previous) = active.take() else {
            return;
        };
        previous.cancel.cancel();
        inner.current_turn.fetch_add(1, Ordering::SeqCst);
        inner.speech.stop();
        inner.state.send_modify(|state| {
            freeze_open_reply(state);
            state.is_generating = false;
            state.phase = TurnPhase::Idle;
        });
        tracing::debug!(turn = previous.id, "turn cancelled");
    }

    /// Clear the emergency tier; generation continues
    pub fn dismiss_emergency(&self) {
        self.inner.state.send_modify(|state| {
            state.emergency_tier = EmergencyTier::Normal;
        });
    }

    /// Hide the camera follow-up
    pub fn dismiss_camera_prompt(&self) {
        self.inner.state.send_if_modified(|state| {
            std::mem::replace(&mut state.pending_camera_prompt, false)
        });
    }

    /// Mirror the text the user is composing
    pub fn set_input_text(&self, text: &str) {
        self.inner.state.send_if_modified(|state| {
            if state.pending_input_text == text {
                false
            } else {
                state.pending_input_text = text.to_string();
                true
            }
        });
    }

    /// Mirror microphone activity
    pub fn set_listening(&self, listening: bool) {
        self.inner.state.send_if_modified(|state| {
            std::mem::replace(&mut state.is_listening, listening) != listening
        });
    }

    /// Consume recognition events until the channel closes
    ///
    /// Final transcripts are submitted as user messages.
    pub async fn consume_recognition(self, mut events: mpsc::Receiver<RecognitionEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                RecognitionEvent::ListeningStarted => self.set_listening(true),
                RecognitionEvent::PartialResult(text) => {
                    tracing::debug!(partial = %text, "partial recognition");
                    self.set_input_text(&text);
                }
                RecognitionEvent::FinalResult(text) => {
                    self.set_listening(false);
                    if self.submit(&text).is_none() {
                        self.set_input_text("");
                    }
                }
                RecognitionEvent::Error(message) => {
                    tracing::warn!(error = %message, "recognition failed");
                    self.inner.state.send_modify(|state| {
                        state.is_listening = false;
                        state.error = Some(message);
                    });
                }
            }
        }
    }
}

async fn run_turn(inner: Arc<Inner>, turn: u64, cancel: CancellationToken, request: CompletionRequest) {
    inner.update(turn, |state| state.phase = TurnPhase::Streaming);

    let opened = tokio::select! {
        () = cancel.cancelled() => return,
        opened = inner.backend.stream_completion(request) => opened,
    };

    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            inner.fail(turn, e.to_string());
            return;
        }
    };

    let mut chunker = SpeechChunker::new();
    let mut fragments = 0_usize;

    loop {
        let item = tokio::select! {
            () = cancel.cancelled() => return,
            item = stream.next() => item,
        };

        match item {
            Some(Ok(fragment)) => {
                if fragment.is_empty() {
                    continue;
                }

                let applied = inner.update(turn, |state| match open_reply(state) {
                    Some(reply) => reply.text.push_str(&fragment),
                    None => state.log.push(Utterance::streaming(fragment.clone())),
                });
                if !applied {
                    return;
                }
                fragments += 1;

                if let Some(chunk) = chunker.push(&fragment) {
                    inner.speak_for(turn, &chunk);
                }
            }
            Some(Err(e)) => {
                inner.fail(turn, e.to_string());
                return;
            }
            None => break,
        }
    }

    if let Some(rest) = chunker.finish() {
        inner.speak_for(turn, &rest);
    }

    tracing::debug!(turn, fragments, "reply stream complete");
    inner.finalize(turn);

    let mut active = inner.lock_active();
    if active.as_ref().is_some_and(|a| a.id == turn) {
        *active = None;
    }
}
