//! Assistant - wires the conversation, speech and voice input together
//!
//! Builds every component from [`Config`] and owns their lifetimes. The
//! front-end drives it through the orchestrator and the listening commands.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::completion::{CompletionBackend, GeminiClient, LAASYA_SYSTEM_PROMPT};
use crate::conversation::Orchestrator;
use crate::emergency::EmergencyClassifier;
use crate::voice::{
    AudioSink, CpalSink, ElevenLabsSynthesizer, EspeakSynthesizer, FrameSource, ListenerState,
    MicrophoneFrames, RecognitionEvent, Recognizer, SpeechPipeline, SpeechSynthesizer,
    SpeechToText, VoiceInput, WakeEvent, WakeWordListener, open_spotter,
};
use crate::{Config, Result};

/// Which optional surfaces to enable
#[derive(Debug, Clone, Copy)]
pub struct AssistantOptions {
    /// Speak replies and accept microphone input
    pub voice: bool,
    /// Start the hands-free wake word listener
    pub wake_word: bool,
}

impl Default for AssistantOptions {
    fn default() -> Self {
        Self {
            voice: true,
            wake_word: true,
        }
    }
}

/// Running assistant
pub struct Assistant {
    orchestrator: Orchestrator,
    speech: SpeechPipeline,
    voice_input: Option<VoiceInput>,
    listener: Option<WakeWordListener>,
    wake_events: Option<mpsc::Receiver<WakeEvent>>,
    recognition_task: JoinHandle<()>,
}

impl Assistant {
    /// Build all components from configuration
    ///
    /// Missing optional services (premium voice, speech recognition, wake
    /// word) are logged and left disabled.
    ///
    /// # Errors
    ///
    /// Returns error if the completion backend cannot be created
    pub async fn build(config: &Config, options: AssistantOptions) -> Result<Self> {
        let backend: Arc<dyn CompletionBackend> =
            Arc::new(GeminiClient::from_config(&config.completion, &config.network)?);

        let speech = if options.voice {
            build_speech(config).await?
        } else {
            tracing::info!("voice output disabled");
            SpeechPipeline::muted()
        };

        let system_prompt = config
            .completion
            .system_prompt
            .clone()
            .unwrap_or_else(|| LAASYA_SYSTEM_PROMPT.to_string());

        let orchestrator = Orchestrator::new(
            backend,
            speech.clone(),
            EmergencyClassifier::new(),
            system_prompt,
        );

        let (events_tx, events_rx) = mpsc::channel::<RecognitionEvent>(32);
        let recognition_task = tokio::spawn(orchestrator.clone().consume_recognition(events_rx));

        let voice_input = if options.voice {
            build_voice_input(config, events_tx)?
        } else {
            None
        };

        let mut assistant = Self {
            orchestrator,
            speech,
            voice_input,
            listener: None,
            wake_events: None,
            recognition_task,
        };

        if options.voice && options.wake_word && config.wake_word.enabled {
            assistant.start_wake_word(config);
        }

        Ok(assistant)
    }

    fn start_wake_word(&mut self, config: &Config) {
        let (wake_tx, wake_rx) = mpsc::channel(8);
        let wake_config = config.wake_word.clone();

        let listener = WakeWordListener::start(
            Box::new(move || open_spotter(&wake_config)),
            Box::new(|| Ok(Box::new(MicrophoneFrames::open()?) as Box<dyn FrameSource>)),
            self.speech.clone(),
            wake_tx,
        );

        if listener.state() == ListenerState::Running {
            self.wake_events = Some(wake_rx);
        }
        self.listener = Some(listener);
    }

    /// Conversation orchestrator
    #[must_use]
    pub const fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Speech pipeline
    #[must_use]
    pub const fn speech(&self) -> &SpeechPipeline {
        &self.speech
    }

    /// Wake word listener state, `None` if it was never started
    #[must_use]
    pub fn wake_word_state(&self) -> Option<ListenerState> {
        self.listener.as_ref().map(WakeWordListener::state)
    }

    /// Wait for the next wake word activation
    ///
    /// Pends forever when hands-free mode is off.
    pub async fn next_wake(&mut self) -> Option<WakeEvent> {
        match self.wake_events.as_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Whether voice input is available
    #[must_use]
    pub const fn can_listen(&self) -> bool {
        self.voice_input.is_some()
    }

    /// Whether a listening session is running
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.voice_input.as_ref().is_some_and(VoiceInput::is_active)
    }

    /// Start a listening session, silencing any reply first
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened
    pub async fn start_listening(&mut self) -> Result<()> {
        if self.voice_input.is_none() {
            tracing::warn!("voice input unavailable");
            return Ok(());
        }
        self.speech.stop();
        self.open_microphone().await
    }

    /// Start a listening session after a wake word activation
    ///
    /// The listener has already silenced the reply and queued the chime;
    /// speech is left alone so the chime is heard.
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened
    pub async fn listen_after_wake(&mut self, event: WakeEvent) -> Result<()> {
        let WakeEvent::Detected { keyword_index } = event;
        tracing::debug!(keyword_index, "starting voice input after wake word");
        self.open_microphone().await
    }

    async fn open_microphone(&mut self) -> Result<()> {
        match self.voice_input.as_mut() {
            Some(voice_input) => voice_input.start_listening().await,
            None => {
                tracing::warn!("voice input unavailable");
                Ok(())
            }
        }
    }

    /// End the listening session
    pub fn stop_listening(&mut self) {
        if let Some(voice_input) = self.voice_input.as_mut() {
            voice_input.stop_listening();
        }
        self.orchestrator.set_listening(false);
    }

    /// Stop everything and release audio devices
    pub fn shutdown(mut self) {
        if let Some(mut listener) = self.listener.take() {
            listener.stop();
        }
        self.stop_listening();
        self.orchestrator.cancel_turn();
        self.speech.shutdown();
        self.recognition_task.abort();
        tracing::info!("assistant shut down");
    }
}

/// Build the speech pipeline with the premium voice when configured
///
/// # Errors
///
/// Returns error if the HTTP client or playback thread cannot be created
pub async fn build_speech(config: &Config) -> Result<SpeechPipeline> {
    let primary: Option<Arc<dyn SpeechSynthesizer>> =
        match ElevenLabsSynthesizer::from_config(&config.speech, &config.network)? {
            Some(synth) => Some(Arc::new(synth)),
            None => {
                tracing::warn!("ElevenLabs not configured, using local voice only");
                None
            }
        };
    let fallback: Arc<dyn SpeechSynthesizer> =
        Arc::new(EspeakSynthesizer::configure(&config.speech.local).await);

    SpeechPipeline::spawn(
        primary,
        fallback,
        Box::new(|| Ok(Box::new(CpalSink::new()?) as Box<dyn AudioSink>)),
    )
}

fn build_voice_input(
    config: &Config,
    events: mpsc::Sender<RecognitionEvent>,
) -> Result<Option<VoiceInput>> {
    let Some(stt) = SpeechToText::from_config(&config.recognition, &config.network)? else {
        tracing::warn!("OPENAI_API_KEY not set, voice input disabled");
        return Ok(None);
    };

    let recognizer = Recognizer::new(Arc::new(stt))
        .with_partial_interval(config.recognition.partial_interval);
    Ok(Some(VoiceInput::new(recognizer, events)))
}
