//! Voice capture: microphone audio to recognition events
//!
//! An energy VAD segments one utterance, which is then transcribed. Events
//! go to a single subscriber over a channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::capture::{AudioCapture, SAMPLE_RATE, calculate_energy, samples_to_wav};
use super::stt::Transcriber;
use crate::{Error, Result};

/// Interval between microphone buffer drains
const CAPTURE_INTERVAL: Duration = Duration::from_millis(100);

/// Events published while listening
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// The microphone is open
    ListeningStarted,
    /// Interim transcript, for display only
    PartialResult(String),
    /// Final transcript of the utterance
    FinalResult(String),
    /// Listening ended without a usable transcript
    Error(String),
}

/// Voice activity thresholds
#[derive(Debug, Clone, Copy)]
pub struct SegmenterConfig {
    /// RMS energy above which a chunk counts as speech
    pub energy_threshold: f32,
    /// Silence after speech that ends the utterance
    pub end_silence: Duration,
    /// Give up if no speech starts within this time
    pub max_wait: Duration,
    /// Hard cap on utterance length
    pub max_utterance: Duration,
    /// Shorter bursts are treated as noise
    pub min_speech: Duration,
    pub sample_rate: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.03,
            end_silence: Duration::from_secs(2),
            max_wait: Duration::from_secs(8),
            max_utterance: Duration::from_secs(30),
            min_speech: Duration::from_millis(300),
            sample_rate: SAMPLE_RATE,
        }
    }
}

impl SegmenterConfig {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn samples(&self, duration: Duration) -> usize {
        (duration.as_secs_f64() * f64::from(self.sample_rate)) as usize
    }
}

/// Segmenter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech
    Waiting,
    /// Speech in progress, accumulating
    Speaking,
}

/// Outcome of feeding one chunk
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Nothing decided yet
    Pending,
    /// Speech just began
    SpeechStarted,
    /// Utterance finished; samples include the trailing silence
    Complete(Vec<f32>),
    /// Nobody spoke before the wait limit
    NoSpeech,
}

/// Energy-based utterance segmenter
pub struct UtteranceSegmenter {
    config: SegmenterConfig,
    state: SegmenterState,
    buffer: Vec<f32>,
    silence: usize,
    waited: usize,
}

impl UtteranceSegmenter {
    #[must_use]
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            state: SegmenterState::Waiting,
            buffer: Vec::new(),
            silence: 0,
            waited: 0,
        }
    }

    /// Feed a chunk of mono samples
    pub fn push(&mut self, samples: &[f32]) -> Segment {
        let energy = calculate_energy(samples);
        let is_speech = energy > self.config.energy_threshold;

        match self.state {
            SegmenterState::Waiting => {
                if is_speech {
                    self.state = SegmenterState::Speaking;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(samples);
                    self.silence = 0;
                    tracing::trace!(energy, "speech started");
                    return Segment::SpeechStarted;
                }

                self.waited += samples.len();
                if self.waited >= self.config.samples(self.config.max_wait) {
                    tracing::debug!("no speech before timeout");
                    self.reset();
                    return Segment::NoSpeech;
                }
            }
            SegmenterState::Speaking => {
                self.buffer.extend_from_slice(samples);
                if is_speech {
                    self.silence = 0;
                } else {
                    self.silence += samples.len();
                }

                if self.buffer.len() >= self.config.samples(self.config.max_utterance) {
                    tracing::debug!(samples = self.buffer.len(), "utterance hit length cap");
                    return Segment::Complete(self.take());
                }

                if self.silence >= self.config.samples(self.config.end_silence) {
                    let spoken = self.buffer.len() - self.silence;
                    if spoken >= self.config.samples(self.config.min_speech) {
                        tracing::debug!(samples = self.buffer.len(), "utterance complete");
                        return Segment::Complete(self.take());
                    }
                    // Too short to be speech; keep waiting
                    self.waited += self.buffer.len();
                    self.state = SegmenterState::Waiting;
                    self.buffer.clear();
                    self.silence = 0;
                }
            }
        }

        Segment::Pending
    }

    /// Flush when the audio source ends, returning any usable speech
    pub fn finish(&mut self) -> Option<Vec<f32>> {
        if self.state != SegmenterState::Speaking {
            return None;
        }
        let spoken = self.buffer.len() - self.silence;
        if spoken >= self.config.samples(self.config.min_speech) {
            Some(self.take())
        } else {
            self.reset();
            None
        }
    }

    /// Speech accumulated so far
    #[must_use]
    pub fn buffer(&self) -> &[f32] {
        &self.buffer
    }

    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }

    /// Return to waiting and forget buffered audio
    pub fn reset(&mut self) {
        self.state = SegmenterState::Waiting;
        self.buffer.clear();
        self.silence = 0;
        self.waited = 0;
    }

    fn take(&mut self) -> Vec<f32> {
        let samples = std::mem::take(&mut self.buffer);
        self.reset();
        samples
    }
}

/// Turns a stream of audio chunks into recognition events
pub struct Recognizer {
    transcriber: Arc<dyn Transcriber>,
    segmenter: SegmenterConfig,
    partial_interval: Option<Duration>,
}

impl Recognizer {
    #[must_use]
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            transcriber,
            segmenter: SegmenterConfig::default(),
            partial_interval: None,
        }
    }

    #[must_use]
    pub const fn with_segmenter(mut self, config: SegmenterConfig) -> Self {
        self.segmenter = config;
        self
    }

    /// Emit interim transcripts every `interval` of speech
    #[must_use]
    pub const fn with_partial_interval(mut self, interval: Option<Duration>) -> Self {
        self.partial_interval = interval;
        self
    }

    /// Recognize one utterance from `audio`
    ///
    /// Ends after one final result or error, or when `audio` closes.
    pub async fn recognize(
        &self,
        mut audio: mpsc::Receiver<Vec<f32>>,
        events: mpsc::Sender<RecognitionEvent>,
    ) {
        if events.send(RecognitionEvent::ListeningStarted).await.is_err() {
            return;
        }

        let mut segmenter = UtteranceSegmenter::new(self.segmenter);
        let partial_step = self
            .partial_interval
            .map(|interval| self.segmenter.samples(interval).max(1));
        let mut next_partial = partial_step.unwrap_or(usize::MAX);

        let outcome = loop {
            let Some(chunk) = audio.recv().await else {
                break segmenter.finish().ok_or(Segment::NoSpeech);
            };

            match segmenter.push(&chunk) {
                Segment::Complete(samples) => break Ok(samples),
                Segment::NoSpeech => break Err(Segment::NoSpeech),
                Segment::SpeechStarted => {
                    next_partial = partial_step.unwrap_or(usize::MAX);
                }
                Segment::Pending => {}
            }

            if let Some(step) = partial_step {
                if segmenter.state() == SegmenterState::Speaking
                    && segmenter.buffer().len() >= next_partial
                {
                    next_partial = segmenter.buffer().len() + step;
                    if let Ok(text) = self.transcribe(segmenter.buffer()).await
                        && !text.is_empty()
                    {
                        tracing::debug!(partial = %text, "partial result");
                        let _ = events.send(RecognitionEvent::PartialResult(text)).await;
                    }
                }
            }
        };

        // Stop the microphone before the (slow) final transcription
        drop(audio);

        let event = match outcome {
            Ok(samples) => match self.transcribe(&samples).await {
                Ok(text) if !text.is_empty() => RecognitionEvent::FinalResult(text),
                Ok(_) => RecognitionEvent::Error("empty transcript".to_string()),
                Err(e) => {
                    tracing::warn!(error = %e, "transcription failed");
                    RecognitionEvent::Error(e.to_string())
                }
            },
            Err(_) => RecognitionEvent::Error("no speech detected".to_string()),
        };

        let _ = events.send(event).await;
    }

    async fn transcribe(&self, samples: &[f32]) -> Result<String> {
        let wav = samples_to_wav(samples, self.segmenter.sample_rate)?;
        let text = self.transcriber.transcribe(&wav).await?;
        Ok(text.trim().to_string())
    }
}

struct Session {
    stop: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

/// Owns the microphone for one listening session at a time
pub struct VoiceInput {
    recognizer: Arc<Recognizer>,
    events: mpsc::Sender<RecognitionEvent>,
    session: Option<Session>,
}

impl VoiceInput {
    #[must_use]
    pub fn new(recognizer: Recognizer, events: mpsc::Sender<RecognitionEvent>) -> Self {
        Self {
            recognizer: Arc::new(recognizer),
            events,
            session: None,
        }
    }

    /// Whether a session is still running
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.task.is_finished())
    }

    /// Open the microphone and start recognizing
    ///
    /// No-op while a session is active.
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened
    pub async fn start_listening(&mut self) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }

        let (audio_tx, audio_rx) = mpsc::channel::<Vec<f32>>(64);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let stop = Arc::new(AtomicBool::new(false));

        {
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("microphone".to_string())
                .spawn(move || run_microphone(&audio_tx, &stop, ready_tx))
                .map_err(|e| Error::Audio(format!("failed to spawn microphone thread: {e}")))?;
        }

        ready_rx
            .await
            .map_err(|_| Error::Audio("microphone thread exited".to_string()))??;

        let recognizer = Arc::clone(&self.recognizer);
        let events = self.events.clone();
        let task = tokio::spawn(async move { recognizer.recognize(audio_rx, events).await });

        self.session = Some(Session { stop, task });
        tracing::info!("listening");
        Ok(())
    }

    /// Close the microphone; buffered speech is still transcribed
    pub fn stop_listening(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop.store(true, Ordering::SeqCst);
            tracing::debug!("listening stopped");
        }
    }
}

/// Microphone thread: forward captured chunks until stopped or unheard
fn run_microphone(
    audio: &mpsc::Sender<Vec<f32>>,
    stop: &AtomicBool,
    ready: oneshot::Sender<Result<()>>,
) {
    let mut capture = match AudioCapture::new().and_then(|mut c| c.start().map(|()| c)) {
        Ok(capture) => capture,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(CAPTURE_INTERVAL);
        let chunk = capture.take_buffer();
        if !chunk.is_empty() && audio.blocking_send(chunk).is_err() {
            break;
        }
    }

    capture.stop();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SegmenterConfig {
        SegmenterConfig {
            sample_rate: 1000,
            end_silence: Duration::from_millis(500),
            max_wait: Duration::from_secs(2),
            max_utterance: Duration::from_secs(5),
            min_speech: Duration::from_millis(200),
            ..SegmenterConfig::default()
        }
    }

    const LOUD: [f32; 100] = [0.5; 100];
    const QUIET: [f32; 100] = [0.0; 100];

    #[test]
    fn test_segment_speech_then_silence() {
        let mut seg = UtteranceSegmenter::new(config());
        assert_eq!(seg.push(&QUIET), Segment::Pending);
        assert_eq!(seg.push(&LOUD), Segment::SpeechStarted);
        for _ in 0..3 {
            assert_eq!(seg.push(&LOUD), Segment::Pending);
        }
        for _ in 0..4 {
            assert_eq!(seg.push(&QUIET), Segment::Pending);
        }
        match seg.push(&QUIET) {
            Segment::Complete(samples) => assert_eq!(samples.len(), 900),
            other => panic!("expected complete, got {other:?}"),
        }
        assert_eq!(seg.state(), SegmenterState::Waiting);
    }

    #[test]
    fn test_no_speech_times_out() {
        let mut seg = UtteranceSegmenter::new(config());
        for _ in 0..19 {
            assert_eq!(seg.push(&QUIET), Segment::Pending);
        }
        assert_eq!(seg.push(&QUIET), Segment::NoSpeech);
    }

    #[test]
    fn test_short_blip_is_ignored() {
        let mut seg = UtteranceSegmenter::new(config());
        assert_eq!(seg.push(&LOUD), Segment::SpeechStarted);
        for _ in 0..5 {
            assert_eq!(seg.push(&QUIET), Segment::Pending);
        }
        assert_eq!(seg.state(), SegmenterState::Waiting);
        assert!(seg.buffer().is_empty());
    }

    #[test]
    fn test_length_cap() {
        let mut seg = UtteranceSegmenter::new(config());
        seg.push(&LOUD);
        let mut result = Segment::Pending;
        for _ in 0..60 {
            result = seg.push(&LOUD);
            if matches!(result, Segment::Complete(_)) {
                break;
            }
        }
        assert!(matches!(result, Segment::Complete(ref s) if s.len() == 5000));
    }

    #[test]
    fn test_finish_flushes_speech() {
        let mut seg = UtteranceSegmenter::new(config());
        assert!(seg.finish().is_none());
        seg.push(&LOUD);
        seg.push(&LOUD);
        seg.push(&LOUD);
        assert_eq!(seg.finish().map(|s| s.len()), Some(300));
    }
}
