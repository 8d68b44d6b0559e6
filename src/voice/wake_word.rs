//! Wake word listener
//!
//! A dedicated thread reads fixed-size frames from the microphone and runs
//! them through a keyword spotter. On a match it silences any reply in
//! progress, speaks a short acknowledgement and notifies the application.
//! The application must not stop speech again when it starts listening, or
//! the acknowledgement is lost.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::capture::{AudioCapture, SAMPLE_RATE, f32_to_i16};
use super::pipeline::SpeechPipeline;
use crate::config::WakeWordConfig;
use crate::{Error, Result};

/// Spoken acknowledgement after activation
pub const WAKE_CHIME: &str = "చెప్పండి అండి";

/// Longest a microphone read waits for a full frame
const FRAME_WAIT: Duration = Duration::from_millis(250);

/// Keyword spotting engine
///
/// Created on the listener thread, so it need not be `Send`.
pub trait KeywordSpotter {
    /// Samples per frame expected by `process`
    fn frame_length(&self) -> usize;

    /// Sample rate the engine expects
    fn sample_rate(&self) -> u32;

    /// Process one frame, returning the matched keyword index or a negative value
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails on this frame
    fn process(&mut self, frame: &[i16]) -> Result<i32>;
}

/// Source of 16-bit PCM frames
pub trait FrameSource {
    /// Fill `buf`, returning how many samples were written
    ///
    /// # Errors
    ///
    /// Returns error if the device fails
    fn read_frame(&mut self, buf: &mut [i16]) -> Result<usize>;
}

/// Builds the spotter on the listener thread
pub type SpotterFactory = Box<dyn FnOnce() -> Result<Box<dyn KeywordSpotter>> + Send>;

/// Builds the frame source on the listener thread
pub type SourceFactory = Box<dyn FnOnce() -> Result<Box<dyn FrameSource>> + Send>;

/// Emitted when the wake word is heard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeEvent {
    Detected { keyword_index: i32 },
}

/// Listener lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Loop is running
    Running,
    /// Engine or microphone unavailable; hands-free mode is off
    Disabled,
    /// Stopped by the application
    Stopped,
}

/// Always-on wake word loop
pub struct WakeWordListener {
    state: Arc<Mutex<ListenerState>>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WakeWordListener {
    /// Start listening on a thread named `wake-word`
    ///
    /// Never fails: if the engine or the microphone cannot be opened the
    /// listener comes back [`ListenerState::Disabled`].
    pub fn start(
        spotter_factory: SpotterFactory,
        source_factory: SourceFactory,
        speech: SpeechPipeline,
        activations: mpsc::Sender<WakeEvent>,
    ) -> Self {
        let state = Arc::new(Mutex::new(ListenerState::Running));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

        let spawned = {
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("wake-word".to_string())
                .spawn(move || {
                    let opened = spotter_factory()
                        .and_then(|spotter| source_factory().map(|source| (spotter, source)));
                    match opened {
                        Ok((spotter, source)) => {
                            let _ = ready_tx.send(Ok(()));
                            run_loop(spotter, source, &speech, &activations, &shutdown);
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                        }
                    }
                })
        };

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                tracing::warn!(error = %e, "failed to spawn wake word thread");
                *state.lock().unwrap_or_else(PoisonError::into_inner) = ListenerState::Disabled;
                return Self {
                    state,
                    shutdown,
                    thread: None,
                };
            }
        };

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(Error::WakeWord("listener thread exited".to_string())));

        if let Err(e) = ready {
            tracing::warn!(error = %e, "wake word unavailable, hands-free mode disabled");
            *state.lock().unwrap_or_else(PoisonError::into_inner) = ListenerState::Disabled;
            let _ = thread.join();
            return Self {
                state,
                shutdown,
                thread: None,
            };
        }

        tracing::info!("listening for wake word");
        Self {
            state,
            shutdown,
            thread: Some(thread),
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ListenerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop the loop and release the engine and microphone
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("wake word thread panicked");
            }
            *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ListenerState::Stopped;
            tracing::debug!("wake word listener stopped");
        }
    }
}

impl Drop for WakeWordListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    mut spotter: Box<dyn KeywordSpotter>,
    mut source: Box<dyn FrameSource>,
    speech: &SpeechPipeline,
    activations: &mpsc::Sender<WakeEvent>,
    shutdown: &AtomicBool,
) {
    let mut frame = vec![0_i16; spotter.frame_length()];
    tracing::debug!(
        frame_length = frame.len(),
        sample_rate = spotter.sample_rate(),
        "wake word loop started"
    );

    while !shutdown.load(Ordering::SeqCst) {
        match source.read_frame(&mut frame) {
            Ok(n) if n == frame.len() => {}
            Ok(_) => {
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read audio frame");
                std::thread::sleep(Duration::from_millis(100));
                continue;
            }
        }

        match spotter.process(&frame) {
            Ok(index) if index >= 0 => {
                tracing::info!(keyword_index = index, "wake word detected");
                speech.stop();
                speech.speak(WAKE_CHIME);
                if let Err(e) = activations.try_send(WakeEvent::Detected {
                    keyword_index: index,
                }) {
                    tracing::warn!(error = %e, "dropping wake event");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "wake word engine error"),
        }
    }

    // Engine and microphone are released here
    drop(spotter);
    drop(source);
}

/// Frames from the default microphone at 16kHz
pub struct MicrophoneFrames {
    capture: AudioCapture,
}

impl MicrophoneFrames {
    /// Open and start the microphone
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened
    pub fn open() -> Result<Self> {
        let mut capture = AudioCapture::new()?;
        capture.start()?;
        Ok(Self { capture })
    }

    /// Capture rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

impl FrameSource for MicrophoneFrames {
    fn read_frame(&mut self, buf: &mut [i16]) -> Result<usize> {
        let deadline = Instant::now() + FRAME_WAIT;
        loop {
            if let Some(samples) = self.capture.take_exact(buf.len()) {
                for (out, sample) in buf.iter_mut().zip(samples) {
                    *out = f32_to_i16(sample);
                }
                return Ok(buf.len());
            }
            if Instant::now() >= deadline {
                return Ok(0);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

#[cfg(feature = "wake-word")]
mod engine {
    use rustpotter::{Rustpotter, RustpotterConfig, SampleFormat};

    use super::KeywordSpotter;
    use crate::config::WakeWordConfig;
    use crate::voice::capture::SAMPLE_RATE;
    use crate::{Error, Result};

    /// Keyword spotter backed by rustpotter
    pub struct RustpotterSpotter {
        detector: Rustpotter,
        scratch: Vec<f32>,
    }

    impl RustpotterSpotter {
        /// Load a trained `.rpw` model
        ///
        /// # Errors
        ///
        /// Returns error if no model is configured or it fails to load
        pub fn open(config: &WakeWordConfig) -> Result<Self> {
            let path = config
                .model_path
                .as_ref()
                .ok_or_else(|| Error::WakeWord("no wake word model configured".to_string()))?;

            let mut rp_config = RustpotterConfig::default();
            rp_config.fmt.sample_rate = SAMPLE_RATE as usize;
            rp_config.fmt.channels = 1;
            rp_config.fmt.sample_format = SampleFormat::F32;
            rp_config.detector.threshold = config.sensitivity;

            let mut detector =
                Rustpotter::new(&rp_config).map_err(|e| Error::WakeWord(e.to_string()))?;
            detector
                .add_wakeword_from_file("laasya", &path.to_string_lossy())
                .map_err(|e| Error::WakeWord(format!("failed to load model: {e}")))?;

            tracing::info!(path = %path.display(), "wake word model loaded");
            Ok(Self {
                detector,
                scratch: Vec::new(),
            })
        }
    }

    impl KeywordSpotter for RustpotterSpotter {
        fn frame_length(&self) -> usize {
            self.detector.get_samples_per_frame()
        }

        fn sample_rate(&self) -> u32 {
            SAMPLE_RATE
        }

        fn process(&mut self, frame: &[i16]) -> Result<i32> {
            self.scratch.clear();
            self.scratch
                .extend(frame.iter().map(|&s| f32::from(s) / 32768.0));
            Ok(if self.detector.process_f32(&self.scratch).is_some() {
                0
            } else {
                -1
            })
        }
    }
}

#[cfg(feature = "wake-word")]
pub use engine::RustpotterSpotter;

/// Open the configured keyword spotter
///
/// # Errors
///
/// Returns error if no engine is compiled in or the model cannot be loaded
#[cfg(feature = "wake-word")]
pub fn open_spotter(config: &WakeWordConfig) -> Result<Box<dyn KeywordSpotter>> {
    Ok(Box::new(RustpotterSpotter::open(config)?))
}

/// Open the configured keyword spotter
///
/// # Errors
///
/// Always: built without the `wake-word` feature
#[cfg(not(feature = "wake-word"))]
pub fn open_spotter(_config: &WakeWordConfig) -> Result<Box<dyn KeywordSpotter>> {
    Err(Error::WakeWord(
        "built without the 'wake-word' feature".to_string(),
    ))
}
