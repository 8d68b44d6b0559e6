//! Shared test fakes
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use laasya_assistant::completion::{CompletionBackend, CompletionRequest, FragmentStream};
use laasya_assistant::voice::{
    AudioClip, AudioFormat, AudioSink, FrameSource, KeywordSpotter, SinkFactory, SpeechPipeline,
    SpeechSynthesizer, SynthesizedAudio,
};
use laasya_assistant::{Error, Result};

/// One step of a scripted reply stream
#[derive(Debug, Clone)]
pub enum Step {
    Fragment(String),
    Fail(String),
    Pause(Duration),
    /// Never finishes; only cancellation ends the turn
    Hang,
}

pub fn fragments(parts: &[&str]) -> Vec<Step> {
    parts.iter().map(|p| Step::Fragment((*p).to_string())).collect()
}

/// Completion backend that replays canned streams, one per request
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    refuse: bool,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        })
    }

    /// Rejects every request as a 503 from upstream
    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            refuse: true,
            ..Self::default()
        })
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn stream_completion(&self, request: CompletionRequest) -> Result<FragmentStream> {
        self.requests.lock().unwrap().push(request);
        if self.refuse {
            return Err(Error::Upstream {
                service: "completion",
                status: 503,
                body: "overloaded".to_string(),
            });
        }

        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        let stream = async_stream::stream! {
            for step in script {
                match step {
                    Step::Fragment(text) => yield Ok(text),
                    Step::Fail(message) => {
                        yield Err(Error::Completion(message));
                        return;
                    }
                    Step::Pause(delay) => tokio::time::sleep(delay).await,
                    Step::Hang => std::future::pending::<()>().await,
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Synthesizer whose "audio" is the UTF-8 text it was given
#[derive(Default)]
pub struct RecordingSynthesizer {
    calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl RecordingSynthesizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynthesizer {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        self.calls.lock().unwrap().push(text.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(SynthesizedAudio {
            bytes: text.as_bytes().to_vec(),
            format: AudioFormat::Wav,
        })
    }
}

/// Synthesizer that always fails, counting attempts
#[derive(Default)]
pub struct FailingSynthesizer {
    calls: Mutex<Vec<String>>,
}

impl FailingSynthesizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FailingSynthesizer {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        self.calls.lock().unwrap().push(text.to_string());
        Err(Error::Upstream {
            service: "tts",
            status: 401,
            body: "invalid api key".to_string(),
        })
    }
}

/// Sink that records the text of every clip it plays
#[derive(Clone, Default)]
pub struct RecordingSink {
    played: Arc<Mutex<Vec<String>>>,
    interrupted: Arc<Mutex<Vec<String>>>,
    hold: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each clip "plays" for `hold` unless interrupted
    pub fn holding(hold: Duration) -> Self {
        Self {
            hold: Some(hold),
            ..Self::default()
        }
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }

    pub fn interrupted(&self) -> Vec<String> {
        self.interrupted.lock().unwrap().clone()
    }

    pub fn factory(&self) -> SinkFactory {
        let sink = self.clone();
        Box::new(move || Ok(Box::new(sink) as Box<dyn AudioSink>))
    }
}

impl AudioSink for RecordingSink {
    fn play(&mut self, clip: &AudioClip, interrupt: &AtomicBool) -> Result<()> {
        let text = String::from_utf8_lossy(&clip.read_bytes()?).into_owned();

        if let Some(hold) = self.hold {
            let started = std::time::Instant::now();
            while started.elapsed() < hold {
                if interrupt.load(Ordering::SeqCst) {
                    self.interrupted.lock().unwrap().push(text);
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }

        self.played.lock().unwrap().push(text);
        Ok(())
    }
}

/// Pipeline over fakes: optional primary, recording fallback and sink
pub fn pipeline(
    primary: Option<Arc<dyn SpeechSynthesizer>>,
    fallback: Arc<dyn SpeechSynthesizer>,
    sink: &RecordingSink,
) -> SpeechPipeline {
    SpeechPipeline::spawn(primary, fallback, sink.factory()).unwrap()
}

/// Frame value that [`FakeSpotter`] treats as the wake word
pub const WAKE_SAMPLE: i16 = i16::MAX;

/// Spotter that fires on frames starting with [`WAKE_SAMPLE`]
pub struct FakeSpotter {
    pub frame_length: usize,
}

impl KeywordSpotter for FakeSpotter {
    fn frame_length(&self) -> usize {
        self.frame_length
    }

    fn sample_rate(&self) -> u32 {
        16000
    }

    fn process(&mut self, frame: &[i16]) -> Result<i32> {
        match frame.first() {
            Some(&WAKE_SAMPLE) => Ok(0),
            Some(&i16::MIN) => Err(Error::WakeWord("corrupt frame".to_string())),
            _ => Ok(-1),
        }
    }
}

/// Frame source that replays scripted frames, then reports short reads
pub struct FakeFrames {
    frames: VecDeque<Vec<i16>>,
    pub released: Arc<AtomicBool>,
}

impl FakeFrames {
    pub fn new(frames: Vec<Vec<i16>>) -> Self {
        Self {
            frames: frames.into(),
            released: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl FrameSource for FakeFrames {
    fn read_frame(&mut self, buf: &mut [i16]) -> Result<usize> {
        let Some(frame) = self.frames.pop_front() else {
            return Ok(0);
        };
        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        Ok(n)
    }
}

impl Drop for FakeFrames {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
