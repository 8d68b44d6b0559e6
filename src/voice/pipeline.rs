//! Speech synthesis pipeline
//!
//! `speak` hands text to a synthesis worker and returns immediately. The
//! worker synthesizes jobs one at a time (premium voice first, local voice
//! on failure) and pushes clips onto a FIFO drained by a single playback
//! thread, so audio is heard in exactly the order it was requested.
//!
//! ```text
//! speak() ──► [synthesis task] ──► PlaybackQueue ──► [playback thread] ──► AudioSink
//! ```
//!
//! `stop` bumps an epoch. Jobs and clips tagged with an older epoch are
//! discarded wherever they are found.

use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::playback::AudioSink;
use super::tts::{AudioFormat, SpeechSynthesizer, SynthesizedAudio};
use crate::markers::clean_for_speech;
use crate::{Error, Result};

/// Synthesized audio staged in a temporary file
///
/// The file is deleted when the clip is dropped.
#[derive(Debug)]
pub struct AudioClip {
    file: NamedTempFile,
    format: AudioFormat,
    epoch: u64,
}

impl AudioClip {
    /// Write synthesized audio to a new temporary file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created or written
    pub fn write(audio: &SynthesizedAudio, epoch: u64) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("laasya-")
            .suffix(&format!(".{}", audio.format.extension()))
            .tempfile()?;
        file.write_all(&audio.bytes)?;
        file.flush()?;

        Ok(Self {
            file,
            format: audio.format,
            epoch,
        })
    }

    /// Location of the staged audio
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    #[must_use]
    pub const fn format(&self) -> AudioFormat {
        self.format
    }

    /// Pipeline epoch the clip was produced in
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Read the encoded audio back
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.path())?)
    }
}

#[derive(Default)]
struct QueueState {
    clips: VecDeque<AudioClip>,
    closed: bool,
}

/// Strict FIFO of clips awaiting playback
///
/// Owns the pipeline epoch. The epoch only advances under the queue lock,
/// so a clip is either admitted before an advance and cleared by it, or
/// rejected after it.
#[derive(Default)]
pub struct PlaybackQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    epoch: AtomicU64,
}

impl PlaybackQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current epoch
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Append a clip of the current epoch
    ///
    /// Clips from an older epoch, or offered after close, are dropped and
    /// `false` is returned.
    pub fn push(&self, clip: AudioClip) -> bool {
        let mut state = self.lock();
        if state.closed || clip.epoch() != self.epoch() {
            return false;
        }
        state.clips.push_back(clip);
        self.ready.notify_one();
        true
    }

    /// Start a new epoch and drop every queued clip
    ///
    /// Returns the new epoch and how many clips were removed.
    pub fn advance(&self) -> (u64, usize) {
        let mut state = self.lock();
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let removed = state.clips.len();
        state.clips.clear();
        (epoch, removed)
    }

    /// Block until a clip is available, `None` once closed
    pub fn pop_blocking(&self) -> Option<AudioClip> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(clip) = state.clips.pop_front() {
                return Some(clip);
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Drop every queued clip, returning how many were removed
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let removed = state.clips.len();
        state.clips.clear();
        removed
    }

    /// Close the queue, releasing queued clips and waking the consumer
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.clips.clear();
        self.ready.notify_all();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().clips.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds the audio sink on the playback thread
pub type SinkFactory = Box<dyn FnOnce() -> Result<Box<dyn AudioSink>> + Send>;

struct SpeechJob {
    text: String,
    epoch: u64,
}

struct Shared {
    interrupt: AtomicBool,
    playing: AtomicBool,
    pending_jobs: AtomicUsize,
    queue: PlaybackQueue,
}

impl Shared {
    fn new() -> Self {
        Self {
            interrupt: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            pending_jobs: AtomicUsize::new(0),
            queue: PlaybackQueue::new(),
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.queue.epoch() == epoch
    }
}

struct Inner {
    jobs: Option<mpsc::UnboundedSender<SpeechJob>>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    playback_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.shared.interrupt.store(true, Ordering::SeqCst);
        self.shared.queue.close();
    }
}

/// Cloneable handle to the speech pipeline
#[derive(Clone)]
pub struct SpeechPipeline {
    inner: Arc<Inner>,
}

impl SpeechPipeline {
    /// Start the synthesis worker and the playback thread
    ///
    /// Must be called inside a tokio runtime. Without a `primary` the local
    /// synthesizer is used for everything. If the sink cannot be created,
    /// clips are still produced but discarded unplayed.
    ///
    /// # Errors
    ///
    /// Returns error if the playback thread cannot be spawned
    pub fn spawn(
        primary: Option<Arc<dyn SpeechSynthesizer>>,
        fallback: Arc<dyn SpeechSynthesizer>,
        sink_factory: SinkFactory,
    ) -> Result<Self> {
        let shared = Arc::new(Shared::new());
        let cancel = CancellationToken::new();
        let (jobs, jobs_rx) = mpsc::unbounded_channel();

        let playback_thread = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("playback".to_string())
                .spawn(move || run_playback(&shared, sink_factory))
                .map_err(|e| Error::Audio(format!("failed to spawn playback thread: {e}")))?
        };

        tokio::spawn(run_synthesis(
            jobs_rx,
            Arc::clone(&shared),
            cancel.clone(),
            primary,
            fallback,
        ));

        Ok(Self {
            inner: Arc::new(Inner {
                jobs: Some(jobs),
                shared,
                cancel,
                playback_thread: Mutex::new(Some(playback_thread)),
            }),
        })
    }

    /// A pipeline that accepts speech and discards it
    #[must_use]
    pub fn muted() -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: None,
                shared: Arc::new(Shared::new()),
                cancel: CancellationToken::new(),
                playback_thread: Mutex::new(None),
            }),
        }
    }

    /// Queue text for speech without waiting
    ///
    /// Markers and markup are removed first; blank text is ignored.
    pub fn speak(&self, text: &str) {
        let Some(jobs) = &self.inner.jobs else {
            return;
        };
        let text = clean_for_speech(text);
        if text.is_empty() {
            return;
        }

        let shared = &self.inner.shared;
        let epoch = shared.queue.epoch();
        shared.pending_jobs.fetch_add(1, Ordering::SeqCst);

        tracing::trace!(epoch, chars = text.chars().count(), "speech queued");
        if jobs.send(SpeechJob { text, epoch }).is_err() {
            shared.pending_jobs.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!("speech pipeline is shut down");
        }
    }

    /// Silence everything: drop pending jobs and clips, halt the current clip
    pub fn stop(&self) {
        let shared = &self.inner.shared;
        let (epoch, dropped) = shared.queue.advance();
        shared.interrupt.store(true, Ordering::SeqCst);
        tracing::debug!(epoch, dropped, "speech stopped");
    }

    /// Clips waiting for playback
    #[must_use]
    pub fn queued_clips(&self) -> usize {
        self.inner.shared.queue.len()
    }

    /// Current epoch, advanced by every `stop`
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.inner.shared.queue.epoch()
    }

    /// Whether any speech is pending, queued or playing
    #[must_use]
    pub fn is_busy(&self) -> bool {
        let shared = &self.inner.shared;
        shared.pending_jobs.load(Ordering::SeqCst) > 0
            || !shared.queue.is_empty()
            || shared.playing.load(Ordering::SeqCst)
    }

    /// Stop both workers and release the sink
    pub fn shutdown(&self) {
        self.stop();
        self.inner.cancel.cancel();
        self.inner.shared.queue.close();

        let handle = self
            .inner
            .playback_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("playback thread panicked");
            }
        }
        tracing::debug!("speech pipeline shut down");
    }
}

/// Synthesis worker: one job at a time, in submission order
async fn run_synthesis(
    mut jobs: mpsc::UnboundedReceiver<SpeechJob>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    primary: Option<Arc<dyn SpeechSynthesizer>>,
    fallback: Arc<dyn SpeechSynthesizer>,
) {
    loop {
        let job = tokio::select! {
            () = cancel.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        tokio::select! {
            () = cancel.cancelled() => break,
            () = process_job(&job, &shared, primary.as_deref(), fallback.as_ref()) => {}
        }
        shared.pending_jobs.fetch_sub(1, Ordering::SeqCst);
    }

    tracing::debug!("synthesis worker stopped");
}

async fn process_job(
    job: &SpeechJob,
    shared: &Arc<Shared>,
    primary: Option<&dyn SpeechSynthesizer>,
    fallback: &dyn SpeechSynthesizer,
) {
    if !shared.is_current(job.epoch) {
        tracing::trace!(epoch = job.epoch, "dropping stale speech job");
        return;
    }

    let Some(audio) = synthesize_with_fallback(&job.text, primary, fallback).await else {
        return;
    };

    if !shared.is_current(job.epoch) {
        return;
    }

    let epoch = job.epoch;
    let staged = tokio::task::spawn_blocking(move || AudioClip::write(&audio, epoch)).await;
    match staged {
        Ok(Ok(clip)) => {
            if !shared.queue.push(clip) {
                tracing::trace!(epoch, "dropping clip from a stopped epoch");
            }
        }
        Ok(Err(e)) => tracing::error!(error = %e, "failed to stage audio clip"),
        Err(e) => tracing::error!(error = %e, "clip staging task failed"),
    }
}

/// Try the premium voice, then the local voice for the same text
async fn synthesize_with_fallback(
    text: &str,
    primary: Option<&dyn SpeechSynthesizer>,
    fallback: &dyn SpeechSynthesizer,
) -> Option<SynthesizedAudio> {
    if let Some(primary) = primary {
        match primary.synthesize(text).await {
            Ok(audio) => return Some(audio),
            Err(e) => {
                tracing::warn!(
                    synthesizer = primary.name(),
                    error = %e,
                    "premium synthesis failed, using local voice"
                );
            }
        }
    }

    match fallback.synthesize(text).await {
        Ok(audio) => Some(audio),
        Err(e) => {
            tracing::error!(synthesizer = fallback.name(), error = %e, "speech synthesis failed");
            None
        }
    }
}

/// Playback thread: drain the queue through the sink, one clip at a time
fn run_playback(shared: &Shared, sink_factory: SinkFactory) {
    let mut sink = match sink_factory() {
        Ok(sink) => Some(sink),
        Err(e) => {
            tracing::warn!(error = %e, "audio output unavailable, speech will not be heard");
            None
        }
    };

    while let Some(clip) = shared.queue.pop_blocking() {
        shared.playing.store(true, Ordering::SeqCst);
        shared.interrupt.store(false, Ordering::SeqCst);

        // Checked after the reset so a concurrent stop is never missed
        if !shared.is_current(clip.epoch()) {
            tracing::trace!(epoch = clip.epoch(), "discarding stale clip");
        } else if let Some(sink) = sink.as_mut() {
            if let Err(e) = sink.play(&clip, &shared.interrupt) {
                tracing::warn!(error = %e, "clip playback failed");
            }
        }

        drop(clip);
        shared.playing.store(false, Ordering::SeqCst);
    }

    tracing::debug!("playback thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(bytes: &[u8], epoch: u64) -> AudioClip {
        AudioClip::write(
            &SynthesizedAudio {
                bytes: bytes.to_vec(),
                format: AudioFormat::Wav,
            },
            epoch,
        )
        .unwrap()
    }

    #[test]
    fn test_clip_file_released_on_drop() {
        let clip = clip(b"abc", 3);
        let path = clip.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(clip.read_bytes().unwrap(), b"abc");
        assert_eq!(clip.epoch(), 3);
        assert!(path.extension().is_some_and(|e| e == "wav"));

        drop(clip);
        assert!(!path.exists());
    }

    #[test]
    fn test_queue_is_fifo() {
        let queue = PlaybackQueue::new();
        queue.push(clip(b"1", 0));
        queue.push(clip(b"2", 0));
        queue.push(clip(b"3", 0));
        assert_eq!(queue.len(), 3);

        let order: Vec<Vec<u8>> = (0..3)
            .filter_map(|_| queue.pop_blocking())
            .map(|c| c.read_bytes().unwrap())
            .collect();
        assert_eq!(order, vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);
    }

    #[test]
    fn test_clear_releases_files() {
        let queue = PlaybackQueue::new();
        let first = clip(b"1", 0);
        let path = first.path().to_path_buf();
        queue.push(first);
        queue.push(clip(b"2", 0));

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_close_wakes_consumer() {
        let queue = Arc::new(PlaybackQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop_blocking().is_none())
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        queue.close();
        assert!(consumer.join().unwrap());

        assert!(!queue.push(clip(b"late", 0)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_advance_rejects_clips_from_older_epoch() {
        let queue = PlaybackQueue::new();
        assert!(queue.push(clip(b"old", 0)));

        assert_eq!(queue.advance(), (1, 1));
        assert_eq!(queue.epoch(), 1);

        // Staged before the advance, offered after it
        assert!(!queue.push(clip(b"stale", 0)));
        assert!(queue.is_empty());

        assert!(queue.push(clip(b"fresh", 1)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_advance_races_with_push() {
        let queue = Arc::new(PlaybackQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    queue.push(clip(b"x", 0));
                }
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(1));
        queue.advance();
        producer.join().unwrap();

        // Anything pushed after the advance was rejected, anything before was cleared
        assert!(queue.is_empty());
    }
}
