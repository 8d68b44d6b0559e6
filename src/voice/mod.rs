//! Voice processing module
//!
//! Handles audio capture, wake word detection, speech recognition,
//! synthesis and ordered playback.

pub mod capture;
pub mod local_tts;
pub mod pipeline;
pub mod playback;
pub mod recognizer;
pub mod stt;
pub mod tts;
pub mod wake_word;

pub use capture::{AudioCapture, SAMPLE_RATE, calculate_energy, samples_to_wav};
pub use local_tts::EspeakSynthesizer;
pub use pipeline::{AudioClip, PlaybackQueue, SinkFactory, SpeechPipeline};
pub use playback::{AudioSink, CpalSink, PLAYBACK_SAMPLE_RATE};
pub use recognizer::{
    RecognitionEvent, Recognizer, Segment, SegmenterConfig, SegmenterState, UtteranceSegmenter,
    VoiceInput,
};
pub use stt::{SpeechToText, Transcriber};
pub use tts::{AudioFormat, ElevenLabsSynthesizer, SpeechSynthesizer, SynthesizedAudio, VoiceSettings};
pub use wake_word::{
    FrameSource, KeywordSpotter, ListenerState, MicrophoneFrames, SourceFactory, SpotterFactory,
    WAKE_CHIME, WakeEvent, WakeWordListener, open_spotter,
};
