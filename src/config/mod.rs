//! Configuration management for the Laasya assistant
//!
//! Sources in increasing priority: built-in defaults, the TOML file
//! (see [`file`]), then environment variables.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::voice::VoiceSettings;
use crate::{Error, Result};

use self::file::LaasyaConfigFile;

/// Default completion model
pub const DEFAULT_COMPLETION_MODEL: &str = "gemini-2.0-flash-exp";

/// Default completion API base URL
pub const DEFAULT_COMPLETION_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Laasya assistant configuration
#[derive(Debug)]
pub struct Config {
    /// Completion backend configuration
    pub completion: CompletionConfig,

    /// Speech synthesis configuration
    pub speech: SpeechConfig,

    /// Wake word configuration
    pub wake_word: WakeWordConfig,

    /// Speech recognition configuration
    pub recognition: RecognitionConfig,

    /// Network timeouts shared by all HTTP clients
    pub network: NetworkConfig,
}

/// Completion backend configuration
#[derive(Debug)]
pub struct CompletionConfig {
    /// Gemini API key (`GEMINI_API_KEY`)
    pub api_key: Option<SecretString>,

    /// Model identifier
    pub model: String,

    /// API base URL
    pub base_url: String,

    /// Maximum output tokens per reply
    pub max_output_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Nucleus sampling probability
    pub top_p: f32,

    /// Prior turns sent with each request
    pub history_turns: usize,

    /// System prompt override loaded from `system_prompt_path`
    pub system_prompt: Option<String>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_COMPLETION_MODEL.to_string(),
            base_url: DEFAULT_COMPLETION_BASE_URL.to_string(),
            max_output_tokens: 300,
            temperature: 0.7,
            top_p: 0.9,
            history_turns: 10,
            system_prompt: None,
        }
    }
}

/// Speech synthesis configuration
#[derive(Debug)]
pub struct SpeechConfig {
    /// `ElevenLabs` API key (`ELEVENLABS_API_KEY`)
    pub api_key: Option<SecretString>,

    /// Premium voice identifier (`ELEVENLABS_VOICE_ID`)
    pub voice_id: Option<String>,

    /// Premium synthesis model
    pub model_id: String,

    /// Voice tuning parameters
    pub voice_settings: VoiceSettings,

    /// On-device synthesizer
    pub local: LocalVoiceConfig,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            voice_id: None,
            model_id: "eleven_multilingual_v2".to_string(),
            voice_settings: VoiceSettings::default(),
            local: LocalVoiceConfig::default(),
        }
    }
}

/// On-device synthesizer configuration
#[derive(Debug, Clone)]
pub struct LocalVoiceConfig {
    /// espeak-ng binary
    pub binary: String,

    /// Preferred language tag
    pub locale: String,

    /// Speech rate multiplier
    pub rate: f32,

    /// Pitch multiplier
    pub pitch: f32,
}

impl Default for LocalVoiceConfig {
    fn default() -> Self {
        Self {
            binary: "espeak-ng".to_string(),
            locale: "te".to_string(),
            rate: 0.9,
            pitch: 1.1,
        }
    }
}

/// Wake word configuration
#[derive(Debug, Clone)]
pub struct WakeWordConfig {
    /// Enable hands-free activation
    pub enabled: bool,

    /// Trained keyword model (`LAASYA_WAKE_WORD_MODEL`)
    pub model_path: Option<PathBuf>,

    /// Detection threshold (0.0 to 1.0)
    pub sensitivity: f32,
}

impl Default for WakeWordConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_path: None,
            sensitivity: 0.7,
        }
    }
}

/// Speech recognition configuration
#[derive(Debug)]
pub struct RecognitionConfig {
    /// `OpenAI` API key for Whisper (`OPENAI_API_KEY`)
    pub api_key: Option<SecretString>,

    /// STT model
    pub model: String,

    /// Language hint
    pub language: String,

    /// Interval of speech between partial results
    pub partial_interval: Option<Duration>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "whisper-1".to_string(),
            language: "te".to_string(),
            partial_interval: None,
        }
    }
}

/// Network timeouts
///
/// The read timeout is longer than the connect timeout so slow token
/// streams are not cut off.
#[derive(Debug, Clone, Copy)]
pub struct NetworkConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
        }
    }
}

impl NetworkConfig {
    /// Build an HTTP client carrying these timeouts
    ///
    /// # Errors
    ///
    /// Returns error if the TLS backend cannot be initialized
    pub fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout)
            .build()?)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            completion: CompletionConfig::default(),
            speech: SpeechConfig::default(),
            wake_word: WakeWordConfig::default(),
            recognition: RecognitionConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// # Errors
    ///
    /// Returns error if the system prompt override cannot be read
    pub fn load() -> Result<Self> {
        let file = file::load_config_file();
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if the system prompt override cannot be read
    pub fn from_sources(
        file: LaasyaConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config = Self::default();
        let non_empty = |v: String| if v.trim().is_empty() { None } else { Some(v) };

        // Completion
        let c = file.completion;
        if let Some(model) = env("LAASYA_GEMINI_MODEL").or(c.model) {
            config.completion.model = model;
        }
        if let Some(url) = c.base_url {
            config.completion.base_url = url;
        }
        if let Some(v) = c.max_output_tokens {
            config.completion.max_output_tokens = v;
        }
        if let Some(v) = c.temperature {
            config.completion.temperature = v;
        }
        if let Some(v) = c.top_p {
            config.completion.top_p = v;
        }
        if let Some(v) = c.history_turns {
            config.completion.history_turns = v;
        }
        if let Some(path) = c.system_prompt_path {
            let prompt = std::fs::read_to_string(&path).map_err(|e| {
                Error::Config(format!("failed to read system prompt {path}: {e}"))
            })?;
            config.completion.system_prompt = Some(prompt);
        }
        config.completion.api_key = env("GEMINI_API_KEY")
            .or(file.api_keys.gemini)
            .and_then(non_empty)
            .map(SecretString::from);

        // Speech
        let s = file.speech;
        config.speech.api_key = env("ELEVENLABS_API_KEY")
            .or(file.api_keys.elevenlabs)
            .and_then(non_empty)
            .map(SecretString::from);
        config.speech.voice_id = env("ELEVENLABS_VOICE_ID").or(s.voice_id).and_then(non_empty);
        if let Some(model) = s.model_id {
            config.speech.model_id = model;
        }
        let settings = &mut config.speech.voice_settings;
        if let Some(v) = s.stability {
            settings.stability = v;
        }
        if let Some(v) = s.similarity_boost {
            settings.similarity_boost = v;
        }
        if let Some(v) = s.style {
            settings.style = v;
        }
        if let Some(v) = s.use_speaker_boost {
            settings.use_speaker_boost = v;
        }
        if let Some(binary) = s.local.binary {
            config.speech.local.binary = binary;
        }
        if let Some(locale) = s.local.locale {
            config.speech.local.locale = locale;
        }

        // Wake word
        let w = file.wake_word;
        if let Some(enabled) = w.enabled {
            config.wake_word.enabled = enabled;
        }
        config.wake_word.model_path = env("LAASYA_WAKE_WORD_MODEL")
            .or(w.model_path)
            .and_then(non_empty)
            .map(PathBuf::from);
        if let Some(v) = w.sensitivity {
            config.wake_word.sensitivity = v.clamp(0.0, 1.0);
        }

        // Recognition
        let r = file.recognition;
        config.recognition.api_key = env("OPENAI_API_KEY")
            .or(file.api_keys.openai)
            .and_then(non_empty)
            .map(SecretString::from);
        if let Some(model) = r.model {
            config.recognition.model = model;
        }
        if let Some(language) = r.language {
            config.recognition.language = language;
        }
        config.recognition.partial_interval = r
            .partial_interval_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs);

        // Network
        if let Some(secs) = file.network.connect_timeout_secs {
            config.network.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.network.read_timeout_secs {
            config.network.read_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Check that the configuration can drive a conversation
    ///
    /// # Errors
    ///
    /// Returns error if the completion API key is missing or timeouts are inconsistent
    pub fn validate(&self) -> Result<()> {
        if self.completion.api_key.is_none() {
            return Err(Error::Config(
                "GEMINI_API_KEY required for completions".to_string(),
            ));
        }
        if self.network.read_timeout < self.network.connect_timeout {
            return Err(Error::Config(
                "read timeout must not be shorter than connect timeout".to_string(),
            ));
        }
        Ok(())
    }
}
