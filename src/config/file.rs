//! TOML configuration file loading
//!
//! Supports `~/.config/laasya/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct LaasyaConfigFile {
    /// Completion backend configuration
    #[serde(default)]
    pub completion: CompletionFileConfig,

    /// Speech synthesis configuration
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Wake word configuration
    #[serde(default)]
    pub wake_word: WakeWordFileConfig,

    /// Speech recognition configuration
    #[serde(default)]
    pub recognition: RecognitionFileConfig,

    /// Network timeouts
    #[serde(default)]
    pub network: NetworkFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Completion backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct CompletionFileConfig {
    /// Model identifier (e.g. "gemini-2.0-flash-exp")
    pub model: Option<String>,

    /// API base URL
    pub base_url: Option<String>,

    /// Maximum output tokens per reply
    pub max_output_tokens: Option<u32>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Nucleus sampling probability
    pub top_p: Option<f32>,

    /// Prior turns sent with each request
    pub history_turns: Option<usize>,

    /// Path to a file replacing the built-in system prompt
    pub system_prompt_path: Option<String>,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// Premium voice identifier
    pub voice_id: Option<String>,

    /// Premium synthesis model (e.g. "eleven_multilingual_v2")
    pub model_id: Option<String>,

    pub stability: Option<f32>,
    pub similarity_boost: Option<f32>,
    pub style: Option<f32>,
    pub use_speaker_boost: Option<bool>,

    /// On-device synthesizer settings
    #[serde(default)]
    pub local: LocalVoiceFileConfig,
}

/// On-device synthesizer configuration
#[derive(Debug, Default, Deserialize)]
pub struct LocalVoiceFileConfig {
    /// Path to the espeak-ng binary
    pub binary: Option<String>,

    /// Preferred language tag (e.g. "te")
    pub locale: Option<String>,
}

/// Wake word configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeWordFileConfig {
    pub enabled: Option<bool>,

    /// Path to the trained keyword model
    pub model_path: Option<String>,

    /// Detection threshold (0.0 to 1.0)
    pub sensitivity: Option<f32>,
}

/// Speech recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecognitionFileConfig {
    /// STT model (e.g. "whisper-1")
    pub model: Option<String>,

    /// Language hint (e.g. "te")
    pub language: Option<String>,

    /// Seconds of speech between partial results; unset disables partials
    pub partial_interval_secs: Option<u64>,
}

/// Network timeout configuration
#[derive(Debug, Default, Deserialize)]
pub struct NetworkFileConfig {
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub gemini: Option<String>,
    pub elevenlabs: Option<String>,
    pub openai: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `LaasyaConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> LaasyaConfigFile {
    let Some(path) = config_file_path() else {
        return LaasyaConfigFile::default();
    };

    if !path.exists() {
        return LaasyaConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                LaasyaConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            LaasyaConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the content is not valid TOML for the schema
pub fn parse_config_file(content: &str) -> crate::Result<LaasyaConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/laasya/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("laasya").join("config.toml"))
}
