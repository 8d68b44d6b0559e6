//! Text-to-speech (TTS) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::{NetworkConfig, SpeechConfig};
use crate::{Error, Result};

/// Default `ElevenLabs` API base URL
pub const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";

/// Encoding of synthesized audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Wav,
}

impl AudioFormat {
    /// File extension for temporary clips
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
        }
    }
}

/// Encoded audio produced by a synthesizer
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
}

/// Converts text into encoded audio
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Synthesize `text`
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio>;
}

/// Premium voice tuning parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.78,
            similarity_boost: 0.82,
            style: 0.15,
            use_speaker_boost: true,
        }
    }
}

/// Remote premium synthesizer (`ElevenLabs` streaming endpoint)
pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    api_key: SecretString,
    voice_id: String,
    model: String,
    settings: VoiceSettings,
    base_url: String,
}

impl ElevenLabsSynthesizer {
    /// Create a synthesizer for a voice
    ///
    /// # Errors
    ///
    /// Returns error if the API key or voice id is missing
    pub fn new(
        client: reqwest::Client,
        api_key: SecretString,
        voice_id: impl Into<String>,
    ) -> Result<Self> {
        let voice_id = voice_id.into();
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }
        if voice_id.is_empty() {
            return Err(Error::Config("ElevenLabs voice id required".to_string()));
        }

        Ok(Self {
            client,
            api_key,
            voice_id,
            model: "eleven_multilingual_v2".to_string(),
            settings: VoiceSettings::default(),
            base_url: ELEVENLABS_BASE_URL.to_string(),
        })
    }

    /// Create a synthesizer from configuration, `None` when keys are absent
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn from_config(config: &SpeechConfig, network: &NetworkConfig) -> Result<Option<Self>> {
        let (Some(api_key), Some(voice_id)) = (config.api_key.clone(), config.voice_id.clone())
        else {
            return Ok(None);
        };

        let synthesizer = Self::new(network.http_client()?, api_key, voice_id)?
            .with_model(config.model_id.clone())
            .with_settings(config.voice_settings);
        Ok(Some(synthesizer))
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub const fn with_settings(mut self, settings: VoiceSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Override the API base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    fn name(&self) -> &'static str {
        "elevenlabs"
    }

    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        #[derive(Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
            voice_settings: VoiceSettings,
        }

        let url = format!(
            "{}/text-to-speech/{}/stream",
            self.base_url.trim_end_matches('/'),
            self.voice_id
        );

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
            voice_settings: self.settings,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key.expose_secret())
            .header("Accept", "audio/mpeg")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream {
                service: "tts",
                status,
                body,
            });
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(Error::Tts("ElevenLabs returned no audio".to_string()));
        }

        tracing::debug!(bytes = audio.len(), "premium synthesis complete");
        Ok(SynthesizedAudio {
            bytes: audio.to_vec(),
            format: AudioFormat::Mp3,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_key_and_voice() {
        let client = reqwest::Client::new();
        assert!(
            ElevenLabsSynthesizer::new(client.clone(), SecretString::from(String::new()), "v")
                .is_err()
        );
        assert!(
            ElevenLabsSynthesizer::new(client.clone(), SecretString::from("k".to_string()), "")
                .is_err()
        );
        assert!(
            ElevenLabsSynthesizer::new(client, SecretString::from("k".to_string()), "v").is_ok()
        );
    }

    #[test]
    fn test_from_config_without_keys() {
        let config = SpeechConfig::default();
        let synth =
            ElevenLabsSynthesizer::from_config(&config, &NetworkConfig::default()).unwrap();
        assert!(synth.is_none());
    }

    #[test]
    fn test_voice_settings_serialize() {
        let json = serde_json::to_value(VoiceSettings::default()).unwrap();
        assert_eq!(json["use_speaker_boost"], true);
        assert!((json["stability"].as_f64().unwrap() - 0.78).abs() < 1e-6);
    }
}
