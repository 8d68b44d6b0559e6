//! On-device speech synthesis through the `espeak-ng` CLI
//!
//! Used when the premium voice is unavailable or fails. Produces WAV on
//! stdout so the clip goes through the same playback path as remote audio.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::tts::{AudioFormat, SpeechSynthesizer, SynthesizedAudio};
use crate::config::LocalVoiceConfig;
use crate::{Error, Result};

/// espeak-ng default words per minute
const BASE_RATE_WPM: f32 = 175.0;

/// espeak-ng default pitch (0-99)
const BASE_PITCH: f32 = 50.0;

/// Voice used when neither the preferred nor the platform language exists
const LAST_RESORT_VOICE: &str = "en";

/// Local synthesizer backed by an `espeak-ng` subprocess
#[derive(Debug, Clone)]
pub struct EspeakSynthesizer {
    binary: String,
    voice: String,
    rate_wpm: u32,
    pitch: u32,
}

impl EspeakSynthesizer {
    /// Probe the engine once and pick a voice
    ///
    /// Tries the preferred language, then the platform locale, then `en`.
    pub async fn configure(config: &LocalVoiceConfig) -> Self {
        let preferred = config.locale.to_lowercase();
        let voice = if has_voice(&config.binary, &preferred).await {
            preferred
        } else {
            let platform = default_locale(
                std::env::var("LC_ALL")
                    .ok()
                    .filter(|v| !v.is_empty())
                    .or_else(|| std::env::var("LANG").ok())
                    .as_deref(),
            );
            let fallback = if platform != LAST_RESORT_VOICE
                && has_voice(&config.binary, &platform).await
            {
                platform
            } else {
                LAST_RESORT_VOICE.to_string()
            };
            tracing::warn!(
                preferred = %preferred,
                fallback = %fallback,
                "no local voice for preferred language, using fallback"
            );
            fallback
        };

        let synthesizer = Self::with_voice(&config.binary, voice, config.rate, config.pitch);
        tracing::info!(
            voice = %synthesizer.voice,
            rate = synthesizer.rate_wpm,
            pitch = synthesizer.pitch,
            "local synthesizer configured"
        );
        synthesizer
    }

    /// Create a synthesizer without probing the engine
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn with_voice(binary: &str, voice: impl Into<String>, rate: f32, pitch: f32) -> Self {
        Self {
            binary: binary.to_string(),
            voice: voice.into(),
            rate_wpm: (BASE_RATE_WPM * rate).round().max(80.0) as u32,
            pitch: (BASE_PITCH * pitch).round().clamp(0.0, 99.0) as u32,
        }
    }

    /// Selected voice
    #[must_use]
    pub fn voice(&self) -> &str {
        &self.voice
    }

    /// Speech rate in words per minute
    #[must_use]
    pub const fn rate_wpm(&self) -> u32 {
        self.rate_wpm
    }

    #[must_use]
    pub const fn pitch(&self) -> u32 {
        self.pitch
    }
}

#[async_trait]
impl SpeechSynthesizer for EspeakSynthesizer {
    fn name(&self) -> &'static str {
        "espeak"
    }

    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        if text.trim().is_empty() {
            return Err(Error::Tts("nothing to synthesize".to_string()));
        }

        let mut child = Command::new(&self.binary)
            .args([
                "-v",
                &self.voice,
                "-s",
                &self.rate_wpm.to_string(),
                "-p",
                &self.pitch.to_string(),
                "--stdin",
                "--stdout",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Tts(format!("failed to spawn {}: {e}", self.binary)))?;

        // Fed from its own task so a long text cannot stall on a full stdout pipe
        let writer = child.stdin.take().map(|mut stdin| {
            let text = text.to_string();
            tokio::spawn(async move { stdin.write_all(text.as_bytes()).await })
        });

        let output = child.wait_with_output().await?;
        let written = match writer {
            Some(writer) => writer
                .await
                .map_err(|e| Error::Tts(format!("stdin writer failed: {e}")))?,
            None => Ok(()),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Tts(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }
        written.map_err(|e| Error::Tts(format!("failed to write to {}: {e}", self.binary)))?;
        if output.stdout.is_empty() {
            return Err(Error::Tts(format!("{} produced no audio", self.binary)));
        }

        tracing::debug!(bytes = output.stdout.len(), "local synthesis complete");
        Ok(SynthesizedAudio {
            bytes: output.stdout,
            format: AudioFormat::Wav,
        })
    }
}

/// Whether the engine lists at least one voice for `language`
async fn has_voice(binary: &str, language: &str) -> bool {
    let output = Command::new(binary)
        .arg(format!("--voices={language}"))
        .stderr(Stdio::null())
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => {
            // First line is the column header
            String::from_utf8_lossy(&output.stdout)
                .lines()
                .skip(1)
                .any(|line| !line.trim().is_empty())
        }
        Ok(_) => false,
        Err(e) => {
            tracing::warn!(binary, error = %e, "local synthesizer unavailable");
            false
        }
    }
}

/// Derive an espeak voice name from a POSIX locale value
///
/// `en_US.UTF-8` becomes `en-us`; unset, `C` and `POSIX` become `en`.
#[must_use]
pub fn default_locale(posix: Option<&str>) -> String {
    let Some(value) = posix else {
        return "en".to_string();
    };

    let base = value.split(['.', '@']).next().unwrap_or_default().trim();
    if base.is_empty() || base == "C" || base == "POSIX" {
        return "en".to_string();
    }

    base.replace('_', "-").to_lowercase()
}
