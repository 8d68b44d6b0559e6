//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use super::pipeline::AudioClip;
use super::tts::AudioFormat;
use crate::{Error, Result};

/// Preferred output rate (matches common TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Interval between completion and interrupt checks
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Something that can play a synthesized clip to completion
///
/// Implementations block until the clip finishes or `interrupt` is raised.
pub trait AudioSink {
    /// Play one clip
    ///
    /// # Errors
    ///
    /// Returns error if the clip cannot be decoded or the device fails
    fn play(&mut self, clip: &AudioClip, interrupt: &AtomicBool) -> Result<()>;
}

/// Plays audio on the default output device
///
/// Must be created on the thread that plays audio.
pub struct CpalSink {
    device: Device,
    config: StreamConfig,
}

impl CpalSink {
    /// Open the default output device, preferring [`PLAYBACK_SAMPLE_RATE`]
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let preferred = device.supported_output_configs().ok().and_then(|configs| {
            let mut matching: Vec<_> = configs
                .filter(|c| {
                    c.channels() <= 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
                .collect();
            matching.sort_by_key(cpal::SupportedStreamConfigRange::channels);
            matching.into_iter().next()
        });

        let config = match preferred {
            Some(range) => range.with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE)).config(),
            None => device
                .default_output_config()
                .map_err(|e| Error::Audio(e.to_string()))?
                .config(),
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { device, config })
    }

    /// Device output rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Play mono samples recorded at `sample_rate`, resampling as needed
    ///
    /// Returns early when `interrupt` is raised.
    ///
    /// # Errors
    ///
    /// Returns error if resampling or the output stream fails
    pub fn play_samples(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        interrupt: &AtomicBool,
    ) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let device_rate = self.sample_rate();
        let samples = if sample_rate == device_rate {
            samples.to_vec()
        } else {
            resample(samples, sample_rate, device_rate)?
        };

        let channels = usize::from(self.config.channels.max(1));
        let total = samples.len();
        let samples = Arc::new(samples);
        let position = Arc::new(AtomicUsize::new(0));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            self.device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut pos = position.load(Ordering::Relaxed);
                        for frame in data.chunks_mut(channels) {
                            let sample = samples.get(pos).copied().unwrap_or(0.0);
                            frame.fill(sample);
                            if pos < samples.len() {
                                pos += 1;
                            }
                        }
                        position.store(pos, Ordering::Relaxed);
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (total as u64 * 1000) / u64::from(device_rate.max(1));
        let deadline = Instant::now() + Duration::from_millis(duration_ms + 500);

        while position.load(Ordering::Relaxed) < total {
            if interrupt.load(Ordering::SeqCst) {
                tracing::debug!("playback interrupted");
                return Ok(());
            }
            if Instant::now() > deadline {
                tracing::warn!("playback timed out");
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        // Let the device drain its last buffer
        std::thread::sleep(Duration::from_millis(100));
        drop(stream);

        tracing::debug!(samples = total, "playback complete");
        Ok(())
    }
}

impl AudioSink for CpalSink {
    fn play(&mut self, clip: &AudioClip, interrupt: &AtomicBool) -> Result<()> {
        let bytes = clip.read_bytes()?;
        let (samples, rate) = decode(&bytes, clip.format())?;
        self.play_samples(&samples, rate, interrupt)
    }
}

/// Decode encoded audio to mono f32 samples and their sample rate
///
/// # Errors
///
/// Returns error if the bytes are not valid audio of the given format
pub fn decode(bytes: &[u8], format: AudioFormat) -> Result<(Vec<f32>, u32)> {
    match format {
        AudioFormat::Mp3 => decode_mp3(bytes),
        AudioFormat::Wav => decode_wav(bytes),
    }
}

/// Decode MP3 bytes, averaging stereo to mono
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = PLAYBACK_SAMPLE_RATE;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = frame.sample_rate as u32;
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok((samples, sample_rate))
}

/// Decode WAV bytes, averaging channels to mono
#[allow(clippy::cast_precision_loss)]
fn decode_wav(wav_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::new(Cursor::new(wav_data))
        .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok((samples, spec.sample_rate))
}

/// Resample mono audio using rubato
///
/// The final partial chunk is zero-padded so no audio is lost.
///
/// # Errors
///
/// Returns error if the resampler cannot be built for these rates
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    const CHUNK_SIZE: usize = 1024;

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, 2, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let mut output = Vec::with_capacity(samples.len() * to_rate as usize / from_rate as usize);

    for chunk in samples.chunks(CHUNK_SIZE) {
        let mut input: Vec<f64> = chunk.iter().map(|&s| f64::from(s)).collect();
        input.resize(CHUNK_SIZE, 0.0);

        let result = resampler
            .process(&[input], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::samples_to_wav;

    #[test]
    fn test_decode_wav_roundtrips_rate() {
        let wav = samples_to_wav(&[0.0, 0.5, -0.5, 0.25], 22050).unwrap();
        let (samples, rate) = decode(&wav, AudioFormat::Wav).unwrap();
        assert_eq!(rate, 22050);
        assert_eq!(samples.len(), 4);
        assert!((samples[1] - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode(b"not audio", AudioFormat::Wav).is_err());
    }

    #[test]
    fn test_resample_changes_length() {
        let input = vec![0.1_f32; 16000];
        let output = resample(&input, 16000, 24000).unwrap();
        // Padded final chunk adds at most one chunk of output
        assert!(output.len() >= 24000);
        assert!(output.len() <= 24000 + 1536 * 2);
        assert_eq!(resample(&input, 16000, 16000).unwrap().len(), 16000);
    }
}
