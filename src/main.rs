use std::io::Write;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use laasya_assistant::assistant::build_speech;
use laasya_assistant::markers::{strip_markers, trim_open_bracket};
use laasya_assistant::voice::{
    AudioCapture, CpalSink, PLAYBACK_SAMPLE_RATE, SAMPLE_RATE, SpeechPipeline, calculate_energy,
};
use laasya_assistant::{
    Assistant, AssistantOptions, Config, ConversationState, EmergencyClassifier,
};

/// Laasya - voice-first Telugu medical assistant
#[derive(Parser)]
#[command(name = "laasya", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable voice features (text only, no audio hardware needed)
    #[arg(long, env = "LAASYA_NO_VOICE")]
    no_voice: bool,

    /// Do not start the hands-free wake word listener
    #[arg(long, env = "LAASYA_NO_WAKE_WORD")]
    no_wake_word: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single turn and print the final reply
    Ask {
        /// Message for Laasya
        text: String,
    },
    /// Print the emergency tier of a message
    Classify {
        /// Message to classify
        text: String,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output through the speech pipeline
    TestTts {
        /// Text to speak
        #[arg(default_value = "నమస్కారమండి! నేను డాక్టర్ లాస్యని.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,laasya_assistant=info",
        1 => "info,laasya_assistant=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let options = AssistantOptions {
        voice: !cli.no_voice,
        wake_word: !cli.no_wake_word,
    };

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Ask { text } => ask(options, &text).await,
            Command::Classify { text } => {
                classify(&text);
                Ok(())
            }
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&text).await,
        };
    }

    tracing::info!(
        voice = options.voice,
        wake_word = options.wake_word,
        "starting laasya"
    );

    let config = Config::load()?;
    config.validate()?;
    tracing::debug!(?config, "loaded configuration");

    let assistant = Assistant::build(&config, options).await?;

    interactive(assistant).await
}

/// Terminal front-end: typed input, voice toggling and live state rendering
#[allow(clippy::future_not_send)]
async fn interactive(mut assistant: Assistant) -> anyhow::Result<()> {
    let orchestrator = assistant.orchestrator().clone();
    let mut state_rx = orchestrator.subscribe();
    let mut renderer = Renderer::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    match assistant.wake_word_state() {
        Some(state) => tracing::info!(?state, "laasya ready - say the wake word or type a message"),
        None => tracing::info!("laasya ready - type a message"),
    }
    println!("commands: /listen  /dismiss  /quit");

    orchestrator.greet();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                tracing::info!("interrupted, shutting down");
                break;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                renderer.render(&state);
            }
            wake = assistant.next_wake() => {
                if let Some(event) = wake
                    && !assistant.is_listening()
                    && let Err(e) = assistant.listen_after_wake(event).await
                {
                    tracing::warn!(error = %e, "failed to start listening");
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match line.trim() {
                    "/quit" => break,
                    "/dismiss" => {
                        orchestrator.dismiss_emergency();
                        orchestrator.dismiss_camera_prompt();
                    }
                    "/listen" => {
                        if !assistant.can_listen() {
                            println!("voice input unavailable (set OPENAI_API_KEY)");
                        } else if assistant.is_listening() {
                            assistant.stop_listening();
                        } else if let Err(e) = assistant.start_listening().await {
                            tracing::warn!(error = %e, "failed to start listening");
                        }
                    }
                    text => {
                        orchestrator.set_input_text(text);
                        orchestrator.submit(text);
                    }
                }
            }
        }
    }

    assistant.shutdown();
    Ok(())
}

/// Prints streamed replies and state changes as they happen
#[derive(Default)]
struct Renderer {
    reply: Option<Uuid>,
    printed: usize,
    done: bool,
    listening: bool,
    emergency: bool,
    camera: bool,
    error: Option<String>,
}

impl Renderer {
    fn render(&mut self, state: &ConversationState) {
        if state.is_listening != self.listening {
            self.listening = state.is_listening;
            if self.listening {
                println!("[listening...]");
            }
        }

        if let Some(reply) = state.last_reply() {
            if self.reply != Some(reply.id) {
                self.reply = Some(reply.id);
                self.printed = 0;
                self.done = false;
                print!("laasya> ");
            }

            if !self.done {
                let visible = visible_text(&reply.text, reply.finalized);
                if visible.len() > self.printed && visible.is_char_boundary(self.printed) {
                    print!("{}", &visible[self.printed..]);
                    self.printed = visible.len();
                }
                if reply.finalized {
                    println!();
                    self.done = true;
                }
                let _ = std::io::stdout().flush();
            }
        }

        if state.emergency_active() != self.emergency {
            self.emergency = state.emergency_active();
            if self.emergency {
                println!("!! అత్యవసరం: వెంటనే 108 కి కాల్ చేయండి (/dismiss to clear)");
            }
        }

        if state.pending_camera_prompt != self.camera {
            self.camera = state.pending_camera_prompt;
            if self.camera {
                println!("[laasya asked for a photo of the affected area]");
            }
        }

        if state.error != self.error {
            self.error.clone_from(&state.error);
            if let Some(error) = &self.error {
                println!("[error] {error}");
            }
        }
    }
}

/// Reply text safe to show while it may still hold a partial marker
fn visible_text(text: &str, finalized: bool) -> String {
    if finalized {
        return text.to_string();
    }
    trim_open_bracket(&strip_markers(text)).to_string()
}

/// Run one turn and print the final reply with its flags
#[allow(clippy::future_not_send)]
async fn ask(options: AssistantOptions, text: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    config.validate()?;

    let assistant = Assistant::build(&config, AssistantOptions {
        wake_word: false,
        ..options
    })
    .await?;

    let orchestrator = assistant.orchestrator().clone();
    let Some(turn) = orchestrator.submit(text) else {
        anyhow::bail!("message is empty");
    };
    turn.finished().await;
    wait_for_speech(assistant.speech()).await;

    let state = orchestrator.snapshot();
    if let Some(error) = &state.error {
        assistant.shutdown();
        anyhow::bail!("turn failed: {error}");
    }

    if let Some(reply) = state.last_reply() {
        println!("{}", reply.text);
        println!("---");
        println!("tier: {}", state.emergency_tier);
        println!("emergency: {}", reply.emergency);
        println!("show camera: {}", reply.show_camera);
    }

    assistant.shutdown();
    Ok(())
}

/// Print the emergency tier of a message
fn classify(text: &str) {
    let tier = EmergencyClassifier::new().analyze(text);
    println!("{tier}");
}

/// Wait until every queued clip has played
async fn wait_for_speech(speech: &SpeechPipeline) {
    while speech.is_busy() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!("Sample rate: {SAMPLE_RATE} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (PLAYBACK_SAMPLE_RATE as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {PLAYBACK_SAMPLE_RATE} Hz...", samples.len());

    // cpal streams must stay on the thread that created them
    tokio::task::spawn_blocking(move || {
        let mut sink = CpalSink::new()?;
        sink.play_samples(&samples, PLAYBACK_SAMPLE_RATE, &AtomicBool::new(false))
    })
    .await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test TTS through the full pipeline, including the local fallback
async fn test_tts(text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load()?;
    let speech = build_speech(&config).await?;

    println!("Synthesizing speech...");
    speech.speak(text);
    wait_for_speech(&speech).await;
    speech.shutdown();

    println!("\n---");
    println!("If you heard the speech, TTS is working!");
    println!("Run with -v to see which voice was used.");

    Ok(())
}
