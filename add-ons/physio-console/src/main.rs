//! Physio Console
//!
//! Runs one guided assessment from the terminal. Backend replies are spoken through the
//! voice pipeline and printed; answers can be spoken (`/listen`) or typed.

mod commands;

use anyhow::Context;
use commands::{parse_command, Command, HELP};
use physio_core::{
    run_listen_loop, AssessmentConfig, AssessmentSession, HttpAssessmentClient, Phase, SessionEvent,
    StillFrameSource, WsRomConnector,
};
use physio_voice::{AudioSink, Microphone, NullSink, RemoteStt, RemoteTts, SpeechIo, SystemSpeech, VoicePipeline};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[physio-console] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = AssessmentConfig::load().context("load assessment config")?;
    let api = Arc::new(
        HttpAssessmentClient::new(config.api_base_url.clone(), config.request_timeout())
            .context("build backend client")?,
    );
    let voice = Arc::new(build_voice(&config)?);
    let rom = Arc::new(WsRomConnector::new(config.rom_stream_url.clone()));

    tracing::info!(
        api = %config.api_base_url,
        rom_stream = %config.rom_stream_url,
        "Physio console started"
    );

    let (session, listen_rx) = AssessmentSession::new(config, api, voice, rom);
    let listener = tokio::spawn(run_listen_loop(session.clone(), listen_rx));
    let printer = tokio::spawn(print_events(session.clone()));

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("read stdin")? else { break };
                if !dispatch(&session, parse_command(&line)).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received; shutting down console");
                break;
            }
        }
    }

    session.reset();
    listener.abort();
    printer.abort();
    Ok(())
}

fn build_voice(config: &AssessmentConfig) -> anyhow::Result<VoicePipeline> {
    let timeout = config.request_timeout();
    let stt = Arc::new(RemoteStt::new(config.api_base_url.clone(), timeout).context("build STT client")?);
    let tts = Arc::new(RemoteTts::new(config.api_base_url.clone(), timeout).context("build TTS client")?);
    let (microphone, sink) = devices();
    Ok(
        VoicePipeline::new(microphone, stt, tts, sink, Arc::new(SystemSpeech::new()))
            .with_capture_ceiling(config.timing.capture_ceiling()),
    )
}

#[cfg(feature = "device")]
fn devices() -> (Arc<dyn Microphone>, Arc<dyn AudioSink>) {
    use physio_voice::{CpalMicrophone, RodioSink, UnavailableMicrophone};

    let microphone: Arc<dyn Microphone> = match CpalMicrophone::probe() {
        Ok(mic) => Arc::new(mic),
        Err(e) => {
            tracing::warn!("No microphone: {}", e);
            Arc::new(UnavailableMicrophone::new(e.to_string()))
        }
    };
    let sink: Arc<dyn AudioSink> = match RodioSink::new() {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            tracing::warn!("No audio output, using local speech only: {}", e);
            Arc::new(NullSink)
        }
    };
    (microphone, sink)
}

#[cfg(not(feature = "device"))]
fn devices() -> (Arc<dyn Microphone>, Arc<dyn AudioSink>) {
    (
        Arc::new(physio_voice::UnavailableMicrophone::new(
            "built without the `device` feature",
        )),
        Arc::new(NullSink),
    )
}

/// Run one console command. Returns `false` to quit.
async fn dispatch(session: &AssessmentSession, command: Command) -> bool {
    match command {
        Command::Empty => {}
        Command::Help => println!("{}", HELP),
        Command::Quit => return false,
        Command::Invalid(message) => println!("{}", message),
        Command::Start => {
            if let Err(e) = session.start_assessment().await {
                println!("❌ {}", e);
            }
        }
        Command::Reset => session.reset(),
        Command::Mute => session.set_muted(true),
        Command::Unmute => session.set_muted(false),
        Command::Listen => {
            if !session.request_listen() {
                println!("Microphone is not available right now.");
            }
        }
        Command::Camera => {
            if let Err(e) = session.begin_video_capture() {
                println!("❌ {}", e);
            }
        }
        Command::Video(path) => match tokio::fs::read(&path).await {
            Ok(bytes) => {
                if let Err(e) = session.finish_capture(&bytes).await {
                    println!("❌ {}", e);
                }
            }
            Err(e) => println!("❌ Could not read {}: {}", path.display(), e),
        },
        Command::Rom(path) => match tokio::fs::read(&path).await {
            Ok(jpeg) => match session.capture_rom(&mut StillFrameSource::new(jpeg)).await {
                Ok(outcome) => tracing::debug!(?outcome, "ROM capture finished"),
                Err(e) => println!("❌ {}", e),
            },
            Err(e) => println!("❌ Could not read {}: {}", path.display(), e),
        },
        Command::Dashboard => match session.load_dashboard().await {
            Ok(Some(_)) => {}
            Ok(None) => println!("Dashboard not available."),
            Err(e) => println!("❌ {}", e),
        },
        Command::Status => {
            let snap = session.snapshot();
            println!(
                "phase={} session={} chat_turns={} questionnaire_turns={} muted={} voice_disabled={}",
                snap.phase,
                snap.session_id.as_ref().map(|id| id.as_str()).unwrap_or("-"),
                snap.chat_transcript.len(),
                snap.questionnaire_transcript.len(),
                session.voice().is_muted(),
                snap.voice_disabled,
            );
        }
        Command::Say(text) => {
            if let Err(e) = session.handle_transcript(&text).await {
                println!("❌ {}", e);
            }
        }
    }
    true
}

/// Print session events, and drive the view-side triggers: the camera countdown and the
/// dashboard fetch.
async fn print_events(session: AssessmentSession) {
    let mut events = session.subscribe();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Console fell behind session events");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event {
            SessionEvent::PhaseChanged { to, .. } => {
                println!("── {} ──", to);
                match to {
                    Phase::CaptureRom => println!("📐 Range-of-motion step: run /rom <jpeg>"),
                    Phase::Dashboard => {
                        let session = session.clone();
                        tokio::spawn(async move {
                            let _ = session.load_dashboard().await;
                        });
                    }
                    _ => {}
                }
            }
            SessionEvent::Display(text) if !text.is_empty() => println!("🩺 {}", text),
            SessionEvent::Status(status) if !status.is_empty() => println!("   {}", status),
            SessionEvent::QuestionIssued(question) => {
                if let Some(options) = &question.options {
                    for (i, option) in options.iter().enumerate() {
                        println!("   {}. {}", i + 1, option);
                    }
                }
            }
            SessionEvent::CameraRequested { countdown } => {
                println!("📷 Camera starts in {}s", countdown.as_secs());
                let session = session.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(countdown).await;
                    if session.begin_video_capture().is_ok() {
                        println!("📹 Recording. Send the clip with /video <file>");
                    }
                });
            }
            SessionEvent::ListenRequested => println!("🎙️ Listening..."),
            SessionEvent::VoiceDisabled(reason) => {
                println!("🔇 Voice input off ({}). Type your answers.", reason)
            }
            SessionEvent::RomSaved { range, saved } => {
                let note = if saved { "" } else { " (not saved)" };
                println!("📊 Range of motion {:.0}° to {:.0}°{}", range.minimum, range.maximum, note);
            }
            SessionEvent::DashboardReady(data) => {
                let pretty = serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string());
                println!("📋 Dashboard\n{}", pretty);
            }
            _ => {}
        }
    }
}
