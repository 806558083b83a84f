//! **VoiceOutput**: text-to-speech synthesis, playback to completion, and the local
//! best-effort fallback synthesizer.
//!
//! `TtsBackend` turns text into encoded audio; an `AudioSink` plays it and only returns
//! once playback ends. When synthesis or playback fails, a `FallbackSpeech` speaks the
//! same text locally with the same "returns on completion" contract.

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use base64::Engine;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Backend that turns text into audio bytes (WAV/MP3). An empty vec means "nothing to play".
#[async_trait]
pub trait TtsBackend: Send + Sync {
    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>>;
}

/// Placeholder TTS: returns empty audio so nothing plays.
#[derive(Debug, Default)]
pub struct PlaceholderTts;

#[async_trait]
impl TtsBackend for PlaceholderTts {
    async fn synthesize(&self, _text: &str) -> VoiceResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// TTS through the assessment backend (`/api/text-to-speech`).
///
/// The backend may answer with raw audio bytes, or with JSON carrying base64
/// `audioContent` (optionally inside the `{ success, data }` envelope).
#[derive(Debug, Clone)]
pub struct RemoteTts {
    pub base_url: String,
    client: reqwest::Client,
}

impl RemoteTts {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::Config(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

pub(crate) fn decode_audio_json(body: &serde_json::Value) -> VoiceResult<Vec<u8>> {
    let encoded = body
        .get("data")
        .and_then(|d| d.get("audioContent").or(Some(d)))
        .and_then(|d| d.as_str())
        .or_else(|| body.get("audioContent").and_then(|a| a.as_str()))
        .ok_or_else(|| VoiceError::Tts("response carried no audioContent".to_string()))?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| VoiceError::Tts(format!("audioContent is not base64: {}", e)))
}

#[async_trait]
impl TtsBackend for RemoteTts {
    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/api/text-to-speech", self.base_url);
        let res = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!("TTS API error {}: {}", status, body)));
        }
        let is_json = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);
        if is_json {
            let body: serde_json::Value =
                res.json().await.map_err(|e| VoiceError::Tts(e.to_string()))?;
            return decode_audio_json(&body);
        }
        let bytes = res.bytes().await.map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Plays encoded audio.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `audio` and return once it has finished (or was stopped).
    async fn play_to_end(&self, audio: Vec<u8>) -> VoiceResult<()>;

    /// Stop playback immediately and drop anything queued.
    fn stop(&self);
}

/// Sink that discards audio. Playback "completes" immediately.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play_to_end(&self, _audio: Vec<u8>) -> VoiceResult<()> {
        Ok(())
    }

    fn stop(&self) {}
}

/// Local best-effort speech used when synthesis or playback fails.
#[async_trait]
pub trait FallbackSpeech: Send + Sync {
    /// Speak `text` and return when done. Dropping the future must silence it.
    async fn say(&self, text: &str) -> VoiceResult<()>;
}

/// Fallback that says nothing.
#[derive(Debug, Default)]
pub struct SilentFallback;

#[async_trait]
impl FallbackSpeech for SilentFallback {
    async fn say(&self, _text: &str) -> VoiceResult<()> {
        Ok(())
    }
}

/// Fallback through the operating system's speech command (`espeak-ng`, `espeak`, `say`).
/// The child process is killed if the returned future is dropped (cancellation).
#[derive(Debug, Clone)]
pub struct SystemSpeech {
    programs: Vec<String>,
    /// Words per minute; 140 is 0.8x the usual default.
    pub words_per_minute: u32,
}

impl Default for SystemSpeech {
    fn default() -> Self {
        Self {
            programs: vec!["espeak-ng".into(), "espeak".into(), "say".into()],
            words_per_minute: 140,
        }
    }
}

impl SystemSpeech {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific program instead of probing the usual ones.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            programs: vec![program.into()],
            ..Self::default()
        }
    }

    fn command(&self, program: &str, text: &str) -> Command {
        let mut cmd = Command::new(program);
        let rate = self.words_per_minute.to_string();
        if program == "say" {
            cmd.arg("-r").arg(&rate);
        } else {
            cmd.arg("-s").arg(&rate);
        }
        // Everything after `--` is the utterance, even text that starts with a dash.
        cmd.arg("--").arg(text).kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl FallbackSpeech for SystemSpeech {
    async fn say(&self, text: &str) -> VoiceResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        for program in &self.programs {
            let mut child = match self.command(program, text).spawn() {
                Ok(child) => child,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(program = %program, "speech program not installed");
                    continue;
                }
                Err(e) => return Err(VoiceError::Io(e)),
            };
            info!(program = %program, "🔈 Speaking with local fallback");
            let status = child.wait().await?;
            if !status.success() {
                return Err(VoiceError::Playback(format!("{} exited with {}", program, status)));
            }
            return Ok(());
        }
        Err(VoiceError::Config("no local speech program available".to_string()))
    }
}

#[cfg(feature = "device")]
mod rodio_sink {
    use super::*;
    use rodio::{OutputStream, Sink, Source};
    use std::io::Cursor;
    use std::sync::mpsc;
    use std::thread;
    use tokio::sync::oneshot;
    use tracing::warn;

    enum SinkCommand {
        Play(Vec<u8>, oneshot::Sender<VoiceResult<()>>),
        Stop,
    }

    /// Default output device via Rodio. `OutputStream` is !Send, so a dedicated thread owns
    /// it and the `Sink`; callers talk to it over a channel.
    pub struct RodioSink {
        commands: mpsc::Sender<SinkCommand>,
    }

    impl RodioSink {
        pub fn new() -> VoiceResult<Self> {
            let (commands, rx) = mpsc::channel::<SinkCommand>();
            let (ready_tx, ready_rx) = mpsc::channel::<VoiceResult<()>>();

            thread::spawn(move || {
                let (_stream, handle) = match OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(VoiceError::Playback(e.to_string())));
                        return;
                    }
                };
                let new_sink = || Sink::try_new(&handle).map_err(|e| VoiceError::Playback(e.to_string()));
                let mut sink = match new_sink() {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                info!("🔊 Playback sink ready");

                let mut pending: Option<oneshot::Sender<VoiceResult<()>>> = None;
                loop {
                    match rx.recv_timeout(Duration::from_millis(20)) {
                        Ok(SinkCommand::Play(bytes, done)) => {
                            match rodio::Decoder::new(Cursor::new(bytes)) {
                                Ok(source) => {
                                    sink.append(source.convert_samples::<f32>());
                                    if let Some(prev) = pending.replace(done) {
                                        let _ = prev.send(Err(VoiceError::Cancelled));
                                    }
                                }
                                Err(e) => {
                                    let _ = done.send(Err(VoiceError::Playback(format!("Decode failed: {}", e))));
                                }
                            }
                        }
                        Ok(SinkCommand::Stop) => {
                            sink.stop();
                            match new_sink() {
                                Ok(s) => sink = s,
                                Err(e) => warn!("sink re-create failed: {}", e),
                            }
                            if let Some(done) = pending.take() {
                                let _ = done.send(Err(VoiceError::Cancelled));
                            }
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {}
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                    if pending.is_some() && sink.empty() {
                        if let Some(done) = pending.take() {
                            let _ = done.send(Ok(()));
                        }
                    }
                }
            });

            ready_rx
                .recv()
                .map_err(|e| VoiceError::Playback(format!("playback thread exited: {}", e)))??;
            Ok(Self { commands })
        }
    }

    #[async_trait]
    impl AudioSink for RodioSink {
        async fn play_to_end(&self, audio: Vec<u8>) -> VoiceResult<()> {
            if audio.is_empty() {
                return Ok(());
            }
            let (done_tx, done_rx) = oneshot::channel();
            self.commands
                .send(SinkCommand::Play(audio, done_tx))
                .map_err(|_| VoiceError::Playback("playback thread gone".to_string()))?;
            done_rx
                .await
                .map_err(|_| VoiceError::Playback("playback thread gone".to_string()))?
        }

        fn stop(&self) {
            let _ = self.commands.send(SinkCommand::Stop);
        }
    }
}

#[cfg(feature = "device")]
pub use rodio_sink::RodioSink;
