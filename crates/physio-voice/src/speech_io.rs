//! The speech adapter the session drives: bounded capture, transcription, and speaking
//! to completion with cancellation.

use crate::audio::{AudioClip, Microphone, PlaceholderMicrophone};
use crate::error::{VoiceError, VoiceResult};
use crate::stt::{PlaceholderStt, SttBackend};
use crate::voice_output::{AudioSink, FallbackSpeech, NullSink, PlaceholderTts, SilentFallback, TtsBackend};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

/// Default ceiling for one capture.
pub const DEFAULT_CAPTURE_CEILING: Duration = Duration::from_secs(5);

/// Speech I/O as seen by the session.
#[async_trait]
pub trait SpeechIo: Send + Sync {
    /// Record until `stop_capture()` or the ceiling, whichever comes first.
    async fn capture(&self) -> VoiceResult<AudioClip>;

    /// End the current capture early. No effect when nothing is recording.
    fn stop_capture(&self);

    async fn transcribe(&self, clip: &AudioClip) -> VoiceResult<String>;

    /// Synthesize and play `text`, returning once playback has finished.
    /// Returns `VoiceError::Cancelled` if `cancel_speech()` interrupts it.
    async fn speak(&self, text: &str) -> VoiceResult<()>;

    fn cancel_speech(&self);

    /// Muting stops any capture in progress and refuses new ones. The device stays open.
    fn set_muted(&self, muted: bool);

    fn is_muted(&self) -> bool;
}

/// `SpeechIo` assembled from a microphone, STT, TTS, a playback sink and a local fallback.
pub struct VoicePipeline {
    microphone: Arc<dyn Microphone>,
    stt: Arc<dyn SttBackend>,
    tts: Arc<dyn TtsBackend>,
    sink: Arc<dyn AudioSink>,
    fallback: Arc<dyn FallbackSpeech>,
    capture_ceiling: Duration,
    muted: AtomicBool,
    stop: Notify,
    cancel: watch::Sender<u64>,
}

impl VoicePipeline {
    pub fn new(
        microphone: Arc<dyn Microphone>,
        stt: Arc<dyn SttBackend>,
        tts: Arc<dyn TtsBackend>,
        sink: Arc<dyn AudioSink>,
        fallback: Arc<dyn FallbackSpeech>,
    ) -> Self {
        let (cancel, _) = watch::channel(0);
        Self {
            microphone,
            stt,
            tts,
            sink,
            fallback,
            capture_ceiling: DEFAULT_CAPTURE_CEILING,
            muted: AtomicBool::new(false),
            stop: Notify::new(),
            cancel,
        }
    }

    /// Silent pipeline: empty captures, empty transcripts, no audio.
    pub fn placeholder() -> Self {
        Self::new(
            Arc::new(PlaceholderMicrophone::new()),
            Arc::new(PlaceholderStt::new()),
            Arc::new(PlaceholderTts),
            Arc::new(NullSink),
            Arc::new(SilentFallback),
        )
    }

    pub fn with_capture_ceiling(mut self, ceiling: Duration) -> Self {
        self.capture_ceiling = ceiling;
        self
    }

    pub fn capture_ceiling(&self) -> Duration {
        self.capture_ceiling
    }

    async fn speak_uncancelled(&self, text: &str) -> VoiceResult<()> {
        match self.tts.synthesize(text).await {
            Ok(audio) if !audio.is_empty() => match self.sink.play_to_end(audio).await {
                Ok(()) => return Ok(()),
                Err(VoiceError::Cancelled) => return Err(VoiceError::Cancelled),
                Err(e) => warn!("Playback failed, using local speech: {}", e),
            },
            Ok(_) => debug!("TTS returned no audio, using local speech"),
            Err(e) => warn!("TTS failed, using local speech: {}", e),
        }
        self.fallback.say(text).await
    }
}

/// Opening and closing a device parks the calling thread, so it runs on the blocking pool.
async fn off_runtime<T, F>(device_call: F) -> VoiceResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> VoiceResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(device_call)
        .await
        .map_err(|e| VoiceError::Capture(format!("device task failed: {}", e)))?
}

#[async_trait]
impl SpeechIo for VoicePipeline {
    async fn capture(&self) -> VoiceResult<AudioClip> {
        if self.is_muted() {
            return Err(VoiceError::Muted);
        }
        // Registered before the device opens so a stop issued during open is not lost.
        let stopped = self.stop.notified();
        let microphone = Arc::clone(&self.microphone);
        let recording = off_runtime(move || microphone.open()).await?;
        debug!(ceiling_ms = self.capture_ceiling.as_millis() as u64, "🎤 Capture started");

        tokio::select! {
            _ = tokio::time::sleep(self.capture_ceiling) => debug!("Capture ceiling reached"),
            _ = stopped => debug!("Capture stopped early"),
        }

        let clip = off_runtime(move || recording.finish()).await?;
        if self.is_muted() {
            return Err(VoiceError::Muted);
        }
        info!("🎙️ Captured {:.1}s of audio", clip.duration().as_secs_f32());
        Ok(clip)
    }

    fn stop_capture(&self) {
        self.stop.notify_waiters();
    }

    async fn transcribe(&self, clip: &AudioClip) -> VoiceResult<String> {
        self.stt.transcribe(clip).await
    }

    async fn speak(&self, text: &str) -> VoiceResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let mut cancelled = self.cancel.subscribe();
        cancelled.borrow_and_update();

        tokio::select! {
            result = self.speak_uncancelled(text) => result,
            _ = cancelled.changed() => {
                info!("🔇 Speech cancelled");
                self.sink.stop();
                Err(VoiceError::Cancelled)
            }
        }
    }

    fn cancel_speech(&self) {
        self.cancel.send_modify(|epoch| *epoch += 1);
        self.sink.stop();
    }

    fn set_muted(&self, muted: bool) {
        let was = self.muted.swap(muted, Ordering::SeqCst);
        if muted && !was {
            info!("🔇 Microphone muted");
            self.stop.notify_waiters();
        } else if !muted && was {
            info!("🎤 Microphone unmuted");
        }
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }
}
