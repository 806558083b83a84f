//! Microphone loop: turns listen requests into capture, transcription and routing.

use crate::events::ListenRequest;
use crate::session::AssessmentSession;
use physio_voice::VoiceError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Serve listen requests; runs until the task is aborted. One capture at a time, and
/// requests that pile up meanwhile collapse into the newest.
pub async fn run_listen_loop(session: AssessmentSession, mut requests: mpsc::UnboundedReceiver<ListenRequest>) {
    info!("👂 Listen loop started");
    while let Some(mut request) = requests.recv().await {
        loop {
            if !request.delay.is_zero() {
                tokio::time::sleep(request.delay).await;
            }
            match requests.try_recv() {
                Ok(newer) => request = newer,
                Err(_) => break,
            }
        }

        if !session.ready_to_listen(request.generation) {
            debug!(generation = request.generation, "Listen request skipped");
            continue;
        }
        session.announce_listening();

        let voice = session.voice().clone();
        let clip = match voice.capture().await {
            Ok(clip) => clip,
            Err(VoiceError::Muted) => {
                debug!("Capture refused: muted");
                continue;
            }
            Err(e) if e.is_device_error() => {
                session.disable_voice(e.to_string());
                continue;
            }
            Err(e) => {
                warn!("Capture failed: {}", e);
                continue;
            }
        };
        let text = match voice.transcribe(&clip).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Transcription failed: {}", e);
                String::new()
            }
        };
        if !session.generation_matches(request.generation) {
            debug!("Session reset during capture, transcript dropped");
            continue;
        }
        if let Err(e) = session.handle_transcript(&text).await {
            warn!("Transcript not handled: {}", e);
        }
    }
    info!("Listen loop stopped");
}
