//! Range-of-motion capture and save.

use super::guard::{CallKind, InFlight};
use super::AssessmentSession;
use crate::error::{SessionError, SessionResult};
use crate::events::SessionEvent;
use crate::model::RomRange;
use crate::phase::Phase;
use crate::rom_stream::{FrameSource, RomCapture, RomCaptureSettings, RomEvent};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum RomOutcome {
    /// Saved and moved to the dashboard.
    Saved(RomRange),
    /// Save failed; moved to the dashboard anyway.
    SaveFailed(RomRange),
    /// A capture or save already ran for this CaptureRom entry.
    Suppressed,
    /// Not in CaptureRom.
    Ignored,
    Stale,
}

impl AssessmentSession {
    /// Run the ROM stream for one capture window, then save the result.
    pub async fn capture_rom(&self, frames: &mut dyn FrameSource) -> SessionResult<RomOutcome> {
        let generation = {
            let mut st = self.lock();
            if st.session_id.is_none() {
                return Err(SessionError::MissingSession);
            }
            if st.phase != Phase::CaptureRom {
                return Ok(RomOutcome::Ignored);
            }
            if st.rom_capture_started {
                return Ok(RomOutcome::Suppressed);
            }
            st.rom_capture_started = true;
            st.generation
        };

        // Camera and microphone move to the ROM view.
        self.inner.voice.stop_capture();
        self.status("Measuring range of motion...");

        let capture = RomCapture::new(
            Arc::clone(&self.inner.rom),
            RomCaptureSettings::from(&self.inner.config.timing),
        );
        let events = self.inner.events.clone();
        let mut show_guidance = |event: &RomEvent| {
            if let Some(guidance) = &event.guidance {
                let _ = events.send(SessionEvent::Display(guidance.clone()));
            }
        };
        let report = capture.run(frames, &mut show_guidance).await;

        if self.is_stale(generation) {
            return Ok(RomOutcome::Stale);
        }
        if report.degraded {
            warn!(frames_sent = report.frames_sent, "ROM capture degraded, saving zero range");
            self.status("Could not measure range of motion, continuing");
        }
        self.finish_rom_capture(report.range).await
    }

    /// Terminal callback of the ROM view: save the measurement and move to the dashboard,
    /// whether or not the save succeeded.
    pub async fn finish_rom_capture(&self, range: RomRange) -> SessionResult<RomOutcome> {
        let (id, generation, ticket) = {
            let mut st = self.lock();
            let id = st.session_id.clone().ok_or(SessionError::MissingSession)?;
            if st.phase != Phase::CaptureRom {
                return Ok(RomOutcome::Ignored);
            }
            let ticket = InFlight::claim(&mut st, &self.inner.state, CallKind::RomSave);
            (id, st.generation, ticket)
        };
        let Some(ticket) = ticket else {
            return Ok(RomOutcome::Suppressed);
        };

        let saved = match self.inner.api.save_rom(&id, range).await {
            Ok(()) => true,
            Err(e) => {
                warn!(session_id = %id, "Saving ROM failed: {}", e);
                self.status("Error saving ROM data");
                false
            }
        };

        {
            let mut st = self.lock();
            if st.generation != generation {
                return Ok(RomOutcome::Stale);
            }
            st.rom_result = Some(range);
        }
        info!(min = range.minimum, max = range.maximum, saved, "📊 ROM result recorded");
        self.emit(SessionEvent::RomSaved { range, saved });
        self.advance_logged(generation, Phase::Dashboard);
        drop(ticket);

        Ok(if saved {
            RomOutcome::Saved(range)
        } else {
            RomOutcome::SaveFailed(range)
        })
    }
}
