//! Events the session publishes for presentation views.

use crate::model::{Question, RomRange};
use crate::phase::Phase;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PhaseChanged { from: Phase, to: Phase },
    /// Main text to show (assistant reply or question).
    Display(String),
    /// Short status line. Empty clears it.
    Status(String),
    /// Assistant speech started (`true`) or ended (`false`).
    Speaking(bool),
    /// Show the camera; video capture starts after `countdown`.
    CameraRequested { countdown: Duration },
    QuestionIssued(Question),
    /// The session wants the microphone.
    ListenRequested,
    /// Microphone unusable; typed input only from here on.
    VoiceDisabled(String),
    RomSaved { range: RomRange, saved: bool },
    DashboardReady(Value),
}

/// Ask the listen loop to capture one utterance, optionally after a delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenRequest {
    pub delay: Duration,
    /// Session generation the request was made in. Stale requests are dropped.
    pub generation: u64,
}
