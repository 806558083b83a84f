use crate::model::{Question, QuestionId, RomRange, SessionId, Turn};
use crate::phase::Phase;
use serde_json::Value;
use std::collections::HashSet;

/// Mutable session data. Lives behind the session mutex; never held across an await.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    /// Bumped by every reset. Work started in an older generation is discarded.
    pub generation: u64,
    pub session_id: Option<SessionId>,
    pub phase: Phase,
    pub chat: Vec<Turn>,
    pub questionnaire: Vec<Turn>,
    pub pending_question: Option<Question>,
    pub seen_questions: HashSet<QuestionId>,
    pub body_part: Option<String>,
    pub rom_result: Option<RomRange>,
    pub dashboard: Option<Value>,
    pub questionnaire_complete: bool,
    /// The synthetic opening questionnaire turn has been sent.
    pub questionnaire_opened: bool,
    /// ROM capture already ran for the current CaptureRom entry.
    pub rom_capture_started: bool,
    /// Nested speak calls; non-zero while the assistant is talking.
    pub speaking: u32,
    pub voice_disabled: bool,

    pub start_in_flight: bool,
    pub chat_in_flight: bool,
    pub questionnaire_in_flight: bool,
    pub rom_save_in_flight: bool,
}

impl SessionState {
    /// Fresh state for the next generation. Device availability survives a reset.
    pub fn reset(&mut self) {
        let next = SessionState {
            generation: self.generation + 1,
            voice_disabled: self.voice_disabled,
            ..SessionState::default()
        };
        *self = next;
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking > 0
    }

    /// Remove the last turn if it is still the unanswered `user` turn this call appended.
    pub fn roll_back_turn(turns: &mut Vec<Turn>, user: &str) -> bool {
        match turns.last() {
            Some(last) if last.user == user && last.assistant.is_empty() => {
                turns.pop();
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            generation: self.generation,
            session_id: self.session_id.clone(),
            phase: self.phase,
            chat_transcript: self.chat.clone(),
            questionnaire_transcript: self.questionnaire.clone(),
            pending_question: self.pending_question.clone(),
            body_part: self.body_part.clone(),
            rom_result: self.rom_result,
            dashboard: self.dashboard.clone(),
            questionnaire_complete: self.questionnaire_complete,
            speaking: self.is_speaking(),
            voice_disabled: self.voice_disabled,
            chat_in_flight: self.chat_in_flight,
            questionnaire_in_flight: self.questionnaire_in_flight,
        }
    }
}

/// Read-only copy of the session for views and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub generation: u64,
    pub session_id: Option<SessionId>,
    pub phase: Phase,
    pub chat_transcript: Vec<Turn>,
    pub questionnaire_transcript: Vec<Turn>,
    pub pending_question: Option<Question>,
    pub body_part: Option<String>,
    pub rom_result: Option<RomRange>,
    pub dashboard: Option<Value>,
    pub questionnaire_complete: bool,
    pub speaking: bool,
    pub voice_disabled: bool,
    pub chat_in_flight: bool,
    pub questionnaire_in_flight: bool,
}
