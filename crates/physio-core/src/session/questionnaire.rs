//! Questionnaire turns: single-flight calls, bounded retry, duplicate suppression and
//! action-driven phase moves.

use super::guard::{CallKind, InFlight};
use super::state::SessionState;
use super::AssessmentSession;
use crate::error::{SessionError, SessionResult};
use crate::events::SessionEvent;
use crate::model::{is_affirmative, Question, QuestionAction};
use crate::phase::Phase;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum QuestionnaireOutcome {
    /// A new question was spoken; the questionnaire continues.
    Asked(Question),
    /// The reply's action moved the session to this phase.
    Advanced(Phase),
    /// The backend repeated the previous question; nothing changed.
    Duplicate,
    /// Retries ran out on a movement prompt answered with "ready"; moved to ROM capture anyway.
    ForcedRom,
    /// Retries ran out; the answer was rolled back and must be resubmitted.
    Failed,
    /// Another questionnaire call was already in flight.
    Suppressed,
    /// Not in a questionnaire phase.
    Ignored,
    Stale,
}

impl AssessmentSession {
    /// Send one questionnaire answer with the full questionnaire transcript.
    pub async fn submit_questionnaire_turn(&self, answer: &str) -> SessionResult<QuestionnaireOutcome> {
        let answer = answer.trim();
        let (id, generation, transcript, asked, ticket) = {
            let mut st = self.lock();
            let id = st.session_id.clone().ok_or(SessionError::MissingSession)?;
            if !st.phase.is_questionnaire() {
                return Ok(QuestionnaireOutcome::Ignored);
            }
            let ticket = InFlight::claim(&mut st, &self.inner.state, CallKind::Questionnaire);
            if ticket.is_some() {
                st.questionnaire.push(crate::model::Turn::user(answer));
            }
            (
                id,
                st.generation,
                st.questionnaire.clone(),
                st.pending_question.clone(),
                ticket,
            )
        };
        let Some(ticket) = ticket else {
            debug!("Questionnaire call already in flight, dropping answer");
            return Ok(QuestionnaireOutcome::Suppressed);
        };

        self.inner.voice.stop_capture();
        self.status("Processing answer...");

        let timing = &self.inner.config.timing;
        let max_retries = timing.questionnaire_max_retries;
        let delay = timing.questionnaire_retry_delay();
        let mut attempt = 0u32;
        let result = loop {
            match self.inner.api.questionnaire_turn(&id, &transcript).await {
                Ok(question) => break Ok(question),
                Err(e) => {
                    if self.is_stale(generation) {
                        return Ok(QuestionnaireOutcome::Stale);
                    }
                    if attempt >= max_retries {
                        break Err(e);
                    }
                    attempt += 1;
                    warn!(attempt, max_retries, "Questionnaire call failed, retrying: {}", e);
                    self.status(format!("Error occurred. Retrying in {} seconds...", delay.as_secs()));
                    tokio::time::sleep(delay).await;
                    if self.is_stale(generation) {
                        return Ok(QuestionnaireOutcome::Stale);
                    }
                    self.status(format!("Retrying... ({}/{})", attempt, max_retries));
                }
            }
        };

        let outcome = match result {
            Ok(question) => self.apply_question(generation, answer, question).await,
            Err(e) => {
                error!(attempts = attempt + 1, "Questionnaire call gave up: {}", e);
                self.exhausted(generation, answer, asked.as_ref()).await
            }
        };
        drop(ticket);

        // Listen only once the guard is released, or the listen loop would skip the request.
        match outcome {
            QuestionnaireOutcome::Asked(_) | QuestionnaireOutcome::Advanced(Phase::QuestionnaireFreeform) => {
                self.schedule_listen(generation, Duration::ZERO);
            }
            // The answer was dropped; give the user a moment, then take it again.
            QuestionnaireOutcome::Duplicate | QuestionnaireOutcome::Failed => {
                self.schedule_listen(generation, timing.chat_failure_resume());
            }
            _ => {}
        }
        Ok(outcome)
    }

    async fn apply_question(&self, generation: u64, answer: &str, question: Question) -> QuestionnaireOutcome {
        let id = question.id();
        {
            let mut st = self.lock();
            if st.generation != generation {
                return QuestionnaireOutcome::Stale;
            }
            let repeated = st
                .pending_question
                .as_ref()
                .map(|prev| prev.text == question.text)
                .unwrap_or(false);
            if repeated || st.seen_questions.contains(&id) {
                SessionState::roll_back_turn(&mut st.questionnaire, answer);
                drop(st);
                debug!(question = %question.text, "Duplicate question ignored");
                self.status("Please answer again.");
                return QuestionnaireOutcome::Duplicate;
            }
            st.seen_questions.insert(id);
            st.pending_question = Some(question.clone());
            if let Some(last) = st.questionnaire.last_mut() {
                last.assistant = question.text.clone();
            }
            if question.action.completes() {
                st.questionnaire_complete = true;
            }
        }
        info!(action = ?question.action, "📋 Question issued");

        self.emit(SessionEvent::QuestionIssued(question.clone()));
        self.emit(SessionEvent::Display(question.text.clone()));
        self.status("");
        self.inner.voice.cancel_speech();
        self.speak(generation, &question.text).await;
        if self.is_stale(generation) {
            return QuestionnaireOutcome::Stale;
        }

        let phase = self.phase();
        let target = match (&question.action, phase) {
            (QuestionAction::RomApi, Phase::Questionnaire) => Some(Phase::CaptureRom),
            (QuestionAction::DashboardApi, Phase::Questionnaire) => Some(Phase::Dashboard),
            (QuestionAction::Complete | QuestionAction::EndQuestionnaire, Phase::Questionnaire) => {
                Some(Phase::QuestionnaireFreeform)
            }
            (QuestionAction::RomApi | QuestionAction::DashboardApi, Phase::QuestionnaireFreeform) => {
                debug!(action = ?question.action, "Action ignored in freeform questionnaire");
                None
            }
            _ => None,
        };
        match target {
            Some(to) if self.advance_logged(generation, to) => QuestionnaireOutcome::Advanced(to),
            _ => QuestionnaireOutcome::Asked(question),
        }
    }

    async fn exhausted(&self, generation: u64, answer: &str, asked: Option<&Question>) -> QuestionnaireOutcome {
        let movement_ready = asked.map(Question::asks_for_movement).unwrap_or(false) && is_affirmative(answer);
        if movement_ready && self.phase() == Phase::Questionnaire {
            warn!("Questionnaire unavailable; forcing ROM capture after movement prompt");
            self.status("Moving to movement assessment...");
            tokio::time::sleep(self.inner.config.timing.forced_rom_delay()).await;
            {
                let mut st = self.lock();
                if st.generation != generation {
                    return QuestionnaireOutcome::Stale;
                }
                st.questionnaire_complete = true;
            }
            if self.advance_logged(generation, Phase::CaptureRom) {
                return QuestionnaireOutcome::ForcedRom;
            }
        }

        {
            let mut st = self.lock();
            if st.generation != generation {
                return QuestionnaireOutcome::Stale;
            }
            SessionState::roll_back_turn(&mut st.questionnaire, answer);
        }
        self.status("Failed after multiple attempts. Please try again.");
        QuestionnaireOutcome::Failed
    }
}
