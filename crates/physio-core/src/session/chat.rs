//! Intro chat turns, including the body-part video turn.

use super::guard::{CallKind, InFlight};
use super::state::SessionState;
use super::{AssessmentSession, QuestionnaireOutcome};
use crate::error::{SessionError, SessionResult};
use crate::events::SessionEvent;
use crate::model::{ChatAction, ChatReply, Turn};
use crate::phase::Phase;
use base64::Engine;
use tracing::{debug, info, warn};

/// User utterance recorded for the video turn.
const VIDEO_TURN_USER: &str = "User has shown body part on video";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Text(String),
    /// Base64 recording for body-part identification.
    Video(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    /// Reply spoken; listening again.
    Replied,
    /// Reply spoken; the view should show the camera.
    CameraRequested,
    /// Moved to the questionnaire.
    EnteredQuestionnaire(QuestionnaireOutcome),
    /// Call failed; transcript unchanged and listening resumes after a delay.
    Failed,
    /// Another chat call was already in flight.
    Suppressed,
    /// The session was reset while the call was pending.
    Stale,
    /// The current phase does not take this kind of turn; nothing was sent.
    Ignored,
}

impl AssessmentSession {
    /// Send one chat turn with the full transcript and act on the reply's action.
    pub async fn submit_chat_turn(&self, input: ChatInput) -> SessionResult<ChatOutcome> {
        let (id, generation, transcript, ticket) = {
            let mut st = self.lock();
            let id = st.session_id.clone().ok_or(SessionError::MissingSession)?;
            let accepted = match &input {
                ChatInput::Text(_) => st.phase == Phase::Chat,
                ChatInput::Video(_) => matches!(st.phase, Phase::Chat | Phase::CaptureVideo),
            };
            if !accepted {
                debug!(phase = %st.phase, "Chat turn outside the intro, ignoring");
                return Ok(ChatOutcome::Ignored);
            }
            let ticket = InFlight::claim(&mut st, &self.inner.state, CallKind::Chat);
            if ticket.is_some() {
                if let ChatInput::Text(text) = &input {
                    st.chat.push(Turn::user(text.clone()));
                }
            }
            (id, st.generation, st.chat.clone(), ticket)
        };
        let Some(ticket) = ticket else {
            debug!("Chat call already in flight, dropping turn");
            return Ok(ChatOutcome::Suppressed);
        };

        self.inner.voice.stop_capture();
        let (text, video) = match &input {
            ChatInput::Text(text) => {
                // The new turn is already the last transcript entry.
                self.status("Talking to the AI...");
                (Some(text.as_str()), None)
            }
            ChatInput::Video(video) => {
                self.status("Identifying body part...");
                (None, Some(video.as_str()))
            }
        };

        let result = self.inner.api.chat_turn(&id, &transcript, video).await;
        if self.is_stale(generation) {
            return Ok(ChatOutcome::Stale);
        }

        let outcome = match text {
            Some(text) => self.finish_text_turn(generation, text, result, ticket).await,
            None => self.finish_video_turn(generation, result, ticket).await,
        };
        Ok(outcome)
    }

    async fn finish_text_turn(
        &self,
        generation: u64,
        text: &str,
        result: Result<ChatReply, crate::error::RemoteError>,
        ticket: InFlight,
    ) -> ChatOutcome {
        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Chat call failed: {}", e);
                SessionState::roll_back_turn(&mut self.lock().chat, text);
                self.status("Error communicating with AI");
                drop(ticket);
                self.schedule_listen(generation, self.inner.config.timing.chat_failure_resume());
                return ChatOutcome::Failed;
            }
        };

        {
            let mut st = self.lock();
            if let Some(last) = st.chat.last_mut() {
                last.assistant = reply.utterance.clone();
            }
        }
        self.status("");
        debug!(action = ?reply.action, "💬 Chat reply");

        match reply.action {
            ChatAction::CameraOn => {
                self.emit(SessionEvent::Display(reply.utterance.clone()));
                self.speak(generation, &reply.utterance).await;
                drop(ticket);
                if self.is_stale(generation) {
                    return ChatOutcome::Stale;
                }
                self.emit(SessionEvent::CameraRequested {
                    countdown: self.inner.config.timing.camera_countdown(),
                });
                ChatOutcome::CameraRequested
            }
            ChatAction::NextApi => {
                self.emit(SessionEvent::Display(String::new()));
                self.speak(generation, &reply.utterance).await;
                drop(ticket);
                ChatOutcome::EnteredQuestionnaire(self.enter_questionnaire(generation).await)
            }
            _ => {
                self.emit(SessionEvent::Display(reply.utterance.clone()));
                self.speak(generation, &reply.utterance).await;
                drop(ticket);
                self.schedule_listen(generation, std::time::Duration::ZERO);
                ChatOutcome::Replied
            }
        }
    }

    async fn finish_video_turn(
        &self,
        generation: u64,
        result: Result<ChatReply, crate::error::RemoteError>,
        ticket: InFlight,
    ) -> ChatOutcome {
        let fallback_part = self.inner.config.fallback_body_part.clone();
        let (reply, fallback) = match result {
            Ok(reply) => (Some(reply), false),
            Err(e) => {
                warn!("Video identification failed, assuming {}: {}", fallback_part, e);
                self.status("Error communicating with AI");
                (None, true)
            }
        };
        let part = reply
            .as_ref()
            .and_then(|r| r.body_part.clone())
            .unwrap_or(fallback_part);
        let assistant = if fallback {
            format!("{} identified as body part (fallback)", part)
        } else {
            format!("{} identified as body part", part)
        };
        {
            let mut st = self.lock();
            st.chat.push(Turn::exchange(VIDEO_TURN_USER, assistant));
            st.body_part = Some(part.clone());
        }
        info!(body_part = %part, fallback, "📹 Body part identified");

        let action = reply.as_ref().map(|r| r.action.clone()).unwrap_or(ChatAction::NextApi);
        match action {
            ChatAction::NextApi | ChatAction::Restart => {
                let line = format!("{} identified. Let's continue with some questions.", part);
                self.emit(SessionEvent::Display(line.clone()));
                self.speak(generation, &line).await;
                drop(ticket);
                ChatOutcome::EnteredQuestionnaire(self.enter_questionnaire(generation).await)
            }
            _ => {
                // Backend wants another look; keep the camera up.
                let utterance = reply.map(|r| r.utterance).unwrap_or_default();
                self.emit(SessionEvent::Display(utterance.clone()));
                self.speak(generation, &utterance).await;
                drop(ticket);
                if self.is_stale(generation) {
                    return ChatOutcome::Stale;
                }
                self.emit(SessionEvent::CameraRequested {
                    countdown: self.inner.config.timing.camera_countdown(),
                });
                ChatOutcome::CameraRequested
            }
        }
    }

    /// Terminal callback of the video view: send the recording as the video chat turn.
    pub async fn finish_capture(&self, video: &[u8]) -> SessionResult<ChatOutcome> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(video);
        self.submit_chat_turn(ChatInput::Video(encoded)).await
    }

    /// Enter the questionnaire: convert the chat transcript and send the opening turn once.
    pub(crate) async fn enter_questionnaire(&self, generation: u64) -> QuestionnaireOutcome {
        if !self.advance_logged(generation, Phase::Questionnaire) {
            return if self.is_stale(generation) {
                QuestionnaireOutcome::Stale
            } else {
                QuestionnaireOutcome::Ignored
            };
        }
        let opening = {
            let mut st = self.lock();
            st.questionnaire = st
                .chat
                .iter()
                .filter(|t| !t.user.trim().is_empty())
                .cloned()
                .collect();
            if st.questionnaire_opened {
                None
            } else {
                st.questionnaire_opened = true;
                Some(self.inner.config.opening_utterance.clone())
            }
        };
        match opening {
            Some(opening) => match self.submit_questionnaire_turn(&opening).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Opening questionnaire turn failed: {}", e);
                    QuestionnaireOutcome::Failed
                }
            },
            None => QuestionnaireOutcome::Ignored,
        }
    }
}
