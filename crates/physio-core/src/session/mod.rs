//! The assessment session state machine.
//!
//! `AssessmentSession` is the single authority for the phase, both transcripts and the
//! in-flight guards. Views send intents (start, transcript, mic, camera, reset) and
//! observe `SessionEvent`s; the backend, speech and ROM stream are injected.
//!
//! Guard checks and state updates happen inside one lock scope, and the lock is never
//! held across an await. Every async operation remembers the generation it started in
//! and drops its result if a `reset()` happened meanwhile.

mod chat;
mod guard;
mod questionnaire;
mod rom;
mod state;

pub use state::SessionSnapshot;

use crate::config::AssessmentConfig;
use crate::error::{SessionError, SessionResult};
use crate::events::{ListenRequest, SessionEvent};
use crate::model::SessionProfile;
use crate::phase::Phase;
use crate::remote::AssessmentApi;
use crate::rom_stream::RomStreamConnector;
use guard::{CallKind, InFlight};
use physio_voice::{SpeechIo, VoiceError};
use serde_json::Value;
use state::SessionState;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

pub use chat::{ChatInput, ChatOutcome};
pub use questionnaire::QuestionnaireOutcome;
pub use rom::RomOutcome;

const EVENT_CAPACITY: usize = 256;

/// Where a finished transcript went.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptRoute {
    Chat(ChatOutcome),
    Questionnaire(QuestionnaireOutcome),
    /// Nothing intelligible; listening resumes after a short delay.
    Empty,
    /// Assistant speaking, or no phase consumes voice.
    Ignored,
}

pub(crate) struct SessionInner {
    config: AssessmentConfig,
    api: Arc<dyn AssessmentApi>,
    voice: Arc<dyn SpeechIo>,
    rom: Arc<dyn RomStreamConnector>,
    state: Arc<Mutex<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
    listen_tx: mpsc::UnboundedSender<ListenRequest>,
}

/// Cheap, cloneable handle to one assessment session.
#[derive(Clone)]
pub struct AssessmentSession {
    inner: Arc<SessionInner>,
}

impl AssessmentSession {
    /// Build a session. The returned receiver feeds `run_listen_loop`.
    pub fn new(
        config: AssessmentConfig,
        api: Arc<dyn AssessmentApi>,
        voice: Arc<dyn SpeechIo>,
        rom: Arc<dyn RomStreamConnector>,
    ) -> (Self, mpsc::UnboundedReceiver<ListenRequest>) {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (listen_tx, listen_rx) = mpsc::unbounded_channel();
        let inner = SessionInner {
            config,
            api,
            voice,
            rom,
            state: Arc::new(Mutex::new(SessionState::default())),
            events,
            listen_tx,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            listen_rx,
        )
    }

    pub fn config(&self) -> &AssessmentConfig {
        &self.inner.config
    }

    pub fn voice(&self) -> &Arc<dyn SpeechIo> {
        &self.inner.voice
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot()
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn generation(&self) -> u64 {
        self.lock().generation
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation() != generation
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn status(&self, message: impl Into<String>) {
        self.emit(SessionEvent::Status(message.into()));
    }

    /// Move forward along the transition table. `Ok(false)` if the session was reset since
    /// `generation`.
    fn advance(&self, generation: u64, to: Phase) -> SessionResult<bool> {
        let from = {
            let mut st = self.lock();
            if st.generation != generation {
                return Ok(false);
            }
            let from = st.phase;
            if !from.can_advance_to(to) {
                return Err(SessionError::InvalidTransition { from, to });
            }
            st.phase = to;
            if to == Phase::CaptureRom {
                st.rom_capture_started = false;
            }
            from
        };
        info!(from = %from, to = %to, "➡️ Phase change");
        // The microphone belongs to the phase being left.
        self.inner.voice.stop_capture();
        self.emit(SessionEvent::PhaseChanged { from, to });
        Ok(true)
    }

    /// `advance` for backend-driven moves: an invalid edge is logged, not returned.
    fn advance_logged(&self, generation: u64, to: Phase) -> bool {
        match self.advance(generation, to) {
            Ok(moved) => moved,
            Err(e) => {
                warn!("Ignoring transition: {}", e);
                false
            }
        }
    }

    /// Speak to completion. Returns `false` if the speech was cancelled or `generation` is stale.
    async fn speak(&self, generation: u64, text: &str) -> bool {
        if text.trim().is_empty() {
            return true;
        }
        {
            let mut st = self.lock();
            if st.generation != generation {
                return false;
            }
            st.speaking += 1;
        }
        self.emit(SessionEvent::Speaking(true));

        let result = self.inner.voice.speak(text).await;

        {
            let mut st = self.lock();
            if st.generation == generation {
                st.speaking = st.speaking.saturating_sub(1);
            }
        }
        self.emit(SessionEvent::Speaking(false));
        match result {
            Ok(()) => true,
            Err(VoiceError::Cancelled) => {
                debug!("Speech cancelled");
                false
            }
            Err(e) => {
                warn!("Speech failed: {}", e);
                true
            }
        }
    }

    fn schedule_listen(&self, generation: u64, delay: Duration) {
        if self
            .inner
            .listen_tx
            .send(ListenRequest { delay, generation })
            .is_err()
        {
            debug!("Listen loop not running; listen request dropped");
        }
    }

    /// Whether a listen request made in `generation` should capture now.
    pub(crate) fn ready_to_listen(&self, generation: u64) -> bool {
        let st = self.lock();
        st.generation == generation
            && st.phase.consumes_voice()
            && !st.is_speaking()
            && !st.voice_disabled
            && !st.chat_in_flight
            && !st.questionnaire_in_flight
            && !self.inner.voice.is_muted()
    }

    pub(crate) fn generation_matches(&self, generation: u64) -> bool {
        !self.is_stale(generation)
    }

    pub(crate) fn announce_listening(&self) {
        self.emit(SessionEvent::ListenRequested);
    }

    /// Microphone unusable (denied or missing). Typed input keeps working.
    pub fn disable_voice(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut st = self.lock();
            if st.voice_disabled {
                return;
            }
            st.voice_disabled = true;
        }
        error!("Voice input disabled: {}", reason);
        self.emit(SessionEvent::VoiceDisabled(reason));
    }

    /// Create the backend assessment, enter Chat, and send the greeting turn.
    pub async fn start_assessment(&self) -> SessionResult<ChatOutcome> {
        let (ticket, generation) = {
            let mut st = self.lock();
            if st.phase != Phase::Idle || st.session_id.is_some() {
                return Err(SessionError::AlreadyStarted);
            }
            let ticket = InFlight::claim(&mut st, &self.inner.state, CallKind::Start);
            (ticket, st.generation)
        };
        let Some(ticket) = ticket else {
            return Err(SessionError::AlreadyStarted);
        };

        self.status("Starting assessment...");
        let profile = SessionProfile::from_config(&self.inner.config);
        let id = match self.inner.api.create_session(&profile).await {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to create assessment: {}", e);
                self.status("Could not start the assessment");
                return Err(SessionError::Remote(e));
            }
        };

        {
            let mut st = self.lock();
            if st.generation != generation {
                return Ok(ChatOutcome::Stale);
            }
            st.session_id = Some(id.clone());
        }
        info!(session_id = %id, "🩺 Assessment created");
        if !self.advance(generation, Phase::Chat)? {
            return Ok(ChatOutcome::Stale);
        }
        drop(ticket);

        let greeting = self.inner.config.greeting.clone();
        self.submit_chat_turn(ChatInput::Text(greeting)).await
    }

    /// Route a finished transcript by phase.
    pub async fn handle_transcript(&self, text: &str) -> SessionResult<TranscriptRoute> {
        let text = text.trim();
        let (generation, phase, speaking, pending) = {
            let st = self.lock();
            (st.generation, st.phase, st.is_speaking(), st.pending_question.clone())
        };

        if text.is_empty() {
            debug!(phase = %phase, "Empty transcript");
            self.status("Could not understand. Please try again.");
            if phase.consumes_voice() {
                self.schedule_listen(generation, self.inner.config.timing.empty_transcript_resume());
            }
            return Ok(TranscriptRoute::Empty);
        }
        if speaking {
            debug!("Transcript ignored while the assistant is speaking");
            return Ok(TranscriptRoute::Ignored);
        }

        match phase {
            Phase::Chat => Ok(TranscriptRoute::Chat(
                self.submit_chat_turn(ChatInput::Text(text.to_string())).await?,
            )),
            Phase::Questionnaire | Phase::QuestionnaireFreeform => {
                let answer = pending
                    .as_ref()
                    .and_then(|q| q.match_option(text))
                    .unwrap_or(text)
                    .to_string();
                Ok(TranscriptRoute::Questionnaire(
                    self.submit_questionnaire_turn(&answer).await?,
                ))
            }
            _ => {
                debug!(phase = %phase, "Transcript ignored in this phase");
                Ok(TranscriptRoute::Ignored)
            }
        }
    }

    /// Microphone intent from a view. Refused while muted, speaking, voice is disabled, or
    /// no phase consumes voice.
    pub fn request_listen(&self) -> bool {
        let generation = {
            let st = self.lock();
            if st.voice_disabled || st.is_speaking() || !st.phase.consumes_voice() {
                return false;
            }
            st.generation
        };
        if self.inner.voice.is_muted() {
            return false;
        }
        self.schedule_listen(generation, Duration::ZERO);
        true
    }

    pub fn set_muted(&self, muted: bool) {
        self.inner.voice.set_muted(muted);
        if muted {
            self.status("Mic is muted. Type your answers.");
        } else {
            self.status("");
            self.request_listen();
        }
    }

    /// The external Chat -> CaptureVideo trigger, fired once the camera countdown ends.
    pub fn begin_video_capture(&self) -> SessionResult<()> {
        let generation = self.generation();
        self.advance(generation, Phase::CaptureVideo)?;
        Ok(())
    }

    /// Fetch the dashboard summary for the current assessment.
    pub async fn load_dashboard(&self) -> SessionResult<Option<Value>> {
        let (id, generation) = {
            let st = self.lock();
            (st.session_id.clone().ok_or(SessionError::MissingSession)?, st.generation)
        };
        match self.inner.api.fetch_dashboard(&id).await {
            Ok(data) => {
                {
                    let mut st = self.lock();
                    if st.generation != generation {
                        return Ok(None);
                    }
                    st.dashboard = Some(data.clone());
                }
                self.emit(SessionEvent::DashboardReady(data.clone()));
                Ok(Some(data))
            }
            Err(e) => {
                warn!(session_id = %id, "Dashboard fetch failed: {}", e);
                self.status("Could not load dashboard");
                Ok(None)
            }
        }
    }

    /// Cancel speech, stop capture, clear everything and return to Idle. Calls still in
    /// flight finish in the background and their results are discarded.
    pub fn reset(&self) {
        self.inner.voice.cancel_speech();
        self.inner.voice.stop_capture();
        let from = {
            let mut st = self.lock();
            let from = st.phase;
            st.reset();
            from
        };
        info!(from = %from, "🔄 Session reset");
        self.status("");
        if from != Phase::Idle {
            self.emit(SessionEvent::PhaseChanged { from, to: Phase::Idle });
        }
    }
}
