//! # Physio Core - guided assessment session
//!
//! Drives one guided health assessment: intro chat, body-part video, questionnaire,
//! range-of-motion capture and dashboard. The session state machine sequences calls to
//! the assessment backend, the speech pipeline and the pose/ROM stream, and makes sure
//! no two calls of the same kind are in flight at once.
//!
//! ```text
//! Idle → Chat → CaptureVideo → Questionnaire → CaptureRom → Dashboard
//!                                   │  └──────────────────────→ Dashboard
//!                                   └→ QuestionnaireFreeform
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod listen;
pub mod model;
pub mod phase;
pub mod remote;
pub mod rom_stream;
pub mod session;

pub use config::{AssessmentConfig, TimingConfig};
pub use error::{RemoteError, SessionError, SessionResult, StreamError};
pub use events::{ListenRequest, SessionEvent};
pub use listen::run_listen_loop;
pub use model::{ChatAction, ChatReply, Question, QuestionAction, QuestionId, RomRange, SessionId, SessionProfile, Turn};
pub use phase::Phase;
pub use remote::{AssessmentApi, HttpAssessmentClient};
pub use rom_stream::{
    FrameSource, RomCapture, RomCaptureReport, RomCaptureSettings, RomChannel, RomEvent, RomEventSource,
    RomFrameSink, RomStreamConnector, ServerMessage, StillFrameSource, WsRomConnector,
};
pub use session::{
    AssessmentSession, ChatInput, ChatOutcome, QuestionnaireOutcome, RomOutcome, SessionSnapshot, TranscriptRoute,
};
