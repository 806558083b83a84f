//! Session data: identifiers, transcript turns, questions, backend actions and ROM ranges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Backend assessment id. The backend sends it as a number; strings are accepted too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Str(String),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Num(n) => SessionId(n.to_string()),
            Raw::Str(s) => SessionId(s),
        })
    }
}

/// One user/assistant exchange. `assistant` stays empty until the reply arrives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            user: text.into(),
            assistant: String::new(),
        }
    }

    pub fn exchange(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

fn normalize(raw: Option<&str>) -> String {
    raw.map(|s| s.trim().to_ascii_lowercase()).unwrap_or_default()
}

/// Directive attached to a chat reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatAction {
    None,
    /// Ask the user to show the painful area on camera.
    CameraOn,
    /// Chat is done; move on to the questionnaire.
    NextApi,
    /// Sent after video identification; handled like `NextApi`.
    Restart,
    Other(String),
}

impl ChatAction {
    pub fn parse(raw: Option<&str>) -> Self {
        match normalize(raw).as_str() {
            "" | "none" => ChatAction::None,
            "camera_on" => ChatAction::CameraOn,
            "next_api" => ChatAction::NextApi,
            "restart" => ChatAction::Restart,
            other => ChatAction::Other(other.to_string()),
        }
    }
}

/// Directive attached to a questionnaire reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionAction {
    None,
    RomApi,
    DashboardApi,
    Complete,
    EndQuestionnaire,
    Other(String),
}

impl QuestionAction {
    pub fn parse(raw: Option<&str>) -> Self {
        match normalize(raw).as_str() {
            "" | "none" => QuestionAction::None,
            "rom_api" => QuestionAction::RomApi,
            "dashboard_api" => QuestionAction::DashboardApi,
            "complete" => QuestionAction::Complete,
            "end_questionnaire" => QuestionAction::EndQuestionnaire,
            other => QuestionAction::Other(other.to_string()),
        }
    }

    /// Whether this action marks the questionnaire complete.
    pub fn completes(&self) -> bool {
        matches!(
            self,
            QuestionAction::RomApi | QuestionAction::DashboardApi | QuestionAction::Complete | QuestionAction::EndQuestionnaire
        )
    }
}

/// Parsed chat reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub utterance: String,
    pub action: ChatAction,
    /// Body part named by video identification, when the backend sends one.
    pub body_part: Option<String>,
}

/// Identity of a question for de-duplication: its text plus when it was issued.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuestionId {
    pub text: String,
    pub issued_at: i64,
}

/// A questionnaire question as issued by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub text: String,
    pub options: Option<Vec<String>>,
    pub action: QuestionAction,
    /// Backend timestamp when present, otherwise the time the reply was received.
    pub issued_at: DateTime<Utc>,
}

impl Question {
    pub fn id(&self) -> QuestionId {
        QuestionId {
            text: self.text.clone(),
            issued_at: self.issued_at.timestamp_millis(),
        }
    }

    /// Option whose text contains the answer or is contained in it, ignoring case.
    pub fn match_option(&self, answer: &str) -> Option<&str> {
        let answer = answer.trim().to_lowercase();
        if answer.is_empty() {
            return None;
        }
        self.options.as_ref()?.iter().map(String::as_str).find(|option| {
            let option_lc = option.to_lowercase();
            option_lc.contains(&answer) || answer.contains(&option_lc)
        })
    }

    /// Question asks the user to get ready to demonstrate a movement on video.
    pub fn asks_for_movement(&self) -> bool {
        let text = self.text.to_lowercase();
        text.contains("video") && text.contains("move")
    }
}

/// The answer signals readiness or agreement.
pub fn is_affirmative(answer: &str) -> bool {
    let answer = answer.to_lowercase();
    answer.contains("ready") || answer.contains("yes")
}

/// Range of motion in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RomRange {
    pub minimum: f64,
    pub maximum: f64,
}

impl RomRange {
    pub fn new(minimum: f64, maximum: f64) -> Self {
        Self { minimum, maximum }
    }

    pub fn zero() -> Self {
        Self::default()
    }
}

/// Who is being assessed and for what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProfile {
    pub subject_id: u32,
    pub anatomy_region_id: u32,
    pub assessment_kind: String,
}

impl SessionProfile {
    pub fn from_config(cfg: &crate::config::AssessmentConfig) -> Self {
        Self {
            subject_id: cfg.subject_id,
            anatomy_region_id: cfg.anatomy_region_id,
            assessment_kind: cfg.assessment_kind.clone(),
        }
    }
}
