//! Assessment backend client.
//!
//! Every call is one request/response with no retry. Responses arrive in the backend's
//! `{ success, data, message?, error? }` envelope; a non-2xx status or `success: false`
//! is a `RemoteError`.

use crate::error::RemoteError;
use crate::model::{ChatAction, ChatReply, Question, QuestionAction, RomRange, SessionId, SessionProfile, Turn};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Shown when a questionnaire reply carries no text.
const DEFAULT_QUESTION_TEXT: &str = "Please continue...";

/// Backend calls the session makes.
#[async_trait]
pub trait AssessmentApi: Send + Sync {
    async fn create_session(&self, profile: &SessionProfile) -> Result<SessionId, RemoteError>;

    /// `video` is a base64 recording for body-part identification.
    async fn chat_turn(&self, id: &SessionId, transcript: &[Turn], video: Option<&str>) -> Result<ChatReply, RemoteError>;

    async fn questionnaire_turn(&self, id: &SessionId, transcript: &[Turn]) -> Result<Question, RemoteError>;

    async fn save_rom(&self, id: &SessionId, range: RomRange) -> Result<(), RemoteError>;

    /// Summary shown at the end of the assessment.
    async fn fetch_dashboard(&self, id: &SessionId) -> Result<Value, RemoteError>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest<'a> {
    user_id: u32,
    anatomy_id: u32,
    assessment_type: &'a str,
}

/// Chat history entries use `response` for the assistant side.
#[derive(Serialize)]
struct ChatMessage<'a> {
    user: &'a str,
    response: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    chat_history: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video: Option<&'a str>,
}

#[derive(Serialize)]
struct QuestionnaireRequest<'a> {
    chat_history: &'a [Turn],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RomRequest {
    range_of_motion: RomRange,
}

fn str_field<'a>(data: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| data.get(*k).and_then(Value::as_str))
}

pub(crate) fn parse_session_id(data: &Value) -> Result<SessionId, RemoteError> {
    ["assessmentId", "assessment_id", "id", "ID"]
        .iter()
        .find_map(|k| data.get(*k).filter(|v| !v.is_null()))
        .ok_or_else(|| RemoteError::Decode("create response has no assessment id".to_string()))
        .and_then(|v| serde_json::from_value(v.clone()).map_err(|e| RemoteError::Decode(e.to_string())))
}

pub(crate) fn parse_chat_reply(data: &Value) -> ChatReply {
    ChatReply {
        utterance: str_field(data, &["response", "message"]).unwrap_or_default().to_string(),
        action: ChatAction::parse(str_field(data, &["action"])),
        body_part: str_field(data, &["body_part", "bodyPart"])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    }
}

fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc)),
        _ => None,
    }
}

pub(crate) fn parse_question(data: &Value) -> Question {
    let text = str_field(data, &["question", "response"])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_QUESTION_TEXT)
        .to_string();
    let options = data.get("options").and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(|o| o.as_str().map(str::to_string))
            .collect::<Vec<_>>()
    });
    Question {
        text,
        options: options.filter(|o| !o.is_empty()),
        action: QuestionAction::parse(str_field(data, &["action"])),
        issued_at: parse_timestamp(data.get("timestamp")).unwrap_or_else(Utc::now),
    }
}

/// `AssessmentApi` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAssessmentClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpAssessmentClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn assessment_url(&self, id: &SessionId, tail: &str) -> String {
        format!("{}/assessments/{}/{}", self.base_url, id, tail)
    }

    async fn unwrap_envelope(res: reqwest::Response) -> Result<Value, RemoteError> {
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "backend call failed");
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let envelope: Envelope = res.json().await.map_err(|e| RemoteError::Decode(e.to_string()))?;
        if !envelope.success {
            let reason = envelope
                .message
                .filter(|m| !m.is_empty())
                .or_else(|| envelope.error.map(|e| e.to_string()))
                .unwrap_or_else(|| "success=false".to_string());
            return Err(RemoteError::Rejected(reason));
        }
        Ok(envelope.data)
    }

    async fn post<B: Serialize + ?Sized + Sync>(&self, url: &str, body: &B) -> Result<Value, RemoteError> {
        debug!(url = %url, "POST");
        let res = self.client.post(url).json(body).send().await?;
        Self::unwrap_envelope(res).await
    }
}

#[async_trait]
impl AssessmentApi for HttpAssessmentClient {
    async fn create_session(&self, profile: &SessionProfile) -> Result<SessionId, RemoteError> {
        let url = format!("{}/assessments", self.base_url);
        let body = CreateRequest {
            user_id: profile.subject_id,
            anatomy_id: profile.anatomy_region_id,
            assessment_type: &profile.assessment_kind,
        };
        let data = self.post(&url, &body).await?;
        parse_session_id(&data)
    }

    async fn chat_turn(&self, id: &SessionId, transcript: &[Turn], video: Option<&str>) -> Result<ChatReply, RemoteError> {
        let body = ChatRequest {
            chat_history: transcript
                .iter()
                .map(|t| ChatMessage {
                    user: &t.user,
                    response: &t.assistant,
                })
                .collect(),
            video,
        };
        let data = self.post(&self.assessment_url(id, "chat"), &body).await?;
        Ok(parse_chat_reply(&data))
    }

    async fn questionnaire_turn(&self, id: &SessionId, transcript: &[Turn]) -> Result<Question, RemoteError> {
        let body = QuestionnaireRequest { chat_history: transcript };
        let data = self.post(&self.assessment_url(id, "questionnaires"), &body).await?;
        Ok(parse_question(&data))
    }

    async fn save_rom(&self, id: &SessionId, range: RomRange) -> Result<(), RemoteError> {
        let body = RomRequest { range_of_motion: range };
        self.post(&self.assessment_url(id, "rom"), &body).await?;
        Ok(())
    }

    async fn fetch_dashboard(&self, id: &SessionId) -> Result<Value, RemoteError> {
        let url = self.assessment_url(id, "dashboard");
        debug!(url = %url, "GET");
        let res = self.client.get(&url).send().await?;
        Self::unwrap_envelope(res).await
    }
}
