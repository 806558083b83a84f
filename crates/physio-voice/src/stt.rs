//! **Speech-to-Text (STT)**: turn a captured `AudioClip` into text.
//!
//! `RemoteStt` uploads the clip to the assessment backend (`/api/speech-to-text`);
//! `PlaceholderStt` returns a scripted string for tests and headless runs.

use crate::audio::AudioClip;
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Backend for converting a clip to text.
#[async_trait]
pub trait SttBackend: Send + Sync {
    /// Transcribe one clip. Return an empty string if nothing intelligible was heard.
    async fn transcribe(&self, clip: &AudioClip) -> VoiceResult<String>;
}

/// Placeholder STT: returns a fixed string (empty by default).
#[derive(Debug, Default)]
pub struct PlaceholderStt {
    pub response: Option<String>,
}

impl PlaceholderStt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(s: impl Into<String>) -> Self {
        Self {
            response: Some(s.into()),
        }
    }
}

#[async_trait]
impl SttBackend for PlaceholderStt {
    async fn transcribe(&self, _clip: &AudioClip) -> VoiceResult<String> {
        Ok(self.response.clone().unwrap_or_default())
    }
}

/// STT through the assessment backend. The clip is sent as a WAV multipart field `audio`.
#[derive(Debug, Clone)]
pub struct RemoteStt {
    /// Backend base URL without trailing slash.
    pub base_url: String,
    client: reqwest::Client,
}

impl RemoteStt {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::Config(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

/// Pull the transcript out of either `{ "transcript": .. }`, `{ "text": .. }`, or the same
/// wrapped in the backend's `{ "success": .., "data": .. }` envelope.
pub(crate) fn extract_transcript(body: &serde_json::Value) -> Option<String> {
    let pick = |v: &serde_json::Value| {
        v.get("transcript")
            .or_else(|| v.get("text"))
            .and_then(|t| t.as_str())
            .map(|t| t.trim().to_string())
    };
    if let Some(data) = body.get("data") {
        if let Some(s) = data.as_str() {
            return Some(s.trim().to_string());
        }
        if let Some(t) = pick(data) {
            return Some(t);
        }
    }
    pick(body)
}

#[async_trait]
impl SttBackend for RemoteStt {
    async fn transcribe(&self, clip: &AudioClip) -> VoiceResult<String> {
        if clip.is_empty() {
            return Ok(String::new());
        }
        let url = format!("{}/api/speech-to-text", self.base_url);
        let part = reqwest::multipart::Part::bytes(clip.to_wav())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("audio", part);
        let res = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Stt(format!("STT API error {}: {}", status, body)));
        }
        let json: serde_json::Value = res.json().await.map_err(|e| VoiceError::Stt(e.to_string()))?;
        let text = extract_transcript(&json).unwrap_or_default();
        debug!(chars = text.len(), "📝 transcript received");
        Ok(text)
    }
}
