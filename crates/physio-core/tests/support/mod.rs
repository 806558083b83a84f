//! Test doubles for the session's collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use physio_core::rom_stream::parse_server_message;
use physio_core::{
    AssessmentApi, AssessmentConfig, AssessmentSession, ChatAction, ChatReply, ListenRequest, Question, QuestionAction,
    RemoteError, RomChannel, RomEventSource, RomFrameSink, RomRange, RomStreamConnector, ServerMessage, SessionEvent,
    SessionId, SessionProfile, StreamError, Turn,
};
use physio_voice::{AudioClip, SpeechIo, VoiceError, VoiceResult};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn unavailable() -> RemoteError {
    RemoteError::Status {
        status: 503,
        body: "unavailable".to_string(),
    }
}

pub fn reply(utterance: &str, action: &str) -> ChatReply {
    ChatReply {
        utterance: utterance.to_string(),
        action: ChatAction::parse(Some(action)),
        body_part: None,
    }
}

pub fn question(text: &str, action: &str) -> Question {
    Question {
        text: text.to_string(),
        options: None,
        action: QuestionAction::parse(Some(action)),
        issued_at: Utc::now(),
    }
}

pub fn question_with_options(text: &str, options: &[&str]) -> Question {
    Question {
        options: Some(options.iter().map(|o| o.to_string()).collect()),
        ..question(text, "none")
    }
}

/// Assessment backend that plays back scripted replies and records every call.
#[derive(Default)]
pub struct ScriptedApi {
    create_fails: AtomicBool,
    rom_save_fails: AtomicBool,
    latency: Mutex<Duration>,
    chat_script: Mutex<VecDeque<Result<ChatReply, RemoteError>>>,
    question_script: Mutex<VecDeque<Result<Question, RemoteError>>>,
    pub chat_calls: Mutex<Vec<(Vec<Turn>, Option<String>)>>,
    pub questionnaire_calls: Mutex<Vec<Vec<Turn>>>,
    pub rom_saves: Mutex<Vec<RomRange>>,
    pub creates: AtomicUsize,
}

impl ScriptedApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_chat(&self, reply: Result<ChatReply, RemoteError>) {
        self.chat_script.lock().unwrap().push_back(reply);
    }

    pub fn push_question(&self, question: Result<Question, RemoteError>) {
        self.question_script.lock().unwrap().push_back(question);
    }

    pub fn fail_create(&self) {
        self.create_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_rom_save(&self) {
        self.rom_save_fails.store(true, Ordering::SeqCst);
    }

    /// Every call waits this long before answering.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn chat_count(&self) -> usize {
        self.chat_calls.lock().unwrap().len()
    }

    pub fn questionnaire_count(&self) -> usize {
        self.questionnaire_calls.lock().unwrap().len()
    }

    pub fn last_questionnaire_transcript(&self) -> Vec<Turn> {
        self.questionnaire_calls.lock().unwrap().last().cloned().unwrap_or_default()
    }

    async fn wait(&self) {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl AssessmentApi for ScriptedApi {
    async fn create_session(&self, _profile: &SessionProfile) -> Result<SessionId, RemoteError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.wait().await;
        if self.create_fails.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(SessionId::new("7"))
    }

    async fn chat_turn(&self, _id: &SessionId, transcript: &[Turn], video: Option<&str>) -> Result<ChatReply, RemoteError> {
        self.chat_calls
            .lock()
            .unwrap()
            .push((transcript.to_vec(), video.map(str::to_string)));
        self.wait().await;
        self.chat_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(reply("", "none")))
    }

    async fn questionnaire_turn(&self, _id: &SessionId, transcript: &[Turn]) -> Result<Question, RemoteError> {
        self.questionnaire_calls.lock().unwrap().push(transcript.to_vec());
        self.wait().await;
        self.question_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(unavailable()))
    }

    async fn save_rom(&self, _id: &SessionId, range: RomRange) -> Result<(), RemoteError> {
        self.rom_saves.lock().unwrap().push(range);
        if self.rom_save_fails.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }

    async fn fetch_dashboard(&self, id: &SessionId) -> Result<Value, RemoteError> {
        Ok(json!({ "assessmentId": id.as_str(), "painScore": 4 }))
    }
}

/// Speech double: records what was said, replays scripted transcripts.
#[derive(Default)]
pub struct RecordingVoice {
    pub spoken: Mutex<Vec<String>>,
    transcripts: Mutex<VecDeque<String>>,
    speech_time: Mutex<Duration>,
    pub cancels: AtomicUsize,
    pub stops: AtomicUsize,
    pub captures: AtomicUsize,
    muted: AtomicBool,
    device_missing: AtomicBool,
    cancelled: Notify,
}

impl RecordingVoice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_transcript(&self, text: &str) {
        self.transcripts.lock().unwrap().push_back(text.to_string());
    }

    /// Each utterance takes this long to play.
    pub fn set_speech_time(&self, time: Duration) {
        *self.speech_time.lock().unwrap() = time;
    }

    pub fn remove_device(&self) {
        self.device_missing.store(true, Ordering::SeqCst);
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechIo for RecordingVoice {
    async fn capture(&self) -> VoiceResult<AudioClip> {
        if self.is_muted() {
            return Err(VoiceError::Muted);
        }
        if self.device_missing.load(Ordering::SeqCst) {
            return Err(VoiceError::AudioDevice("permission denied".to_string()));
        }
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(AudioClip::new(vec![0.1; 16], 16000))
    }

    fn stop_capture(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    async fn transcribe(&self, _clip: &AudioClip) -> VoiceResult<String> {
        Ok(self.transcripts.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn speak(&self, text: &str) -> VoiceResult<()> {
        self.spoken.lock().unwrap().push(text.to_string());
        let time = *self.speech_time.lock().unwrap();
        if time.is_zero() {
            return Ok(());
        }
        let cancelled = self.cancelled.notified();
        tokio::select! {
            _ = tokio::time::sleep(time) => Ok(()),
            _ = cancelled => Err(VoiceError::Cancelled),
        }
    }

    fn cancel_speech(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.cancelled.notify_waiters();
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }
}

/// ROM service double: replays raw server messages, then stays open.
#[derive(Default)]
pub struct MemoryRomConnector {
    messages: Mutex<Vec<String>>,
    refuse: AtomicBool,
    pub frames: Arc<Mutex<Vec<String>>>,
}

impl MemoryRomConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_message(&self, raw: &str) {
        self.messages.lock().unwrap().push(raw.to_string());
    }

    pub fn refuse_connections(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

struct MemorySink(Arc<Mutex<Vec<String>>>);

struct MemorySource(VecDeque<String>);

#[async_trait]
impl RomFrameSink for MemorySink {
    async fn send_frame(&mut self, frame: String) -> Result<(), StreamError> {
        self.0.lock().unwrap().push(frame);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        Ok(())
    }
}

#[async_trait]
impl RomEventSource for MemorySource {
    async fn next_message(&mut self) -> Option<Result<ServerMessage, StreamError>> {
        match self.0.pop_front() {
            Some(raw) => Some(Ok(parse_server_message(&raw))),
            None => std::future::pending().await,
        }
    }
}

#[async_trait]
impl RomStreamConnector for MemoryRomConnector {
    async fn connect(&self) -> Result<RomChannel, StreamError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(StreamError::Connect("connection refused".to_string()));
        }
        Ok(RomChannel {
            frames: Box::new(MemorySink(Arc::clone(&self.frames))),
            events: Box::new(MemorySource(self.messages.lock().unwrap().drain(..).collect())),
        })
    }
}

pub struct Harness {
    pub session: AssessmentSession,
    pub api: Arc<ScriptedApi>,
    pub voice: Arc<RecordingVoice>,
    pub rom: Arc<MemoryRomConnector>,
    pub listen_rx: mpsc::UnboundedReceiver<ListenRequest>,
    pub events: broadcast::Receiver<SessionEvent>,
}

pub fn harness() -> Harness {
    harness_with(AssessmentConfig::default())
}

pub fn harness_with(config: AssessmentConfig) -> Harness {
    init_tracing();
    let api = ScriptedApi::new();
    let voice = RecordingVoice::new();
    let rom = MemoryRomConnector::new();
    let (session, listen_rx) = AssessmentSession::new(config, api.clone(), voice.clone(), rom.clone());
    let events = session.subscribe();
    Harness {
        session,
        api,
        voice,
        rom,
        listen_rx,
        events,
    }
}

impl Harness {
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub fn drain_listens(&mut self) -> Vec<ListenRequest> {
        let mut out = Vec::new();
        while let Ok(request) = self.listen_rx.try_recv() {
            out.push(request);
        }
        out
    }

    /// Start and go straight into the questionnaire; `opening` answers the opening turn.
    pub async fn into_questionnaire(&self, opening: Question) {
        self.api.push_chat(Ok(reply("Let's begin", "next_api")));
        self.api.push_question(Ok(opening));
        self.session.start_assessment().await.expect("start");
    }
}
