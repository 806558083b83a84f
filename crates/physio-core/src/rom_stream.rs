//! Pose/ROM stream client.
//!
//! One duplex connection per ROM capture: camera frames go out as JPEG data URLs on a
//! fixed interval, measurement events come back asynchronously. Only the newest
//! measurement is kept. A failed or silent stream yields the zero range so the
//! assessment can still move on.

use crate::config::TimingConfig;
use crate::error::StreamError;
use crate::model::RomRange;
use async_trait::async_trait;
use base64::Engine;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// One measurement pushed by the pose service.
#[derive(Debug, Clone, PartialEq)]
pub struct RomEvent {
    pub range: Option<RomRange>,
    /// Coaching text for the user ("raise your arm higher").
    pub guidance: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Measurement(RomEvent),
    /// `pong`, non-JSON payloads and anything without ROM data.
    Heartbeat,
}

fn parse_range(value: &Value) -> Option<RomRange> {
    let items = value.as_array()?;
    let at = |i: usize| items.get(i).and_then(Value::as_f64).unwrap_or(0.0);
    Some(RomRange::new(at(0), at(1)))
}

pub fn parse_server_message(text: &str) -> ServerMessage {
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("pong") {
        return ServerMessage::Heartbeat;
    }
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return ServerMessage::Heartbeat;
    };
    let Some(rom) = value.get("rom_data").or_else(|| value.get("romData")) else {
        return ServerMessage::Heartbeat;
    };
    let range = rom.get("ROM").or_else(|| rom.get("range")).and_then(parse_range);
    let guidance = ["guidance", "guidanceText"]
        .iter()
        .find_map(|k| rom.get(*k).and_then(Value::as_str))
        .map(str::to_string);
    ServerMessage::Measurement(RomEvent { range, guidance })
}

/// Wrap JPEG bytes the way the pose service expects them.
pub fn encode_frame(jpeg: &[u8]) -> String {
    format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(jpeg)
    )
}

/// Outgoing half of a ROM connection.
#[async_trait]
pub trait RomFrameSink: Send {
    async fn send_frame(&mut self, frame: String) -> Result<(), StreamError>;
    async fn close(&mut self) -> Result<(), StreamError>;
}

/// Incoming half of a ROM connection.
#[async_trait]
pub trait RomEventSource: Send {
    /// Next server message, `None` once the stream has closed.
    async fn next_message(&mut self) -> Option<Result<ServerMessage, StreamError>>;
}

pub struct RomChannel {
    pub frames: Box<dyn RomFrameSink>,
    pub events: Box<dyn RomEventSource>,
}

/// Opens ROM connections.
#[async_trait]
pub trait RomStreamConnector: Send + Sync {
    async fn connect(&self) -> Result<RomChannel, StreamError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector for the pose service.
#[derive(Debug, Clone)]
pub struct WsRomConnector {
    url: String,
}

impl WsRomConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

struct WsFrameSink(SplitSink<WsStream, Message>);

struct WsEventSource(SplitStream<WsStream>);

#[async_trait]
impl RomFrameSink for WsFrameSink {
    async fn send_frame(&mut self, frame: String) -> Result<(), StreamError> {
        self.0.send(Message::Text(frame)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        self.0.close().await?;
        Ok(())
    }
}

#[async_trait]
impl RomEventSource for WsEventSource {
    async fn next_message(&mut self) -> Option<Result<ServerMessage, StreamError>> {
        match self.0.next().await? {
            Ok(Message::Text(text)) => Some(Ok(parse_server_message(&text))),
            Ok(Message::Close(_)) => None,
            Ok(_) => Some(Ok(ServerMessage::Heartbeat)),
            Err(e) => Some(Err(e.into())),
        }
    }
}

#[async_trait]
impl RomStreamConnector for WsRomConnector {
    async fn connect(&self) -> Result<RomChannel, StreamError> {
        info!(url = %self.url, "🔌 Connecting to ROM stream");
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        let (write, read) = ws.split();
        Ok(RomChannel {
            frames: Box::new(WsFrameSink(write)),
            events: Box::new(WsEventSource(read)),
        })
    }
}

/// Camera frames for the ROM stream.
pub trait FrameSource: Send {
    /// JPEG bytes for the current frame, or `None` when no frame is ready yet.
    fn next_frame(&mut self) -> Option<Vec<u8>>;
}

/// Sends the same image every tick.
#[derive(Debug, Clone)]
pub struct StillFrameSource {
    jpeg: Vec<u8>,
}

impl StillFrameSource {
    pub fn new(jpeg: Vec<u8>) -> Self {
        Self { jpeg }
    }
}

impl FrameSource for StillFrameSource {
    fn next_frame(&mut self) -> Option<Vec<u8>> {
        Some(self.jpeg.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RomCaptureSettings {
    pub connect_timeout: Duration,
    pub frame_interval: Duration,
    pub window: Duration,
}

impl From<&TimingConfig> for RomCaptureSettings {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            connect_timeout: timing.rom_connect_timeout(),
            frame_interval: timing.rom_frame_interval(),
            window: timing.rom_capture_window(),
        }
    }
}

/// Result of one capture window.
#[derive(Debug, Clone, PartialEq)]
pub struct RomCaptureReport {
    pub range: RomRange,
    /// No usable measurement: connect failed or nothing arrived. `range` is zero.
    pub degraded: bool,
    pub frames_sent: u32,
    pub guidance: Option<String>,
}

impl RomCaptureReport {
    fn degraded() -> Self {
        Self {
            range: RomRange::zero(),
            degraded: true,
            frames_sent: 0,
            guidance: None,
        }
    }
}

/// Runs one ROM capture window against a connector.
pub struct RomCapture {
    connector: Arc<dyn RomStreamConnector>,
    settings: RomCaptureSettings,
    latest: watch::Sender<Option<RomEvent>>,
}

impl RomCapture {
    pub fn new(connector: Arc<dyn RomStreamConnector>, settings: RomCaptureSettings) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            connector,
            settings,
            latest,
        }
    }

    /// Newest measurement of the running (or last) capture.
    pub fn subscribe(&self) -> watch::Receiver<Option<RomEvent>> {
        self.latest.subscribe()
    }

    /// Connect, stream frames for the window, and report the newest measurement.
    /// `on_event` sees every measurement as it arrives.
    pub async fn run(
        &self,
        source: &mut dyn FrameSource,
        on_event: &mut (dyn FnMut(&RomEvent) + Send),
    ) -> RomCaptureReport {
        self.latest.send_replace(None);

        let channel = match tokio::time::timeout(self.settings.connect_timeout, self.connector.connect()).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                warn!("ROM stream connect failed: {}", e);
                return RomCaptureReport::degraded();
            }
            Err(_) => {
                warn!("ROM stream connect failed: {}", StreamError::Timeout);
                return RomCaptureReport::degraded();
            }
        };
        let RomChannel {
            frames: mut sink,
            mut events,
        } = channel;

        let mut frames_sent = 0u32;
        {
            let latest = &self.latest;
            let reading = async {
                while let Some(message) = events.next_message().await {
                    match message {
                        Ok(ServerMessage::Measurement(event)) => {
                            debug!(range = ?event.range, "📥 ROM measurement");
                            on_event(&event);
                            latest.send_replace(Some(event));
                        }
                        Ok(ServerMessage::Heartbeat) => {}
                        Err(e) => {
                            warn!("ROM stream read failed: {}", e);
                            break;
                        }
                    }
                }
            };
            let writing = async {
                let mut ticker = tokio::time::interval(self.settings.frame_interval.max(Duration::from_millis(1)));
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    let Some(jpeg) = source.next_frame() else { continue };
                    if let Err(e) = sink.send_frame(encode_frame(&jpeg)).await {
                        warn!("ROM frame send failed: {}", e);
                        break;
                    }
                    frames_sent += 1;
                }
            };
            let window = tokio::time::sleep(self.settings.window);
            tokio::pin!(reading, writing, window);

            let (mut read_done, mut write_done) = (false, false);
            while !(read_done && write_done) {
                tokio::select! {
                    _ = &mut window => break,
                    _ = &mut reading, if !read_done => read_done = true,
                    _ = &mut writing, if !write_done => write_done = true,
                }
            }
        }
        if let Err(e) = sink.close().await {
            debug!("ROM stream close: {}", e);
        }

        let latest = self.latest.borrow().clone();
        let guidance = latest.as_ref().and_then(|e| e.guidance.clone());
        match latest.and_then(|e| e.range) {
            Some(range) => {
                info!(min = range.minimum, max = range.maximum, frames_sent, "📊 ROM capture finished");
                RomCaptureReport {
                    range,
                    degraded: false,
                    frames_sent,
                    guidance,
                }
            }
            None => {
                warn!(frames_sent, "No ROM measurement received, using zero range");
                RomCaptureReport {
                    frames_sent,
                    guidance,
                    ..RomCaptureReport::degraded()
                }
            }
        }
    }
}
