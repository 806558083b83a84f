//! Error types for the assessment core

use crate::phase::Phase;
use thiserror::Error;

/// Failure of one backend request. Never retried by the client itself.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend rejected request: {0}")]
    Rejected(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Failure of the ROM stream.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connect timed out")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("stream closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => StreamError::Closed,
            other => StreamError::Protocol(other.to_string()),
        }
    }
}

/// Caller errors from session operations. Transport failures the session absorbs are
/// reported through outcome enums instead.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no assessment session has been created")]
    MissingSession,

    #[error("assessment already started")]
    AlreadyStarted,

    #[error("invalid phase transition {from:?} -> {to:?}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("could not create assessment: {0}")]
    Remote(#[from] RemoteError),
}

pub type SessionResult<T> = Result<T, SessionError>;
