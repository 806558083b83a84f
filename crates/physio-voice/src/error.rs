//! Error types for the speech I/O adapter

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur while capturing, transcribing or speaking
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Microphone is muted")]
    Muted,

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Speech cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    /// Microphone or camera unavailable (denied, missing, or failed to open).
    pub fn is_device_error(&self) -> bool {
        matches!(self, VoiceError::AudioDevice(_))
    }
}

#[cfg(feature = "device")]
impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

#[cfg(feature = "device")]
impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

#[cfg(feature = "device")]
impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_errors_are_classified() {
        assert!(VoiceError::AudioDevice("denied".into()).is_device_error());
        assert!(!VoiceError::Muted.is_device_error());
        assert!(!VoiceError::Stt("bad".into()).is_device_error());
    }
}
