//! # Physio Voice - speech I/O for the guided assessment
//!
//! Captures short bounded utterances, transcribes them through the assessment backend,
//! and speaks assistant replies to completion. Playback failures fall back to the local
//! system synthesizer so the conversation never stalls on audio.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      VoicePipeline                        │
//! │  ┌──────────────┐  ┌──────────────┐                       │
//! │  │  Microphone  │→ │  SttBackend  │→ transcript           │
//! │  │ (cpal / stub)│  │ (remote/stub)│                       │
//! │  └──────────────┘  └──────────────┘                       │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────┐   │
//! │  │  TtsBackend  │→ │  AudioSink   │  │ FallbackSpeech │   │
//! │  │ (remote/stub)│  │(rodio / null)│  │ (espeak / say) │   │
//! │  └──────────────┘  └──────────────┘  └────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Hardware backends are compiled with the `device` feature.

pub mod audio;
pub mod error;
pub mod speech_io;
pub mod stt;
pub mod voice_output;

pub use audio::{AudioClip, Microphone, PlaceholderMicrophone, Recording, UnavailableMicrophone, DEFAULT_SAMPLE_RATE};
#[cfg(feature = "device")]
pub use audio::CpalMicrophone;
pub use error::{VoiceError, VoiceResult};
pub use speech_io::{SpeechIo, VoicePipeline, DEFAULT_CAPTURE_CEILING};
pub use stt::{PlaceholderStt, RemoteStt, SttBackend};
pub use voice_output::{
    AudioSink, FallbackSpeech, NullSink, PlaceholderTts, RemoteTts, SilentFallback, SystemSpeech, TtsBackend,
};
#[cfg(feature = "device")]
pub use voice_output::RodioSink;
