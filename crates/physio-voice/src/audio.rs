//! Microphone capture and the `AudioClip` it produces.
//!
//! A `Microphone` is opened once per capture and yields a `Recording`; finishing the
//! recording stops the device stream and returns the buffered PCM. The device-backed
//! `CpalMicrophone` is only compiled with the `device` feature.

use crate::error::{VoiceError, VoiceResult};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Sample rate requested from capture devices and assumed by the placeholders.
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// One bounded capture: mono PCM, -1.0..1.0.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// When the capture stopped.
    pub captured_at: DateTime<Utc>,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            captured_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), DEFAULT_SAMPLE_RATE)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Encode as 16-bit mono WAV for upload.
    pub fn to_wav(&self) -> Vec<u8> {
        pcm_f32_to_wav(&self.samples, self.sample_rate)
    }
}

fn pcm_f32_to_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut buf = Vec::with_capacity(44 + data_len as usize);
    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    // fmt subchunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    buf.extend_from_slice(&2u16.to_le_bytes()); // block align
    buf.extend_from_slice(&16u16.to_le_bytes());
    // data subchunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &s in samples {
        let i = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        buf.extend_from_slice(&i.to_le_bytes());
    }
    buf
}

/// Source of recordings. Implementations keep their device handle for the life of the
/// object; muting never drops it.
pub trait Microphone: Send + Sync {
    /// Start recording. Fails with `VoiceError::AudioDevice` when the device is missing or denied.
    fn open(&self) -> VoiceResult<Box<dyn Recording>>;
}

/// An in-progress recording.
pub trait Recording: Send {
    /// Stop the device stream and return everything captured so far.
    fn finish(self: Box<Self>) -> VoiceResult<AudioClip>;
}

/// Microphone that returns a fixed clip (or silence). For tests and headless runs.
#[derive(Debug, Default, Clone)]
pub struct PlaceholderMicrophone {
    pub clip: Option<AudioClip>,
}

impl PlaceholderMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clip(clip: AudioClip) -> Self {
        Self { clip: Some(clip) }
    }
}

struct PlaceholderRecording(Option<AudioClip>);

impl Recording for PlaceholderRecording {
    fn finish(self: Box<Self>) -> VoiceResult<AudioClip> {
        Ok(self.0.unwrap_or_else(AudioClip::empty))
    }
}

impl Microphone for PlaceholderMicrophone {
    fn open(&self) -> VoiceResult<Box<dyn Recording>> {
        Ok(Box::new(PlaceholderRecording(self.clip.clone())))
    }
}

/// Microphone that is known to be unavailable (permission denied, no input device).
#[derive(Debug, Clone)]
pub struct UnavailableMicrophone {
    pub reason: String,
}

impl UnavailableMicrophone {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Microphone for UnavailableMicrophone {
    fn open(&self) -> VoiceResult<Box<dyn Recording>> {
        Err(VoiceError::AudioDevice(self.reason.clone()))
    }
}

#[cfg(feature = "device")]
mod cpal_mic {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::StreamConfig;
    use std::sync::{mpsc, Arc, Mutex};
    use std::thread;
    use tracing::{info, warn};

    /// Default input device via CPAL. The stream lives on its own thread (cpal `Stream` is
    /// !Send on some platforms) and is dropped when the recording finishes. `open` and
    /// `finish` wait on that thread; the pipeline calls them from the blocking pool.
    #[derive(Debug, Clone)]
    pub struct CpalMicrophone {
        sample_rate: u32,
    }

    impl CpalMicrophone {
        pub fn new(sample_rate: u32) -> Self {
            Self { sample_rate }
        }

        /// Fail early if there is no default input device, or it cannot report an input format.
        pub fn probe() -> VoiceResult<Self> {
            let device = cpal::default_host()
                .default_input_device()
                .ok_or_else(|| VoiceError::AudioDevice("No input device available".to_string()))?;
            let supported = device.default_input_config()?;
            info!(
                native_rate = supported.sample_rate().0,
                channels = supported.channels(),
                "📱 Using input device: {}",
                device.name().unwrap_or_else(|_| "Unknown".to_string())
            );
            Ok(Self::new(DEFAULT_SAMPLE_RATE))
        }
    }

    struct CpalRecording {
        stop_tx: mpsc::Sender<()>,
        worker: thread::JoinHandle<()>,
        samples: Arc<Mutex<Vec<f32>>>,
        sample_rate: u32,
    }

    impl Microphone for CpalMicrophone {
        fn open(&self) -> VoiceResult<Box<dyn Recording>> {
            let sample_rate = self.sample_rate;
            let samples = Arc::new(Mutex::new(Vec::new()));
            let (stop_tx, stop_rx) = mpsc::channel::<()>();
            let (ready_tx, ready_rx) = mpsc::channel::<VoiceResult<()>>();
            let buffer = Arc::clone(&samples);

            let worker = thread::spawn(move || {
                let started = (|| -> VoiceResult<cpal::Stream> {
                    let device = cpal::default_host().default_input_device().ok_or_else(|| {
                        VoiceError::AudioDevice("No input device available".to_string())
                    })?;
                    let config = StreamConfig {
                        channels: 1,
                        sample_rate: cpal::SampleRate(sample_rate),
                        buffer_size: cpal::BufferSize::Default,
                    };
                    let stream = device.build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            if let Ok(mut buf) = buffer.lock() {
                                buf.extend_from_slice(data);
                            }
                        },
                        move |err| {
                            warn!("Audio stream error: {}", err);
                        },
                        None,
                    )?;
                    stream.play()?;
                    Ok(stream)
                })();

                match started {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            });

            ready_rx
                .recv()
                .map_err(|e| VoiceError::AudioDevice(format!("capture thread exited: {}", e)))??;
            info!("🎤 Recording started ({}Hz)", sample_rate);

            Ok(Box::new(CpalRecording {
                stop_tx,
                worker,
                samples,
                sample_rate,
            }))
        }
    }

    impl Recording for CpalRecording {
        fn finish(self: Box<Self>) -> VoiceResult<AudioClip> {
            let _ = self.stop_tx.send(());
            self.worker
                .join()
                .map_err(|_| VoiceError::Capture("capture thread panicked".to_string()))?;
            let samples = self
                .samples
                .lock()
                .map(|mut buf| std::mem::take(&mut *buf))
                .map_err(|e| VoiceError::Capture(format!("sample buffer poisoned: {}", e)))?;
            info!("🛑 Recording stopped, {} samples", samples.len());
            Ok(AudioClip::new(samples, self.sample_rate))
        }
    }
}

#[cfg(feature = "device")]
pub use cpal_mic::CpalMicrophone;
