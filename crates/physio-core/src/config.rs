//! Assessment configuration: built-in defaults, then an optional TOML file, then
//! `PHYSIO__*` environment overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Every delay the session waits on. All of them are tunable; none is load-bearing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Ceiling for one microphone capture.
    pub capture_ceiling_ms: u64,
    /// Delay before listening again after a failed chat call.
    pub chat_failure_resume_ms: u64,
    /// Delay before listening again after an empty transcript.
    pub empty_transcript_resume_ms: u64,
    pub questionnaire_retry_delay_ms: u64,
    /// Retries after a failed questionnaire call, so up to `1 + max_retries` calls per turn.
    pub questionnaire_max_retries: u32,
    /// Pause before the degraded jump to ROM capture.
    pub forced_rom_delay_ms: u64,
    /// Countdown shown before video capture begins.
    pub camera_countdown_secs: u64,
    pub rom_frame_interval_ms: u64,
    pub rom_connect_timeout_ms: u64,
    /// How long one ROM capture streams frames.
    pub rom_capture_window_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            capture_ceiling_ms: 5000,
            chat_failure_resume_ms: 2000,
            empty_transcript_resume_ms: 1000,
            questionnaire_retry_delay_ms: 2000,
            questionnaire_max_retries: 3,
            forced_rom_delay_ms: 2000,
            camera_countdown_secs: 5,
            rom_frame_interval_ms: 200,
            rom_connect_timeout_ms: 10_000,
            rom_capture_window_secs: 5,
        }
    }
}

impl TimingConfig {
    pub fn capture_ceiling(&self) -> Duration {
        Duration::from_millis(self.capture_ceiling_ms)
    }

    pub fn chat_failure_resume(&self) -> Duration {
        Duration::from_millis(self.chat_failure_resume_ms)
    }

    pub fn empty_transcript_resume(&self) -> Duration {
        Duration::from_millis(self.empty_transcript_resume_ms)
    }

    pub fn questionnaire_retry_delay(&self) -> Duration {
        Duration::from_millis(self.questionnaire_retry_delay_ms)
    }

    pub fn forced_rom_delay(&self) -> Duration {
        Duration::from_millis(self.forced_rom_delay_ms)
    }

    pub fn camera_countdown(&self) -> Duration {
        Duration::from_secs(self.camera_countdown_secs)
    }

    pub fn rom_frame_interval(&self) -> Duration {
        Duration::from_millis(self.rom_frame_interval_ms)
    }

    pub fn rom_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.rom_connect_timeout_ms)
    }

    pub fn rom_capture_window(&self) -> Duration {
        Duration::from_secs(self.rom_capture_window_secs)
    }
}

/// Assessment client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssessmentConfig {
    /// Backend base URL (assessment routes and `/api/*` speech routes).
    pub api_base_url: String,
    /// WebSocket URL of the pose/ROM analysis service.
    pub rom_stream_url: String,
    pub subject_id: u32,
    pub anatomy_region_id: u32,
    pub assessment_kind: String,
    pub request_timeout_secs: u64,
    /// First chat utterance sent after the session is created.
    pub greeting: String,
    /// Synthetic first questionnaire utterance.
    pub opening_utterance: String,
    /// Body part assumed when video identification fails or returns nothing.
    pub fallback_body_part: String,
    pub timing: TimingConfig,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_string(),
            rom_stream_url: "ws://localhost:8000/ws/rom".to_string(),
            subject_id: 1,
            anatomy_region_id: 3,
            assessment_kind: "PAIN".to_string(),
            request_timeout_secs: 30,
            greeting: "Hello".to_string(),
            opening_utterance: "Let's continue with the assessment".to_string(),
            fallback_body_part: "lower back".to_string(),
            timing: TimingConfig::default(),
        }
    }
}

impl AssessmentConfig {
    /// Load from defaults, `PHYSIO_CONFIG` (or `config/assessment`), then `PHYSIO__*` env vars.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path = std::env::var("PHYSIO_CONFIG").unwrap_or_else(|_| "config/assessment".to_string());
        Self::load_from(Path::new(&config_path))
    }

    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        // Accept the path with or without its `.toml` extension.
        let with_ext = path.with_extension("toml");
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else if with_ext.exists() {
            builder.add_source(config::File::from(with_ext.as_path()))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("PHYSIO")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        built.try_deserialize()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_assessment_flow() {
        let cfg = AssessmentConfig::default();
        assert_eq!(cfg.greeting, "Hello");
        assert_eq!(cfg.assessment_kind, "PAIN");
        assert_eq!(cfg.timing.questionnaire_max_retries, 3);
        assert_eq!(cfg.timing.rom_frame_interval(), Duration::from_millis(200));
        assert_eq!(cfg.timing.capture_ceiling(), Duration::from_secs(5));
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("physio-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("assessment.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "api_base_url = \"http://backend:9000\"\nsubject_id = 42\n\n[timing]\nquestionnaire_retry_delay_ms = 50"
        )
        .unwrap();

        let cfg = AssessmentConfig::load_from(&path).unwrap();
        assert_eq!(cfg.api_base_url, "http://backend:9000");
        assert_eq!(cfg.subject_id, 42);
        assert_eq!(cfg.timing.questionnaire_retry_delay_ms, 50);
        assert_eq!(cfg.timing.questionnaire_max_retries, 3);
        assert_eq!(cfg.fallback_body_part, "lower back");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let cfg = AssessmentConfig::load_from(Path::new("/nonexistent/physio/assessment")).unwrap();
        assert_eq!(cfg.opening_utterance, "Let's continue with the assessment");
    }
}
