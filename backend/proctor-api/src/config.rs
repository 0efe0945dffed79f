use serde::Deserialize;
use std::env;
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub server: ServerSettings,
    #[validate(nested)]
    pub assessment: AssessmentSettings,
    #[validate(nested)]
    pub monitor: MonitorSettings,
    #[validate(nested)]
    pub clock: ClockSettings,
    #[validate(nested)]
    pub retention: RetentionSettings,
    #[serde(default)]
    pub question_bank: QuestionBankSettings,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ServerSettings {
    #[validate(length(min = 1, message = "bind_addr must not be empty"))]
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_pass_threshold"))]
pub struct AssessmentSettings {
    #[validate(range(min = 1, max = 100, message = "question_count must be 1..=100"))]
    pub question_count: usize,
    #[validate(range(min = 1, max = 3600, message = "question_time_limit_secs must be 1..=3600"))]
    pub question_time_limit_secs: u64,
    pub pass_threshold: usize,
}

impl AssessmentSettings {
    pub fn question_time_limit(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.question_time_limit_secs as i64)
    }
}

fn validate_pass_threshold(settings: &AssessmentSettings) -> Result<(), ValidationError> {
    if settings.pass_threshold > settings.question_count {
        let mut err = ValidationError::new("pass_threshold");
        err.message = Some("pass_threshold cannot exceed question_count".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MonitorSettings {
    #[validate(range(min = 50, max = 10_000, message = "poll_interval_ms must be 50..=10000"))]
    pub poll_interval_ms: u64,
    #[validate(range(min = 1, max = 60, message = "absence_grace_secs must be 1..=60"))]
    pub absence_grace_secs: u64,
    #[validate(range(min = 100, max = 60_000, message = "stall_timeout_ms must be 100..=60000"))]
    pub stall_timeout_ms: u64,
    pub min_subject_size_px: u32,
    #[validate(range(min = 0.0, message = "audio_threshold must not be negative"))]
    pub audio_threshold: f32,
    #[validate(range(min = 1, message = "audio_sustain_buffers must be at least 1"))]
    pub audio_sustain_buffers: u32,
    #[validate(range(min = 1, message = "ledger_capacity must be at least 1"))]
    pub ledger_capacity: Option<usize>,
}

impl MonitorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn absence_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.absence_grace_secs as i64)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ClockSettings {
    #[validate(range(min = 10, max = 5_000, message = "tick_interval_ms must be 10..=5000"))]
    pub tick_interval_ms: u64,
}

impl ClockSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// How long finished or abandoned attempts stay in the session table.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RetentionSettings {
    /// An attempt never started within this window is abandoned.
    #[validate(range(min = 1, max = 86_400, message = "unstarted_timeout_secs must be 1..=86400"))]
    pub unstarted_timeout_secs: u64,
    /// Completed attempts keep serving results for this long.
    #[validate(range(max = 86_400, message = "completed_ttl_secs must be at most 86400"))]
    pub completed_ttl_secs: u64,
    #[validate(range(min = 1, max = 3_600, message = "sweep_interval_secs must be 1..=3600"))]
    pub sweep_interval_secs: u64,
}

impl RetentionSettings {
    pub fn unstarted_timeout(&self) -> Duration {
        Duration::from_secs(self.unstarted_timeout_secs)
    }

    pub fn completed_ttl(&self) -> Duration {
        Duration::from_secs(self.completed_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuestionBankSettings {
    /// JSON knowledge base replacing the embedded one.
    pub path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_addr: "0.0.0.0:8081".to_string(),
            },
            assessment: AssessmentSettings {
                question_count: 10,
                question_time_limit_secs: 10,
                pass_threshold: 7,
            },
            monitor: MonitorSettings {
                poll_interval_ms: 500,
                absence_grace_secs: 3,
                stall_timeout_ms: 2_000,
                min_subject_size_px: 30,
                audio_threshold: 1000.0,
                audio_sustain_buffers: 3,
                ledger_capacity: None,
            },
            clock: ClockSettings {
                tick_interval_ms: 1_000,
            },
            retention: RetentionSettings {
                unstarted_timeout_secs: 900,
                completed_ttl_secs: 600,
                sweep_interval_secs: 60,
            },
            question_bank: QuestionBankSettings::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());
        let defaults = Config::default();

        // Built-in defaults, then config/{env}.toml, then APP__* overrides
        let settings = config::Config::builder()
            .set_default("server.bind_addr", defaults.server.bind_addr)?
            .set_default(
                "assessment.question_count",
                defaults.assessment.question_count as u64,
            )?
            .set_default(
                "assessment.question_time_limit_secs",
                defaults.assessment.question_time_limit_secs,
            )?
            .set_default(
                "assessment.pass_threshold",
                defaults.assessment.pass_threshold as u64,
            )?
            .set_default("monitor.poll_interval_ms", defaults.monitor.poll_interval_ms)?
            .set_default(
                "monitor.absence_grace_secs",
                defaults.monitor.absence_grace_secs,
            )?
            .set_default("monitor.stall_timeout_ms", defaults.monitor.stall_timeout_ms)?
            .set_default(
                "monitor.min_subject_size_px",
                defaults.monitor.min_subject_size_px as u64,
            )?
            .set_default(
                "monitor.audio_threshold",
                defaults.monitor.audio_threshold as f64,
            )?
            .set_default(
                "monitor.audio_sustain_buffers",
                defaults.monitor.audio_sustain_buffers as u64,
            )?
            .set_default("clock.tick_interval_ms", defaults.clock.tick_interval_ms)?
            .set_default(
                "retention.unstarted_timeout_secs",
                defaults.retention.unstarted_timeout_secs,
            )?
            .set_default(
                "retention.completed_ttl_secs",
                defaults.retention.completed_ttl_secs,
            )?
            .set_default(
                "retention.sweep_interval_secs",
                defaults.retention.sweep_interval_secs,
            )?
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;

        tracing::debug!(
            env = %env,
            question_count = config.assessment.question_count,
            time_limit_secs = config.assessment.question_time_limit_secs,
            "configuration loaded"
        );

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_overrides() {
        for key in [
            "APP__ASSESSMENT__PASS_THRESHOLD",
            "APP__ASSESSMENT__QUESTION_COUNT",
            "APP__MONITOR__POLL_INTERVAL_MS",
            "APP__RETENTION__SWEEP_INTERVAL_SECS",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.assessment.question_time_limit(), chrono::Duration::seconds(10));
        assert_eq!(config.monitor.absence_grace(), chrono::Duration::seconds(3));
    }

    #[test]
    fn threshold_above_question_count_is_rejected() {
        let mut config = Config::default();
        config.assessment.pass_threshold = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn load_uses_defaults_without_overrides() {
        clear_overrides();
        let config = Config::load().expect("defaults load");
        assert_eq!(config.assessment.question_count, 10);
        assert_eq!(config.assessment.pass_threshold, 7);
        assert_eq!(config.monitor.poll_interval_ms, 500);
        assert!(config.monitor.ledger_capacity.is_none());
        assert_eq!(config.retention.completed_ttl(), Duration::from_secs(600));
        assert_eq!(config.retention.unstarted_timeout(), Duration::from_secs(900));
    }

    #[test]
    #[serial]
    fn zero_sweep_interval_is_rejected() {
        clear_overrides();
        env::set_var("APP__RETENTION__SWEEP_INTERVAL_SECS", "0");
        let err = Config::load().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        clear_overrides();
    }

    #[test]
    #[serial]
    fn env_overrides_are_applied_and_validated() {
        clear_overrides();
        env::set_var("APP__ASSESSMENT__PASS_THRESHOLD", "5");
        let config = Config::load().expect("override load");
        assert_eq!(config.assessment.pass_threshold, 5);

        env::set_var("APP__MONITOR__POLL_INTERVAL_MS", "0");
        let err = Config::load().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        clear_overrides();
    }
}
