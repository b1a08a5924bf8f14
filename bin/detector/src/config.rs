//! Centralized detector configuration.
//!
//! This module provides strongly-typed configuration for the detector
//! service, loaded via the `config` crate from environment variables
//! (nested fields use `__`, e.g. `DETECTION__WORKERS=4`).

use serde::Deserialize;

/// Detector configuration composed from per-concern sections.
#[derive(Debug, Deserialize)]
pub struct DetectorConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Detection loop configuration.
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Trigger rescheduling configuration.
    #[serde(default)]
    pub trigger: TriggerConfig,

    /// VCS gateway configuration.
    #[serde(default)]
    pub vcs: VcsConfig,

    /// NATS connection for build notifications. When absent, build
    /// decisions are only logged.
    pub nats: Option<NatsConfig>,
}

/// Detection-loop-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Interval between idle polls of the trigger table, in seconds.
    /// A worker that just processed a trigger polls again immediately.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,

    /// Number of concurrent detection workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// Trigger-rescheduling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    /// Delay before retrying a trigger whose processing failed, in
    /// seconds.
    #[serde(default = "default_next_execution_delay_on_error_seconds")]
    pub next_execution_delay_on_error_seconds: u64,
}

/// VCS gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct VcsConfig {
    /// Timeout for one remote repository request, in seconds. Also
    /// bounds how long a detection cycle can hold its row lock on a
    /// single gateway call.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

/// NATS connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
}

fn default_poll_interval_seconds() -> u64 {
    5
}

fn default_workers() -> usize {
    2
}

fn default_next_execution_delay_on_error_seconds() -> u64 {
    60
}

fn default_request_timeout_seconds() -> u64 {
    10
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval_seconds(),
            workers: default_workers(),
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            next_execution_delay_on_error_seconds: default_next_execution_delay_on_error_seconds(),
        }
    }
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl DetectorConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints the serde layer cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error for values that would break the detection loop,
    /// like a zero error delay that would reschedule a failed trigger
    /// at its own failure time.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.trigger.next_execution_delay_on_error_seconds == 0 {
            return Err(config::ConfigError::Message(
                "trigger.next_execution_delay_on_error_seconds must be positive".to_string(),
            ));
        }
        if self.detection.workers == 0 {
            return Err(config::ConfigError::Message(
                "detection.workers must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
