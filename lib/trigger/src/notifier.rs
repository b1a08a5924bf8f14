//! Build notification publishing.
//!
//! When a processor decides a branch needs a build, it hands a
//! [`BuildTriggeredEvent`] to a [`BuildNotifier`]. The production
//! implementation publishes to NATS JetStream; deployments without a
//! build executor attached can run with [`LogBuildNotifier`] instead.

use async_nats::jetstream;
use async_trait::async_trait;
use buildpulse_core::TriggerId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Subject prefix for build notifications.
const BUILD_SUBJECT_PREFIX: &str = "build.triggered";

/// Stream name for build events.
const BUILD_STREAM_NAME: &str = "BUILD_EVENTS";

/// Everything a build executor needs to check out and build the branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTriggeredEvent {
    pub trigger_id: TriggerId,
    pub branch_name: String,
    pub repository_url: String,
    pub username: String,
    pub password: String,
}

/// Errors from publishing build notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// Connection or stream setup failed.
    ConnectionFailed { message: String },
    /// Publishing an event failed.
    PublishFailed { message: String },
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { message } => {
                write!(f, "notifier connection failed: {message}")
            }
            Self::PublishFailed { message } => {
                write!(f, "failed to publish build event: {message}")
            }
        }
    }
}

impl std::error::Error for NotifyError {}

/// Sink for build notifications.
#[async_trait]
pub trait BuildNotifier: Send + Sync {
    /// Delivers one build notification. Must only return `Ok` once the
    /// event has been durably accepted.
    async fn build_triggered(&self, event: BuildTriggeredEvent) -> Result<(), NotifyError>;
}

/// Configuration for the NATS-backed notifier.
#[derive(Debug, Clone)]
pub struct NatsNotifierConfig {
    /// NATS server URL.
    pub url: String,
    /// Stream name for build events (defaults to BUILD_EVENTS).
    pub stream_name: Option<String>,
}

impl NatsNotifierConfig {
    /// Creates a new config with the given NATS URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream_name: None,
        }
    }

    fn stream(&self) -> &str {
        self.stream_name.as_deref().unwrap_or(BUILD_STREAM_NAME)
    }
}

/// NATS JetStream-based build notifier.
///
/// Events are published to subjects like `build.triggered.<trigger_id>`,
/// one subject per trigger for easy replay.
pub struct NatsBuildNotifier {
    jetstream: jetstream::Context,
}

impl NatsBuildNotifier {
    /// Connects to NATS and ensures the build events stream exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or stream setup fails.
    pub async fn new(config: NatsNotifierConfig) -> Result<Self, NotifyError> {
        let client = async_nats::connect(&config.url).await.map_err(|e| {
            NotifyError::ConnectionFailed {
                message: e.to_string(),
            }
        })?;

        let jetstream = async_nats::jetstream::new(client);

        let stream_config = jetstream::stream::Config {
            name: config.stream().to_string(),
            subjects: vec![format!("{BUILD_SUBJECT_PREFIX}.>")],
            storage: jetstream::stream::StorageType::File,
            retention: jetstream::stream::RetentionPolicy::Limits,
            ..Default::default()
        };

        jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| NotifyError::ConnectionFailed {
                message: format!("failed to create build events stream: {e}"),
            })?;

        Ok(Self { jetstream })
    }

    /// Returns the subject for one trigger's build events.
    fn trigger_subject(trigger_id: TriggerId) -> String {
        format!("{BUILD_SUBJECT_PREFIX}.{trigger_id}")
    }
}

#[async_trait]
impl BuildNotifier for NatsBuildNotifier {
    async fn build_triggered(&self, event: BuildTriggeredEvent) -> Result<(), NotifyError> {
        let subject = Self::trigger_subject(event.trigger_id);
        let bytes = serde_json::to_vec(&event).map_err(|e| NotifyError::PublishFailed {
            message: format!("failed to serialize build event: {e}"),
        })?;

        self.jetstream
            .publish(subject, bytes.into())
            .await
            .map_err(|e| NotifyError::PublishFailed {
                message: e.to_string(),
            })?
            .await
            .map_err(|e| NotifyError::PublishFailed {
                message: e.to_string(),
            })?;

        Ok(())
    }
}

/// Notifier that only records build decisions in the log. Used when no
/// message broker is configured.
pub struct LogBuildNotifier;

#[async_trait]
impl BuildNotifier for LogBuildNotifier {
    async fn build_triggered(&self, event: BuildTriggeredEvent) -> Result<(), NotifyError> {
        tracing::info!(
            trigger_id = %event.trigger_id,
            branch = event.branch_name,
            repository = event.repository_url,
            "Build triggered"
        );
        Ok(())
    }
}
