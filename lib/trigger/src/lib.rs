//! Build trigger engine for buildpulse.
//!
//! This crate provides:
//!
//! - **Domain model**: triggers, branches, and execution-by-time policies
//! - **Execution time strategies**: Quartz-style cron and fixed-rate
//!   rescheduling
//! - **Store**: Postgres persistence with the row-locking queries that
//!   make concurrent detection safe
//! - **Processors**: VCS change detection and scheduled builds
//! - **Notifier**: build notifications over NATS JetStream
//! - **Manager**: the detect, lock, process, reschedule cycle plus
//!   trigger management
//!
//! # Concurrency model
//!
//! Due triggers are claimed with `FOR UPDATE SKIP LOCKED`, so any number
//! of detection cycles can run against the same database and each due
//! trigger is processed exactly once per due time. Management operations
//! take the same lock with `NOWAIT` and fail fast with
//! [`TriggerError::Locked`] while a cycle is running.

pub mod cron;
pub mod domain;
pub mod error;
pub mod execution_time;
pub mod manager;
pub mod notifier;
pub mod processing;
pub mod store;

pub use cron::CronExpression;
pub use domain::{
    Branch, BuildTrigger, ExecutionByTimeData, RepositoryData, TriggerData, TriggerType,
    VcsSynchronizationMode,
};
pub use error::{ConfigurationError, ProcessingError, TriggerError};
pub use execution_time::{compute_next_execution_time, validate_policy};
pub use manager::{BuildTriggerManager, DetectionOutcome};
pub use notifier::{
    BuildNotifier, BuildTriggeredEvent, LogBuildNotifier, NatsBuildNotifier, NatsNotifierConfig,
    NotifyError,
};
pub use processing::{ScheduledTriggerProcessor, TriggerProcessor, VcsTriggerProcessor};
pub use store::PgTriggerStore;
