//! Error types for the trigger crate.
//!
//! Three layers map to the three places things go wrong:
//! - `ConfigurationError`: a trigger's schedule cannot be evaluated
//! - `ProcessingError`: one detection cycle failed for one trigger
//! - `TriggerError`: management and storage operations

use buildpulse_core::TriggerId;
use buildpulse_vcs::VcsError;
use std::fmt;

use crate::notifier::NotifyError;

/// Errors from evaluating a trigger's execution schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The cron expression does not parse.
    InvalidCron { expression: String, reason: String },
    /// The cron expression parses but never fires within the search
    /// horizon (e.g. `0 0 0 31 2 ?`).
    UnsatisfiableCron { expression: String },
    /// The fixed-rate interval is zero or negative.
    InvalidInterval { millis: i64 },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCron { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
            Self::UnsatisfiableCron { expression } => {
                write!(
                    f,
                    "cron expression '{expression}' never fires within the search horizon"
                )
            }
            Self::InvalidInterval { millis } => {
                write!(f, "fixed-rate interval must be positive, got {millis}ms")
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Errors from processing a single due trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    /// The VCS gateway failed while synchronizing a branch.
    Vcs {
        branch_name: String,
        source: VcsError,
    },
    /// Publishing a build notification failed.
    Notify { source: NotifyError },
    /// The trigger's schedule could not be evaluated for rescheduling.
    Configuration { source: ConfigurationError },
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vcs {
                branch_name,
                source,
            } => {
                write!(f, "vcs synchronization failed for '{branch_name}': {source}")
            }
            Self::Notify { source } => write!(f, "build notification failed: {source}"),
            Self::Configuration { source } => write!(f, "trigger misconfigured: {source}"),
        }
    }
}

impl std::error::Error for ProcessingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Vcs { source, .. } => Some(source),
            Self::Notify { source } => Some(source),
            Self::Configuration { source } => Some(source),
        }
    }
}

/// Errors from trigger management and storage operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    /// Trigger not found.
    NotFound { id: TriggerId },
    /// Trigger row is currently locked by a detection cycle.
    Locked { id: TriggerId },
    /// Invalid trigger configuration.
    InvalidConfig { reason: String },
    /// Storage operation failed.
    StorageFailed { reason: String },
}

impl fmt::Display for TriggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "trigger not found: {id}"),
            Self::Locked { id } => write!(f, "trigger is being processed: {id}"),
            Self::InvalidConfig { reason } => {
                write!(f, "invalid trigger config: {reason}")
            }
            Self::StorageFailed { reason } => {
                write!(f, "trigger storage failed: {reason}")
            }
        }
    }
}

impl std::error::Error for TriggerError {}

impl From<sqlx::Error> for TriggerError {
    fn from(error: sqlx::Error) -> Self {
        Self::StorageFailed {
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_display() {
        let err = ConfigurationError::InvalidCron {
            expression: "* * *".to_string(),
            reason: "expected 6 or 7 fields, got 3".to_string(),
        };
        assert!(err.to_string().contains("* * *"));
        assert!(err.to_string().contains("6 or 7 fields"));
    }

    #[test]
    fn processing_error_carries_branch() {
        let err = ProcessingError::Vcs {
            branch_name: "main".to_string(),
            source: VcsError::RefNotFound {
                ref_name: "refs/heads/main".to_string(),
            },
        };
        assert!(err.to_string().contains("'main'"));
        assert!(err.to_string().contains("refs/heads/main"));
    }

    #[test]
    fn trigger_error_display() {
        let id = TriggerId::new();
        let err = TriggerError::Locked { id };
        assert!(err.to_string().contains("being processed"));
    }
}
