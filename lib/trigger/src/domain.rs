//! Build trigger domain model.
//!
//! A [`BuildTrigger`] watches one repository and a set of its branches, and
//! fires builds according to an execution-by-time policy. The kind of
//! trigger and the shape of its policy are encoded in the type system:
//! a VCS trigger cannot exist without a synchronization mode, and a policy
//! is either cron or fixed-rate, never both.

use buildpulse_core::TriggerId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TriggerError;
use crate::execution_time::validate_policy;

/// Discriminant stored alongside a trigger, used to dispatch processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Fires only when a watched branch moves to a new commit.
    Vcs,
    /// Fires on every due execution regardless of repository state.
    Scheduled,
}

impl TriggerType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vcs => "vcs",
            Self::Scheduled => "scheduled",
        }
    }
}

/// How a VCS trigger learns about new commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VcsSynchronizationMode {
    /// Ask the remote on every due execution.
    Poll,
}

/// Coordinates and credentials of the watched repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryData {
    pub repository_url: String,
    pub username: String,
    pub password: String,
}

/// A watched branch and the last commit observed on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub branch_name: String,
    /// `None` until the first successful synchronization.
    pub latest_commit: Option<String>,
}

impl Branch {
    #[must_use]
    pub fn new(branch_name: impl Into<String>) -> Self {
        Self {
            branch_name: branch_name.into(),
            latest_commit: None,
        }
    }
}

/// When a trigger is due: a Quartz-style cron expression or a fixed
/// interval from the previous execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "interval_type", rename_all = "snake_case")]
pub enum ExecutionByTimeData {
    Cron {
        cron: String,
    },
    FixedRate {
        #[serde(with = "duration_millis")]
        fixed_rate_interval: Duration,
    },
}

/// Type-specific trigger payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerData {
    Vcs {
        synchronization_mode: VcsSynchronizationMode,
        execution: ExecutionByTimeData,
    },
    Scheduled {
        execution: ExecutionByTimeData,
    },
}

impl TriggerData {
    #[must_use]
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::Vcs { .. } => TriggerType::Vcs,
            Self::Scheduled { .. } => TriggerType::Scheduled,
        }
    }

    #[must_use]
    pub fn execution_by_time(&self) -> &ExecutionByTimeData {
        match self {
            Self::Vcs { execution, .. } | Self::Scheduled { execution } => execution,
        }
    }
}

/// A persistent build trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTrigger {
    pub id: TriggerId,
    /// Next time this trigger is due. `None` suspends detection.
    pub next_execution_time: Option<DateTime<Utc>>,
    pub branches: Vec<Branch>,
    pub repository_data: RepositoryData,
    pub data: TriggerData,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl BuildTrigger {
    /// Creates a trigger with a fresh id and validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError::InvalidConfig`] when branch names repeat
    /// or the execution policy cannot be evaluated.
    pub fn new(
        repository_data: RepositoryData,
        branches: Vec<Branch>,
        data: TriggerData,
        next_execution_time: Option<DateTime<Utc>>,
    ) -> Result<Self, TriggerError> {
        let now = Utc::now();
        let trigger = Self {
            id: TriggerId::new(),
            next_execution_time,
            branches,
            repository_data,
            data,
            created: now,
            updated: now,
        };
        trigger.validate()?;
        Ok(trigger)
    }

    /// Re-checks the configuration invariants. Applied at construction
    /// and again whenever an externally supplied trigger is persisted.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError::InvalidConfig`] when branch names repeat
    /// or the execution policy cannot be evaluated.
    pub fn validate(&self) -> Result<(), TriggerError> {
        ensure_unique_branches(&self.branches)?;
        validate_policy(self.data.execution_by_time()).map_err(|e| TriggerError::InvalidConfig {
            reason: e.to_string(),
        })
    }

    #[must_use]
    pub fn trigger_type(&self) -> TriggerType {
        self.data.trigger_type()
    }
}

fn ensure_unique_branches(branches: &[Branch]) -> Result<(), TriggerError> {
    for (index, branch) in branches.iter().enumerate() {
        let duplicated = branches[..index]
            .iter()
            .any(|other| other.branch_name == branch.branch_name);
        if duplicated {
            return Err(TriggerError::InvalidConfig {
                reason: format!("duplicate branch name '{}'", branch.branch_name),
            });
        }
    }
    Ok(())
}

/// Serde adapter storing a `chrono::Duration` as integral milliseconds.
mod duration_millis {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(duration.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        i64::deserialize(deserializer).map(Duration::milliseconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repository() -> RepositoryData {
        RepositoryData {
            repository_url: "https://git.example.com/acme/widget.git".to_string(),
            username: "ci-bot".to_string(),
            password: "hunter2".to_string(),
        }
    }

    fn vcs_data() -> TriggerData {
        TriggerData::Vcs {
            synchronization_mode: VcsSynchronizationMode::Poll,
            execution: ExecutionByTimeData::FixedRate {
                fixed_rate_interval: Duration::seconds(30),
            },
        }
    }

    #[test]
    fn new_trigger_gets_id_and_timestamps() {
        let trigger = BuildTrigger::new(
            repository(),
            vec![Branch::new("main")],
            vcs_data(),
            None,
        )
        .expect("valid trigger");

        assert_eq!(trigger.trigger_type(), TriggerType::Vcs);
        assert_eq!(trigger.created, trigger.updated);
        assert!(trigger.branches[0].latest_commit.is_none());
    }

    #[test]
    fn duplicate_branch_names_rejected() {
        let result = BuildTrigger::new(
            repository(),
            vec![Branch::new("main"), Branch::new("main")],
            vcs_data(),
            None,
        );

        assert!(matches!(result, Err(TriggerError::InvalidConfig { .. })));
    }

    #[test]
    fn invalid_cron_rejected_at_construction() {
        let data = TriggerData::Scheduled {
            execution: ExecutionByTimeData::Cron {
                cron: "not a cron".to_string(),
            },
        };
        let result = BuildTrigger::new(repository(), vec![Branch::new("main")], data, None);

        assert!(matches!(result, Err(TriggerError::InvalidConfig { .. })));
    }

    #[test]
    fn validate_catches_configuration_gone_bad() {
        // An edit that swaps in a broken policy must fail validation
        // when the trigger is persisted again, not at processing time.
        let mut trigger = BuildTrigger::new(
            repository(),
            vec![Branch::new("main")],
            vcs_data(),
            None,
        )
        .expect("valid trigger");
        assert!(trigger.validate().is_ok());

        trigger.data = TriggerData::Scheduled {
            execution: ExecutionByTimeData::Cron {
                cron: "0 0 0 * * *".to_string(),
            },
        };
        assert!(matches!(
            trigger.validate(),
            Err(TriggerError::InvalidConfig { .. })
        ));

        trigger.data = vcs_data();
        trigger.branches.push(Branch::new("main"));
        assert!(matches!(
            trigger.validate(),
            Err(TriggerError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn trigger_data_serde_round_trip() {
        let data = TriggerData::Vcs {
            synchronization_mode: VcsSynchronizationMode::Poll,
            execution: ExecutionByTimeData::Cron {
                cron: "0 * * ? * *".to_string(),
            },
        };

        let json = serde_json::to_value(&data).expect("serializes");
        assert_eq!(json["type"], "vcs");
        assert_eq!(json["execution"]["interval_type"], "cron");

        let back: TriggerData = serde_json::from_value(json).expect("deserializes");
        assert_eq!(back, data);
    }

    #[test]
    fn fixed_rate_interval_stored_as_millis() {
        let data = ExecutionByTimeData::FixedRate {
            fixed_rate_interval: Duration::minutes(5),
        };

        let json = serde_json::to_value(&data).expect("serializes");
        assert_eq!(json["fixed_rate_interval"], 300_000);

        let back: ExecutionByTimeData = serde_json::from_value(json).expect("deserializes");
        assert_eq!(back, data);
    }

    #[test]
    fn execution_by_time_shared_accessor() {
        let scheduled = TriggerData::Scheduled {
            execution: ExecutionByTimeData::Cron {
                cron: "0 0 * ? * *".to_string(),
            },
        };
        assert!(matches!(
            scheduled.execution_by_time(),
            ExecutionByTimeData::Cron { .. }
        ));
        assert_eq!(scheduled.trigger_type().as_str(), "scheduled");
    }
}
