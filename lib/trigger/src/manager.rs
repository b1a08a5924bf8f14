//! Trigger detection and management.
//!
//! [`BuildTriggerManager::detect_and_process`] runs one detection cycle:
//! claim the most overdue trigger under a row lock, process it, compute
//! its next execution time, and persist everything in the same
//! transaction. Any number of cycles may run concurrently; `SKIP LOCKED`
//! guarantees each due trigger is claimed by exactly one of them.
//!
//! Management operations (create, read, update, delete) share the same
//! store. Mutating operations take the row lock with `NOWAIT` and report
//! [`TriggerError::Locked`] instead of waiting out a detection cycle.

use buildpulse_core::TriggerId;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::domain::{BuildTrigger, ExecutionByTimeData, TriggerType};
use crate::error::{ProcessingError, TriggerError};
use crate::execution_time::compute_next_execution_time;
use crate::processing::TriggerProcessor;
use crate::store::{PgTriggerStore, is_lock_unavailable};

/// Result of one detection cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    /// Nothing was due, or every due trigger was claimed by another cycle.
    Idle,
    /// A trigger was processed and rescheduled.
    Processed {
        trigger_id: TriggerId,
        next_execution_time: DateTime<Utc>,
    },
    /// Processing failed; the trigger was rescheduled with the error
    /// delay so it retries instead of spinning.
    Failed {
        trigger_id: TriggerId,
        next_execution_time: DateTime<Utc>,
        error: ProcessingError,
    },
}

impl DetectionOutcome {
    /// The next execution time decided by this cycle, if a trigger was
    /// claimed.
    #[must_use]
    pub fn next_execution_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Idle => None,
            Self::Processed {
                next_execution_time,
                ..
            }
            | Self::Failed {
                next_execution_time,
                ..
            } => Some(*next_execution_time),
        }
    }
}

/// Orchestrates trigger detection, processing, and management.
pub struct BuildTriggerManager {
    store: PgTriggerStore,
    vcs_processor: Arc<dyn TriggerProcessor>,
    scheduled_processor: Arc<dyn TriggerProcessor>,
    next_execution_delay_on_error: Duration,
}

impl BuildTriggerManager {
    #[must_use]
    pub fn new(
        store: PgTriggerStore,
        vcs_processor: Arc<dyn TriggerProcessor>,
        scheduled_processor: Arc<dyn TriggerProcessor>,
        next_execution_delay_on_error: Duration,
    ) -> Self {
        Self {
            store,
            vcs_processor,
            scheduled_processor,
            next_execution_delay_on_error,
        }
    }

    /// Runs one detection cycle.
    ///
    /// The claimed trigger is saved with its new state and next execution
    /// time before the transaction commits, in both the success and the
    /// failure path. A processing failure is part of the normal outcome;
    /// only storage problems surface as `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError::StorageFailed`] when the database cannot
    /// be reached or the transaction fails.
    pub async fn detect_and_process(&self) -> Result<DetectionOutcome, TriggerError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let Some(mut trigger) = self.store.fetch_due_and_lock(&mut tx, now).await? else {
            tx.commit().await?;
            return Ok(DetectionOutcome::Idle);
        };

        info!(
            trigger_id = %trigger.id,
            trigger_type = trigger.trigger_type().as_str(),
            "Unprocessed trigger detected"
        );

        let processing_result = self
            .processor_for(trigger.trigger_type())
            .process(&mut trigger)
            .await;

        let outcome = resolve_outcome(
            trigger.id,
            trigger.data.execution_by_time(),
            now,
            processing_result,
            self.next_execution_delay_on_error,
        );
        if let Some(next_execution_time) = outcome.next_execution_time() {
            trigger.next_execution_time = Some(next_execution_time);
        }
        trigger.updated = now;

        self.store.save(&mut tx, &trigger).await?;
        tx.commit().await?;

        Ok(outcome)
    }

    /// Persists a new trigger.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError::InvalidConfig`] for a trigger whose
    /// configuration no longer validates and
    /// [`TriggerError::StorageFailed`] on database problems.
    pub async fn create_trigger(&self, trigger: BuildTrigger) -> Result<BuildTrigger, TriggerError> {
        trigger.validate()?;

        let mut tx = self.store.begin().await?;
        self.store.save(&mut tx, &trigger).await?;
        tx.commit().await?;

        info!(trigger_id = %trigger.id, "Trigger created");
        Ok(trigger)
    }

    /// Loads a trigger without locking it.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError::NotFound`] when no such trigger exists.
    pub async fn find_trigger_by_id(&self, id: TriggerId) -> Result<BuildTrigger, TriggerError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(TriggerError::NotFound { id })
    }

    /// Replaces a trigger's state.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError::InvalidConfig`] for a trigger whose
    /// configuration no longer validates, [`TriggerError::Locked`] when
    /// the trigger is currently being processed, and
    /// [`TriggerError::NotFound`] when it does not exist.
    pub async fn update_trigger(
        &self,
        mut trigger: BuildTrigger,
    ) -> Result<BuildTrigger, TriggerError> {
        trigger.validate()?;

        let mut tx = self.store.begin().await?;
        self.lock_existing(&mut tx, trigger.id).await?;

        trigger.updated = Utc::now();
        self.store.save(&mut tx, &trigger).await?;
        tx.commit().await?;

        info!(trigger_id = %trigger.id, "Trigger updated");
        Ok(trigger)
    }

    /// Removes a trigger.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError::Locked`] when the trigger is currently
    /// being processed and [`TriggerError::NotFound`] when it does not
    /// exist.
    pub async fn delete_trigger(&self, id: TriggerId) -> Result<(), TriggerError> {
        let mut tx = self.store.begin().await?;
        self.lock_existing(&mut tx, id).await?;

        if !self.store.delete_by_id(&mut tx, id).await? {
            return Err(TriggerError::NotFound { id });
        }
        tx.commit().await?;

        info!(trigger_id = %id, "Trigger deleted");
        Ok(())
    }

    /// Takes the management lock on an existing trigger, failing fast
    /// when a detection cycle holds it.
    async fn lock_existing(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: TriggerId,
    ) -> Result<BuildTrigger, TriggerError> {
        match self.store.fetch_for_update_by_id(tx, id).await {
            Ok(Some(trigger)) => Ok(trigger),
            Ok(None) => Err(TriggerError::NotFound { id }),
            Err(e) => Err(lock_failure(id, e)),
        }
    }

    fn processor_for(&self, trigger_type: TriggerType) -> &dyn TriggerProcessor {
        match trigger_type {
            TriggerType::Vcs => self.vcs_processor.as_ref(),
            TriggerType::Scheduled => self.scheduled_processor.as_ref(),
        }
    }
}

/// Maps a failed `NOWAIT` lock attempt to the management error: a held
/// row lock becomes [`TriggerError::Locked`], anything else is a storage
/// problem.
fn lock_failure(id: TriggerId, error: sqlx::Error) -> TriggerError {
    if is_lock_unavailable(&error) {
        TriggerError::Locked { id }
    } else {
        error.into()
    }
}

/// Decides the cycle outcome and the trigger's next execution time.
///
/// After successful processing the policy is evaluated from `now`; a
/// policy that cannot be evaluated, like processing itself failing, puts
/// the trigger on the fixed error delay rather than dropping it from the
/// schedule.
fn resolve_outcome(
    trigger_id: TriggerId,
    policy: &ExecutionByTimeData,
    now: DateTime<Utc>,
    processing_result: Result<(), ProcessingError>,
    error_delay: Duration,
) -> DetectionOutcome {
    match processing_result {
        Ok(()) => match compute_next_execution_time(now, policy) {
            Ok(next_execution_time) => {
                info!(
                    %trigger_id,
                    %next_execution_time,
                    "Trigger processed and rescheduled"
                );
                DetectionOutcome::Processed {
                    trigger_id,
                    next_execution_time,
                }
            }
            Err(source) => {
                let next_execution_time = now + error_delay;
                error!(
                    %trigger_id,
                    error = %source,
                    %next_execution_time,
                    "Trigger schedule cannot be evaluated, delaying next execution"
                );
                DetectionOutcome::Failed {
                    trigger_id,
                    next_execution_time,
                    error: ProcessingError::Configuration { source },
                }
            }
        },
        Err(error) => {
            let next_execution_time = now + error_delay;
            warn!(
                %trigger_id,
                %error,
                %next_execution_time,
                "Trigger processing failed, delaying next execution"
            );
            DetectionOutcome::Failed {
                trigger_id,
                next_execution_time,
                error,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildpulse_vcs::VcsError;
    use chrono::TimeZone;

    fn cron_policy(cron: &str) -> ExecutionByTimeData {
        ExecutionByTimeData::Cron {
            cron: cron.to_string(),
        }
    }

    #[test]
    fn success_reschedules_by_policy() {
        let now = Utc.with_ymd_and_hms(2023, 1, 21, 12, 35, 0).unwrap();
        let trigger_id = TriggerId::new();

        let outcome = resolve_outcome(
            trigger_id,
            &cron_policy("0 * * ? * *"),
            now,
            Ok(()),
            Duration::seconds(60),
        );

        assert_eq!(
            outcome,
            DetectionOutcome::Processed {
                trigger_id,
                next_execution_time: Utc.with_ymd_and_hms(2023, 1, 21, 12, 36, 0).unwrap(),
            }
        );
    }

    #[test]
    fn processing_failure_applies_error_delay() {
        let now = Utc.with_ymd_and_hms(2023, 1, 21, 12, 35, 0).unwrap();
        let trigger_id = TriggerId::new();
        let failure = ProcessingError::Vcs {
            branch_name: "main".to_string(),
            source: VcsError::Unreachable {
                reason: "connection refused".to_string(),
            },
        };

        let outcome = resolve_outcome(
            trigger_id,
            &cron_policy("0 * * ? * *"),
            now,
            Err(failure.clone()),
            Duration::seconds(60),
        );

        assert_eq!(
            outcome,
            DetectionOutcome::Failed {
                trigger_id,
                next_execution_time: now + Duration::seconds(60),
                error: failure,
            }
        );
    }

    #[test]
    fn unevaluable_policy_applies_error_delay() {
        // A trigger whose stored cron has gone bad must not fall off the
        // schedule; it retries on the error delay.
        let now = Utc.with_ymd_and_hms(2023, 1, 21, 12, 35, 0).unwrap();
        let trigger_id = TriggerId::new();

        let outcome = resolve_outcome(
            trigger_id,
            &cron_policy("0 0 0 31 2 ?"),
            now,
            Ok(()),
            Duration::seconds(60),
        );

        assert!(matches!(
            outcome,
            DetectionOutcome::Failed {
                error: ProcessingError::Configuration { .. },
                ..
            }
        ));
        assert_eq!(
            outcome.next_execution_time(),
            Some(now + Duration::seconds(60))
        );
    }

    #[test]
    fn idle_outcome_has_no_next_execution() {
        assert_eq!(DetectionOutcome::Idle.next_execution_time(), None);
    }

    #[test]
    fn held_row_lock_maps_to_locked() {
        let id = TriggerId::new();
        let error = crate::store::test_support::database_error("55P03");
        assert_eq!(lock_failure(id, error), TriggerError::Locked { id });
    }

    #[test]
    fn other_storage_failures_stay_storage_failures() {
        let id = TriggerId::new();

        let unique_violation = crate::store::test_support::database_error("23505");
        assert!(matches!(
            lock_failure(id, unique_violation),
            TriggerError::StorageFailed { .. }
        ));
        assert!(matches!(
            lock_failure(id, sqlx::Error::PoolTimedOut),
            TriggerError::StorageFailed { .. }
        ));
    }
}
