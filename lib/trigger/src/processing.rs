//! Processing of due triggers.
//!
//! A processor receives the locked trigger, synchronizes its branches
//! against the remote repository, and decides which branches need a
//! build. Processors mutate the trigger in place; the manager persists
//! whatever state they reached, even when they fail partway, so a branch
//! synchronized before a failure is not re-notified on the retry.

use async_trait::async_trait;
use buildpulse_vcs::VcsGateway;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::{BuildTrigger, TriggerType};
use crate::error::ProcessingError;
use crate::notifier::{BuildNotifier, BuildTriggeredEvent};

/// One trigger-type-specific processing strategy.
#[async_trait]
pub trait TriggerProcessor: Send + Sync {
    /// The trigger type this processor handles.
    fn trigger_type(&self) -> TriggerType;

    /// Processes one due trigger, mutating its branch state in place.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessingError`] on the first branch that fails;
    /// branches already synchronized keep their updated state.
    async fn process(&self, trigger: &mut BuildTrigger) -> Result<(), ProcessingError>;
}

/// Fires builds only when a watched branch moves to a new commit.
///
/// The first synchronization of a branch records the commit without
/// firing, so adding a trigger to an existing repository does not build
/// the whole history of every branch at once.
pub struct VcsTriggerProcessor {
    gateway: Arc<dyn VcsGateway>,
    notifier: Arc<dyn BuildNotifier>,
}

impl VcsTriggerProcessor {
    #[must_use]
    pub fn new(gateway: Arc<dyn VcsGateway>, notifier: Arc<dyn BuildNotifier>) -> Self {
        Self { gateway, notifier }
    }
}

#[async_trait]
impl TriggerProcessor for VcsTriggerProcessor {
    fn trigger_type(&self) -> TriggerType {
        TriggerType::Vcs
    }

    async fn process(&self, trigger: &mut BuildTrigger) -> Result<(), ProcessingError> {
        let repository = trigger.repository_data.clone();

        for index in 0..trigger.branches.len() {
            let branch_name = trigger.branches[index].branch_name.clone();
            let commit = self
                .gateway
                .latest_commit(
                    &repository.repository_url,
                    &repository.username,
                    &repository.password,
                    &branch_name,
                )
                .await
                .map_err(|source| ProcessingError::Vcs {
                    branch_name: branch_name.clone(),
                    source,
                })?;

            let branch = &mut trigger.branches[index];
            match branch.latest_commit.as_deref() {
                None => {
                    info!(
                        trigger_id = %trigger.id,
                        branch = branch_name,
                        commit,
                        "First synchronization, recording commit without build"
                    );
                    branch.latest_commit = Some(commit);
                }
                Some(previous) if previous != commit => {
                    info!(
                        trigger_id = %trigger.id,
                        branch = branch_name,
                        previous,
                        commit,
                        "Branch moved, triggering build"
                    );
                    branch.latest_commit = Some(commit);
                    self.notifier
                        .build_triggered(BuildTriggeredEvent {
                            trigger_id: trigger.id,
                            branch_name,
                            repository_url: repository.repository_url.clone(),
                            username: repository.username.clone(),
                            password: repository.password.clone(),
                        })
                        .await
                        .map_err(|source| ProcessingError::Notify { source })?;
                }
                Some(_) => {
                    debug!(
                        trigger_id = %trigger.id,
                        branch = branch_name,
                        "Commit unchanged, no build required"
                    );
                }
            }
        }

        Ok(())
    }
}

/// Fires a build for every watched branch on every due execution.
///
/// Branch commits are still synchronized so the emitted state reflects
/// what will be built.
pub struct ScheduledTriggerProcessor {
    gateway: Arc<dyn VcsGateway>,
    notifier: Arc<dyn BuildNotifier>,
}

impl ScheduledTriggerProcessor {
    #[must_use]
    pub fn new(gateway: Arc<dyn VcsGateway>, notifier: Arc<dyn BuildNotifier>) -> Self {
        Self { gateway, notifier }
    }
}

#[async_trait]
impl TriggerProcessor for ScheduledTriggerProcessor {
    fn trigger_type(&self) -> TriggerType {
        TriggerType::Scheduled
    }

    async fn process(&self, trigger: &mut BuildTrigger) -> Result<(), ProcessingError> {
        let repository = trigger.repository_data.clone();

        for index in 0..trigger.branches.len() {
            let branch_name = trigger.branches[index].branch_name.clone();
            let commit = self
                .gateway
                .latest_commit(
                    &repository.repository_url,
                    &repository.username,
                    &repository.password,
                    &branch_name,
                )
                .await
                .map_err(|source| ProcessingError::Vcs {
                    branch_name: branch_name.clone(),
                    source,
                })?;

            info!(
                trigger_id = %trigger.id,
                branch = branch_name,
                commit,
                "Scheduled execution, triggering build"
            );

            trigger.branches[index].latest_commit = Some(commit);
            self.notifier
                .build_triggered(BuildTriggeredEvent {
                    trigger_id: trigger.id,
                    branch_name,
                    repository_url: repository.repository_url.clone(),
                    username: repository.username.clone(),
                    password: repository.password.clone(),
                })
                .await
                .map_err(|source| ProcessingError::Notify { source })?;
        }

        Ok(())
    }
}
