//! Postgres persistence for build triggers.
//!
//! The store exposes the two row-locking queries the detection and
//! management paths are built on:
//!
//! - [`PgTriggerStore::fetch_due_and_lock`] claims the most overdue
//!   trigger with `FOR UPDATE SKIP LOCKED`, so concurrent detectors never
//!   block each other and never claim the same row
//! - [`PgTriggerStore::fetch_for_update_by_id`] locks a specific trigger
//!   with `FOR UPDATE NOWAIT`, so management operations fail fast instead
//!   of queueing behind a running detection cycle
//!
//! All locking calls take an open transaction; locks are held until that
//! transaction commits or rolls back.

use buildpulse_core::TriggerId;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::str::FromStr;

use crate::domain::{Branch, BuildTrigger, RepositoryData, TriggerData};

const TRIGGER_COLUMNS: &str = "id, trigger_type, next_execution_time, branches, \
     repository_data, trigger_data, created, updated";

/// Postgres SQLSTATE for "could not obtain lock" under `NOWAIT`.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// True when an error means the row is locked by another transaction.
pub fn is_lock_unavailable(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(LOCK_NOT_AVAILABLE)
    )
}

/// Trigger repository backed by a Postgres pool.
#[derive(Clone)]
pub struct PgTriggerStore {
    pool: PgPool,
}

impl PgTriggerStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a transaction for a locking sequence.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Claims the most overdue trigger at `now`, locking its row for the
    /// lifetime of `tx`. Rows locked by other transactions are skipped,
    /// so this returns `None` when nothing is both due and free.
    pub async fn fetch_due_and_lock(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        now: DateTime<Utc>,
    ) -> Result<Option<BuildTrigger>, sqlx::Error> {
        let sql = format!(
            "SELECT {TRIGGER_COLUMNS} FROM build_triggers \
             WHERE next_execution_time IS NOT NULL AND next_execution_time <= $1 \
             ORDER BY next_execution_time \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED"
        );

        let row = sqlx::query_as::<_, BuildTriggerRow>(&sql)
            .bind(now)
            .fetch_optional(&mut **tx)
            .await?;

        row.map(BuildTriggerRow::try_into_trigger).transpose()
    }

    /// Locks one trigger by id without waiting. When the row is locked by
    /// a detection cycle the database reports SQLSTATE 55P03, surfaced
    /// here as an `sqlx::Error` recognizable via [`is_lock_unavailable`].
    pub async fn fetch_for_update_by_id(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: TriggerId,
    ) -> Result<Option<BuildTrigger>, sqlx::Error> {
        let sql = format!(
            "SELECT {TRIGGER_COLUMNS} FROM build_triggers \
             WHERE id = $1 \
             FOR UPDATE NOWAIT"
        );

        let row = sqlx::query_as::<_, BuildTriggerRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut **tx)
            .await?;

        row.map(BuildTriggerRow::try_into_trigger).transpose()
    }

    /// Loads a trigger without locking it.
    pub async fn find_by_id(&self, id: TriggerId) -> Result<Option<BuildTrigger>, sqlx::Error> {
        let sql = format!("SELECT {TRIGGER_COLUMNS} FROM build_triggers WHERE id = $1");

        let row = sqlx::query_as::<_, BuildTriggerRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(BuildTriggerRow::try_into_trigger).transpose()
    }

    /// Inserts or fully replaces a trigger within `tx`.
    pub async fn save(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        trigger: &BuildTrigger,
    ) -> Result<(), sqlx::Error> {
        let branches = to_json(&trigger.branches)?;
        let repository_data = to_json(&trigger.repository_data)?;
        let trigger_data = to_json(&trigger.data)?;

        sqlx::query(
            "INSERT INTO build_triggers \
                 (id, trigger_type, next_execution_time, branches, \
                  repository_data, trigger_data, created, updated) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET \
                 trigger_type = EXCLUDED.trigger_type, \
                 next_execution_time = EXCLUDED.next_execution_time, \
                 branches = EXCLUDED.branches, \
                 repository_data = EXCLUDED.repository_data, \
                 trigger_data = EXCLUDED.trigger_data, \
                 updated = EXCLUDED.updated",
        )
        .bind(trigger.id.to_string())
        .bind(trigger.trigger_type().as_str())
        .bind(trigger.next_execution_time)
        .bind(branches)
        .bind(repository_data)
        .bind(trigger_data)
        .bind(trigger.created)
        .bind(trigger.updated)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Deletes a trigger within `tx`. Returns whether a row was removed.
    pub async fn delete_by_id(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: TriggerId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM build_triggers WHERE id = $1")
            .bind(id.to_string())
            .execute(&mut **tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, sqlx::Error> {
    serde_json::to_value(value).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

/// Raw database row, converted into the domain type after fetching.
#[derive(FromRow)]
struct BuildTriggerRow {
    id: String,
    trigger_type: String,
    next_execution_time: Option<DateTime<Utc>>,
    branches: serde_json::Value,
    repository_data: serde_json::Value,
    trigger_data: serde_json::Value,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

impl BuildTriggerRow {
    fn try_into_trigger(self) -> Result<BuildTrigger, sqlx::Error> {
        let id = TriggerId::from_str(&self.id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let branches: Vec<Branch> = serde_json::from_value(self.branches)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let repository_data: RepositoryData = serde_json::from_value(self.repository_data)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let data: TriggerData = serde_json::from_value(self.trigger_data)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        if data.trigger_type().as_str() != self.trigger_type {
            return Err(sqlx::Error::Decode(
                format!(
                    "trigger_type column '{}' disagrees with payload '{}'",
                    self.trigger_type,
                    data.trigger_type().as_str()
                )
                .into(),
            ));
        }

        Ok(BuildTrigger {
            id,
            next_execution_time: self.next_execution_time,
            branches,
            repository_data,
            data,
            created: self.created,
            updated: self.updated,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::database_error;
    use super::*;
    use serde_json::json;

    #[test]
    fn sqlstate_55p03_means_lock_unavailable() {
        assert!(is_lock_unavailable(&database_error("55P03")));
    }

    #[test]
    fn other_database_errors_are_not_lock_unavailable() {
        // Unique violation
        assert!(!is_lock_unavailable(&database_error("23505")));
        // Non-database error
        assert!(!is_lock_unavailable(&sqlx::Error::RowNotFound));
    }

    fn row(id: &str, trigger_data: serde_json::Value) -> BuildTriggerRow {
        BuildTriggerRow {
            id: id.to_string(),
            trigger_type: "vcs".to_string(),
            next_execution_time: None,
            branches: json!([
                { "branch_name": "main", "latest_commit": null },
                { "branch_name": "develop", "latest_commit": "8c3c903d" },
            ]),
            repository_data: json!({
                "repository_url": "https://git.example.com/acme/widget.git",
                "username": "ci-bot",
                "password": "hunter2",
            }),
            trigger_data,
            created: Utc::now(),
            updated: Utc::now(),
        }
    }

    fn vcs_trigger_data() -> serde_json::Value {
        json!({
            "type": "vcs",
            "synchronization_mode": "poll",
            "execution": { "interval_type": "cron", "cron": "0 * * ? * *" },
        })
    }

    #[test]
    fn row_converts_to_domain_trigger() {
        let id = TriggerId::new();
        let trigger = row(&id.to_string(), vcs_trigger_data())
            .try_into_trigger()
            .expect("valid row");

        assert_eq!(trigger.id, id);
        assert_eq!(trigger.branches.len(), 2);
        assert_eq!(trigger.branches[1].latest_commit.as_deref(), Some("8c3c903d"));
        assert_eq!(
            trigger.trigger_type(),
            crate::domain::TriggerType::Vcs
        );
    }

    #[test]
    fn malformed_id_is_a_decode_error() {
        let result = row("not-an-id", vcs_trigger_data()).try_into_trigger();
        assert!(matches!(result, Err(sqlx::Error::Decode(_))));
    }

    #[test]
    fn trigger_type_column_must_match_payload() {
        let id = TriggerId::new();
        let scheduled = json!({
            "type": "scheduled",
            "execution": { "interval_type": "cron", "cron": "0 * * ? * *" },
        });
        // The helper stamps the column as "vcs".
        let result = row(&id.to_string(), scheduled).try_into_trigger();
        assert!(matches!(result, Err(sqlx::Error::Decode(_))));
    }

    #[test]
    fn malformed_trigger_data_is_a_decode_error() {
        let id = TriggerId::new();
        let result = row(&id.to_string(), json!({ "type": "nonsense" })).try_into_trigger();
        assert!(matches!(result, Err(sqlx::Error::Decode(_))));
    }
}
