//! SQLite quota store
//!
//! # Usage
//! ```no_run
//! use allowance_rs::store::{QuotaStore, SqliteQuotaStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteQuotaStore::connect("sqlite://allowance.db").await?;
//!
//! if let Some(quota) = store.load("user@example.com").await? {
//!     println!("{} left", quota.allowance_left());
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use super::QuotaStore;
use crate::error::{AllowanceError, Result};
use crate::quota::ParticipationQuota;

/// SQLite-backed quota store
#[derive(Clone)]
pub struct SqliteQuotaStore {
    db: SqlitePool,
}

impl SqliteQuotaStore {
    /// Wrap an existing pool. Call [`init_db`](Self::init_db) before use.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Open (creating if missing) the database at `database_url` and
    /// initialize tables
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to an in-memory database is a separate database
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };

        let db = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self::new(db);
        store.init_db().await?;

        info!("Quota store ready at {}", database_url);
        Ok(store)
    }

    /// Initialize database tables
    pub async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS participation_quotas (
                participant_id TEXT PRIMARY KEY,
                allowance_left INTEGER NOT NULL DEFAULT 1 CHECK (allowance_left >= 0),
                last_action_at TEXT,
                extra_granted INTEGER NOT NULL DEFAULT 0 CHECK (extra_granted >= 0),
                version INTEGER NOT NULL DEFAULT 0 CHECK (version >= 0),
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Insert a never-saved record, or update the stored one if it is still
    /// at `quota.version()`. Affects no row on a version mismatch.
    fn write_query(quota: &ParticipationQuota) -> Result<Query<'_, Sqlite, SqliteArguments<'_>>> {
        let version = i64::try_from(quota.version()).map_err(|_| {
            AllowanceError::Parse(format!("version out of range: {}", quota.version()))
        })?;

        if version == 0 {
            return Ok(sqlx::query(
                r#"
                INSERT INTO participation_quotas (
                    participant_id, allowance_left, last_action_at, extra_granted, version, updated_at
                ) VALUES (?, ?, ?, ?, 1, ?)
                ON CONFLICT(participant_id) DO NOTHING
                "#,
            )
            .bind(quota.participant_id())
            .bind(i64::from(quota.allowance_left()))
            .bind(quota.last_action_at().map(|d| d.to_rfc3339()))
            .bind(i64::from(quota.extra_granted()))
            .bind(Utc::now().to_rfc3339()));
        }

        Ok(sqlx::query(
            r#"
            UPDATE participation_quotas SET
                allowance_left = ?,
                last_action_at = ?,
                extra_granted = ?,
                version = version + 1,
                updated_at = ?
            WHERE participant_id = ? AND version = ?
            "#,
        )
        .bind(i64::from(quota.allowance_left()))
        .bind(quota.last_action_at().map(|d| d.to_rfc3339()))
        .bind(i64::from(quota.extra_granted()))
        .bind(Utc::now().to_rfc3339())
        .bind(quota.participant_id())
        .bind(version))
    }

    fn check_written(rows_affected: u64, quota: &ParticipationQuota) -> Result<()> {
        if rows_affected == 0 {
            return Err(AllowanceError::Conflict {
                participant_id: quota.participant_id().to_string(),
            });
        }
        Ok(())
    }

    /// Helper: Convert database row to ParticipationQuota
    fn row_to_quota(row: SqliteRow) -> Result<ParticipationQuota> {
        use sqlx::Row;

        let participant_id: String = row.try_get("participant_id")?;
        let allowance_left: i64 = row.try_get("allowance_left")?;
        let extra_granted: i64 = row.try_get("extra_granted")?;
        let last_action_at: Option<String> = row.try_get("last_action_at")?;
        let version: i64 = row.try_get("version")?;

        let last_action_at = last_action_at
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|d| d.with_timezone(&Utc))
                    .map_err(|e| AllowanceError::Parse(e.to_string()))
            })
            .transpose()?;

        let version = u64::try_from(version)
            .map_err(|_| AllowanceError::Parse(format!("version out of range: {}", version)))?;

        Ok(ParticipationQuota::from_parts(
            participant_id,
            counter(allowance_left, "allowance_left")?,
            last_action_at,
            counter(extra_granted, "extra_granted")?,
        )
        .with_version(version))
    }
}

fn counter(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| AllowanceError::Parse(format!("{} out of range: {}", column, value)))
}

#[async_trait]
impl QuotaStore for SqliteQuotaStore {
    async fn load(&self, participant_id: &str) -> Result<Option<ParticipationQuota>> {
        let row = sqlx::query(
            r#"
            SELECT participant_id, allowance_left, last_action_at, extra_granted, version
            FROM participation_quotas
            WHERE participant_id = ?
            "#,
        )
        .bind(participant_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(Self::row_to_quota).transpose()
    }

    async fn save(&self, quota: &ParticipationQuota) -> Result<()> {
        let result = Self::write_query(quota)?.execute(&self.db).await?;
        Self::check_written(result.rows_affected(), quota)?;
        debug!("Saved quota for {}", quota.participant_id());
        Ok(())
    }

    async fn save_all(&self, quotas: &[ParticipationQuota]) -> Result<()> {
        let mut tx = self.db.begin().await?;

        for quota in quotas {
            let result = Self::write_query(quota)?.execute(&mut *tx).await?;
            // Dropping `tx` rolls back what was already written
            Self::check_written(result.rows_affected(), quota)?;
        }

        tx.commit().await?;
        debug!("Saved {} quotas in one transaction", quotas.len());
        Ok(())
    }

    async fn delete(&self, participant_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM participation_quotas WHERE participant_id = ?")
            .bind(participant_id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<ParticipationQuota>> {
        let rows = sqlx::query(
            r#"
            SELECT participant_id, allowance_left, last_action_at, extra_granted, version
            FROM participation_quotas
            ORDER BY participant_id
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(Self::row_to_quota).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn setup_test_store() -> SqliteQuotaStore {
        SqliteQuotaStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_load_missing() {
        let store = setup_test_store().await;
        assert!(store.load("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let store = setup_test_store().await;
        let acted = Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap();
        let quota = ParticipationQuota::from_parts("alice", 2, Some(acted), 3);

        store.save(&quota).await.unwrap();

        let loaded = store.load("alice").await.unwrap().unwrap();
        assert_eq!(loaded, quota.with_version(1));
    }

    #[tokio::test]
    async fn test_save_never_acted() {
        let store = setup_test_store().await;
        store.save(&ParticipationQuota::new("bob")).await.unwrap();

        let loaded = store.load("bob").await.unwrap().unwrap();
        assert_eq!(loaded.last_action_at(), None);
        assert_eq!(loaded.allowance_left(), 1);
    }

    #[tokio::test]
    async fn test_save_updates_current_version() {
        let store = setup_test_store().await;
        store
            .save(&ParticipationQuota::with_allowance("alice", 5))
            .await
            .unwrap();

        let loaded = store.load("alice").await.unwrap().unwrap();
        let updated =
            ParticipationQuota::from_parts("alice", 4, None, 0).with_version(loaded.version());
        store.save(&updated).await.unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].allowance_left(), 4);
        assert_eq!(all[0].version(), 2);
    }

    #[tokio::test]
    async fn test_stale_save_is_a_conflict() {
        let store = setup_test_store().await;
        let first = ParticipationQuota::with_allowance("alice", 5);
        store.save(&first).await.unwrap();

        // Same copy again: the store has moved on
        let err = store.save(&first).await.unwrap_err();
        assert!(matches!(
            err,
            AllowanceError::Conflict { ref participant_id } if participant_id == "alice"
        ));

        let stale = first.with_version(7);
        assert!(store.save(&stale).await.unwrap_err().is_conflict());

        let loaded = store.load("alice").await.unwrap().unwrap();
        assert_eq!(loaded.allowance_left(), 5);
        assert_eq!(loaded.version(), 1);
    }

    #[tokio::test]
    async fn test_save_all_rolls_back_on_conflict() {
        let store = setup_test_store().await;
        store.save(&ParticipationQuota::new("alice")).await.unwrap();

        let err = store
            .save_all(&[ParticipationQuota::new("bob"), ParticipationQuota::new("alice")])
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(store.load("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_all_and_list() {
        let store = setup_test_store().await;
        store
            .save_all(&[
                ParticipationQuota::new("carol"),
                ParticipationQuota::new("alice"),
            ])
            .await
            .unwrap();

        let ids: Vec<_> = store
            .list()
            .await
            .unwrap()
            .iter()
            .map(|q| q.participant_id().to_string())
            .collect();
        assert_eq!(ids, vec!["alice", "carol"]);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = setup_test_store().await;
        store.save(&ParticipationQuota::new("alice")).await.unwrap();

        assert!(store.delete("alice").await.unwrap());
        assert!(!store.delete("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_negative_counter_rejected_by_schema() {
        let store = setup_test_store().await;
        let result = sqlx::query(
            "INSERT INTO participation_quotas (participant_id, allowance_left, extra_granted, updated_at) VALUES ('x', -1, 0, '')",
        )
        .execute(store.pool())
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_file_database_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("quotas.db").display());

        let store = SqliteQuotaStore::connect(&url).await.unwrap();
        store.save(&ParticipationQuota::new("alice")).await.unwrap();
        drop(store);

        let reopened = SqliteQuotaStore::connect(&url).await.unwrap();
        assert!(reopened.load("alice").await.unwrap().is_some());
    }
}
