/// Quota persistence
///
/// The quota core only needs load/save. Backends:
/// - [`MemoryQuotaStore`]: process-local, for tests and single-node use
/// - [`SqliteQuotaStore`]: SQLite via sqlx

pub mod memory;
pub mod sqlite;

pub use memory::MemoryQuotaStore;
pub use sqlite::SqliteQuotaStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::quota::ParticipationQuota;

/// Persistence backend for quota records
///
/// Saves are conditional on [`ParticipationQuota::version`]: a save only
/// succeeds if the store holds that revision (or no record at all for
/// version 0), and the stored record then moves to `version + 1`. Otherwise
/// the save fails with [`AllowanceError::Conflict`](crate::AllowanceError::Conflict)
/// and nothing is written.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Load a participant's quota, `None` if it was never saved
    async fn load(&self, participant_id: &str) -> Result<Option<ParticipationQuota>>;

    /// Insert or update a quota if its version is current
    async fn save(&self, quota: &ParticipationQuota) -> Result<()>;

    /// Save several quotas, all or nothing
    async fn save_all(&self, quotas: &[ParticipationQuota]) -> Result<()>;

    /// Delete a quota. Returns whether a record existed.
    async fn delete(&self, participant_id: &str) -> Result<bool>;

    /// List all quotas (for admin view)
    async fn list(&self) -> Result<Vec<ParticipationQuota>>;
}
