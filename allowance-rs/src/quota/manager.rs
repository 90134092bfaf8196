use chrono::{DateTime, Utc};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::policy::{AdmissionPolicy, BasicQuota, PeriodicQuota};
use super::types::{ConsumeOutcome, ParticipationQuota, QuotaState, DEFAULT_ALLOWANCE};
use crate::config::Config;
use crate::error::Result;
use crate::store::QuotaStore;

/// Quota manager for enforcing participant allowances
///
/// Record-level operations (`consume`, `grant_extra`, ...) work on a quota the
/// caller already holds. Committing saves it only if the store still holds
/// the revision the record was loaded at, so two copies of one participant
/// cannot both be admitted; the second commit fails with
/// [`Conflict`](crate::AllowanceError::Conflict).
///
/// Participant-level operations (`consume_for`, `grant_extra_for`) load,
/// decide, mutate and save under a per-participant lock, so concurrent
/// requests in this process queue up instead of conflicting.
pub struct QuotaManager {
    store: Arc<dyn QuotaStore>,
    policy: Arc<dyn AdmissionPolicy>,
    clock: Arc<dyn Clock>,
    auto_commit: bool,
    initial_allowance: u32,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl QuotaManager {
    /// Create a quota manager using `policy`, the system clock and auto-commit
    pub fn new(store: Arc<dyn QuotaStore>, policy: Arc<dyn AdmissionPolicy>) -> Self {
        QuotaManager {
            store,
            policy,
            clock: Arc::new(SystemClock),
            auto_commit: true,
            initial_allowance: DEFAULT_ALLOWANCE,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create a quota manager with a daily UTC time bonus
    pub fn periodic(store: Arc<dyn QuotaStore>) -> Self {
        Self::new(store, Arc::new(PeriodicQuota::default()))
    }

    /// Create a quota manager from the `[tracker]` and `[period]` sections
    pub fn from_config(config: &Config, store: Arc<dyn QuotaStore>) -> Result<Self> {
        config.validate()?;

        let policy: Arc<dyn AdmissionPolicy> = if config.tracker.time_bonus {
            Arc::new(PeriodicQuota::new(config.period.boundary()?))
        } else {
            Arc::new(BasicQuota)
        };

        Ok(Self::new(store, policy)
            .with_auto_commit(config.tracker.auto_commit)
            .with_initial_allowance(config.tracker.initial_allowance))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Default for `consume` and `grant_extra`
    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    /// Allowance given to participants without a stored quota
    pub fn with_initial_allowance(mut self, initial_allowance: u32) -> Self {
        self.initial_allowance = initial_allowance;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    /// Check if the participant may act right now
    pub fn can_act(&self, quota: &ParticipationQuota) -> bool {
        self.policy.can_act(quota, self.now())
    }

    /// Check if an implicit per-period bonus is available right now
    pub fn has_time_bonus(&self, quota: &ParticipationQuota) -> bool {
        self.policy.has_time_bonus(quota, self.now())
    }

    pub fn state(&self, quota: &ParticipationQuota) -> QuotaState {
        self.policy.state(quota, self.now())
    }

    /// Record one action, saving if auto-commit is on
    pub async fn consume(&self, quota: &mut ParticipationQuota) -> Result<ConsumeOutcome> {
        self.consume_with(quota, self.auto_commit).await
    }

    /// Record one action, saving only if `commit` is set
    ///
    /// If the save fails the error is returned as is and `quota` keeps the
    /// in-memory change. After a `Conflict`, reload the participant before
    /// deciding again.
    pub async fn consume_with(
        &self,
        quota: &mut ParticipationQuota,
        commit: bool,
    ) -> Result<ConsumeOutcome> {
        let outcome = self.apply_consume(quota)?;

        if commit {
            self.save(quota).await?;
        }

        Ok(outcome)
    }

    /// Add `n` extra allowances, saving if auto-commit is on
    pub async fn grant_extra(&self, quota: &mut ParticipationQuota, n: u32) -> Result<()> {
        self.grant_extra_with(quota, n, self.auto_commit).await
    }

    /// Add `n` extra allowances, saving only if `commit` is set
    pub async fn grant_extra_with(
        &self,
        quota: &mut ParticipationQuota,
        n: u32,
        commit: bool,
    ) -> Result<()> {
        self.apply_grant(quota, n)?;

        if commit {
            self.save(quota).await?;
        }

        Ok(())
    }

    /// Get quota for participant (a fresh, unsaved one if none is stored)
    pub async fn get_quota(&self, participant_id: &str) -> Result<ParticipationQuota> {
        match self.store.load(participant_id).await? {
            Some(quota) => Ok(quota),
            None => Ok(ParticipationQuota::with_allowance(
                participant_id,
                self.initial_allowance,
            )),
        }
    }

    /// Check if a participant may act right now
    pub async fn can_participant_act(&self, participant_id: &str) -> Result<bool> {
        let quota = self.get_quota(participant_id).await?;
        Ok(self.can_act(&quota))
    }

    /// Load, consume and save under the participant's lock
    pub async fn consume_for(&self, participant_id: &str) -> Result<ConsumeOutcome> {
        let lock = self.lock_for(participant_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.consume_locked(participant_id).await
        };
        self.prune_lock(participant_id, lock).await;

        result
    }

    /// Load, grant and save under the participant's lock
    pub async fn grant_extra_for(
        &self,
        participant_id: &str,
        n: u32,
    ) -> Result<ParticipationQuota> {
        let lock = self.lock_for(participant_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.grant_extra_locked(participant_id, n).await
        };
        self.prune_lock(participant_id, lock).await;

        result
    }

    /// Delete a participant's stored quota
    pub async fn delete_quota(&self, participant_id: &str) -> Result<bool> {
        let lock = self.lock_for(participant_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.store.delete(participant_id).await
        };
        self.prune_lock(participant_id, lock).await;

        result
    }

    /// Get all stored quotas (for admin view)
    pub async fn list_quotas(&self) -> Result<Vec<ParticipationQuota>> {
        self.store.list().await
    }

    /// Start a batch whose changes are saved together on commit
    pub fn batch(&self) -> QuotaBatch<'_> {
        QuotaBatch {
            manager: self,
            records: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    async fn consume_locked(&self, participant_id: &str) -> Result<ConsumeOutcome> {
        let mut quota = self.get_quota(participant_id).await?;
        self.consume_with(&mut quota, true).await
    }

    async fn grant_extra_locked(
        &self,
        participant_id: &str,
        n: u32,
    ) -> Result<ParticipationQuota> {
        let mut quota = self.get_quota(participant_id).await?;
        self.grant_extra_with(&mut quota, n, true).await?;
        Ok(quota)
    }

    fn apply_consume(&self, quota: &mut ParticipationQuota) -> Result<ConsumeOutcome> {
        match self.policy.consume(quota, self.now()) {
            Ok(outcome) => {
                debug!("{} consumed: {:?}", quota.participant_id(), outcome);
                Ok(outcome)
            }
            Err(e) => {
                if e.is_quota_exhausted() {
                    warn!("Quota exhausted for {}", quota.participant_id());
                }
                Err(e)
            }
        }
    }

    fn apply_grant(&self, quota: &mut ParticipationQuota, n: u32) -> Result<()> {
        self.policy.grant_extra(quota, n)?;
        info!(
            "Granted {} extra to {} ({} left, {} extra in total)",
            n,
            quota.participant_id(),
            quota.allowance_left(),
            quota.extra_granted()
        );
        Ok(())
    }

    async fn save(&self, quota: &mut ParticipationQuota) -> Result<()> {
        match self.store.save(quota).await {
            Ok(()) => {
                quota.mark_saved();
                Ok(())
            }
            Err(e) => {
                if e.is_conflict() {
                    warn!("Stale quota for {}, not saved", quota.participant_id());
                } else {
                    error!("Failed to save quota for {}: {}", quota.participant_id(), e);
                }
                Err(e)
            }
        }
    }

    async fn lock_for(&self, participant_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(participant_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the participant's lock entry once nobody else holds it
    async fn prune_lock(&self, participant_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // One reference in the map, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(participant_id);
        }
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }
}

/// Changes staged for a single save
///
/// The batch loads each participant on first use and keeps its own copy.
/// Nothing is persisted until [`commit`](QuotaBatch::commit), which saves
/// every changed record or none of them. Dropping the batch discards the
/// changes.
pub struct QuotaBatch<'a> {
    manager: &'a QuotaManager,
    records: BTreeMap<String, ParticipationQuota>,
    dirty: BTreeSet<String>,
}

impl<'a> QuotaBatch<'a> {
    pub async fn consume(&mut self, participant_id: &str) -> Result<ConsumeOutcome> {
        let manager = self.manager;
        let quota = self.record(participant_id).await?;
        let outcome = manager.apply_consume(quota)?;
        self.dirty.insert(participant_id.to_string());
        Ok(outcome)
    }

    pub async fn grant_extra(&mut self, participant_id: &str, n: u32) -> Result<()> {
        let manager = self.manager;
        let quota = self.record(participant_id).await?;
        manager.apply_grant(quota, n)?;
        self.dirty.insert(participant_id.to_string());
        Ok(())
    }

    /// The batch's current copy of a participant, if it was loaded
    pub fn get(&self, participant_id: &str) -> Option<&ParticipationQuota> {
        self.records.get(participant_id)
    }

    /// Number of participants with staged changes
    pub fn len(&self) -> usize {
        self.dirty.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty()
    }

    /// Save every changed quota in one store call. Returns the saved records.
    pub async fn commit(mut self) -> Result<Vec<ParticipationQuota>> {
        if self.dirty.is_empty() {
            return Ok(Vec::new());
        }

        let mut quotas: Vec<_> = self
            .dirty
            .iter()
            .filter_map(|id| self.records.remove(id))
            .collect();

        if let Err(e) = self.manager.store.save_all(&quotas).await {
            if e.is_conflict() {
                warn!("Batch of {} quotas is stale, not saved", quotas.len());
            } else {
                error!("Failed to commit {} quotas: {}", quotas.len(), e);
            }
            return Err(e);
        }

        for quota in &mut quotas {
            quota.mark_saved();
        }

        info!("Committed {} quotas", quotas.len());
        Ok(quotas)
    }

    async fn record(&mut self, participant_id: &str) -> Result<&mut ParticipationQuota> {
        match self.records.entry(participant_id.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let quota = self.manager.get_quota(participant_id).await?;
                Ok(entry.insert(quota))
            }
        }
    }
}
