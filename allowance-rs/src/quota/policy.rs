//! Admission policies
//!
//! [`BasicQuota`] admits purely from the stored counter. [`PeriodicQuota`]
//! wraps it and additionally grants one implicit bonus per period once the
//! participant has acted at least once. Both are pure: the caller passes in
//! `now` and is responsible for persisting the mutated record.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use super::period::{CalendarBoundary, PeriodBoundary};
use super::types::{ConsumeOutcome, ParticipationQuota, QuotaState};
use crate::error::{AllowanceError, Result};

/// Admission decision and state transitions for a single quota
pub trait AdmissionPolicy: Send + Sync {
    /// Check if the participant may act right now
    fn can_act(&self, quota: &ParticipationQuota, now: DateTime<Utc>) -> bool;

    /// Check if an implicit per-period bonus is available
    fn has_time_bonus(&self, _quota: &ParticipationQuota, _now: DateTime<Utc>) -> bool {
        false
    }

    /// Record one action. Fails with `QuotaExhausted` without mutating
    /// anything when the participant cannot act.
    fn consume(
        &self,
        quota: &mut ParticipationQuota,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome>;

    /// Add `n` to both the allowance and the extra-granted statistic
    fn grant_extra(&self, quota: &mut ParticipationQuota, n: u32) -> Result<()> {
        quota.add_extra(n)
    }

    fn state(&self, quota: &ParticipationQuota, now: DateTime<Utc>) -> QuotaState {
        if !quota.is_exhausted() {
            QuotaState::HasAllowance
        } else if self.has_time_bonus(quota, now) {
            QuotaState::BonusAvailable
        } else {
            QuotaState::Exhausted
        }
    }
}

/// Counter-only quota tracker
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicQuota;

impl AdmissionPolicy for BasicQuota {
    fn can_act(&self, quota: &ParticipationQuota, _now: DateTime<Utc>) -> bool {
        !quota.is_exhausted()
    }

    fn consume(
        &self,
        quota: &mut ParticipationQuota,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome> {
        if quota.is_exhausted() {
            return Err(AllowanceError::QuotaExhausted {
                participant_id: quota.participant_id().to_string(),
            });
        }

        let remaining = quota.draw_allowance(now);
        debug!(
            "Allowance drawn for {}: {} left",
            quota.participant_id(),
            remaining
        );

        Ok(ConsumeOutcome::Allowance { remaining })
    }
}

/// Quota tracker with one implicit bonus per period
///
/// The bonus becomes available once the period boundary is at or after the
/// last recorded action. A participant that never acted gets no bonus, so the
/// first action always comes from the stored allowance.
#[derive(Clone)]
pub struct PeriodicQuota {
    base: BasicQuota,
    boundary: Arc<dyn PeriodBoundary>,
}

impl PeriodicQuota {
    pub fn new(boundary: impl PeriodBoundary + 'static) -> Self {
        Self::with_shared_boundary(Arc::new(boundary))
    }

    pub fn with_shared_boundary(boundary: Arc<dyn PeriodBoundary>) -> Self {
        PeriodicQuota {
            base: BasicQuota,
            boundary,
        }
    }

    /// Start of the period `now` falls in
    pub fn current_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.boundary.current_boundary(now)
    }

    /// Stamp `last_action_at` when the stored allowance is used up and either
    /// the participant never acted or a bonus is available.
    ///
    /// Only called from a successful [`consume`](AdmissionPolicy::consume),
    /// once per action, after the action itself was stamped with the same
    /// `now`. Read paths never call it. Calling it again with the same `now`
    /// leaves the record unchanged. Returns whether it stamped.
    pub fn finalize_exhaustion(
        &self,
        quota: &mut ParticipationQuota,
        now: DateTime<Utc>,
    ) -> bool {
        if quota.is_exhausted() && (!quota.has_acted() || self.has_time_bonus(quota, now)) {
            quota.stamp(now);
            return true;
        }

        false
    }
}

impl Default for PeriodicQuota {
    fn default() -> Self {
        Self::new(CalendarBoundary::default())
    }
}

impl std::fmt::Debug for PeriodicQuota {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicQuota").finish_non_exhaustive()
    }
}

impl AdmissionPolicy for PeriodicQuota {
    fn can_act(&self, quota: &ParticipationQuota, now: DateTime<Utc>) -> bool {
        self.base.can_act(quota, now) || self.has_time_bonus(quota, now)
    }

    fn has_time_bonus(&self, quota: &ParticipationQuota, now: DateTime<Utc>) -> bool {
        match quota.last_action_at() {
            Some(last_action_at) => self.current_boundary(now) >= last_action_at,
            None => false,
        }
    }

    fn consume(
        &self,
        quota: &mut ParticipationQuota,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome> {
        let outcome = if quota.is_exhausted() {
            if !self.has_time_bonus(quota, now) {
                return Err(AllowanceError::QuotaExhausted {
                    participant_id: quota.participant_id().to_string(),
                });
            }

            quota.stamp(now);
            debug!("Time bonus used by {}", quota.participant_id());
            ConsumeOutcome::TimeBonus
        } else {
            self.base.consume(quota, now)?
        };

        self.finalize_exhaustion(quota, now);

        Ok(outcome)
    }
}
