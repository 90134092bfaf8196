use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AllowanceError, Result};

/// Allowance given to a participant on creation
pub const DEFAULT_ALLOWANCE: u32 = 1;

/// Per-participant allowance record
///
/// Fields are only mutated through [`AdmissionPolicy`](super::AdmissionPolicy)
/// operations, which keeps `last_action_at` from ever going back to `None`
/// and `extra_granted` from decreasing.
///
/// `version` is the store revision the record was loaded at (0 if it was
/// never saved). Stores only accept a save whose version matches what they
/// hold, so two copies of the same record cannot both be committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipationQuota {
    participant_id: String,
    allowance_left: u32,
    last_action_at: Option<DateTime<Utc>>,
    extra_granted: u32,
    #[serde(default)]
    version: u64,
}

impl ParticipationQuota {
    /// Create a fresh quota with the default allowance
    pub fn new(participant_id: impl Into<String>) -> Self {
        Self::with_allowance(participant_id, DEFAULT_ALLOWANCE)
    }

    /// Create a fresh quota with a custom starting allowance
    pub fn with_allowance(participant_id: impl Into<String>, allowance: u32) -> Self {
        ParticipationQuota {
            participant_id: participant_id.into(),
            allowance_left: allowance,
            last_action_at: None,
            extra_granted: 0,
            version: 0,
        }
    }

    /// Rebuild a persisted record
    pub fn from_parts(
        participant_id: impl Into<String>,
        allowance_left: u32,
        last_action_at: Option<DateTime<Utc>>,
        extra_granted: u32,
    ) -> Self {
        ParticipationQuota {
            participant_id: participant_id.into(),
            allowance_left,
            last_action_at,
            extra_granted,
            version: 0,
        }
    }

    /// Set the store revision of a rebuilt record
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Remaining stored allowance (time bonuses are not counted here)
    pub fn allowance_left(&self) -> u32 {
        self.allowance_left
    }

    /// Last recorded action, `None` until the first successful consume
    pub fn last_action_at(&self) -> Option<DateTime<Utc>> {
        self.last_action_at
    }

    /// Total allowance added through explicit grants. Informational only.
    pub fn extra_granted(&self) -> u32 {
        self.extra_granted
    }

    /// Store revision this copy is based on
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Check if the stored allowance is used up
    pub fn is_exhausted(&self) -> bool {
        self.allowance_left == 0
    }

    /// Check if the participant has ever acted
    pub fn has_acted(&self) -> bool {
        self.last_action_at.is_some()
    }

    pub(crate) fn draw_allowance(&mut self, now: DateTime<Utc>) -> u32 {
        self.allowance_left = self.allowance_left.saturating_sub(1);
        self.stamp(now);
        self.allowance_left
    }

    /// Advance to the revision the store now holds
    pub(crate) fn mark_saved(&mut self) {
        self.version = self.version.saturating_add(1);
    }

    pub(crate) fn stamp(&mut self, now: DateTime<Utc>) {
        self.last_action_at = Some(now);
    }

    pub(crate) fn add_extra(&mut self, n: u32) -> Result<()> {
        let allowance_left = self.allowance_left.checked_add(n).ok_or_else(|| {
            AllowanceError::InvalidGrant(format!(
                "granting {} would overflow allowance of {}",
                n, self.participant_id
            ))
        })?;
        let extra_granted = self.extra_granted.checked_add(n).ok_or_else(|| {
            AllowanceError::InvalidGrant(format!(
                "granting {} would overflow extra_granted of {}",
                n, self.participant_id
            ))
        })?;

        self.allowance_left = allowance_left;
        self.extra_granted = extra_granted;
        Ok(())
    }
}

/// Which branch admitted a consume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsumeOutcome {
    /// Drawn from the stored counter
    Allowance { remaining: u32 },
    /// Implicit per-period bonus; the stored counter stays at zero
    TimeBonus,
}

/// Admission state of a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaState {
    HasAllowance,
    Exhausted,
    BonusAvailable,
}

impl QuotaState {
    pub fn can_act(&self) -> bool {
        !matches!(self, QuotaState::Exhausted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaState::HasAllowance => "has_allowance",
            QuotaState::Exhausted => "exhausted",
            QuotaState::BonusAvailable => "bonus_available",
        }
    }
}
