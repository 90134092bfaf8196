//! Error types for allowance-rs

use thiserror::Error;

/// Result type alias for allowance operations
pub type Result<T> = std::result::Result<T, AllowanceError>;

/// Allowance error types
#[derive(Error, Debug)]
pub enum AllowanceError {
    /// No allowance left and no time bonus available.
    ///
    /// Expected condition: the participant may act again after the next
    /// period boundary or an explicit grant.
    #[error("Quota exhausted for participant {participant_id}")]
    QuotaExhausted { participant_id: String },

    /// Rejected `grant_extra` precondition
    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    /// The stored record changed since this copy was loaded.
    ///
    /// Reload the participant and retry the decision.
    #[error("Quota for participant {participant_id} was modified concurrently")]
    Conflict { participant_id: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl AllowanceError {
    /// True for [`AllowanceError::QuotaExhausted`]
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, AllowanceError::QuotaExhausted { .. })
    }

    /// True for [`AllowanceError::Conflict`]
    pub fn is_conflict(&self) -> bool {
        matches!(self, AllowanceError::Conflict { .. })
    }
}
