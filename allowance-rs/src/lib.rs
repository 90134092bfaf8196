//! allowance-rs: Per-participant allowance tracking
//!
//! Tracks how many actions each participant may still take and replenishes
//! them with one implicit bonus per calendar period.
//!
//! # Features
//!
//! - **Basic quota**: a plain counter, decremented on each action
//! - **Periodic quota**: one extra action after every period boundary
//!   (hourly, daily or weekly, in a fixed UTC offset)
//! - **Storage**: in-memory or SQLite backends behind one trait
//! - **Batches**: stage many changes, commit them in one transaction
//!
//! # Example
//!
//! ```no_run
//! use allowance_rs::quota::QuotaManager;
//! use allowance_rs::store::SqliteQuotaStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(SqliteQuotaStore::connect("sqlite://allowance.db").await?);
//!     let manager = QuotaManager::periodic(store);
//!
//!     if manager.can_participant_act("alice").await? {
//!         manager.consume_for("alice").await?;
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration management
//! - [`error`]: Error types and handling
//! - [`quota`]: Quota records, admission policies and the manager
//! - [`store`]: Quota persistence backends

pub mod config;
pub mod error;
pub mod quota;
pub mod store;

pub use config::Config;
pub use error::{AllowanceError, Result};
pub use quota::{
    AdmissionPolicy, BasicQuota, ConsumeOutcome, ParticipationQuota, PeriodicQuota, QuotaManager,
    QuotaState,
};
pub use store::{MemoryQuotaStore, QuotaStore, SqliteQuotaStore};
