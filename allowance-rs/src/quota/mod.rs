/// Participation quota tracking
///
/// This module provides:
/// - The per-participant allowance record
/// - Admission policies (counter only, or counter plus periodic bonus)
/// - Period boundaries and injectable clocks
/// - A manager that loads, locks, mutates and saves quotas

pub mod clock;
pub mod manager;
pub mod period;
pub mod policy;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use manager::{QuotaBatch, QuotaManager};
pub use period::{parse_utc_offset, Cadence, CalendarBoundary, PeriodBoundary, Zone};
pub use policy::{AdmissionPolicy, BasicQuota, PeriodicQuota};
pub use types::{ConsumeOutcome, ParticipationQuota, QuotaState, DEFAULT_ALLOWANCE};
