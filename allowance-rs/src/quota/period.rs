//! Period boundaries for time bonuses
//!
//! A participant that acted before the start of the current period gets one
//! implicit bonus. The start of the period is computed by a [`PeriodBoundary`];
//! plain closures work as boundaries too:
//!
//! ```
//! use allowance_rs::quota::PeriodBoundary;
//! use chrono::{DateTime, Duration, DurationRound, Utc};
//!
//! // Every 15 minutes
//! let quarter = |now: DateTime<Utc>| {
//!     now.duration_trunc(Duration::minutes(15)).unwrap_or(now)
//! };
//! let _ = quarter.current_boundary(Utc::now());
//! ```

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, LocalResult, NaiveDateTime, Offset, TimeZone,
    Timelike, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{AllowanceError, Result};

/// Step used to find the first valid local time after a DST gap
const GAP_STEP_MINUTES: i64 = 15;
/// Longest gap searched (a whole skipped day)
const GAP_MAX_STEPS: usize = 24 * 4;

/// Start of the period `now` falls in
pub trait PeriodBoundary: Send + Sync {
    fn current_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc>;
}

impl<F> PeriodBoundary for F
where
    F: Fn(DateTime<Utc>) -> DateTime<Utc> + Send + Sync,
{
    fn current_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self(now)
    }
}

/// Replenishment cadence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Hourly,
    #[default]
    Daily,
    /// Weeks start on Monday
    Weekly,
}

impl Cadence {
    /// Local start of the period containing `local`
    fn truncate(&self, local: NaiveDateTime) -> Option<NaiveDateTime> {
        let date = local.date();
        match self {
            Cadence::Hourly => date.and_hms_opt(local.hour(), 0, 0),
            Cadence::Daily => date.and_hms_opt(0, 0, 0),
            Cadence::Weekly => {
                let monday =
                    date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
                monday.and_hms_opt(0, 0, 0)
            }
        }
    }
}

/// Time zone the calendar is evaluated in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    /// Constant offset, no daylight saving
    Fixed(FixedOffset),
    /// IANA zone such as `Europe/Paris`
    Named(Tz),
}

impl Default for Zone {
    fn default() -> Self {
        Zone::Fixed(utc_offset())
    }
}

impl From<FixedOffset> for Zone {
    fn from(offset: FixedOffset) -> Self {
        Zone::Fixed(offset)
    }
}

impl From<Tz> for Zone {
    fn from(tz: Tz) -> Self {
        Zone::Named(tz)
    }
}

impl Zone {
    /// Parse an IANA name (`"Europe/Paris"`) or a fixed offset (`"+02:00"`, `"Z"`, `"UTC"`)
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.starts_with(['+', '-'])
            || value.eq_ignore_ascii_case("z")
            || value.eq_ignore_ascii_case("utc")
        {
            return parse_utc_offset(value).map(Zone::Fixed);
        }

        value
            .parse::<Tz>()
            .map(Zone::Named)
            .map_err(|e| AllowanceError::Config(format!("Unknown time zone '{}': {}", value, e)))
    }

    fn period_start(&self, cadence: Cadence, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Zone::Fixed(offset) => period_start(offset, cadence, now),
            Zone::Named(tz) => period_start(tz, cadence, now),
        }
    }
}

fn period_start<Z: TimeZone>(zone: &Z, cadence: Cadence, now: DateTime<Utc>) -> DateTime<Utc> {
    let local = now.with_timezone(zone).naive_local();
    cadence
        .truncate(local)
        .and_then(|start| resolve_local(zone, start, now))
        .map_or(now, |start| start.min(now))
}

/// Map a local wall-clock time back to an instant.
///
/// Repeated times (DST end) resolve to the latest instant not after `now`.
/// Skipped times (DST start) resolve to the first valid time after the gap.
fn resolve_local<Z: TimeZone>(
    zone: &Z,
    local: NaiveDateTime,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let mut candidate = local;
    for _ in 0..=GAP_MAX_STEPS {
        match zone.from_local_datetime(&candidate) {
            LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, latest) => {
                let latest = latest.with_timezone(&Utc);
                if latest <= now {
                    return Some(latest);
                }
                return Some(earliest.with_timezone(&Utc));
            }
            LocalResult::None => candidate += Duration::minutes(GAP_STEP_MINUTES),
        }
    }

    None
}

/// Calendar-aligned boundary in a time zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarBoundary {
    cadence: Cadence,
    zone: Zone,
}

impl CalendarBoundary {
    pub fn new(cadence: Cadence, zone: impl Into<Zone>) -> Self {
        Self {
            cadence,
            zone: zone.into(),
        }
    }

    /// Local midnight in `zone`
    pub fn daily(zone: impl Into<Zone>) -> Self {
        Self::new(Cadence::Daily, zone)
    }

    pub fn hourly(zone: impl Into<Zone>) -> Self {
        Self::new(Cadence::Hourly, zone)
    }

    pub fn weekly(zone: impl Into<Zone>) -> Self {
        Self::new(Cadence::Weekly, zone)
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    pub fn zone(&self) -> Zone {
        self.zone
    }
}

impl Default for CalendarBoundary {
    fn default() -> Self {
        Self::daily(Zone::default())
    }
}

impl PeriodBoundary for CalendarBoundary {
    fn current_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.zone.period_start(self.cadence, now)
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

/// Parse a UTC offset such as `"+02:00"`, `"-05:30"`, `"Z"` or `"UTC"`
pub fn parse_utc_offset(value: &str) -> Result<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return Ok(utc_offset());
    }

    let invalid = || AllowanceError::Config(format!("Invalid UTC offset '{}'", value));

    let (sign, rest) = match value.chars().next() {
        Some('+') => (1, &value[1..]),
        Some('-') => (-1, &value[1..]),
        _ => return Err(invalid()),
    };

    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let two_digits = |s: &str| s.len() == 2 && s.bytes().all(|b| b.is_ascii_digit());
    if !two_digits(hours) || !two_digits(minutes) {
        return Err(invalid());
    }

    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if minutes >= 60 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3_600 + minutes * 60)).ok_or_else(invalid)
}
