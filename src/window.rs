//! The half-open time window a report covers.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt;

/// `[start, end)` in UTC, plus the timezone and calendar day it represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub timezone: Tz,
    /// Local calendar day of `start`.
    pub date: NaiveDate,
}

impl ReportWindow {
    /// Build a window from raw bounds. No validation is done here; the
    /// report generator rejects windows that are not well-formed.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, timezone: Tz) -> Self {
        Self {
            start,
            end,
            timezone,
            date: start.with_timezone(&timezone).date_naive(),
        }
    }

    /// The full local day before the trigger's local date.
    ///
    /// Returns `None` only if a local midnight cannot be mapped to an
    /// instant, which does not happen for real zones.
    pub fn for_trigger(trigger: DateTime<Utc>, timezone: Tz) -> Option<Self> {
        let today = trigger.with_timezone(&timezone).date_naive();
        let yesterday = today.pred_opt()?;
        let start = local_midnight(yesterday, timezone)?;
        let end = local_midnight(today, timezone)?;
        Some(Self {
            start,
            end,
            timezone,
            date: yesterday,
        })
    }

    /// The full local day `date`.
    pub fn for_date(date: NaiveDate, timezone: Tz) -> Option<Self> {
        let start = local_midnight(date, timezone)?;
        let end = local_midnight(date.succ_opt()?, timezone)?;
        Some(Self {
            start,
            end,
            timezone,
            date,
        })
    }

    pub fn is_well_formed(&self) -> bool {
        self.start < self.end
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    pub fn length(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for ReportWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}, {}) {}",
            self.date,
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ"),
            self.timezone.name()
        )
    }
}

/// Earliest instant of `date` in `tz`. When midnight falls in a DST gap the
/// day starts at the first valid local time after it.
fn local_midnight(date: NaiveDate, tz: Tz) -> Option<DateTime<Utc>> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    (0..=2)
        .find_map(|h| {
            tz.from_local_datetime(&(midnight + Duration::hours(h)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
}
