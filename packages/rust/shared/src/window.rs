//! The calendar window a comparison covers.

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PerpcheckError, Result};

/// Inclusive range of UTC calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    /// First compared date.
    pub start: NaiveDate,
    /// Last compared date.
    pub end: NaiveDate,
    /// Number of dates in `[start, end]`.
    pub days: u32,
}

impl DateWindow {
    /// The `days`-long window whose last date is `end`.
    pub fn ending_at(end: NaiveDate, days: u32) -> Result<Self> {
        if days == 0 {
            return Err(PerpcheckError::validation("window must cover at least one day"));
        }
        let start = end
            .checked_sub_days(Days::new(u64::from(days - 1)))
            .ok_or_else(|| PerpcheckError::validation(format!("window of {days} days before {end} underflows")))?;
        Ok(Self { start, end, days })
    }

    /// Every date in the window, oldest first.
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start.iter_days().take(self.days as usize).collect()
    }

    /// First date Source B must cover so that `start` can be paired with
    /// the day `shift` days earlier.
    pub fn lookback_start(&self, shift: u32) -> NaiveDate {
        self.start
            .checked_sub_days(Days::new(u64::from(shift)))
            .unwrap_or(NaiveDate::MIN)
    }

    /// Whether `date` lies in `[lookback_start(shift), end]`.
    pub fn contains_with_lookback(&self, date: NaiveDate, shift: u32) -> bool {
        date >= self.lookback_start(shift) && date <= self.end
    }
}

/// Format a date the way output files key it (`YYYY-MM-DD`).
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// UTC calendar date of an epoch-milliseconds timestamp.
pub fn utc_date_of_ms(timestamp_ms: i64) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms).map(|dt| dt.date_naive())
}
