use aqm_utils::dates::{end_of_day, start_of_day};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest lookback accepted, roughly ten years.
pub const MAX_LOOKBACK_DAYS: u32 = 3660;

/// Default lookback used by the selection inputs.
pub const DEFAULT_LOOKBACK_DAYS: u32 = 10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WindowError {
    #[error("lookback of {0} days exceeds the maximum lookback")]
    LookbackTooLong(u32),

    #[error("window start is out of the representable date range")]
    OutOfRange,
}

/// End instant plus lookback length.
///
/// `lookback_days == 0` means no windowing. Otherwise the window covers
/// `[start, end]` inclusive, where `start` is 00:00:00 UTC of the day
/// `end - (lookback_days - 1) days`. A missing `end` means "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub end: Option<DateTime<Utc>>,
    pub lookback_days: u32,
}

impl Default for TimeWindow {
    fn default() -> Self {
        TimeWindow::pass_through()
    }
}

impl TimeWindow {
    pub fn new(end: Option<DateTime<Utc>>, lookback_days: u32) -> Self {
        TimeWindow { end, lookback_days }
    }

    pub fn pass_through() -> Self {
        TimeWindow {
            end: None,
            lookback_days: 0,
        }
    }

    /// Window ending at 23:59:59 UTC of `date`.
    pub fn ending_on(date: NaiveDate, lookback_days: u32) -> Self {
        TimeWindow {
            end: Some(end_of_day(&date)),
            lookback_days,
        }
    }

    pub fn is_pass_through(&self) -> bool {
        self.lookback_days == 0
    }

    /// Resolve the inclusive `(start, end)` bounds, `None` for pass-through.
    pub fn bounds(&self, now: DateTime<Utc>) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, WindowError> {
        if self.is_pass_through() {
            return Ok(None);
        }
        if self.lookback_days > MAX_LOOKBACK_DAYS {
            return Err(WindowError::LookbackTooLong(self.lookback_days));
        }
        let end = self.end.unwrap_or(now);
        let back = Duration::try_days(i64::from(self.lookback_days) - 1).ok_or(WindowError::OutOfRange)?;
        let start_day = end
            .date_naive()
            .checked_sub_signed(back)
            .ok_or(WindowError::OutOfRange)?;
        Ok(Some((start_of_day(&start_day), end)))
    }
}
