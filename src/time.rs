//! History windows.
//!
//! A window covers `[from, until)`; without `until` it reaches the present.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Window over a subject's reading history.
///
/// ```
/// use hemodrop::TimeRange;
/// use chrono::Utc;
///
/// let range = TimeRange::last_hours(2);
/// assert!(range.contains(Utc::now()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Earliest reading timestamp included.
    pub from: DateTime<Utc>,
    /// First timestamp past the window, if bounded.
    pub until: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Bounded window.
    ///
    /// # Errors
    ///
    /// `InvalidTimeRange` unless `from` precedes `until`.
    pub fn between(from: DateTime<Utc>, until: DateTime<Utc>) -> Result<Self, ValidationError> {
        if from >= until {
            return Err(ValidationError::InvalidTimeRange { from, to: until });
        }
        Ok(Self {
            from,
            until: Some(until),
        })
    }

    /// Everything at or after `from`.
    #[must_use]
    pub const fn since(from: DateTime<Utc>) -> Self {
        Self { from, until: None }
    }

    /// Readings from the trailing `hours`.
    #[must_use]
    pub fn last_hours(hours: u32) -> Self {
        Self::since(Utc::now() - Duration::hours(i64::from(hours)))
    }

    /// The whole history.
    #[must_use]
    pub const fn forever() -> Self {
        Self::since(DateTime::UNIX_EPOCH)
    }

    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.from && self.until.map_or(true, |until| at < until)
    }
}
