//! Millisecond-precision timestamps for the wire format.

use chrono::{TimeZone, Utc};
use std::fmt;

/// Milliseconds since the Unix epoch, signed.
///
/// This is the wire representation of date-time values; conversion to
/// and from calendar types goes through `chrono`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DateTime {
    msecs: i64,
}

impl DateTime {
    /// Wrap a raw millisecond offset from the Unix epoch.
    pub fn from_epoch_msecs(msecs: i64) -> Self {
        Self { msecs }
    }

    /// Current wall-clock time, truncated to milliseconds.
    pub fn now() -> Self {
        Self {
            msecs: Utc::now().timestamp_millis(),
        }
    }

    /// Millisecond offset from the Unix epoch.
    pub fn epoch_msecs(&self) -> i64 {
        self.msecs
    }

    /// Convert from a chrono time point, truncating below milliseconds.
    pub fn from_chrono<Tz: TimeZone>(dt: &chrono::DateTime<Tz>) -> Self {
        Self {
            msecs: dt.timestamp_millis(),
        }
    }

    /// Convert to a chrono UTC time point.
    ///
    /// Returns `None` for offsets outside chrono's representable range.
    pub fn to_chrono(&self) -> Option<chrono::DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.msecs).single()
    }
}

impl From<chrono::DateTime<Utc>> for DateTime {
    fn from(dt: chrono::DateTime<Utc>) -> Self {
        Self::from_chrono(&dt)
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_chrono() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
            None => write!(f, "{}ms", self.msecs),
        }
    }
}
