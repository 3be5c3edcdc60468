//! Time zone parsing and a per-second formatted-prefix cache.
//!
//! Grounded on the original engine's `time_zone` class: a "localtime"/"UTC"/
//! "UTC±H[:MM]" parser plus a cache that only recomputes the `"YYYY-MM-DD
//! HH:MM:SS."` prefix when the epoch second actually changes, since a logger
//! formats many records per second.

use chrono::{Local, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

/// Errors that can occur while parsing a time zone string.
#[derive(Error, Clone, Debug)]
#[error("invalid time zone string: {0:?}")]
pub struct Error(pub(crate) String);

/// A resolved time zone: either the process's local time zone, or a fixed
/// offset from UTC in minutes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeZone {
    offset_minutes: Option<i32>,
}

impl TimeZone {
    /// The process's local time zone, as reported by the OS.
    pub const LOCAL: Self = Self { offset_minutes: None };

    /// Parses a time zone string.
    ///
    /// Accepted forms: `"local"`/`"localtime"` (case-insensitive), `"UTC"`/
    /// `"GMT"`/`"Z"`, and `"UTC±H"` or `"UTC±H:MM"` (also accepting `"GMT"`
    /// in place of `"UTC"`).
    pub fn parse(input: &str) -> Result<Self, Error> {
        let trimmed = input.trim();
        let lower = trimmed.to_ascii_lowercase();

        if lower.is_empty() || lower == "local" || lower == "localtime" {
            return Ok(Self::LOCAL);
        }
        if lower == "utc" || lower == "gmt" || lower == "z" {
            return Ok(Self { offset_minutes: Some(0) });
        }

        let rest = lower
            .strip_prefix("utc")
            .or_else(|| lower.strip_prefix("gmt"))
            .ok_or_else(|| Error(input.to_owned()))?;

        let (sign, rest) = match rest.strip_prefix('-') {
            Some(rest) => (-1, rest),
            None => (1, rest.strip_prefix('+').unwrap_or(rest)),
        };
        if rest.is_empty() {
            return Err(Error(input.to_owned()));
        }

        let (hours_str, minutes_str) = rest.split_once(':').unwrap_or((rest, "0"));
        let hours: i32 = hours_str.parse().map_err(|_| Error(input.to_owned()))?;
        let minutes: i32 = minutes_str.parse().map_err(|_| Error(input.to_owned()))?;
        if !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
            return Err(Error(input.to_owned()));
        }

        Ok(Self { offset_minutes: Some(sign * (hours * 60 + minutes)) })
    }

    /// The offset from UTC, in milliseconds, or `None` for the local time
    /// zone (whose offset varies with daylight-saving rules).
    pub fn fixed_offset_ms(&self) -> Option<i64> {
        self.offset_minutes.map(|m| m as i64 * 60_000)
    }

    /// Builds a time zone directly from a resolved offset, as recovered from
    /// a decoded file's payload metadata (`None` for the local time zone).
    pub(crate) fn from_offset_minutes(offset_minutes: Option<i32>) -> Self {
        Self { offset_minutes }
    }

    /// The label rendered in a log line's `TZ` field: `"LOCAL"` for the
    /// process time zone, `"UTC0"` for UTC, or `"UTC±H[:MM]"` for a fixed
    /// offset.
    pub(crate) fn label(&self) -> String {
        match self.offset_minutes {
            None => "LOCAL".to_owned(),
            Some(0) => "UTC0".to_owned(),
            Some(total) => {
                let hours = total / 60;
                let minutes = total.abs() % 60;
                if minutes == 0 {
                    format!("UTC{hours:+}")
                } else {
                    format!("UTC{hours:+}:{minutes:02}")
                }
            }
        }
    }

    /// Converts an epoch timestamp (milliseconds) to a naive wall-clock
    /// date & time in this time zone.
    pub fn to_naive(&self, epoch_ms: i64) -> NaiveDateTime {
        match self.offset_minutes {
            Some(offset) => {
                let shifted = epoch_ms + offset as i64 * 60_000;
                Utc.timestamp_millis_opt(shifted).single().unwrap_or_default().naive_utc()
            }
            None => Local
                .timestamp_millis_opt(epoch_ms)
                .single()
                .map(|dt| dt.naive_local())
                .unwrap_or_default(),
        }
    }
}

impl Default for TimeZone {
    #[inline]
    fn default() -> Self {
        Self::LOCAL
    }
}

/// The length of the cached `"YYYY-MM-DD HH:MM:SS."` prefix, in bytes.
const PREFIX_LEN: usize = 20;

/// Caches the formatted date/time prefix for the current epoch second, since
/// most log records within the same second share it. Millisecond digits are
/// always recomputed and appended separately by the caller.
pub(crate) struct TimeCache {
    zone: TimeZone,
    last_epoch_secs: i64,
    prefix: [u8; PREFIX_LEN],
}

impl TimeCache {
    pub(crate) fn new(zone: TimeZone) -> Self {
        Self { zone, last_epoch_secs: i64::MIN, prefix: [0; PREFIX_LEN] }
    }

    /// The `TZ` field label for this cache's time zone.
    pub(crate) fn zone_label(&self) -> String {
        self.zone.label()
    }

    /// Returns the `"YYYY-MM-DD HH:MM:SS."` prefix for `epoch_ms`, recomputing
    /// it only if the epoch second has changed since the last call.
    pub(crate) fn prefix(&mut self, epoch_ms: i64) -> &str {
        let epoch_secs = epoch_ms.div_euclid(1000);
        if epoch_secs != self.last_epoch_secs {
            self.refresh(epoch_secs);
            self.last_epoch_secs = epoch_secs;
        }
        // SAFETY: `refresh` only ever writes ASCII digits, `-`, ` `, `:` and `.`.
        std::str::from_utf8(&self.prefix).unwrap_or("")
    }

    fn refresh(&mut self, epoch_secs: i64) {
        let naive = self.zone.to_naive(epoch_secs * 1000);
        let formatted = naive.format("%Y-%m-%d %H:%M:%S.").to_string();
        let bytes = formatted.as_bytes();
        let len = bytes.len().min(PREFIX_LEN);
        self.prefix[..len].copy_from_slice(&bytes[..len]);
    }
}

/// A lookup table of the zero-padded 3-digit representation for every
/// millisecond value `0..1000`, avoiding a `format!` call per log record.
pub(crate) fn millis_digits(millis: u32) -> [u8; 3] {
    let millis = millis.min(999);
    [b'0' + (millis / 100) as u8, b'0' + (millis / 10 % 10) as u8, b'0' + (millis % 10) as u8]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local() {
        assert_eq!(TimeZone::parse("local").unwrap(), TimeZone::LOCAL);
        assert_eq!(TimeZone::parse("localtime").unwrap(), TimeZone::LOCAL);
        assert_eq!(TimeZone::parse("").unwrap(), TimeZone::LOCAL);
    }

    #[test]
    fn test_parse_utc() {
        assert_eq!(TimeZone::parse("UTC").unwrap().fixed_offset_ms(), Some(0));
        assert_eq!(TimeZone::parse("Z").unwrap().fixed_offset_ms(), Some(0));
        assert_eq!(TimeZone::parse("GMT").unwrap().fixed_offset_ms(), Some(0));
    }

    #[test]
    fn test_parse_offset() {
        assert_eq!(TimeZone::parse("UTC+8").unwrap().fixed_offset_ms(), Some(8 * 3_600_000));
        assert_eq!(TimeZone::parse("UTC-11").unwrap().fixed_offset_ms(), Some(-11 * 3_600_000));
        assert_eq!(
            TimeZone::parse("utc+11:30").unwrap().fixed_offset_ms(),
            Some((11 * 60 + 30) * 60_000)
        );
    }

    #[test]
    fn test_label() {
        assert_eq!(TimeZone::LOCAL.label(), "LOCAL");
        assert_eq!(TimeZone::parse("UTC").unwrap().label(), "UTC0");
        assert_eq!(TimeZone::parse("UTC+8").unwrap().label(), "UTC+8");
        assert_eq!(TimeZone::parse("UTC-11").unwrap().label(), "UTC-11");
        assert_eq!(TimeZone::parse("UTC+11:30").unwrap().label(), "UTC+11:30");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(TimeZone::parse("UTC+25").is_err());
        assert!(TimeZone::parse("not a timezone").is_err());
    }

    #[test]
    fn test_millis_digits() {
        assert_eq!(millis_digits(0), *b"000");
        assert_eq!(millis_digits(7), *b"007");
        assert_eq!(millis_digits(999), *b"999");
    }

    #[test]
    fn test_cache_stable_within_second() {
        let mut cache = TimeCache::new(TimeZone::parse("UTC").unwrap());
        let a = cache.prefix(1_700_000_000_123).to_owned();
        let b = cache.prefix(1_700_000_000_456).to_owned();
        assert_eq!(a, b);
        let c = cache.prefix(1_700_000_001_000).to_owned();
        assert_ne!(a, c);
    }
}
