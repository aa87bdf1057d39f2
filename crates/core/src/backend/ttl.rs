//! TTL normalisation.
//!
//! memcached interprets expiration values above 30 days as absolute unix
//! timestamps. A TTL above that threshold is therefore re-expressed as
//! "now + ttl" before it reaches the wire.

use std::time::Duration;

/// Largest TTL memcached accepts as a relative duration (30 days).
pub const RELATIVE_TTL_LIMIT: u64 = 2_592_000;

/// Normalised expiry handed to storage engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Stored without expiry tracking.
    Never,
    /// Seconds from now.
    Relative(u32),
    /// Absolute unix timestamp.
    Absolute(i64),
}

impl Expiry {
    /// Normalise a TTL in seconds against the current unix time.
    pub fn from_ttl(ttl: u64, now: i64) -> Self {
        match ttl {
            0 => Expiry::Never,
            ttl if ttl > RELATIVE_TTL_LIMIT => Expiry::Absolute(now.saturating_add(ttl.min(i64::MAX as u64) as i64)),
            ttl => Expiry::Relative(ttl as u32),
        }
    }

    /// Normalise against the system clock.
    pub fn from_ttl_now(ttl: u64) -> Self {
        Self::from_ttl(ttl, chrono::Utc::now().timestamp())
    }

    /// The memcached `exptime` field.
    pub fn wire_value(self) -> u32 {
        match self {
            Expiry::Never => 0,
            Expiry::Relative(secs) => secs,
            Expiry::Absolute(ts) => ts.clamp(0, u32::MAX as i64) as u32,
        }
    }

    /// Absolute deadline in unix seconds, for engines that store one.
    pub fn deadline(self, now: i64) -> Option<i64> {
        match self {
            Expiry::Never => None,
            Expiry::Relative(secs) => Some(now + secs as i64),
            Expiry::Absolute(ts) => Some(ts),
        }
    }

    /// Remaining lifetime from `now`, for engines that track durations.
    pub fn remaining(self, now: i64) -> Option<Duration> {
        self.deadline(now).map(|deadline| Duration::from_secs(deadline.saturating_sub(now).max(0) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_zero_is_never() {
        assert_eq!(Expiry::from_ttl(0, NOW), Expiry::Never);
        assert_eq!(Expiry::Never.wire_value(), 0);
        assert_eq!(Expiry::Never.deadline(NOW), None);
    }

    #[test]
    fn test_short_ttl_stays_relative() {
        let expiry = Expiry::from_ttl(60, NOW);
        assert_eq!(expiry, Expiry::Relative(60));
        assert_eq!(expiry.wire_value(), 60);
        assert_eq!(expiry.deadline(NOW), Some(NOW + 60));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert_eq!(Expiry::from_ttl(RELATIVE_TTL_LIMIT, NOW), Expiry::Relative(2_592_000));
    }

    #[test]
    fn test_long_ttl_becomes_absolute() {
        let expiry = Expiry::from_ttl(2_592_001, NOW);
        assert_eq!(expiry, Expiry::Absolute(NOW + 2_592_001));
        assert_eq!(expiry.wire_value(), (NOW + 2_592_001) as u32);
        assert_eq!(expiry, Expiry::from_ttl(2_592_001, NOW));
    }

    #[test]
    fn test_remaining() {
        assert_eq!(Expiry::Relative(5).remaining(NOW), Some(Duration::from_secs(5)));
        assert_eq!(Expiry::Absolute(NOW - 10).remaining(NOW), Some(Duration::ZERO));
        assert_eq!(Expiry::Never.remaining(NOW), None);
    }
}
