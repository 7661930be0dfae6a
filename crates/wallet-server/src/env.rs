//! Environment abstraction for deterministic testing.
//!
//! Decouples the driver from system resources (wall clock, randomness) so
//! tests can run it with a fixed clock and a seeded RNG.

use chrono::DateTime;

/// Layout of ledger timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Time and randomness as seen by the driver.
///
/// Implementations MUST use cryptographically secure entropy in production:
/// password salts and session IDs come from `random_bytes`.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Seconds since the Unix epoch.
    fn wall_clock_secs(&self) -> u64;

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Current UTC time as a ledger timestamp.
    fn timestamp(&self) -> String {
        format_timestamp(self.wall_clock_secs())
    }
}

/// Render Unix seconds as `YYYY-MM-DD HH:MM:SS` (UTC).
///
/// Out-of-range values render as the epoch.
pub fn format_timestamp(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(DateTime::UNIX_EPOCH)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_utc() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
        assert_eq!(format_timestamp(1_700_000_000), "2023-11-14 22:13:20");
    }

    #[test]
    fn out_of_range_is_epoch() {
        assert_eq!(format_timestamp(u64::MAX), "1970-01-01 00:00:00");
    }
}
