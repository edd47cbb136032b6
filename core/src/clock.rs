//! DTN clock
//!
//! Bundle timestamps count seconds since 2000-01-01T00:00:00 UTC rather
//! than the Unix epoch. The clock can be shifted, which is how the tests
//! drive expiration and auto-connect cadence deterministically.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds between the Unix epoch and the DTN epoch (2000-01-01).
pub const DTN_EPOCH_OFFSET: u64 = 946_684_800;

/// Monotonic-enough DTN timestamp source.
///
/// One instance is shared by the daemon's components; it is never a
/// global.
#[derive(Debug, Default)]
pub struct Clock {
    /// Shift in seconds applied on top of the wall clock.
    shift: AtomicI64,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            shift: AtomicI64::new(0),
        }
    }

    fn wall() -> i64 {
        let unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        unix as i64 - DTN_EPOCH_OFFSET as i64
    }

    /// Current DTN timestamp in seconds.
    pub fn now(&self) -> u64 {
        (Self::wall() + self.shift.load(Ordering::Relaxed)).max(0) as u64
    }

    /// Shift the clock so that `now()` returns `timestamp`.
    pub fn set(&self, timestamp: u64) {
        self.shift
            .store(timestamp as i64 - Self::wall(), Ordering::Relaxed);
    }

    /// Move the clock forward by `secs`.
    pub fn advance(&self, secs: u64) {
        self.shift.fetch_add(secs as i64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_pins_the_clock() {
        let clock = Clock::new();
        clock.set(1000);
        let now = clock.now();
        assert!((1000..=1001).contains(&now));
    }

    #[test]
    fn test_advance_moves_forward() {
        let clock = Clock::new();
        clock.set(500);
        clock.advance(30);
        let now = clock.now();
        assert!((530..=531).contains(&now));
    }

    #[test]
    fn test_default_is_near_wall_time() {
        let clock = Clock::new();
        // The DTN epoch is well in the past, so an unshifted clock reads
        // a large positive value.
        assert!(clock.now() > DTN_EPOCH_OFFSET / 2);
    }
}
