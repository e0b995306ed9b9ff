use lazy_static::lazy_static;
use std::time::{Duration, Instant, SystemTime};

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01).
/// For log annotation only; scheduling always uses `Instant`.
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Closed timelike curve, reality compromised")
        .as_secs()
}

/// Milliseconds elapsed on the process-wide monotonic clock. Used for wire
/// ping timestamps, which are 32-bit and wrap after ~49 days.
#[inline]
pub fn monotonic_ms() -> u64 {
    duration_ms(epoch().elapsed())
}

#[inline]
pub fn duration_ms(duration: Duration) -> u64 {
    duration.as_secs() * 1000 + u64::from(duration.subsec_millis())
}

lazy_static! {
    static ref EPOCH: Instant = Instant::now();
}

#[inline]
fn epoch() -> Instant {
    *EPOCH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_ms_is_nondecreasing() {
        let first = monotonic_ms();
        let second = monotonic_ms();
        assert!(second >= first);
    }

    #[test]
    fn test_duration_ms() {
        assert_eq!(duration_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_ms(Duration::from_secs(2)), 2000);
    }
}
