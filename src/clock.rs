use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// The coarse, monotonic point in time leases are expressed in. `Instant`
/// already gives us the ordering and arithmetic spec §4.4 needs, so leases
/// hold it directly rather than a hand-rolled tick count.
pub type MonotonicTime = Instant;

/// A hybrid-time lease bound, expressed in physical microseconds since the
/// Unix epoch (spec §3 "physical microseconds").
pub type PhysicalMicros = u64;

pub fn physical_now_micros() -> PhysicalMicros {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as PhysicalMicros
}

/// A monotonic counter whose epoch is re-anchored whenever a new instance is
/// constructed, so deadlines stored as offsets from that anchor stay
/// comparable even though `Instant` itself has no stable zero across process
/// restarts (spec §4.6, §9 "restart-safe monotonic clock").
///
/// Deadlines are persisted as `Duration` offsets from `anchor`; on restart a
/// fresh `RestartSafeClock` is created and old offsets are simply no longer
/// reachable, which is the desired behavior: a request-id deadline from a
/// prior process incarnation cannot outlive that incarnation.
#[derive(Debug, Clone)]
pub struct RestartSafeClock {
    anchor: Instant,
}

impl RestartSafeClock {
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }

    /// Offset of "now" from this clock's anchor.
    pub fn elapsed(&self) -> Duration {
        self.anchor.elapsed()
    }

    /// Offset of a point `ttl` in the future from this clock's anchor —
    /// suitable for storing alongside a retryable-request entry.
    pub fn deadline_after(&self, ttl: Duration) -> Duration {
        self.elapsed() + ttl
    }

    pub fn is_past(&self, deadline: Duration) -> bool {
        self.elapsed() >= deadline
    }
}

impl Default for RestartSafeClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn deadlines_advance_with_elapsed_time() {
        let clock = RestartSafeClock::new();
        let deadline = clock.deadline_after(Duration::from_millis(5));
        assert!(!clock.is_past(deadline));
        sleep(Duration::from_millis(20));
        assert!(clock.is_past(deadline));
    }
}
