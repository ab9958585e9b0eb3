use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::clock::RestartSafeClock;

const STATUS_BITS: u32 = 8;
const STATUS_MASK: u64 = (1 << STATUS_BITS) - 1;
const EXTRA_MAX: u64 = (1 << (64 - STATUS_BITS)) - 1;

/// The status half of the packed word (spec §4.5). Mirrors
/// [`crate::lease::LeaderLeaseStatus`] but as a plain, copy-everywhere tag
/// suitable for packing into an atomic's low bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CachedLeaderStatus {
    NoLeader = 0,
    NotLeader = 1,
    LeaderAndReady = 2,
    LeaderButOldLeaderMayHaveLease = 3,
    LeaderButOldLeaderLeaseNotYetExpired = 4,
}

impl CachedLeaderStatus {
    fn from_bits(bits: u64) -> Self {
        match bits {
            0 => CachedLeaderStatus::NoLeader,
            1 => CachedLeaderStatus::NotLeader,
            2 => CachedLeaderStatus::LeaderAndReady,
            3 => CachedLeaderStatus::LeaderButOldLeaderMayHaveLease,
            4 => CachedLeaderStatus::LeaderButOldLeaderLeaseNotYetExpired,
            other => panic!("corrupt leader status cache word: status bits {}", other),
        }
    }
}

/// A value read out of the cache: the packed `(status, extra)` word plus the
/// deadline at which a reader should stop trusting it without rechecking
/// under the coordinator's lock.
#[derive(Clone, Copy, Debug)]
pub struct LeaderStatusSnapshot {
    pub status: CachedLeaderStatus,
    /// The leader's current term when `status == LeaderAndReady`, or the
    /// remaining old-leader-lease micros for the two "may still hold lease"
    /// statuses. Unused (zero) for `NoLeader`/`NotLeader`.
    pub extra: u64,
    pub valid_until: Duration,
}

/// A lock-free, read-mostly snapshot of leadership status (spec §4.5), so
/// hot read paths (e.g. a front-end's query path) can test leadership
/// without contending on the coordinator's mutex.
///
/// `(status, extra)` is packed into one `AtomicU64` — status in the low 8
/// bits, extra in the remaining 56 — so a reader never observes a torn
/// combination of the two. `valid_until` is tracked in a second `AtomicU64`
/// as an offset from a [`RestartSafeClock`] anchor; a reader may in principle
/// observe it from a different refresh than the status word it just read,
/// but since `is_stale` is inherently a "recheck under the lock if in doubt"
/// signal rather than a correctness-critical value, that narrow race simply
/// means an occasional unnecessary recheck, never a missed one once the
/// writer's next refresh lands.
pub struct LeaderStatusCache {
    packed: AtomicU64,
    valid_until: AtomicU64,
    clock: RestartSafeClock,
}

impl LeaderStatusCache {
    pub fn new() -> Self {
        Self {
            packed: AtomicU64::new(CachedLeaderStatus::NoLeader as u64),
            valid_until: AtomicU64::new(0),
            clock: RestartSafeClock::new(),
        }
    }

    /// Overwrites the full word. Always called under the coordinator's lock
    /// whenever leadership or lease state changes (spec §4.5, §9 "writers do
    /// not partially update: every refresh writes the full word").
    pub fn refresh(&self, status: CachedLeaderStatus, extra: u64, valid_until: Duration) {
        assert!(extra <= EXTRA_MAX, "extra value does not fit in 56 bits");
        let word = (status as u64 & STATUS_MASK) | (extra << STATUS_BITS);
        self.packed.store(word, Ordering::Release);
        self.valid_until
            .store(valid_until.as_nanos().min(u64::MAX as u128) as u64, Ordering::Release);
    }

    pub fn load(&self) -> LeaderStatusSnapshot {
        let word = self.packed.load(Ordering::Acquire);
        let status = CachedLeaderStatus::from_bits(word & STATUS_MASK);
        let extra = word >> STATUS_BITS;
        let valid_until = Duration::from_nanos(self.valid_until.load(Ordering::Acquire));
        LeaderStatusSnapshot {
            status,
            extra,
            valid_until,
        }
    }

    /// True once `snapshot` is old enough that a caller should recheck under
    /// the coordinator's lock instead of trusting it.
    pub fn is_stale(&self, snapshot: &LeaderStatusSnapshot) -> bool {
        self.clock.elapsed() >= snapshot.valid_until
    }
}

impl Default for LeaderStatusCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_then_load_round_trips() {
        let cache = LeaderStatusCache::new();
        cache.refresh(CachedLeaderStatus::LeaderAndReady, 42, Duration::from_secs(60));

        let snapshot = cache.load();
        assert_eq!(snapshot.status, CachedLeaderStatus::LeaderAndReady);
        assert_eq!(snapshot.extra, 42);
        assert!(!cache.is_stale(&snapshot));
    }

    #[test]
    fn default_cache_reports_no_leader() {
        let cache = LeaderStatusCache::new();
        let snapshot = cache.load();
        assert_eq!(snapshot.status, CachedLeaderStatus::NoLeader);
        assert_eq!(snapshot.extra, 0);
    }

    #[test]
    fn stale_once_valid_until_has_passed() {
        let cache = LeaderStatusCache::new();
        cache.refresh(CachedLeaderStatus::LeaderAndReady, 7, Duration::from_nanos(1));
        std::thread::sleep(Duration::from_millis(5));
        let snapshot = cache.load();
        assert!(cache.is_stale(&snapshot));
    }
}
