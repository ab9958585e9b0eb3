use std::time::Duration;

use crate::clock::{MonotonicTime, PhysicalMicros};

/// A coarse, wall-clock lease record: `(issuing_peer_uuid,
/// expiration_monotonic_time)` (spec §4.4).
///
/// The same type backs both lease "forms" described in spec §3: as
/// `old_leader_lease` it is only ever advanced by
/// [`CoarseTimeLease::advance`] as new lease-extension claims arrive from a
/// leader; as the locally-held majority-replicated lease it is advanced by
/// the coordinator itself as peers acknowledge heartbeats.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoarseTimeLease {
    holder_uuid: Option<String>,
    expiration: Option<MonotonicTime>,
}

impl CoarseTimeLease {
    pub fn holder_uuid(&self) -> Option<&str> {
        self.holder_uuid.as_deref()
    }

    pub fn expiration(&self) -> Option<MonotonicTime> {
        self.expiration
    }

    /// Advances this record to `candidate` iff it is later than what is
    /// already recorded. Never decreases (spec invariant §3.5 / §8.5).
    pub fn advance(&mut self, holder_uuid: &str, candidate: MonotonicTime) {
        let should_replace = match self.expiration {
            Some(current) => candidate > current,
            None => true,
        };
        if should_replace {
            self.expiration = Some(candidate);
            self.holder_uuid = Some(holder_uuid.to_string());
        }
    }

    /// One-way "expired -> none" transition: clears the record once it is
    /// known to have passed. A no-op if the lease has not yet passed or is
    /// already clear.
    pub fn reset_if_passed(&mut self, now: MonotonicTime) {
        if let Some(expiration) = self.expiration {
            if now >= expiration {
                self.expiration = None;
                self.holder_uuid = None;
            }
        }
    }

    /// Unconditionally clears the record, regardless of whether it has
    /// passed. Used when a flag on `SetMajorityReplicatedLeaseExpiration`
    /// directs an unconditional reset (spec §4.4, §9 open question).
    pub fn clear(&mut self) {
        self.expiration = None;
        self.holder_uuid = None;
    }

    pub fn is_valid(&self, now: MonotonicTime) -> bool {
        matches!(self.expiration, Some(e) if now < e)
    }

    pub fn remaining(&self, now: MonotonicTime) -> Option<Duration> {
        self.expiration
            .filter(|e| *e > now)
            .map(|e| e - now)
    }
}

/// The hybrid-time analogue of [`CoarseTimeLease`]: `(issuing_peer_uuid,
/// expiration_physical_micros)` (spec §4.4).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PhysicalComponentLease {
    holder_uuid: Option<String>,
    expiration_micros: Option<PhysicalMicros>,
}

impl PhysicalComponentLease {
    pub fn holder_uuid(&self) -> Option<&str> {
        self.holder_uuid.as_deref()
    }

    pub fn expiration_micros(&self) -> Option<PhysicalMicros> {
        self.expiration_micros
    }

    pub fn advance(&mut self, holder_uuid: &str, candidate_micros: PhysicalMicros) {
        let should_replace = match self.expiration_micros {
            Some(current) => candidate_micros > current,
            None => true,
        };
        if should_replace {
            self.expiration_micros = Some(candidate_micros);
            self.holder_uuid = Some(holder_uuid.to_string());
        }
    }

    pub fn reset_if_passed(&mut self, now_micros: PhysicalMicros) {
        if let Some(expiration) = self.expiration_micros {
            if now_micros >= expiration {
                self.expiration_micros = None;
                self.holder_uuid = None;
            }
        }
    }

    pub fn clear(&mut self) {
        self.expiration_micros = None;
        self.holder_uuid = None;
    }

    pub fn is_valid(&self, now_micros: PhysicalMicros) -> bool {
        matches!(self.expiration_micros, Some(e) if now_micros < e)
    }

    pub fn remaining_micros(&self, now_micros: PhysicalMicros) -> Option<PhysicalMicros> {
        self.expiration_micros.filter(|e| *e > now_micros).map(|e| e - now_micros)
    }
}

/// A lease-extension claim as carried by an authenticated leader message
/// (spec §4.4 "remaining durations"). The receiver projects this into a
/// local absolute expiration (`now + remaining`) rather than trusting the
/// sender's clock directly.
#[derive(Clone, Copy, Debug)]
pub struct LeaseExtension {
    pub remaining_coarse: Duration,
    pub remaining_ht_micros: PhysicalMicros,
}

/// Result of [`crate::coordinator::ReplicaStateCoordinator::leader_lease_status`]
/// (spec §4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaderLeaseStatus {
    /// No leader is currently known for the active configuration.
    NoLeader,
    /// This replica is not the leader.
    NotLeader,
    /// This replica is leader, the predecessor's leases have passed, and its
    /// own majority-replicated leases are valid: reads and writes may
    /// proceed.
    LeaderAndReady,
    /// This replica is leader but a predecessor's coarse-time lease has not
    /// yet passed; it may still be serving reads.
    LeaderButOldLeaderMayHaveLease { remaining: Duration },
    /// This replica is leader but a predecessor's hybrid-time lease has not
    /// yet passed, even though the coarse-time lease has.
    LeaderButOldLeaderLeaseNotYetExpired { remaining: Duration },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn advance_only_moves_forward() {
        let mut lease = CoarseTimeLease::default();
        let base = Instant::now();
        lease.advance("peer-a", base + Duration::from_secs(5));
        assert_eq!(lease.expiration(), Some(base + Duration::from_secs(5)));

        // An earlier candidate must not move the lease backwards.
        lease.advance("peer-b", base + Duration::from_secs(1));
        assert_eq!(lease.expiration(), Some(base + Duration::from_secs(5)));
        assert_eq!(lease.holder_uuid(), Some("peer-a"));

        lease.advance("peer-c", base + Duration::from_secs(10));
        assert_eq!(lease.holder_uuid(), Some("peer-c"));
    }

    #[test]
    fn reset_if_passed_is_one_way() {
        let mut lease = CoarseTimeLease::default();
        let base = Instant::now();
        lease.advance("peer-a", base + Duration::from_millis(10));

        lease.reset_if_passed(base);
        assert!(lease.expiration().is_some(), "not yet passed, must not reset");

        lease.reset_if_passed(base + Duration::from_millis(20));
        assert!(lease.expiration().is_none(), "passed, must reset to none");
    }

    #[test]
    fn physical_component_lease_mirrors_coarse() {
        let mut lease = PhysicalComponentLease::default();
        lease.advance("peer-a", 1_000);
        lease.advance("peer-b", 500);
        assert_eq!(lease.expiration_micros(), Some(1_000));
        lease.advance("peer-c", 2_000);
        assert_eq!(lease.expiration_micros(), Some(2_000));
        assert_eq!(lease.holder_uuid(), Some("peer-c"));

        lease.reset_if_passed(2_000);
        assert!(lease.expiration_micros().is_none());
    }
}
