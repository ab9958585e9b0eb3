use crate::op_id::OpId;

/// A peer's membership kind within a configuration (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerRole {
    Voter,
    NonVoter,
    Observer,
}

impl PeerRole {
    /// Only voters are counted towards the well-defined majority a
    /// configuration's invariant requires (spec §3).
    pub fn counts_for_majority(&self) -> bool {
        matches!(self, PeerRole::Voter)
    }
}

/// A single member of a Raft configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerRecord {
    pub uuid: String,
    pub address: String,
    pub role: PeerRole,
}

impl PeerRecord {
    pub fn new(uuid: impl Into<String>, address: impl Into<String>, role: PeerRole) -> Self {
        Self {
            uuid: uuid.into(),
            address: address.into(),
            role,
        }
    }
}

/// An ordered set of peers plus the OpId of the configuration-change
/// operation that introduced it (spec §3).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Configuration {
    pub opid: OpId,
    pub peers: Vec<PeerRecord>,
}

impl Configuration {
    pub fn new(opid: OpId, peers: Vec<PeerRecord>) -> Self {
        Self { opid, peers }
    }

    pub fn voter_count(&self) -> usize {
        self.peers.iter().filter(|p| p.role.counts_for_majority()).count()
    }

    /// Number of voters required to form a majority of this configuration.
    pub fn majority_size(&self) -> usize {
        self.voter_count() / 2 + 1
    }

    pub fn contains_voter(&self, uuid: &str) -> bool {
        self.peers
            .iter()
            .any(|p| p.uuid == uuid && p.role.counts_for_majority())
    }

    pub fn peer(&self, uuid: &str) -> Option<&PeerRecord> {
        self.peers.iter().find(|p| p.uuid == uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(uuid: &str, role: PeerRole) -> PeerRecord {
        PeerRecord::new(uuid, format!("{}:1234", uuid), role)
    }

    #[test]
    fn majority_counts_voters_only() {
        let config = Configuration::new(
            OpId::new(1, 1),
            vec![
                peer("a", PeerRole::Voter),
                peer("b", PeerRole::Voter),
                peer("c", PeerRole::Voter),
                peer("d", PeerRole::Observer),
            ],
        );
        assert_eq!(config.voter_count(), 3);
        assert_eq!(config.majority_size(), 2);
    }

    #[test]
    fn even_voter_count_rounds_up() {
        let config = Configuration::new(
            OpId::new(1, 1),
            vec![
                peer("a", PeerRole::Voter),
                peer("b", PeerRole::Voter),
                peer("c", PeerRole::Voter),
                peer("d", PeerRole::Voter),
            ],
        );
        assert_eq!(config.majority_size(), 3);
    }
}
