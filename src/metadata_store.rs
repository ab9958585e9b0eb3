use crate::config::Configuration;
use crate::errors::{Error, Result};
use crate::op_id::OpId;

/// The durable record the coordinator flushes on every transition that must
/// survive a crash (spec §4.3): `(current_term, voted_for, committed_config,
/// last_committed_op_id)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetadataRecord {
    pub current_term: i64,
    pub voted_for: Option<String>,
    pub committed_config: Configuration,
    pub last_committed_op_id: OpId,
}

/// Durable storage for [`MetadataRecord`] (spec §4.3). An external
/// collaborator: on-disk layout is out of scope for this subsystem (spec §1
/// Non-goals), so this crate only defines the interface the coordinator
/// depends on, plus an in-memory test double.
///
/// A flush failure is fatal to whichever coordinator transition triggered
/// it — the coordinator rolls back the in-memory change and surfaces
/// [`Error::Fatal`] rather than retrying internally (spec §4.1 "Failure
/// semantics").
pub trait ConsensusMetadataStore: Send {
    fn flush(&mut self, record: &MetadataRecord) -> Result<()>;

    /// Reads back the last durably flushed record, if any (spec §4.1
    /// "Start ... initializes last_committed_op_id from persisted
    /// metadata"). `None` means nothing has ever been flushed — a replica
    /// starting for the first time.
    fn load(&self) -> Result<Option<MetadataRecord>>;

    /// Current on-disk size of the metadata record, exposed for operator
    /// diagnostics (spec §6).
    fn on_disk_size(&self) -> u64;
}

/// An in-memory [`ConsensusMetadataStore`] — "durable" only for the lifetime
/// of the process, which is sufficient for embedding this crate in tests and
/// in callers that layer their own persistence underneath.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    record: Option<MetadataRecord>,
    flush_count: u64,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_flushed(&self) -> Option<&MetadataRecord> {
        self.record.as_ref()
    }

    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }
}

impl ConsensusMetadataStore for InMemoryMetadataStore {
    fn flush(&mut self, record: &MetadataRecord) -> Result<()> {
        self.record = Some(record.clone());
        self.flush_count += 1;
        Ok(())
    }

    fn load(&self) -> Result<Option<MetadataRecord>> {
        Ok(self.record.clone())
    }

    fn on_disk_size(&self) -> u64 {
        // A rough proxy for what a real encoding would occupy: enough to be
        // a meaningful diagnostic without depending on a wire format this
        // crate has no opinion on.
        self.record
            .as_ref()
            .map(|record| {
                16 + record.voted_for.as_ref().map_or(0, |v| v.len() as u64)
                    + record
                        .committed_config
                        .peers
                        .iter()
                        .map(|p| (p.uuid.len() + p.address.len()) as u64 + 9)
                        .sum::<u64>()
            })
            .unwrap_or(0)
    }
}

/// A [`ConsensusMetadataStore`] that fails every flush after `failures_left`
/// successful ones — used to exercise the coordinator's fatal-transition
/// rollback path (spec §4.1, §7).
pub struct FaultyMetadataStore {
    inner: InMemoryMetadataStore,
    failures_left: u64,
}

impl FaultyMetadataStore {
    pub fn failing_after(successful_flushes: u64) -> Self {
        Self {
            inner: InMemoryMetadataStore::new(),
            failures_left: successful_flushes,
        }
    }
}

impl ConsensusMetadataStore for FaultyMetadataStore {
    fn flush(&mut self, record: &MetadataRecord) -> Result<()> {
        if self.failures_left == 0 {
            return Err(Error::fatal("simulated metadata store write failure"));
        }
        self.failures_left -= 1;
        self.inner.flush(record)
    }

    fn load(&self) -> Result<Option<MetadataRecord>> {
        self.inner.load()
    }

    fn on_disk_size(&self) -> u64 {
        self.inner.on_disk_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_tracks_last_flush() {
        let mut store = InMemoryMetadataStore::new();
        assert_eq!(store.on_disk_size(), 0);

        store
            .flush(&MetadataRecord {
                current_term: 3,
                voted_for: Some("peer-a".to_string()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(store.flush_count(), 1);
        assert_eq!(store.last_flushed().unwrap().current_term, 3);
        assert!(store.on_disk_size() > 0);
    }

    #[test]
    fn faulty_store_fails_after_budget_exhausted() {
        let mut store = FaultyMetadataStore::failing_after(1);
        store.flush(&MetadataRecord::default()).unwrap();
        assert!(store.flush(&MetadataRecord::default()).is_err());
    }

    #[test]
    fn load_returns_none_before_first_flush_and_last_record_after() {
        let mut store = InMemoryMetadataStore::new();
        assert_eq!(store.load().unwrap(), None);

        let record = MetadataRecord {
            current_term: 7,
            voted_for: Some("peer-x".to_string()),
            ..Default::default()
        };
        store.flush(&record).unwrap();
        assert_eq!(store.load().unwrap(), Some(record));
    }
}
