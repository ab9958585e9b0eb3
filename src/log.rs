use crate::errors::Result;
use crate::op_id::OpId;
use crate::operation::OperationPayload;

/// The external, durable write-ahead log this coordinator replicates on top
/// of (spec §4.1 "Start", §6). Persistence format, file layout and
/// replication transport are all out of scope for this subsystem (spec §1
/// Non-goals) — this trait only names the handful of calls
/// `ReplicaStateCoordinator` makes into the log layer.
pub trait ReplicatedLog: Send {
    /// The OpId of the last entry durably present in the log at startup,
    /// used to seed `Start` (spec §4.1).
    fn last_in_wal(&self) -> OpId;

    /// Durably appends `payload` at `op_id`, returning once the write is on
    /// disk (not necessarily replicated to any other peer). The coordinator
    /// calls this before a freshly accepted operation enters the pending
    /// queue.
    fn append(&mut self, op_id: OpId, payload: &OperationPayload) -> Result<()>;

    /// Truncates the log so that no entry with index greater than
    /// `last_retained.index` remains, mirroring `AbortOpsAfter` (spec
    /// §4.1, §4.2).
    fn truncate_after(&mut self, last_retained: OpId) -> Result<()>;
}

/// An in-memory [`ReplicatedLog`], sufficient for driving
/// `ReplicaStateCoordinator` in tests without a real on-disk log underneath.
#[cfg(test)]
pub struct InMemoryLog {
    entries: Vec<(OpId, OperationPayload)>,
}

#[cfg(test)]
impl InMemoryLog {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }
}

#[cfg(test)]
impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl ReplicatedLog for InMemoryLog {
    fn last_in_wal(&self) -> OpId {
        self.entries.last().map(|(id, _)| *id).unwrap_or(OpId::MIN)
    }

    fn append(&mut self, op_id: OpId, payload: &OperationPayload) -> Result<()> {
        self.entries.push((op_id, payload.clone()));
        Ok(())
    }

    fn truncate_after(&mut self, last_retained: OpId) -> Result<()> {
        self.entries.retain(|(id, _)| *id <= last_retained);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_truncate_after() {
        let mut log = InMemoryLog::new();
        log.append(OpId::new(1, 1), &OperationPayload::NoOp).unwrap();
        log.append(OpId::new(1, 2), &OperationPayload::NoOp).unwrap();
        log.append(OpId::new(1, 3), &OperationPayload::NoOp).unwrap();
        assert_eq!(log.last_in_wal(), OpId::new(1, 3));

        log.truncate_after(OpId::new(1, 1)).unwrap();
        assert_eq!(log.last_in_wal(), OpId::new(1, 1));
    }
}
