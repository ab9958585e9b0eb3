use crate::errors::Result;
use crate::op_id::OpId;
use crate::operation::OperationPayload;

/// The external apply pipeline a caller wires the coordinator to (spec §4.1
/// "invokes the application apply pipeline with the resulting OpId list",
/// §6). Mirrors the shape of `raft::StateMachine` in the teacher's raft
/// crate (`apply` / `last_flushed` / `wait_for_flush` / `snapshot` /
/// `restore`, see `pkg/datastore/src/meta/state_machine.rs`), adapted to
/// this crate's synchronous, thread-based concurrency model (spec §5) rather
/// than an async executor, and to batches of already-committed operations
/// rather than one call per index.
///
/// This crate does not provide an implementation: snapshotting and on-disk
/// layout are out of scope (spec §1 Non-goals). `AdvanceCommittedOpId` calls
/// `apply` once per newly committed operation, in ascending OpId order,
/// while still holding the coordinator's internal lock is NOT required —
/// implementations should not assume reentrancy into the coordinator from
/// within `apply`.
pub trait ApplyPipeline: Send {
    /// Applies a single committed operation. Errors are logged by the
    /// coordinator but do not roll back `AdvanceCommittedOpId`: once an
    /// OpId is committed it stays committed (spec §3 "Once an OpId is
    /// marked committed it is never un-marked") regardless of whether the
    /// downstream apply succeeded.
    fn apply(&self, op_id: OpId, payload: &OperationPayload) -> Result<()>;

    /// The highest OpId this pipeline has durably applied, used by `Start`
    /// to decide how far the coordinator needs to replay from the log
    /// (spec §4.1 "Start").
    fn last_flushed(&self) -> OpId;

    /// Blocks the caller until every `apply` call issued so far has been
    /// made durable. Used when shutting down cleanly.
    fn wait_for_flush(&self);
}

/// An [`ApplyPipeline`] that records every applied OpId in order, for use in
/// tests that need to assert on apply ordering without a real state machine
/// behind it.
#[cfg(test)]
pub struct RecordingApplyPipeline {
    applied: std::sync::Mutex<Vec<OpId>>,
}

#[cfg(test)]
impl RecordingApplyPipeline {
    pub fn new() -> Self {
        Self {
            applied: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn applied(&self) -> Vec<OpId> {
        self.applied.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Default for RecordingApplyPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl ApplyPipeline for RecordingApplyPipeline {
    fn apply(&self, op_id: OpId, _payload: &OperationPayload) -> Result<()> {
        self.applied.lock().unwrap().push(op_id);
        Ok(())
    }

    fn last_flushed(&self) -> OpId {
        self.applied.lock().unwrap().last().copied().unwrap_or(OpId::MIN)
    }

    fn wait_for_flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_pipeline_tracks_apply_order() {
        let pipeline = RecordingApplyPipeline::new();
        pipeline.apply(OpId::new(1, 1), &OperationPayload::NoOp).unwrap();
        pipeline.apply(OpId::new(1, 2), &OperationPayload::NoOp).unwrap();

        assert_eq!(pipeline.applied(), vec![OpId::new(1, 1), OpId::new(1, 2)]);
        assert_eq!(pipeline.last_flushed(), OpId::new(1, 2));
    }
}
