use std::sync::{Arc, Mutex};

use crate::config::Configuration;
use crate::op_id::OpId;

/// Tagged variant over the kinds of entries this subsystem appends to the
/// log (spec §3, §9). The catalog-level entity kinds the glossary mentions
/// (Namespace, Table, Tablet) belong to the out-of-scope catalog layer and
/// are not represented here.
#[derive(Clone, Debug)]
pub enum OperationPayload {
    /// An application write; the coordinator does not interpret the bytes.
    Regular(Vec<u8>),
    /// A no-op, typically appended by a new leader to commit a "leader
    /// change" marker in its own term.
    NoOp,
    /// A membership change. Carries the configuration that would become
    /// committed if this entry commits.
    ConfigChange(Configuration),
    /// Requests that this Raft group be partitioned.
    Split,
    /// Marks a leadership change for downstream observers.
    LeaderChange,
}

impl OperationPayload {
    pub fn is_config_change(&self) -> bool {
        matches!(self, OperationPayload::ConfigChange(_))
    }

    pub fn is_split(&self) -> bool {
        matches!(self, OperationPayload::Split)
    }

    pub fn as_config_change(&self) -> Option<&Configuration> {
        match self {
            OperationPayload::ConfigChange(config) => Some(config),
            _ => None,
        }
    }
}

/// Replication status of a single pending operation (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicationStatus {
    Prepared,
    Appended,
    ReplicatedToMajority,
    Committed,
    Aborted,
}

/// What a completion callback observes once an operation leaves the pending
/// queue (spec §5 "Ordering guarantees").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationOutcome {
    Committed(OpId),
    Aborted,
}

pub type CompletionCallback = Box<dyn FnOnce(OperationOutcome) + Send>;

/// A single entry in the pending operations queue.
///
/// Held via [`SharedOperation`] (an `Arc`) rather than owned outright by the
/// queue: the source's smart-pointer-shared "consensus round" is expressed
/// here as shared ownership with the lifetime of the longest holder (spec
/// §9) — a caller that proposed the operation can keep its own handle to
/// inspect `status()` without the queue's removal invalidating it.
pub struct OperationRound {
    pub op_id: OpId,
    pub payload: OperationPayload,
    /// Present when this operation originated from a client write eligible
    /// for retry deduplication (spec §3, §4.6).
    pub client_request_id: Option<String>,
    status: Mutex<ReplicationStatus>,
    callback: Mutex<Option<CompletionCallback>>,
}

pub type SharedOperation = Arc<OperationRound>;

impl OperationRound {
    pub fn new(
        op_id: OpId,
        payload: OperationPayload,
        client_request_id: Option<String>,
        callback: CompletionCallback,
    ) -> SharedOperation {
        Arc::new(Self {
            op_id,
            payload,
            client_request_id,
            status: Mutex::new(ReplicationStatus::Prepared),
            callback: Mutex::new(Some(callback)),
        })
    }

    pub fn status(&self) -> ReplicationStatus {
        *self.status.lock().unwrap()
    }

    pub fn set_status(&self, status: ReplicationStatus) {
        *self.status.lock().unwrap() = status;
    }

    /// Invokes the completion callback exactly once, regardless of how many
    /// times `complete` is called or from which path (commit or abort) —
    /// spec §8 "Callback exclusivity". Subsequent calls are no-ops.
    pub fn complete(&self, outcome: OperationOutcome) {
        let callback = self.callback.lock().unwrap().take();
        self.set_status(match outcome {
            OperationOutcome::Committed(_) => ReplicationStatus::Committed,
            OperationOutcome::Aborted => ReplicationStatus::Aborted,
        });
        if let Some(callback) = callback {
            callback(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn complete_fires_callback_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let round = OperationRound::new(
            OpId::new(1, 1),
            OperationPayload::NoOp,
            None,
            Box::new(move |_| {
                calls2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        round.complete(OperationOutcome::Committed(OpId::new(1, 1)));
        round.complete(OperationOutcome::Aborted);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(round.status(), ReplicationStatus::Committed);
    }
}
