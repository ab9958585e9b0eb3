use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use slog::Logger;

use crate::clock::{physical_now_micros, RestartSafeClock};
use crate::config::Configuration;
use crate::errors::{Error, Result};
use crate::leader_cache::{CachedLeaderStatus, LeaderStatusCache};
use crate::lease::{CoarseTimeLease, LeaderLeaseStatus, LeaseExtension, PhysicalComponentLease};
use crate::metadata_store::{ConsensusMetadataStore, MetadataRecord};
use crate::op_id::OpId;
use crate::operation::{OperationOutcome, OperationPayload, OperationRound, ReplicationStatus, SharedOperation};
use crate::pending_queue::PendingOperationsQueue;
use crate::retryable_requests::RetryableRequestsFilter;
use crate::state_machine::ApplyPipeline;

/// Lifecycle state of the coordinator itself, independent of Raft role (spec
/// §3). Transitions are one-way:
/// `Initialized -> Running -> ShuttingDown -> ShutDown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Initialized,
    Running,
    ShuttingDown,
    ShutDown,
}

/// This replica's Raft role (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
    Learner,
    NonParticipant,
}

/// Construction-time parameters for a [`ReplicaStateCoordinator`] (spec
/// §4.3), grounded on `MetastoreConfig` in
/// `pkg/datastore/src/meta/store.rs` — a plain struct of fixed parameters
/// passed by value into the constructor, no config-file parsing attached.
pub struct CoordinatorOptions {
    pub peer_uuid: String,
    pub tablet_id: String,
    pub retryable_request_window: Duration,
    pub coarse_lease_duration: Duration,
    pub ht_lease_duration_micros: u64,
}

/// Operator-visible snapshot of this replica's coordinator state (spec §6),
/// the shape an admin endpoint's status dump is built from.
#[derive(Clone, Debug)]
pub struct CoordinatorStatus {
    pub role: Role,
    pub term: i64,
    pub leader_uuid: Option<String>,
    pub last_received_op_id: OpId,
    pub committed_op_id: OpId,
    pub pending_config: Option<Configuration>,
    pub lease_status: LeaderLeaseStatus,
    pub lease_status_remaining: Option<Duration>,
    pub pending_operations_count: usize,
    pub retryable_request_count: usize,
    pub metadata_on_disk_size: u64,
}

/// A recorded request to trigger a leader election once the entry at a
/// given OpId commits (spec §3 "Pending election", §4.1 "AdvanceCommittedOpId").
/// The trigger itself is external (the surrounding consensus module's
/// election logic); the coordinator only remembers which index to watch for
/// and fires the callback once, with the lock released, when that index
/// commits.
struct PendingElection {
    op_id: OpId,
    trigger: Box<dyn FnOnce() + Send>,
}

struct Inner {
    state: State,
    role: Role,
    current_term: i64,
    voted_for_term: Option<(i64, String)>,
    current_leader_uuid: Option<String>,
    last_received_op_id: OpId,
    last_received_op_id_cur_leader: OpId,
    committed_op_id: OpId,
    majority_replicated_op_id: OpId,
    committed_config: Configuration,
    /// The not-yet-committed configuration change, if one is in flight (spec
    /// §3 invariant 4: exists only while its change-op is in `pending`).
    pending_config: Option<Configuration>,
    /// The OpId of the in-flight split-request entry, if any (spec §3).
    split_op_id: Option<OpId>,
    pending_election: Option<PendingElection>,
    pending: PendingOperationsQueue,
    retryable: RetryableRequestsFilter,
    old_leader_lease: CoarseTimeLease,
    old_leader_ht_lease: PhysicalComponentLease,
    local_lease: CoarseTimeLease,
    local_ht_lease: PhysicalComponentLease,
}

/// The Raft replication state coordinator (spec §1-§9): term/role tracking,
/// the pending-operations queue, commit-index advancement, configuration
/// management, the dual leader-lease mechanism and retryable-request
/// dedup, guarded by a single mutex and condvar (spec §5 "Parallel
/// threads"), grounded on the blocking wait-with-timeout shape in
/// `pkg/haystack/src/background_thread.rs`.
///
/// All mutation goes through the locked methods below; none of the
/// sub-types in [`crate::op_id`], [`crate::config`], [`crate::lease`] etc.
/// enforce cross-field invariants themselves; those invariants (index
/// monotonicity, commit monotonicity, "commit only in own term", vote
/// uniqueness per term) are enforced here, at the single seam where every
/// mutation passes through.
pub struct ReplicaStateCoordinator {
    options: CoordinatorOptions,
    logger: Logger,
    clock: RestartSafeClock,
    inner: Mutex<Inner>,
    majority_replicated_cv: Condvar,
    leader_cache: LeaderStatusCache,
    metadata_store: Mutex<Box<dyn ConsensusMetadataStore>>,
    apply_pipeline: Box<dyn ApplyPipeline>,
}

impl ReplicaStateCoordinator {
    pub fn new(
        options: CoordinatorOptions,
        logger: Logger,
        metadata_store: Box<dyn ConsensusMetadataStore>,
        apply_pipeline: Box<dyn ApplyPipeline>,
    ) -> Self {
        let logger = logger.new(slog::o!("peer" => options.peer_uuid.clone(), "tablet" => options.tablet_id.clone()));
        let retryable_window = options.retryable_request_window;
        Self {
            clock: RestartSafeClock::new(),
            inner: Mutex::new(Inner {
                state: State::Initialized,
                role: Role::Follower,
                current_term: 0,
                voted_for_term: None,
                current_leader_uuid: None,
                last_received_op_id: OpId::MIN,
                last_received_op_id_cur_leader: OpId::MIN,
                committed_op_id: OpId::MIN,
                majority_replicated_op_id: OpId::MIN,
                committed_config: Configuration::default(),
                pending_config: None,
                split_op_id: None,
                pending_election: None,
                pending: PendingOperationsQueue::new(),
                retryable: RetryableRequestsFilter::new(retryable_window),
                old_leader_lease: CoarseTimeLease::default(),
                old_leader_ht_lease: PhysicalComponentLease::default(),
                local_lease: CoarseTimeLease::default(),
                local_ht_lease: PhysicalComponentLease::default(),
            }),
            majority_replicated_cv: Condvar::new(),
            leader_cache: LeaderStatusCache::new(),
            metadata_store: Mutex::new(metadata_store),
            apply_pipeline,
            options,
            logger,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    fn require_state(&self, guard: &Inner, expected: State) -> Result<()> {
        if guard.state != expected {
            return Err(Error::illegal_state(format!(
                "expected state {:?}, found {:?}",
                expected, guard.state
            )));
        }
        Ok(())
    }

    fn require_running(&self, guard: &Inner) -> Result<()> {
        if guard.state != State::Running {
            return Err(Error::illegal_state(format!(
                "coordinator is not running (state {:?})",
                guard.state
            )));
        }
        Ok(())
    }

    // ---- LockForStart (spec §4.1) ----

    /// Initializes the coordinator from the log's last durable OpId and
    /// whatever consensus metadata survived a prior run (spec §4.1 "Start
    /// ... initializes last_committed_op_id from persisted metadata"). May
    /// only be called once, from `State::Initialized`.
    pub fn start(&self, last_in_wal: OpId) -> Result<()> {
        let mut guard = self.lock();
        self.require_state(&guard, State::Initialized)?;
        if let Some(record) = self.metadata_store.lock().unwrap().load()? {
            guard.current_term = record.current_term;
            guard.voted_for_term = record.voted_for.map(|uuid| (record.current_term, uuid));
            guard.committed_config = record.committed_config;
            guard.committed_op_id = record.last_committed_op_id;
        }
        guard.last_received_op_id = last_in_wal;
        guard.last_received_op_id_cur_leader = last_in_wal;
        guard.state = State::Running;
        slog::info!(
            self.logger, "coordinator started";
            "last_in_wal" => %last_in_wal, "term" => guard.current_term, "committed" => %guard.committed_op_id,
        );
        Ok(())
    }

    // ---- LockForRead (spec §4.1) ----

    pub fn current_term(&self) -> i64 {
        self.lock().current_term
    }

    pub fn role(&self) -> Role {
        self.lock().role
    }

    pub fn state(&self) -> State {
        self.lock().state
    }

    pub fn committed_op_id(&self) -> OpId {
        self.lock().committed_op_id
    }

    pub fn last_received_op_id(&self) -> OpId {
        self.lock().last_received_op_id
    }

    pub fn majority_replicated_op_id(&self) -> OpId {
        self.lock().majority_replicated_op_id
    }

    pub fn committed_config(&self) -> Configuration {
        self.lock().committed_config.clone()
    }

    pub fn pending_config(&self) -> Option<Configuration> {
        self.lock().pending_config.clone()
    }

    /// The configuration in effect for majority computations: the pending
    /// one if present, else the committed one (spec §3 "the active
    /// configuration").
    pub fn active_config(&self) -> Configuration {
        let guard = self.lock();
        guard.pending_config.clone().unwrap_or_else(|| guard.committed_config.clone())
    }

    pub fn split_op_id(&self) -> Option<OpId> {
        self.lock().split_op_id
    }

    pub fn pending_election_opid(&self) -> Option<OpId> {
        self.lock().pending_election.as_ref().map(|e| e.op_id)
    }

    pub fn current_leader_uuid(&self) -> Option<String> {
        self.lock().current_leader_uuid.clone()
    }

    pub fn pending_operations_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn retryable_request_count(&self) -> usize {
        self.lock().retryable.len()
    }

    /// Snapshot of everything spec §6 names as operator-visible state, for
    /// admin-endpoint status dumps. Bundles the individual `LockForRead`
    /// accessors above plus the metadata store's on-disk size so a caller
    /// building a diagnostics page only takes the lock once.
    pub fn status_dump(&self) -> CoordinatorStatus {
        let lease_status = self.leader_lease_status();
        let lease_remaining = match lease_status {
            LeaderLeaseStatus::LeaderButOldLeaderMayHaveLease { remaining }
            | LeaderLeaseStatus::LeaderButOldLeaderLeaseNotYetExpired { remaining } => Some(remaining),
            _ => None,
        };
        let guard = self.lock();
        CoordinatorStatus {
            role: guard.role,
            term: guard.current_term,
            leader_uuid: guard.current_leader_uuid.clone(),
            last_received_op_id: guard.last_received_op_id,
            committed_op_id: guard.committed_op_id,
            pending_config: guard.pending_config.clone(),
            lease_status,
            lease_status_remaining: lease_remaining,
            pending_operations_count: guard.pending.len(),
            retryable_request_count: guard.retryable.len(),
            metadata_on_disk_size: self.metadata_store.lock().unwrap().on_disk_size(),
        }
    }

    // ---- Term and vote durability (spec §4.1, §7) ----

    /// Advances `current_term` to `new_term`, flushing the change before
    /// returning (spec §3 "Vote durability"). A term may only move
    /// forward.
    pub fn set_current_term(&self, new_term: i64) -> Result<()> {
        let mut guard = self.lock();
        self.require_running(&guard)?;
        if new_term <= guard.current_term {
            return Err(Error::invalid_argument(format!(
                "term {} does not advance current term {}",
                new_term, guard.current_term
            )));
        }

        // Build the prospective record and flush it before touching `guard`
        // so a flush failure leaves in-memory state exactly as it was (spec
        // §7 "the transition is rolled back").
        let record = MetadataRecord {
            current_term: new_term,
            voted_for: None,
            committed_config: guard.committed_config.clone(),
            last_committed_op_id: guard.committed_op_id,
        };
        self.flush_metadata(&record)?;

        let previous = guard.current_term;
        guard.current_term = new_term;
        guard.voted_for_term = None;
        guard.last_received_op_id_cur_leader = OpId::MIN;
        guard.current_leader_uuid = None;
        slog::info!(self.logger, "term advanced"; "from" => previous, "to" => new_term);
        Ok(())
    }

    /// Records a vote for `candidate_uuid` in `term`, flushing before
    /// granting (spec §3 "at most one vote per term, persisted before
    /// ack"). Returns `Error::AlreadyPresent` if this replica already voted
    /// for the same candidate in the same term (idempotent retry), or
    /// `Error::IllegalState` if it already voted for someone else.
    pub fn set_voted_for_current_term(&self, term: i64, candidate_uuid: &str) -> Result<()> {
        let mut guard = self.lock();
        self.require_running(&guard)?;
        if term != guard.current_term {
            return Err(Error::invalid_argument(format!(
                "vote term {} does not match current term {}",
                term, guard.current_term
            )));
        }
        if let Some((voted_term, ref voted_uuid)) = guard.voted_for_term {
            if voted_term == term {
                if voted_uuid == candidate_uuid {
                    return Err(Error::already_present(format!(
                        "already voted for {} in term {}",
                        candidate_uuid, term
                    )));
                }
                return Err(Error::illegal_state(format!(
                    "already voted for {} in term {}",
                    voted_uuid, term
                )));
            }
        }

        let record = MetadataRecord {
            current_term: guard.current_term,
            voted_for: Some(candidate_uuid.to_string()),
            committed_config: guard.committed_config.clone(),
            last_committed_op_id: guard.committed_op_id,
        };
        self.flush_metadata(&record)?;

        guard.voted_for_term = Some((term, candidate_uuid.to_string()));
        slog::info!(self.logger, "vote granted"; "term" => term, "candidate" => candidate_uuid);
        Ok(())
    }

    /// Flushes an already-built prospective record. Callers must construct
    /// `record` from the state they intend to commit to and call this
    /// *before* mutating `Inner`, so a `Fatal` result leaves the in-memory
    /// state untouched rather than needing to be unwound (spec §7).
    fn flush_metadata(&self, record: &MetadataRecord) -> Result<()> {
        self.metadata_store
            .lock()
            .unwrap()
            .flush(record)
            .map_err(|e| {
                slog::error!(self.logger, "metadata flush failed, transition rolled back"; "error" => %e);
                Error::fatal(format!("metadata flush failed: {}", e))
            })
    }

    // ---- LockForReplicate / pending queue (spec §4.1, §4.2) ----

    /// The OpId the next call to [`Self::add_pending_operation`] must use
    /// (spec §4.1 "AddPendingOperation": index equal to
    /// `last_received_op_id.index + 1`, term equal to `current_term`). A
    /// caller proposing a new leader-originated entry reads this, builds
    /// its payload, and passes the result back in.
    pub fn next_op_id(&self) -> OpId {
        let guard = self.lock();
        OpId::new(guard.current_term, guard.last_received_op_id.index + 1)
    }

    /// Appends a freshly accepted operation to the pending queue at
    /// `op_id`, registering it for retry deduplication when it carries a
    /// client request id (spec §4.2, §4.6). Requires `state = Running` and
    /// `role = leader` (`LockForReplicate`, spec §4.1). `op_id` is taken
    /// from the caller and validated rather than trusted: anything other
    /// than `(current_term, last_received_op_id.index + 1)` fails with
    /// `InvalidArgument` (spec §8 "Appending at any index other than
    /// current+1 fails").
    pub fn add_pending_operation(
        &self,
        op_id: OpId,
        payload: OperationPayload,
        client_request_id: Option<String>,
        callback: crate::operation::CompletionCallback,
    ) -> Result<SharedOperation> {
        let mut guard = self.lock();
        self.require_running(&guard)?;
        if guard.role != Role::Leader {
            return Err(Error::illegal_state(
                "pending operations may only be appended by the leader",
            ));
        }
        if payload.is_config_change() && guard.pending_config.is_some() {
            return Err(Error::illegal_state(
                "a configuration change is already pending",
            ));
        }
        let expected_index = guard.last_received_op_id.index + 1;
        if op_id.index != expected_index || op_id.term != guard.current_term {
            return Err(Error::invalid_argument(format!(
                "op id {} does not extend the pending queue at index {} in term {}",
                op_id, expected_index, guard.current_term
            )));
        }

        let round = OperationRound::new(op_id, payload, client_request_id.clone(), callback);

        // A duplicate request id is resolved locally: the freshly built
        // round above is discarded (never appended, so its index is simply
        // reused by the next call) and the caller observes the original
        // round instead (spec §4.6).
        if let Some(request_id) = client_request_id {
            if let Err(existing) = guard.retryable.register(request_id, round.clone()) {
                return Ok(existing);
            }
        }

        round.set_status(ReplicationStatus::Appended);
        if let Some(config) = round.payload.as_config_change() {
            guard.pending_config = Some(config.clone());
        }
        if round.payload.is_split() {
            guard.split_op_id = Some(op_id);
        }
        guard.pending.push_back(round.clone());
        guard.last_received_op_id = op_id;
        guard.last_received_op_id_cur_leader = op_id;

        Ok(round)
    }

    /// Removes every pending operation with index greater than `keep_through`
    /// and aborts them in descending order (spec §4.1 "AbortOpsAfter", §4.2).
    /// Used when a new leader's term forces local entries to be discarded.
    pub fn abort_ops_after(&self, keep_through: i64) -> Result<()> {
        let mut guard = self.lock();
        self.require_lock_for_update(&guard)?;
        let removed = guard.pending.truncate_after(keep_through);
        let new_last = guard
            .pending
            .back()
            .map(|op| op.op_id)
            .unwrap_or_else(|| guard.committed_op_id.with_index(keep_through));
        guard.last_received_op_id = new_last;

        // An aborted entry can no longer commit, so any bookkeeping that
        // pointed at it must be cleared along with it (spec §3 invariant 4,
        // §4.1 "Resets split_op_id if its entry was aborted").
        for op in &removed {
            if op.payload.is_config_change() {
                if guard.pending_config.as_ref().map(|c| c.opid) == Some(op.op_id) {
                    guard.pending_config = None;
                }
            }
            if guard.split_op_id == Some(op.op_id) {
                guard.split_op_id = None;
            }
            if guard.pending_election.as_ref().map(|e| e.op_id) == Some(op.op_id) {
                guard.pending_election = None;
            }
        }
        drop(guard);

        for op in removed {
            if let Some(request_id) = op.client_request_id.clone() {
                self.lock().retryable.mark_resolved(&request_id);
            }
            op.complete(OperationOutcome::Aborted);
        }
        self.lock().retryable.evict_expired();
        Ok(())
    }

    // ---- Commit tracking (spec §4.1, §3 "commit only in own term") ----

    /// Records the highest OpId a majority of voters have replicated, then
    /// chooses a new commit index and advances it (spec §4.1
    /// "UpdateMajorityReplicated", leader only).
    ///
    /// The candidate is the greatest OpId in the pending queue that is both
    /// `<= majority_replicated` and whose term equals `current_term` — the
    /// "commit only in own term" rule (spec §3, §8 scenario C): a leader
    /// never commits a legacy entry from an earlier term on its own, only as
    /// a side effect of a later own-term entry committing alongside it. If no
    /// such entry exists the commit index is left untouched.
    pub fn update_majority_replicated(&self, majority_replicated: OpId) -> Result<()> {
        let candidate = {
            let mut guard = self.lock();
            self.require_running(&guard)?;
            if guard.role != Role::Leader {
                return Err(Error::illegal_state(
                    "majority-replicated updates only apply to the leader",
                ));
            }
            if majority_replicated > guard.majority_replicated_op_id {
                guard.majority_replicated_op_id = majority_replicated;
            }

            let current_term = guard.current_term;
            let mut candidate = None;
            let mut index = guard.committed_op_id.index + 1;
            while let Some(op) = guard.pending.lookup(index) {
                if op.op_id.index > majority_replicated.index {
                    break;
                }
                if op.op_id.term == current_term {
                    candidate = Some(op.op_id);
                }
                index += 1;
            }
            candidate
        };

        if let Some(candidate) = candidate {
            self.advance_committed_op_id(candidate, false)?;
        }
        Ok(())
    }

    /// Advances the commit index to `new_committed`, provided it does not
    /// regress and — the "commit only in own term" rule (spec §3) — that
    /// this replica is leader in the term of `new_committed` (a leader may
    /// only directly commit entries from its own term; earlier-term entries
    /// commit only as a side effect of a later entry committing).
    ///
    /// Invokes the apply pipeline once per newly committed operation, in
    /// ascending order, and fires each operation's completion callback with
    /// `OperationOutcome::Committed`. `could_stop` mirrors spec §4.1: once
    /// `new_committed` reaches the tail of a configuration-change entry that
    /// drops this replica, the caller may choose to finish committing and
    /// then shut down rather than continue serving.
    pub fn advance_committed_op_id(&self, new_committed: OpId, could_stop: bool) -> Result<bool> {
        let mut guard = self.lock();
        self.require_running(&guard)?;

        if new_committed <= guard.committed_op_id {
            return Ok(false);
        }
        if guard.role == Role::Leader && new_committed.term != guard.current_term {
            return Err(Error::illegal_state(
                "a leader may only commit entries from its own term",
            ));
        }

        // Compute the prospective committed configuration and flush it
        // before mutating anything: a failed flush must leave `guard`
        // exactly as it was (spec §7 "the transition is rolled back"), and
        // `pending_election`'s trigger isn't `Clone`, so a peek-then-commit
        // order is used instead of a mutate-then-rollback one.
        let peeked = guard.pending.peek_committed_through(new_committed.index);
        let mut prospective_config = guard.committed_config.clone();
        for op in &peeked {
            if let Some(config) = op.payload.as_config_change() {
                prospective_config = config.clone();
            }
        }
        let record = MetadataRecord {
            current_term: guard.current_term,
            voted_for: guard.voted_for_term.as_ref().map(|(_, uuid)| uuid.clone()),
            committed_config: prospective_config,
            last_committed_op_id: new_committed,
        };
        self.flush_metadata(&record)?;

        // Flush succeeded: commit to the in-memory mutation. A
        // configuration transition from pending to committed persists
        // atomically with the commit-index advance that triggered it (spec
        // §5 "Ordering guarantees").
        guard.committed_op_id = new_committed;
        let committed = guard.pending.drain_committed_through(new_committed.index);

        let mut dropped_self = false;
        for op in &committed {
            if let Some(config) = op.payload.as_config_change() {
                if guard.pending_config.as_ref().map(|c| c.opid) == Some(op.op_id) {
                    guard.pending_config = None;
                }
                guard.committed_config = config.clone();
                if !config.contains_voter(&self.options.peer_uuid) {
                    dropped_self = true;
                }
            }
        }

        // "When the entry at pending_election_opid is committed, a leader
        // election must be triggered" (spec §3, §4.1): fire once the watched
        // index has committed, then clear the field.
        let election_trigger = if guard
            .pending_election
            .as_ref()
            .map_or(false, |election| election.op_id <= new_committed)
        {
            guard.pending_election.take().map(|election| election.trigger)
        } else {
            None
        };

        drop(guard);

        for op in &committed {
            if let Err(e) = self.apply_pipeline.apply(op.op_id, &op.payload) {
                slog::error!(self.logger, "apply pipeline failed"; "op_id" => %op.op_id, "error" => %e);
            }
        }

        self.majority_replicated_cv.notify_all();

        if let Some(trigger) = election_trigger {
            trigger();
        }

        for op in committed {
            if let Some(request_id) = op.client_request_id.clone() {
                self.lock().retryable.mark_resolved(&request_id);
            }
            op.complete(OperationOutcome::Committed(op.op_id));
        }
        self.lock().retryable.evict_expired();

        Ok(could_stop && dropped_self)
    }

    /// Records that a leader election should be triggered once the entry at
    /// `op_id` commits (spec §3 "Pending election"). Overwrites any
    /// previously recorded pending election without firing its trigger —
    /// callers are expected to only request one at a time per the
    /// surrounding consensus module's own preconditions.
    pub fn set_pending_election(&self, op_id: OpId, trigger: Box<dyn FnOnce() + Send>) -> Result<()> {
        let mut guard = self.lock();
        self.require_running(&guard)?;
        guard.pending_election = Some(PendingElection { op_id, trigger });
        Ok(())
    }

    // ---- Received-OpId bookkeeping (spec §4.1 "follower-side bookkeeping") ----

    fn require_lock_for_update(&self, guard: &Inner) -> Result<()> {
        self.require_running(guard)?;
        if guard.role != Role::Follower && guard.role != Role::Learner {
            return Err(Error::illegal_state(
                "last-received-op-id bookkeeping only applies to a follower or learner (LockForUpdate)",
            ));
        }
        Ok(())
    }

    pub fn update_last_received_op_id(&self, op_id: OpId) -> Result<()> {
        let mut guard = self.lock();
        self.require_lock_for_update(&guard)?;
        if op_id > guard.last_received_op_id {
            guard.last_received_op_id = op_id;
        }
        Ok(())
    }

    pub fn update_last_received_op_id_cur_leader(&self, op_id: OpId) -> Result<()> {
        let mut guard = self.lock();
        self.require_lock_for_update(&guard)?;
        if op_id > guard.last_received_op_id_cur_leader {
            guard.last_received_op_id_cur_leader = op_id;
        }
        if op_id > guard.last_received_op_id {
            guard.last_received_op_id = op_id;
        }
        Ok(())
    }

    // ---- Leader leases (spec §4.4, §4.5) ----

    /// Evaluates this replica's current standing to serve leader-only
    /// operations (spec §4.4 "lease status evaluation"). Refreshes the
    /// lock-free [`LeaderStatusCache`] before returning so subsequent reads
    /// can avoid the mutex.
    pub fn leader_lease_status(&self) -> LeaderLeaseStatus {
        self.leader_lease_status_at(Instant::now()).0
    }

    /// Same evaluation as [`Self::leader_lease_status`], but the caller
    /// supplies (and gets back) the monotonic `now` it used, so a caller
    /// that also needs `now` for a downstream decision reads the clock once
    /// rather than twice (spec §4.4 "passes current time through an
    /// in/out parameter").
    pub fn leader_lease_status_at(&self, now: Instant) -> (LeaderLeaseStatus, Instant) {
        let now_micros = physical_now_micros();
        let mut guard = self.lock();

        guard.old_leader_lease.reset_if_passed(now);
        guard.old_leader_ht_lease.reset_if_passed(now_micros);

        let status = if guard.role != Role::Leader {
            if guard.current_leader_uuid.is_none() {
                LeaderLeaseStatus::NoLeader
            } else {
                LeaderLeaseStatus::NotLeader
            }
        } else if let Some(remaining) = guard.old_leader_lease.remaining(now) {
            LeaderLeaseStatus::LeaderButOldLeaderMayHaveLease { remaining }
        } else if let Some(remaining_micros) = guard.old_leader_ht_lease.remaining_micros(now_micros) {
            LeaderLeaseStatus::LeaderButOldLeaderLeaseNotYetExpired {
                remaining: Duration::from_micros(remaining_micros),
            }
        } else {
            LeaderLeaseStatus::LeaderAndReady
        };

        let (cached_status, extra, valid_until) = match status {
            LeaderLeaseStatus::NoLeader => (CachedLeaderStatus::NoLeader, 0, Duration::from_secs(0)),
            LeaderLeaseStatus::NotLeader => (CachedLeaderStatus::NotLeader, 0, Duration::from_secs(0)),
            LeaderLeaseStatus::LeaderAndReady => (
                CachedLeaderStatus::LeaderAndReady,
                guard.current_term as u64,
                guard
                    .local_lease
                    .remaining(now)
                    .unwrap_or_else(|| Duration::from_secs(0)),
            ),
            LeaderLeaseStatus::LeaderButOldLeaderMayHaveLease { remaining } => (
                CachedLeaderStatus::LeaderButOldLeaderMayHaveLease,
                remaining.as_micros().min(u64::MAX as u128) as u64,
                remaining,
            ),
            LeaderLeaseStatus::LeaderButOldLeaderLeaseNotYetExpired { remaining } => (
                CachedLeaderStatus::LeaderButOldLeaderLeaseNotYetExpired,
                remaining.as_micros().min(u64::MAX as u128) as u64,
                remaining,
            ),
        };
        self.leader_cache
            .refresh(cached_status, extra, self.clock.elapsed() + valid_until);

        (status, now)
    }

    /// True iff this replica is an active leader in good standing (spec
    /// §4.4 "CheckIsActiveLeaderAndHasLease"): `LeaderAndReady`, no
    /// predecessor lease still outstanding.
    pub fn check_is_active_leader_and_has_lease(&self) -> Result<()> {
        match self.leader_lease_status() {
            LeaderLeaseStatus::LeaderAndReady => Ok(()),
            LeaderLeaseStatus::NoLeader | LeaderLeaseStatus::NotLeader => {
                Err(Error::illegal_state("this replica is not the active leader"))
            }
            LeaderLeaseStatus::LeaderButOldLeaderMayHaveLease { .. }
            | LeaderLeaseStatus::LeaderButOldLeaderLeaseNotYetExpired { .. } => Err(Error::Expired),
        }
    }

    /// Extends the leases this replica holds as leader once `extension` has
    /// been acknowledged by a majority of voters (spec §4.4).
    ///
    /// `reset_coarse` and `reset_ht` independently force an unconditional
    /// clear of the corresponding predecessor lease record rather than the
    /// normal "advance if later" update — preserved from spec §9's open
    /// question on asymmetric resets: the two lease forms may need
    /// invalidating independently of one another, so the flags are plain,
    /// uncoupled booleans (see DESIGN.md).
    pub fn set_majority_replicated_lease_expiration(
        &self,
        extension: LeaseExtension,
        reset_coarse: bool,
        reset_ht: bool,
    ) -> Result<()> {
        let mut guard = self.lock();
        self.require_running(&guard)?;
        let peer_uuid = self.options.peer_uuid.clone();

        if reset_coarse {
            guard.local_lease.clear();
        } else {
            let deadline = Instant::now() + extension.remaining_coarse;
            guard.local_lease.advance(&peer_uuid, deadline);
        }

        if reset_ht {
            guard.local_ht_lease.clear();
        } else {
            let deadline_micros = physical_now_micros() + extension.remaining_ht_micros;
            guard.local_ht_lease.advance(&peer_uuid, deadline_micros);
        }

        self.majority_replicated_cv.notify_all();
        Ok(())
    }

    /// Blocks the calling thread until the hybrid-time lease majority has
    /// been replicated past `target_micros`, or `timeout` elapses (spec
    /// §4.1 "MajorityReplicatedHtLeaseExpiration"), grounded on the
    /// condvar-with-timeout wait in `pkg/haystack/src/background_thread.rs`.
    /// Returns `true` if the condition was observed before timing out.
    pub fn wait_for_majority_replicated_ht_lease_expiration(
        &self,
        target_micros: u64,
        timeout: Duration,
    ) -> bool {
        let mut guard = self.lock();
        let deadline = Instant::now() + timeout;
        loop {
            if guard
                .local_ht_lease
                .expiration_micros()
                .map_or(false, |e| e >= target_micros)
            {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next_guard, result) = self
                .majority_replicated_cv
                .wait_timeout(guard, deadline - now)
                .unwrap();
            guard = next_guard;
            if result.timed_out() {
                return guard
                    .local_ht_lease
                    .expiration_micros()
                    .map_or(false, |e| e >= target_micros);
            }
        }
    }

    // ---- Role transitions (spec §3 "Roles") ----

    /// follower -> candidate on election timeout (spec §3).
    pub fn become_candidate(&self) -> Result<()> {
        let mut guard = self.lock();
        self.require_running(&guard)?;
        if guard.role != Role::Follower {
            return Err(Error::illegal_state(format!(
                "cannot become candidate from role {:?}",
                guard.role
            )));
        }
        guard.role = Role::Candidate;
        slog::info!(self.logger, "became candidate"; "term" => guard.current_term);
        Ok(())
    }

    /// candidate -> leader on winning a majority of votes in the current
    /// term (spec §3). Seeds `last_received_op_id_current_leader` at the
    /// point of election, matching the reset `SetCurrentTerm` performs on
    /// every term change (spec §4.1).
    pub fn become_leader(&self) -> Result<()> {
        let mut guard = self.lock();
        self.require_running(&guard)?;
        if guard.role != Role::Candidate {
            return Err(Error::illegal_state(format!(
                "cannot become leader from role {:?}",
                guard.role
            )));
        }
        guard.role = Role::Leader;
        guard.current_leader_uuid = Some(self.options.peer_uuid.clone());
        guard.last_received_op_id_cur_leader = guard.last_received_op_id;
        let term = guard.current_term;
        drop(guard);
        slog::info!(self.logger, "became leader"; "term" => term);
        Ok(())
    }

    /// any role -> follower, on discovering a higher term or an append from
    /// a leader this replica was not already following (spec §3). `leader_uuid`
    /// is the newly discovered leader, if known to the caller.
    pub fn become_follower(&self, leader_uuid: Option<String>) -> Result<()> {
        let mut guard = self.lock();
        self.require_running(&guard)?;
        let previous = guard.role;
        guard.role = Role::Follower;
        guard.current_leader_uuid = leader_uuid.clone();
        drop(guard);
        slog::info!(self.logger, "became follower"; "from" => ?previous, "leader" => leader_uuid.as_deref().unwrap_or("unknown"));
        Ok(())
    }

    /// any role -> non_participant, once this replica is removed from the
    /// committed configuration (spec §3).
    pub fn become_non_participant(&self) -> Result<()> {
        let mut guard = self.lock();
        self.require_running(&guard)?;
        guard.role = Role::NonParticipant;
        slog::info!(self.logger, "became non-participant");
        Ok(())
    }

    /// Enters the replica as a learner (non-voting member catching up on the
    /// log) rather than the default follower role (spec §3).
    pub fn become_learner(&self) -> Result<()> {
        let mut guard = self.lock();
        self.require_running(&guard)?;
        guard.role = Role::Learner;
        Ok(())
    }

    // ---- Configuration changes (spec §4.1, §3) ----

    /// Begins a configuration change: appends a `ConfigChange` operation to
    /// the pending queue exactly like any other write (spec §4.1
    /// "LockForConfigChange"). The new configuration only takes effect once
    /// this operation commits (`advance_committed_op_id` installs it).
    pub fn begin_config_change(
        &self,
        new_config: Configuration,
        callback: crate::operation::CompletionCallback,
    ) -> Result<SharedOperation> {
        let op_id = {
            let guard = self.lock();
            self.require_running(&guard)?;
            if guard.role != Role::Leader {
                return Err(Error::illegal_state(
                    "configuration changes may only be proposed by the leader",
                ));
            }
            OpId::new(guard.current_term, guard.last_received_op_id.index + 1)
        };
        self.add_pending_operation(op_id, OperationPayload::ConfigChange(new_config), None, callback)
    }

    // ---- Shutdown (spec §4.1) ----

    /// Aborts every still-pending operation, in descending index order, and
    /// marks the coordinator `ShutDown`. Idempotent once shut down.
    pub fn cancel_pending_operations_and_shutdown(&self) {
        let mut guard = self.lock();
        if guard.state == State::ShutDown {
            return;
        }
        guard.state = State::ShuttingDown;
        // truncate_after(i64::MIN) removes every entry, since every real
        // index is greater than i64::MIN, in the descending order
        // CancelPendingOperations needs for abort callbacks.
        let removed = guard.pending.truncate_after(i64::MIN);
        guard.state = State::ShutDown;
        drop(guard);

        self.majority_replicated_cv.notify_all();
        for op in removed {
            if let Some(request_id) = op.client_request_id.clone() {
                self.lock().retryable.mark_resolved(&request_id);
            }
            op.complete(OperationOutcome::Aborted);
        }
        self.lock().retryable.evict_expired();
        slog::info!(self.logger, "coordinator shut down");
    }
}
