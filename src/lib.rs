//! Replica state coordinator for a Raft-based replication engine.
//!
//! Tracks term and role, the queue of operations accepted but not yet
//! committed, commit-index advancement under the "commit only in own term"
//! rule, voter configuration and majority computation, vote durability, the
//! dual (coarse-time / hybrid-time) leader-lease mechanism, and
//! retryable-request deduplication. Snapshotting, remote bootstrap, wire
//! front-ends and on-disk log/metadata formats are out of scope — this
//! crate defines the collaborator traits ([`log::ReplicatedLog`],
//! [`state_machine::ApplyPipeline`], [`metadata_store::ConsensusMetadataStore`])
//! those layers implement.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod leader_cache;
pub mod lease;
pub mod log;
pub mod metadata_store;
pub mod op_id;
pub mod operation;
pub mod pending_queue;
pub mod retryable_requests;
pub mod state_machine;

pub use coordinator::{CoordinatorOptions, CoordinatorStatus, ReplicaStateCoordinator, Role, State};
pub use errors::{Error, Result};
pub use op_id::OpId;
