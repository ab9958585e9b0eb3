use failure::Fail;

/// Error kinds surfaced by the coordinator's guarded entry points and state
/// transitions (spec §7).
///
/// `IllegalState` and `Expired` are expected to be recovered by the caller
/// (redirect to the believed leader, retry once the precondition changes).
/// `AlreadyPresent` is recovered locally by idempotent callers and usually
/// never escapes `ReplicaStateCoordinator`. `Fatal` means the in-memory
/// change was rolled back and the caller should step down.
#[derive(Debug, Fail)]
pub enum Error {
    /// A guarded entry point was called while the coordinator's `State` or
    /// `Role` did not satisfy its precondition.
    #[fail(display = "illegal state: {}", _0)]
    IllegalState(String),

    /// A malformed OpId, a non-monotonic index, a term regression on append,
    /// or an ill-formed configuration was supplied.
    #[fail(display = "invalid argument: {}", _0)]
    InvalidArgument(String),

    /// An idempotent vote or configuration-change was detected and resolved
    /// locally; carried as an error only so that callers who care can
    /// distinguish it from a freshly-accepted change.
    #[fail(display = "already present: {}", _0)]
    AlreadyPresent(String),

    /// A lease check rejected the request because the leader's lease has
    /// lapsed.
    #[fail(display = "lease expired")]
    Expired,

    /// A durable-store write failed during a state transition. The
    /// transition has been rolled back; the caller is expected to step down.
    #[fail(display = "fatal: {}", _0)]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn illegal_state<S: Into<String>>(msg: S) -> Self {
        Error::IllegalState(msg.into())
    }

    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn already_present<S: Into<String>>(msg: S) -> Self {
        Error::AlreadyPresent(msg.into())
    }

    pub fn fatal<S: Into<String>>(msg: S) -> Self {
        Error::Fatal(msg.into())
    }

    /// True for the two kinds client libraries are expected to retry against
    /// (possibly after redirecting to the believed leader).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::IllegalState(_) | Error::Expired)
    }
}
