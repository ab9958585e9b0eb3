use std::collections::HashMap;
use std::time::Duration;

use crate::clock::RestartSafeClock;
use crate::op_id::OpId;
use crate::operation::SharedOperation;

struct Entry {
    op: SharedOperation,
    /// Set once the operation commits or aborts; the entry is evicted once
    /// `RestartSafeClock::elapsed()` passes this offset. `None` while the
    /// operation is still pending, so an in-flight write is never evicted
    /// out from under a retry.
    evict_after: Option<Duration>,
}

/// Suppresses duplicate client writes within a bounded time window (spec
/// §4.6).
///
/// A request id is tracked from the moment its operation is appended until
/// `window` after it resolves (commit or abort), so a client retry that
/// arrives shortly after the original committed still observes the original
/// outcome rather than being re-applied.
pub struct RetryableRequestsFilter {
    window: Duration,
    clock: RestartSafeClock,
    entries: HashMap<String, Entry>,
}

impl RetryableRequestsFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            clock: RestartSafeClock::new(),
            entries: HashMap::new(),
        }
    }

    /// Registers `request_id` as belonging to `op`. Returns the previously
    /// registered operation if `request_id` is already tracked (spec §4.6
    /// "rejects duplicates and returns the previous operation's result").
    pub fn register(
        &mut self,
        request_id: String,
        op: SharedOperation,
    ) -> Result<(), SharedOperation> {
        if let Some(existing) = self.entries.get(&request_id) {
            return Err(existing.op.clone());
        }
        self.entries.insert(
            request_id,
            Entry {
                op,
                evict_after: None,
            },
        );
        Ok(())
    }

    /// Called once an operation's outcome (commit or abort) is known; starts
    /// the eviction countdown for its request id rather than removing it
    /// immediately.
    pub fn mark_resolved(&mut self, request_id: &str) {
        if let Some(entry) = self.entries.get_mut(request_id) {
            entry.evict_after = Some(self.clock.deadline_after(self.window));
        }
    }

    /// Drops every entry whose eviction deadline has passed. Expected to be
    /// called periodically (e.g. alongside commit-index advancement) rather
    /// than on every lookup.
    pub fn evict_expired(&mut self) {
        let elapsed = self.clock.elapsed();
        self.entries
            .retain(|_, entry| entry.evict_after.map_or(true, |deadline| elapsed < deadline));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The lowest OpId among currently tracked requests, establishing how
    /// far back the log must be retained for retry suppression to keep
    /// working (spec §4.6).
    pub fn min_retryable_op_id(&self) -> Option<OpId> {
        self.entries.values().map(|entry| entry.op.op_id).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationRound;
    use std::thread::sleep;

    fn op(index: i64) -> SharedOperation {
        OperationRound::new(OpId::new(1, index), crate::operation::OperationPayload::NoOp, None, Box::new(|_| {}))
    }

    #[test]
    fn duplicate_register_returns_previous_operation() {
        let mut filter = RetryableRequestsFilter::new(Duration::from_secs(60));
        filter.register("req-1".to_string(), op(1)).unwrap();

        let dup = filter.register("req-1".to_string(), op(2));
        assert!(dup.is_err());
        assert_eq!(dup.unwrap_err().op_id.index, 1);
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn resolved_entries_age_out_after_window() {
        let mut filter = RetryableRequestsFilter::new(Duration::from_millis(5));
        filter.register("req-1".to_string(), op(1)).unwrap();
        filter.mark_resolved("req-1");

        filter.evict_expired();
        assert_eq!(filter.len(), 1, "not yet past the window");

        sleep(Duration::from_millis(20));
        filter.evict_expired();
        assert_eq!(filter.len(), 0);
    }

    #[test]
    fn unresolved_entries_never_evicted() {
        let mut filter = RetryableRequestsFilter::new(Duration::from_millis(1));
        filter.register("req-1".to_string(), op(1)).unwrap();
        sleep(Duration::from_millis(10));
        filter.evict_expired();
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn min_retryable_op_id_tracks_lowest() {
        let mut filter = RetryableRequestsFilter::new(Duration::from_secs(60));
        filter.register("req-2".to_string(), op(5)).unwrap();
        filter.register("req-1".to_string(), op(2)).unwrap();
        assert_eq!(filter.min_retryable_op_id(), Some(OpId::new(1, 2)));
    }
}
