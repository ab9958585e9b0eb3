use std::cmp::Ordering;
use std::fmt;

/// Identifies a single log entry by `(term, index)`. Ordering is
/// lexicographic: term first, then index (spec §3, §9).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OpId {
    pub term: i64,
    pub index: i64,
}

impl OpId {
    pub const MIN: OpId = OpId { term: 0, index: 0 };

    pub fn new(term: i64, index: i64) -> Self {
        Self { term, index }
    }

    pub fn is_min(&self) -> bool {
        *self == Self::MIN
    }

    /// Returns the OpId one index past this one, in the same term.
    ///
    /// Used by `AddPendingOperation` to predict the next acceptable index and
    /// by `AbortOpsAfter` to recompute `last_received_op_id` after truncating
    /// the tail of the pending queue.
    pub fn next_index(&self) -> OpId {
        OpId {
            term: self.term,
            index: self.index + 1,
        }
    }

    pub fn with_index(&self, index: i64) -> OpId {
        OpId {
            term: self.term,
            index,
        }
    }
}

impl PartialOrd for OpId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpId {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.term, self.index).cmp(&(other.term, other.index))
    }
}

impl fmt::Debug for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.term, self.index)
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_lexicographically() {
        assert!(OpId::new(1, 100) < OpId::new(2, 1));
        assert!(OpId::new(2, 1) < OpId::new(2, 2));
        assert_eq!(OpId::new(2, 2), OpId::new(2, 2));
    }

    #[test]
    fn min_is_sentinel_zero() {
        assert!(OpId::MIN.is_min());
        assert_eq!(OpId::MIN, OpId::new(0, 0));
        assert!(OpId::new(0, 1) > OpId::MIN);
    }

    #[test]
    fn next_index_preserves_term() {
        let op = OpId::new(5, 10);
        assert_eq!(op.next_index(), OpId::new(5, 11));
    }

    proptest::proptest! {
        // OpId ordering must agree with the (term, index) tuple ordering the
        // spec defines it in terms of (spec §3, §9), for any pair of values.
        #[test]
        fn ordering_matches_term_then_index_tuple(
            t1 in 0i64..1000, i1 in 0i64..1000,
            t2 in 0i64..1000, i2 in 0i64..1000,
        ) {
            let a = OpId::new(t1, i1);
            let b = OpId::new(t2, i2);
            proptest::prop_assert_eq!(a.cmp(&b), (t1, i1).cmp(&(t2, i2)));
        }

        #[test]
        fn next_index_never_changes_term(t in 0i64..1000, i in 0i64..1000) {
            let op = OpId::new(t, i);
            proptest::prop_assert_eq!(op.next_index().term, t);
            proptest::prop_assert_eq!(op.next_index().index, i + 1);
        }
    }
}
