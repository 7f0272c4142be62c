//! Ballot numbers, slot identifiers and the ordering rules that make
//! proposal rounds totally ordered across the cluster.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::messages::Prepare;

/// Identity of a cluster member. Fixed for the lifetime of the cluster.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Proposal-round ordering key — compared by `counter`, ties broken by the
/// proposing node's id, which makes ballots globally unique.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BallotNumber {
    pub counter: i64,
    pub node: NodeId,
}

impl BallotNumber {
    /// The lowest ballot any node can hold. Only the liveness-probe
    /// sentinel ever carries it on the wire.
    pub const MIN: Self = Self {
        counter: i64::MIN,
        node: NodeId(0),
    };

    #[must_use]
    pub const fn new(counter: i64, node: NodeId) -> Self {
        Self { counter, node }
    }
}

impl fmt::Display for BallotNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ballot({},{})", self.counter, self.node)
    }
}

/// Identifies one proposal for one slot of the log: the minting proposer,
/// the ballot it ran under, and the log position it decides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotId {
    pub from: NodeId,
    pub number: BallotNumber,
    pub log_index: i64,
}

impl SlotId {
    #[must_use]
    pub const fn new(from: NodeId, number: BallotNumber, log_index: i64) -> Self {
        Self {
            from,
            number,
            log_index,
        }
    }

    /// The liveness-probe sentinel: smallest possible ballot and log index.
    /// It can never win a promise, so peers answer it without state change.
    #[must_use]
    pub const fn probe(from: NodeId) -> Self {
        Self {
            from,
            number: BallotNumber::MIN,
            log_index: i64::MIN,
        }
    }

    /// Whether this id is the liveness-probe sentinel.
    #[must_use]
    pub const fn is_probe(&self) -> bool {
        self.log_index == i64::MIN
    }
}

impl PartialOrd for SlotId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SlotId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Log position dominates so slot maps iterate in log order.
        (self.log_index.cmp(&other.log_index))
            .then(self.number.cmp(&other.number))
            .then(self.from.cmp(&other.from))
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot({}@{})", self.log_index, self.number)
    }
}

/// Build the prepare messages a takeover needs: one per slot from just above
/// the committed watermark through one past the highest accepted slot, all
/// under a single fresh ballot. Yields at least one prepare. Saturates at
/// the last representable slot rather than wrapping past it.
#[must_use]
pub fn recover_prepares(
    node: NodeId,
    highest: BallotNumber,
    committed_index: i64,
    accepted_index: i64,
) -> Vec<Prepare> {
    let number = BallotNumber::new(highest.counter.saturating_add(1), node);
    let first = committed_index.saturating_add(1);
    let last = first.max(accepted_index.saturating_add(1));
    (first..=last)
        .map(|log_index| Prepare {
            id: SlotId::new(node, number, log_index),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ballot_orders_by_counter_then_node() {
        let low = BallotNumber::new(1, NodeId(9));
        let mid = BallotNumber::new(2, NodeId(1));
        let high = BallotNumber::new(2, NodeId(3));

        assert!(low < mid);
        assert!(mid < high);
        assert!(BallotNumber::MIN < low);
    }

    #[test]
    fn slot_orders_by_log_index_first() {
        let early = SlotId::new(NodeId(9), BallotNumber::new(9, NodeId(9)), 3);
        let late = SlotId::new(NodeId(1), BallotNumber::new(1, NodeId(1)), 4);

        assert!(early < late);
    }

    #[test]
    fn probe_sentinel_sorts_below_everything() {
        let probe = SlotId::probe(NodeId(2));
        let real = SlotId::new(NodeId(1), BallotNumber::new(0, NodeId(0)), 1);

        assert!(probe.is_probe());
        assert!(!real.is_probe());
        assert!(probe < real);
    }

    #[test]
    fn recover_prepares_yields_at_least_one() {
        let prepares = recover_prepares(NodeId(2), BallotNumber::new(4, NodeId(1)), 7, 7);

        assert_eq!(prepares.len(), 1);
        assert_eq!(prepares[0].id.log_index, 8);
        assert_eq!(prepares[0].id.number, BallotNumber::new(5, NodeId(2)));
    }

    #[test]
    fn recover_prepares_saturates_at_the_last_slot() {
        let prepares = recover_prepares(
            NodeId(2),
            BallotNumber::new(1, NodeId(1)),
            i64::MAX - 1,
            i64::MAX - 1,
        );

        assert_eq!(prepares.len(), 1);
        assert_eq!(prepares[0].id.log_index, i64::MAX);
    }

    #[test]
    fn recover_prepares_covers_through_one_past_accepted() {
        let prepares = recover_prepares(NodeId(3), BallotNumber::new(1, NodeId(3)), 2, 5);

        let indexes: Vec<i64> = prepares.iter().map(|p| p.id.log_index).collect();
        assert_eq!(indexes, vec![3, 4, 5, 6]);
        assert!(prepares.iter().all(|p| p.id.number.counter == 2));
    }
}
