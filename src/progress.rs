//! The durable record every node carries: its highest promise and its
//! committed watermark.

use serde::{Deserialize, Serialize};

use crate::ballot::{BallotNumber, SlotId};

/// Durable progress. Both fields only ever move forward over a node's
/// lifetime, and the committed watermark's ballot never outruns the promise.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Progress {
    pub highest_promised: BallotNumber,
    pub highest_committed: SlotId,
}

impl Progress {
    #[must_use]
    pub const fn new(highest_promised: BallotNumber, highest_committed: SlotId) -> Self {
        Self {
            highest_promised,
            highest_committed,
        }
    }

    /// Whether `next` is a legal successor: promise and watermark both
    /// non-decreasing.
    #[must_use]
    pub fn permits(&self, next: &Progress) -> bool {
        next.highest_promised >= self.highest_promised
            && next.highest_committed.log_index >= self.highest_committed.log_index
    }
}
