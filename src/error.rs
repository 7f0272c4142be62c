//! Fatal error taxonomy. Protocol-benign conditions (stale votes,
//! duplicates, out-of-window messages) are logged and swallowed by the
//! handlers, never surfaced here.

use crate::ballot::BallotNumber;
use crate::progress::Progress;

/// Failure of the durable journal. Always fatal to the node: a message that
/// depends on an unflushed write must never leave the process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JournalError {
    /// The backing store failed to persist a write.
    #[error("durable write failed: {0}")]
    Storage(String),

    /// An attempt to save progress that moves backwards. Durable progress
    /// is monotone; a regression means corrupted state upstream.
    #[error("progress regression: {stored:?} -> {offered:?}")]
    Regression { stored: Progress, offered: Progress },
}

/// Errors the event processor can return. All of them halt the node; the
/// runtime should restart it from durable state.
#[derive(Debug, thiserror::Error)]
pub enum PaxosError {
    #[error(transparent)]
    Journal(#[from] JournalError),

    /// A leader observed its own promise above its epoch. The promise rule
    /// forces a backdown before this point, so reaching it is a bug.
    #[error("leader promise {promised} outran epoch {epoch}")]
    EpochOutrun {
        promised: BallotNumber,
        epoch: BallotNumber,
    },

    /// A leader-only event fired on a node with no epoch recorded.
    #[error("leader event without an epoch")]
    MissingEpoch,
}
