//! Wire messages exchanged between cluster members, and the event type the
//! embedding runtime feeds into a node.

use serde::{Deserialize, Serialize};

use crate::ballot::{NodeId, SlotId};
use crate::progress::Progress;
use crate::value::{CommandValue, Value};

/// Phase 1 request: ask peers to promise away from lower ballots for one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Prepare {
    pub id: SlotId,
}

/// Phase 1 grant. Carries the responder's view so the proposer can run the
/// value-choice rule, and its heartbeat so probes can judge leader liveness.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PrepareAck {
    pub id: SlotId,
    pub from: NodeId,
    pub progress: Progress,
    pub highest_accepted_index: i64,
    pub leader_heartbeat: u64,
    pub accepted: Option<Accept>,
}

/// Phase 1 refusal: the responder holds a higher promise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PrepareNack {
    pub id: SlotId,
    pub from: NodeId,
    pub progress: Progress,
    pub highest_accepted_index: i64,
    pub leader_heartbeat: u64,
}

/// Phase 2 request: store `value` for the slot named by `id`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Accept {
    pub id: SlotId,
    pub value: Value,
}

/// Phase 2 grant: the value is durable at the responder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AcceptAck {
    pub id: SlotId,
    pub from: NodeId,
    pub progress: Progress,
}

/// Phase 2 refusal: a higher promise or an already-sealed slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AcceptNack {
    pub id: SlotId,
    pub from: NodeId,
    pub progress: Progress,
}

/// Leader's watermark announcement, doubling as its heartbeat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Commit {
    pub committed: SlotId,
    pub heartbeat: u64,
}

/// Ask a peer for everything above `from_index`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RetransmitRequest {
    pub from: NodeId,
    pub to: NodeId,
    pub from_index: i64,
}

/// Catch-up bundle: the responder's committed suffix, then anything it has
/// accepted above its watermark. Both in ascending slot order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RetransmitResponse {
    pub from: NodeId,
    pub to: NodeId,
    pub committed: Vec<Accept>,
    pub proposed: Vec<Accept>,
}

/// Everything that can arrive from a peer.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Message {
    Prepare(Prepare),
    PrepareAck(PrepareAck),
    PrepareNack(PrepareNack),
    Accept(Accept),
    AcceptAck(AcceptAck),
    AcceptNack(AcceptNack),
    Commit(Commit),
    RetransmitRequest(RetransmitRequest),
    RetransmitResponse(RetransmitResponse),
}

/// A recorded phase 1 vote.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PrepareResponse {
    Ack(PrepareAck),
    Nack(PrepareNack),
}

impl PrepareResponse {
    #[must_use]
    pub fn id(&self) -> SlotId {
        match self {
            PrepareResponse::Ack(a) => a.id,
            PrepareResponse::Nack(n) => n.id,
        }
    }

    #[must_use]
    pub fn progress(&self) -> &Progress {
        match self {
            PrepareResponse::Ack(a) => &a.progress,
            PrepareResponse::Nack(n) => &n.progress,
        }
    }

    #[must_use]
    pub fn leader_heartbeat(&self) -> u64 {
        match self {
            PrepareResponse::Ack(a) => a.leader_heartbeat,
            PrepareResponse::Nack(n) => n.leader_heartbeat,
        }
    }

    #[must_use]
    pub fn is_nack(&self) -> bool {
        matches!(self, PrepareResponse::Nack(_))
    }
}

/// A recorded phase 2 vote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AcceptResponse {
    Ack(AcceptAck),
    Nack(AcceptNack),
}

impl AcceptResponse {
    #[must_use]
    pub fn id(&self) -> SlotId {
        match self {
            AcceptResponse::Ack(a) => a.id,
            AcceptResponse::Nack(n) => n.id,
        }
    }

    #[must_use]
    pub fn progress(&self) -> &Progress {
        match self {
            AcceptResponse::Ack(a) => &a.progress,
            AcceptResponse::Nack(n) => &n.progress,
        }
    }

    #[must_use]
    pub fn is_ack(&self) -> bool {
        matches!(self, AcceptResponse::Ack(_))
    }
}

/// One input to the node's event processor. The runtime serializes these:
/// one at a time, no internal concurrency.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A wire message, tagged with the transport-level sender.
    Message { from: NodeId, message: Message },
    /// Periodic deadline check. The node reacts only if its own deadline
    /// has passed.
    CheckTimeout,
    /// Leader heartbeat tick.
    HeartBeat,
    /// A client command seeking a log slot.
    Command(CommandValue),
}
