//! Recoverer phase 1 bookkeeping: collecting promises per slot, choosing
//! values the Paxos way, and promoting to leader once every slot is closed.

use std::collections::BTreeMap;

use rand::Rng;
use tracing::{debug, trace};

use crate::ballot::{NodeId, SlotId};
use crate::error::PaxosError;
use crate::journal::Journal;
use crate::messages::{
    Accept, AcceptAck, AcceptResponse, Message, PrepareResponse, RetransmitRequest,
};
use crate::node::{AcceptVotes, Outcome, PaxosNode, Role};
use crate::value::Value;

pub(super) fn on_prepare_response<J: Journal>(
    node: &mut PaxosNode<J>,
    now: u64,
    from: NodeId,
    response: PrepareResponse,
    rng: &mut impl Rng,
    out: &mut Outcome,
) -> Result<(), PaxosError> {
    let id = response.id();
    let ours = node.state.progress.highest_committed.log_index;

    if response.progress().highest_committed.log_index > ours {
        debug!(peer = %from, "peer committed past us mid-recovery, catching up");
        out.send(
            from,
            Message::RetransmitRequest(RetransmitRequest {
                from: node.node_id,
                to: from,
                from_index: ours,
            }),
        );
        node.backdown(now, rng, out);
        return Ok(());
    }

    match node.state.prepare_responses.get_mut(&id) {
        None => {
            trace!(%id, "dropping prepare response for untracked slot");
            return Ok(());
        }
        Some(slot) => {
            if id.log_index <= ours {
                // Committed from under us; nothing left to recover here.
                *slot = None;
            } else if let Some(votes) = slot {
                votes.insert(from, response);
            } else {
                trace!(%id, "dropping prepare response for committed slot");
                return Ok(());
            }
        }
    }
    evaluate(node, now, rng, out)
}

enum SlotVerdict {
    Lost(SlotId),
    Chosen(SlotId, Value),
}

/// Resolve every slot that has reached a majority, lowest first. A single
/// refusal means some peer holds a higher promise and the whole recovery
/// is over; otherwise the slot's value is the one accepted under the
/// highest ballot any promiser reported, or a no-op for untouched slots.
pub(super) fn evaluate<J: Journal>(
    node: &mut PaxosNode<J>,
    now: u64,
    rng: &mut impl Rng,
    out: &mut Outcome,
) -> Result<(), PaxosError> {
    loop {
        let verdict = node.state.prepare_responses.iter().find_map(|(id, slot)| {
            let votes = slot.as_ref()?;
            if !node.config.quorum_reached(votes.len()) {
                return None;
            }
            if votes.values().any(PrepareResponse::is_nack) {
                return Some(SlotVerdict::Lost(*id));
            }
            let chosen = votes
                .values()
                .filter_map(|vote| match vote {
                    PrepareResponse::Ack(ack) => ack.accepted.as_ref(),
                    PrepareResponse::Nack(_) => None,
                })
                .max_by_key(|accept| accept.id.number)
                .map_or(Value::Noop, |accept| accept.value.clone());
            Some(SlotVerdict::Chosen(*id, chosen))
        });

        match verdict {
            None => break,
            Some(SlotVerdict::Lost(id)) => {
                debug!(%id, "promise refused mid-recovery, backing down");
                node.backdown(now, rng, out);
                return Ok(());
            }
            Some(SlotVerdict::Chosen(id, value)) => {
                let epoch = node.state.epoch.ok_or(PaxosError::MissingEpoch)?;
                let new_id = SlotId::new(node.node_id, epoch, id.log_index);
                let accept = Accept { id: new_id, value };
                node.journal.accept(&accept)?;
                node.state.prepare_responses.remove(&id);

                let mut votes = BTreeMap::new();
                votes.insert(
                    node.node_id,
                    AcceptResponse::Ack(AcceptAck {
                        id: new_id,
                        from: node.node_id,
                        progress: node.state.progress,
                    }),
                );
                node.state.accept_responses.insert(
                    new_id,
                    AcceptVotes {
                        deadline: node.config.random_timeout(now, rng),
                        accept: accept.clone(),
                        votes,
                    },
                );
                trace!(id = %new_id, "recovery accept issued");
                out.broadcast(Message::Accept(accept));
            }
        }
    }

    if node.role == Role::Recoverer
        && node
            .state
            .prepare_responses
            .values()
            .all(Option::is_none)
    {
        node.state.prepare_responses.clear();
        node.role = Role::Leader;
        debug!(node = %node.node_id, epoch = ?node.state.epoch, "recovery complete, leading");
    }

    // A cluster of one commits its own accepts immediately.
    super::replication::try_commit(node, now, out)
}
