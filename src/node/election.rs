//! Follower liveness probing and the takeover decision.
//!
//! A quiet follower does not immediately campaign: it first broadcasts a
//! sentinel prepare that cannot win anything, and peers answer with the
//! freshest leader heartbeat they have seen. Only when a majority of
//! answers shows no working leader does the follower raise a real ballot.

use std::collections::BTreeMap;

use rand::Rng;
use tracing::{debug, trace, warn};

use crate::ballot::{NodeId, SlotId, recover_prepares};
use crate::error::PaxosError;
use crate::journal::Journal;
use crate::messages::{Message, Prepare, PrepareAck, PrepareNack, PrepareResponse, RetransmitRequest};
use crate::node::{Outcome, PaxosNode, Role};

pub(super) fn on_timeout<J: Journal>(
    node: &mut PaxosNode<J>,
    now: u64,
    rng: &mut impl Rng,
    out: &mut Outcome,
) -> Result<(), PaxosError> {
    if node.state.prepare_responses.is_empty() {
        let id = SlotId::probe(node.node_id);
        let self_view = PrepareNack {
            id,
            from: node.node_id,
            progress: node.state.progress,
            highest_accepted_index: node.journal.bounds()?.max,
            leader_heartbeat: node.state.leader_heartbeat,
        };
        let mut votes = BTreeMap::new();
        votes.insert(node.node_id, PrepareResponse::Nack(self_view));
        node.state.prepare_responses.insert(id, Some(votes));
        out.broadcast(Message::Prepare(Prepare { id }));
        debug!(node = %node.node_id, "leader silent, probing for liveness");
    } else {
        for id in node.state.prepare_responses.keys().copied().collect::<Vec<_>>() {
            out.broadcast(Message::Prepare(Prepare { id }));
        }
        trace!(node = %node.node_id, "probe unanswered, rebroadcasting");
    }
    node.reset_timeout(now, rng);
    // A cluster of one answers its own probe.
    evaluate_probe(node, now, rng, out)
}

pub(super) fn on_probe_response<J: Journal>(
    node: &mut PaxosNode<J>,
    now: u64,
    from: NodeId,
    response: PrepareResponse,
    rng: &mut impl Rng,
    out: &mut Outcome,
) -> Result<(), PaxosError> {
    let id = response.id();
    if !id.is_probe() {
        trace!(%id, "dropping non-probe prepare response at follower");
        return Ok(());
    }

    let ours = node.state.progress.highest_committed.log_index;
    if response.progress().highest_committed.log_index > ours {
        debug!(peer = %from, "peer is ahead, catching up instead of probing");
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

    let Some(Some(votes)) = node.state.prepare_responses.get_mut(&id) else {
        trace!(%id, "dropping probe response with no probe outstanding");
        return Ok(());
    };
    votes.insert(from, response);
    evaluate_probe(node, now, rng, out)
}

enum ProbeVerdict {
    Pending,
    TakeOver,
    LeaderAlive(u64),
}

/// Once a majority has answered, weigh the heartbeat evidence: no fresh
/// heartbeat anywhere means the leader is gone; a majority-backed fresh
/// heartbeat means it is alive and we stand down; anything in between is
/// ambiguous and we risk a duel rather than halt.
fn evaluate_probe<J: Journal>(
    node: &mut PaxosNode<J>,
    now: u64,
    rng: &mut impl Rng,
    out: &mut Outcome,
) -> Result<(), PaxosError> {
    let local_heartbeat = node.state.leader_heartbeat;
    let quorum = node.config;
    let verdict = {
        let Some(Some(votes)) = node
            .state
            .prepare_responses
            .get(&SlotId::probe(node.node_id))
        else {
            return Ok(());
        };
        if !quorum.quorum_reached(votes.len()) {
            ProbeVerdict::Pending
        } else {
            let fresh: Vec<u64> = votes
                .values()
                .filter(|r| r.is_nack())
                .map(PrepareResponse::leader_heartbeat)
                .filter(|&heartbeat| heartbeat > local_heartbeat)
                .collect();
            if fresh.is_empty() {
                ProbeVerdict::TakeOver
            } else if quorum.quorum_reached(fresh.len() + 1) {
                ProbeVerdict::LeaderAlive(fresh.iter().copied().max().unwrap_or(local_heartbeat))
            } else {
                ProbeVerdict::TakeOver
            }
        }
    };

    match verdict {
        ProbeVerdict::Pending => Ok(()),
        ProbeVerdict::LeaderAlive(heartbeat) => {
            debug!(%heartbeat, "leader has a working majority, standing down");
            node.state.leader_heartbeat = heartbeat;
            node.backdown(now, rng, out);
            Ok(())
        }
        ProbeVerdict::TakeOver => take_over(node, now, rng, out),
    }
}

/// Raise a fresh ballot above everything we have seen, durably promise it
/// to ourselves, and prepare every slot from the committed watermark
/// through one past the highest accepted slot.
fn take_over<J: Journal>(
    node: &mut PaxosNode<J>,
    now: u64,
    rng: &mut impl Rng,
    out: &mut Outcome,
) -> Result<(), PaxosError> {
    let progress = node.state.progress;
    if progress.highest_committed.log_index == i64::MAX {
        // Every slot is decided; there is nothing left to propose.
        warn!(node = %node.node_id, "log exhausted, abandoning takeover");
        node.backdown(now, rng, out);
        return Ok(());
    }
    let highest = progress
        .highest_promised
        .max(progress.highest_committed.number);
    let bounds = node.journal.bounds()?;
    let prepares = recover_prepares(
        node.node_id,
        highest,
        progress.highest_committed.log_index,
        bounds.max,
    );
    let number = prepares[0].id.number;

    node.state.progress.highest_promised = number;
    node.save_progress()?;

    node.state.prepare_responses.clear();
    for prepare in &prepares {
        let self_vote = PrepareAck {
            id: prepare.id,
            from: node.node_id,
            progress: node.state.progress,
            highest_accepted_index: bounds.max,
            leader_heartbeat: node.state.leader_heartbeat,
            accepted: node.journal.accepted(prepare.id.log_index)?,
        };
        let mut votes = BTreeMap::new();
        votes.insert(node.node_id, PrepareResponse::Ack(self_vote));
        node.state.prepare_responses.insert(prepare.id, Some(votes));
    }
    node.state.epoch = Some(number);
    node.role = Role::Recoverer;
    debug!(node = %node.node_id, %number, slots = prepares.len(), "taking over as recoverer");

    for prepare in prepares {
        out.broadcast(Message::Prepare(prepare));
    }
    node.reset_timeout(now, rng);

    // A cluster of one already holds every promise it needs.
    super::recovery::evaluate(node, now, rng, out)
}
