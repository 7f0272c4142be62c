//! Commit handling: fast-forward delivery on the leader's word, gap
//! detection, and the return-to-follower rule for deposed leaders.

use rand::Rng;
use tracing::{debug, trace};

use crate::ballot::{BallotNumber, NodeId};
use crate::error::PaxosError;
use crate::journal::Journal;
use crate::messages::{Commit, Message, RetransmitRequest};
use crate::node::{Committed, Outcome, PaxosNode, Role};

pub(super) fn on_commit<J: Journal>(
    node: &mut PaxosNode<J>,
    now: u64,
    from: NodeId,
    commit: &Commit,
    rng: &mut impl Rng,
    out: &mut Outcome,
) -> Result<(), PaxosError> {
    match node.role {
        Role::Follower => {
            refresh_leader_evidence(node, now, commit, rng);
            fast_forward(node, from, commit, out)
        }
        Role::Recoverer | Role::Leader => {
            let ours = node.state.progress.highest_committed;
            let epoch = node.state.epoch.unwrap_or(BallotNumber::MIN);
            let deposed = commit.committed.log_index > ours.log_index
                || (commit.committed.log_index == ours.log_index
                    && commit.committed.number > epoch);
            if deposed {
                debug!(committed = %commit.committed, %epoch, "higher commit observed, stepping aside");
                node.state.leader_heartbeat = node.state.leader_heartbeat.max(commit.heartbeat);
                fast_forward(node, from, commit, out)?;
                node.backdown(now, rng, out);
            } else {
                trace!(committed = %commit.committed, "ignoring stale commit");
            }
            Ok(())
        }
    }
}

/// A fresher heartbeat, or a commit minted under a ballot above our
/// promise, is proof of a live leader: remember it, push the deadline out,
/// and abandon any liveness probe.
fn refresh_leader_evidence<J: Journal>(
    node: &mut PaxosNode<J>,
    now: u64,
    commit: &Commit,
    rng: &mut impl Rng,
) {
    let fresher = commit.heartbeat > node.state.leader_heartbeat;
    let new_epoch = commit.committed.number > node.state.progress.highest_promised;
    if fresher || new_epoch {
        if fresher {
            node.state.leader_heartbeat = commit.heartbeat;
        }
        node.state.prepare_responses.clear();
        node.reset_timeout(now, rng);
    }
}

/// Deliver every locally journalled accept in the committed range whose
/// ballot matches the committing leader's chain, in log order, stopping at
/// the first gap or foreign ballot. Anything missing is requested from the
/// committer.
fn fast_forward<J: Journal>(
    node: &mut PaxosNode<J>,
    from: NodeId,
    commit: &Commit,
    out: &mut Outcome,
) -> Result<(), PaxosError> {
    if commit.committed.log_index <= node.state.progress.highest_committed.log_index {
        trace!(committed = %commit.committed, "commit carries no new slots");
        return Ok(());
    }

    let mut advanced = false;
    let mut next = node.state.progress.highest_committed.log_index + 1;
    while next <= commit.committed.log_index {
        match node.journal.accepted(next)? {
            Some(accept) if accept.id.number == commit.committed.number => {
                node.state.progress.highest_committed = accept.id;
                out.committed.push(Committed {
                    id: accept.id,
                    value: accept.value,
                });
                advanced = true;
                next += 1;
            }
            _ => break,
        }
    }
    if advanced {
        node.save_progress()?;
        debug!(watermark = %node.state.progress.highest_committed, "fast-forwarded commits");
    }

    if node.state.progress.highest_committed.log_index < commit.committed.log_index {
        trace!(
            have = node.state.progress.highest_committed.log_index,
            want = commit.committed.log_index,
            "gap behind commit, requesting retransmission"
        );
        out.send(
            from,
            Message::RetransmitRequest(RetransmitRequest {
                from: node.node_id,
                to: from,
                from_index: node.state.progress.highest_committed.log_index,
            }),
        );
    }
    Ok(())
}
