//! Steady-state leadership: accept vote accounting, contiguous commits,
//! the client command path, heartbeats and retries.

use std::collections::BTreeMap;

use rand::Rng;
use tracing::{debug, trace, warn};

use crate::ballot::{NodeId, SlotId};
use crate::error::PaxosError;
use crate::journal::Journal;
use crate::messages::{
    Accept, AcceptAck, AcceptResponse, Commit, Message, Prepare, RetransmitRequest,
};
use crate::node::{AcceptVotes, ClientReply, Committed, Outcome, PaxosNode, Role};
use crate::value::{CommandValue, Value};

pub(super) fn on_accept_response<J: Journal>(
    node: &mut PaxosNode<J>,
    now: u64,
    from: NodeId,
    response: AcceptResponse,
    rng: &mut impl Rng,
    out: &mut Outcome,
) -> Result<(), PaxosError> {
    let id = response.id();
    let (acks, nacks) = {
        let Some(entry) = node.state.accept_responses.get_mut(&id) else {
            trace!(%id, "dropping accept response for untracked slot");
            return Ok(());
        };
        entry.votes.insert(from, response);
        let acks = entry.votes.values().filter(|v| v.is_ack()).count();
        (acks, entry.votes.len() - acks)
    };

    if node.config.quorum_reached(nacks) {
        // A majority refused: some higher ballot owns this slot now.
        warn!(%id, nacks, "accept refused by a majority, backing down");
        let behind_peer = node
            .state
            .accept_responses
            .get(&id)
            .and_then(|entry| {
                entry
                    .votes
                    .iter()
                    .filter(|(_, vote)| !vote.is_ack())
                    .map(|(peer, vote)| (*peer, vote.progress().highest_committed.log_index))
                    .filter(|(_, committed)| {
                        *committed > node.state.progress.highest_committed.log_index
                    })
                    .max_by_key(|(_, committed)| *committed)
            });
        if let Some((peer, _)) = behind_peer {
            out.send(
                peer,
                Message::RetransmitRequest(RetransmitRequest {
                    from: node.node_id,
                    to: peer,
                    from_index: node.state.progress.highest_committed.log_index,
                }),
            );
        }
        node.backdown(now, rng, out);
        return Ok(());
    }

    if node.config.quorum_reached(acks) {
        try_commit(node, now, out)?;
    }
    Ok(())
}

/// Advance the committed watermark across every tracked slot that has a
/// majority of acks, strictly in log order. A slot with a majority waits
/// until the prefix below it closes. Progress is durable before the
/// commit announcement is queued.
pub(super) fn try_commit<J: Journal>(
    node: &mut PaxosNode<J>,
    now: u64,
    out: &mut Outcome,
) -> Result<(), PaxosError> {
    let mut advanced = false;
    loop {
        let next_index = node.state.progress.highest_committed.log_index + 1;
        let ready = node
            .state
            .accept_responses
            .first_key_value()
            .filter(|(id, entry)| {
                id.log_index == next_index
                    && node
                        .config
                        .quorum_reached(entry.votes.values().filter(|v| v.is_ack()).count())
            })
            .map(|(id, _)| *id);
        let Some(id) = ready else { break };
        let Some(entry) = node.state.accept_responses.remove(&id) else {
            break;
        };

        node.state.progress.highest_committed = id;
        debug!(%id, "slot committed");
        out.committed.push(Committed {
            id,
            value: entry.accept.value,
        });
        if let Some(command) = node.state.client_commands.remove(&id) {
            out.replies.push(ClientReply::Committed {
                msg_id: command.msg_id,
                id,
            });
        }
        advanced = true;
    }

    if advanced {
        node.save_progress()?;
        out.broadcast(Message::Commit(Commit {
            committed: node.state.progress.highest_committed,
            heartbeat: now,
        }));
    }
    Ok(())
}

/// The leader's client path: mint an accept for the next free slot under
/// the leader's epoch, self-accept durably, then fan out.
pub(super) fn on_command<J: Journal>(
    node: &mut PaxosNode<J>,
    now: u64,
    command: CommandValue,
    rng: &mut impl Rng,
    out: &mut Outcome,
) -> Result<(), PaxosError> {
    if node.role != Role::Leader {
        trace!(msg_id = command.msg_id, "command at non-leader");
        out.replies.push(ClientReply::NotLeader {
            msg_id: command.msg_id,
            node: node.node_id,
        });
        return Ok(());
    }

    let Some(epoch) = node.state.epoch else {
        return Err(PaxosError::MissingEpoch);
    };
    if node.state.progress.highest_promised > epoch {
        return Err(PaxosError::EpochOutrun {
            promised: node.state.progress.highest_promised,
            epoch,
        });
    }

    let base = node
        .state
        .accept_responses
        .last_key_value()
        .map_or(i64::MIN, |(id, _)| id.log_index)
        .max(node.state.progress.highest_committed.log_index);
    if base == i64::MAX {
        warn!(msg_id = command.msg_id, "log exhausted, refusing command");
        out.replies.push(ClientReply::LogExhausted {
            msg_id: command.msg_id,
        });
        return Ok(());
    }

    let id = SlotId::new(node.node_id, epoch, base + 1);
    let accept = Accept {
        id,
        value: Value::Command(command.clone()),
    };
    node.journal.accept(&accept)?;

    let mut votes = BTreeMap::new();
    votes.insert(
        node.node_id,
        AcceptResponse::Ack(AcceptAck {
            id,
            from: node.node_id,
            progress: node.state.progress,
        }),
    );
    node.state.client_commands.insert(id, command);
    node.state.accept_responses.insert(
        id,
        AcceptVotes {
            deadline: node.config.random_timeout(now, rng),
            accept: accept.clone(),
            votes,
        },
    );
    debug!(%id, "command proposed");
    out.broadcast(Message::Accept(accept));

    // A cluster of one commits on its own ack.
    try_commit(node, now, out)
}

/// Leader heartbeat: re-announce the committed watermark as evidence of
/// life.
pub(super) fn on_heartbeat<J: Journal>(node: &PaxosNode<J>, now: u64, out: &mut Outcome) {
    if node.role == Role::Leader {
        out.broadcast(Message::Commit(Commit {
            committed: node.state.progress.highest_committed,
            heartbeat: now,
        }));
    } else {
        trace!(role = ?node.role, "heartbeat tick ignored off-leader");
    }
}

/// Retry path for recoverers and leaders. Outstanding prepares are
/// rebroadcast wholesale; outstanding accepts retry individually once
/// their own deadline lapses, with the same id and value — a leader never
/// raises its ballot to retry.
pub(super) fn on_resend_timeout<J: Journal>(
    node: &mut PaxosNode<J>,
    now: u64,
    rng: &mut impl Rng,
    out: &mut Outcome,
) {
    if !node.state.prepare_responses.is_empty() {
        let outstanding: Vec<SlotId> = node
            .state
            .prepare_responses
            .iter()
            .filter(|(_, slot)| slot.is_some())
            .map(|(id, _)| *id)
            .collect();
        trace!(count = outstanding.len(), "retrying outstanding prepares");
        for id in outstanding {
            out.broadcast(Message::Prepare(Prepare { id }));
        }
    } else if !node.state.accept_responses.is_empty() {
        let due: Vec<SlotId> = node
            .state
            .accept_responses
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        trace!(count = due.len(), "retrying lapsed accepts");
        for id in due {
            let deadline = node.config.random_timeout(now, rng);
            if let Some(entry) = node.state.accept_responses.get_mut(&id) {
                out.broadcast(Message::Accept(entry.accept.clone()));
                entry.deadline = deadline;
            }
        }
    }
    node.reset_timeout(now, rng);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ballot::BallotNumber;
    use crate::messages::{AcceptNack, Event};
    use crate::node::Outbound;
    use crate::node::testutil::{follower, leader, rng};
    use crate::progress::Progress;

    fn ack_from(from: u64, id: SlotId) -> Event {
        Event::Message {
            from: NodeId(from),
            message: Message::AcceptAck(AcceptAck {
                id,
                from: NodeId(from),
                progress: Progress::default(),
            }),
        }
    }

    fn nack_from(from: u64, id: SlotId, progress: Progress) -> Event {
        Event::Message {
            from: NodeId(from),
            message: Message::AcceptNack(AcceptNack {
                id,
                from: NodeId(from),
                progress,
            }),
        }
    }

    #[test]
    fn command_is_journalled_and_broadcast() {
        let mut node = leader(1, 5, 7);
        let out = node
            .apply(10, Event::Command(CommandValue::new(7, &b"x"[..])), &mut rng())
            .unwrap();

        let expected_id = SlotId::new(NodeId(1), BallotNumber::new(5, NodeId(1)), 8);
        let [Outbound::Broadcast(Message::Accept(accept))] = out.outbound.as_slice() else {
            panic!("expected accept broadcast, got {:?}", out.outbound);
        };
        assert_eq!(accept.id, expected_id);
        assert_eq!(node.journal().accepted(8).unwrap().as_ref(), Some(accept));
    }

    #[test]
    fn majority_ack_commits_and_answers_client() {
        let mut node = leader(1, 5, 7);
        node.apply(10, Event::Command(CommandValue::new(7, &b"x"[..])), &mut rng())
            .unwrap();
        let id = SlotId::new(NodeId(1), BallotNumber::new(5, NodeId(1)), 8);

        let out = node.apply(20, ack_from(2, id), &mut rng()).unwrap();

        assert_eq!(node.progress().highest_committed, id);
        assert_eq!(
            out.committed,
            vec![Committed {
                id,
                value: Value::command(7, &b"x"[..])
            }]
        );
        assert_eq!(out.replies, vec![ClientReply::Committed { msg_id: 7, id }]);
        assert!(matches!(
            out.outbound.as_slice(),
            [Outbound::Broadcast(Message::Commit(_))]
        ));
    }

    #[test]
    fn commits_respect_log_order() {
        let mut node = leader(1, 5, 7);
        node.apply(10, Event::Command(CommandValue::new(1, &b"a"[..])), &mut rng())
            .unwrap();
        node.apply(11, Event::Command(CommandValue::new(2, &b"b"[..])), &mut rng())
            .unwrap();
        let first = SlotId::new(NodeId(1), BallotNumber::new(5, NodeId(1)), 8);
        let second = SlotId::new(NodeId(1), BallotNumber::new(5, NodeId(1)), 9);

        // Slot 9 gains its majority before slot 8: nothing commits yet.
        let out = node.apply(20, ack_from(2, second), &mut rng()).unwrap();
        assert!(out.committed.is_empty());
        assert_eq!(node.progress().highest_committed.log_index, 7);

        // Slot 8 closes the prefix; both commit in order.
        let out = node.apply(21, ack_from(2, first), &mut rng()).unwrap();
        let indexes: Vec<i64> = out.committed.iter().map(|c| c.id.log_index).collect();
        assert_eq!(indexes, vec![8, 9]);
        assert_eq!(node.progress().highest_committed, second);
    }

    #[test]
    fn majority_nack_backs_down_and_fails_clients() {
        let mut node = leader(1, 5, 7);
        node.apply(10, Event::Command(CommandValue::new(7, &b"x"[..])), &mut rng())
            .unwrap();
        let id = SlotId::new(NodeId(1), BallotNumber::new(5, NodeId(1)), 8);

        node.apply(20, nack_from(2, id, Progress::default()), &mut rng())
            .unwrap();
        let out = node
            .apply(21, nack_from(3, id, Progress::default()), &mut rng())
            .unwrap();

        assert_eq!(node.role(), Role::Follower);
        assert_eq!(out.replies, vec![ClientReply::NoLongerLeader { msg_id: 7 }]);
    }

    #[test]
    fn nack_majority_from_ahead_peer_requests_catchup() {
        let mut node = leader(1, 5, 7);
        node.apply(10, Event::Command(CommandValue::new(7, &b"x"[..])), &mut rng())
            .unwrap();
        let id = SlotId::new(NodeId(1), BallotNumber::new(5, NodeId(1)), 8);

        let ahead = Progress::new(
            BallotNumber::new(6, NodeId(2)),
            SlotId::new(NodeId(2), BallotNumber::new(6, NodeId(2)), 12),
        );
        node.apply(20, nack_from(2, id, ahead), &mut rng()).unwrap();
        let out = node
            .apply(21, nack_from(3, id, Progress::default()), &mut rng())
            .unwrap();

        assert!(matches!(
            out.outbound.as_slice(),
            [Outbound::Send {
                to: NodeId(2),
                message: Message::RetransmitRequest(RetransmitRequest { from_index: 7, .. })
            }]
        ));
        assert_eq!(node.role(), Role::Follower);
    }

    #[test]
    fn command_at_follower_is_redirected() {
        let mut node = follower(2);
        let out = node
            .apply(10, Event::Command(CommandValue::new(9, &b"x"[..])), &mut rng())
            .unwrap();

        assert_eq!(
            out.replies,
            vec![ClientReply::NotLeader {
                msg_id: 9,
                node: NodeId(2)
            }]
        );
        assert!(out.outbound.is_empty());
    }

    #[test]
    fn exhausted_log_refuses_commands() {
        let mut node = leader(1, 5, i64::MAX);
        let out = node
            .apply(10, Event::Command(CommandValue::new(9, &b"x"[..])), &mut rng())
            .unwrap();

        assert_eq!(out.replies, vec![ClientReply::LogExhausted { msg_id: 9 }]);
    }

    #[test]
    fn heartbeat_announces_watermark() {
        let mut node = leader(1, 5, 7);
        let out = node.apply(40, Event::HeartBeat, &mut rng()).unwrap();

        let [Outbound::Broadcast(Message::Commit(commit))] = out.outbound.as_slice() else {
            panic!("expected commit broadcast, got {:?}", out.outbound);
        };
        assert_eq!(commit.committed.log_index, 7);
        assert_eq!(commit.heartbeat, 40);

        let mut off_leader = follower(2);
        let out = off_leader.apply(40, Event::HeartBeat, &mut rng()).unwrap();
        assert!(out.is_quiet());
    }

    #[test]
    fn lapsed_accepts_are_retried_with_same_id() {
        let mut node = leader(1, 5, 7);
        node.apply(10, Event::Command(CommandValue::new(7, &b"x"[..])), &mut rng())
            .unwrap();
        let id = SlotId::new(NodeId(1), BallotNumber::new(5, NodeId(1)), 8);

        // Far enough in the future that both the node deadline and the
        // accept's own deadline have lapsed.
        let later = node.timeout().max(1_000);
        let out = node.apply(later, Event::CheckTimeout, &mut rng()).unwrap();

        let [Outbound::Broadcast(Message::Accept(accept))] = out.outbound.as_slice() else {
            panic!("expected accept retry, got {:?}", out.outbound);
        };
        assert_eq!(accept.id, id);
    }
}
