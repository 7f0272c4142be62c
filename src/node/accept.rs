//! Phase 2 handling, shared by every role.

use tracing::trace;

use crate::error::PaxosError;
use crate::journal::Journal;
use crate::messages::{Accept, AcceptAck, AcceptNack, Message};
use crate::node::{Outcome, PaxosNode};

/// The accept rule. Refuses ballots below the promise and slots at or
/// below the committed watermark (those are sealed; a second decision
/// would fork the log). Otherwise the value goes to the journal before the
/// acknowledgement goes anywhere.
pub(super) fn on_accept<J: Journal>(
    node: &mut PaxosNode<J>,
    accept: &Accept,
    out: &mut Outcome,
) -> Result<(), PaxosError> {
    let id = accept.id;
    let reply_to = id.from;

    if id.number < node.state.progress.highest_promised {
        trace!(%id, promised = %node.state.progress.highest_promised, "refusing accept below promise");
        out.send(
            reply_to,
            Message::AcceptNack(AcceptNack {
                id,
                from: node.node_id,
                progress: node.state.progress,
            }),
        );
        return Ok(());
    }

    if id.log_index <= node.state.progress.highest_committed.log_index {
        trace!(%id, "refusing accept for sealed slot");
        out.send(
            reply_to,
            Message::AcceptNack(AcceptNack {
                id,
                from: node.node_id,
                progress: node.state.progress,
            }),
        );
        return Ok(());
    }

    if id.number > node.state.progress.highest_promised {
        node.state.progress.highest_promised = id.number;
        node.save_progress()?;
    }
    node.journal.accept(accept)?;
    trace!(%id, "accepted");
    out.send(
        reply_to,
        Message::AcceptAck(AcceptAck {
            id,
            from: node.node_id,
            progress: node.state.progress,
        }),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ballot::{BallotNumber, NodeId, SlotId};
    use crate::messages::Event;
    use crate::node::Outbound;
    use crate::node::testutil::{follower, rng};
    use crate::value::Value;

    fn accept_at(counter: i64, from: u64, index: i64) -> Accept {
        Accept {
            id: SlotId::new(NodeId(from), BallotNumber::new(counter, NodeId(from)), index),
            value: Value::command(1, &b"v"[..]),
        }
    }

    fn deliver(node: &mut crate::node::PaxosNode<crate::journal::InMemoryJournal>, accept: Accept) -> Outcome {
        node.apply(
            0,
            Event::Message {
                from: accept.id.from,
                message: Message::Accept(accept),
            },
            &mut rng(),
        )
        .unwrap()
    }

    #[test]
    fn journals_then_acks() {
        let mut node = follower(1);
        let accept = accept_at(1, 2, 1);
        let out = deliver(&mut node, accept.clone());

        assert_eq!(node.journal().accepted(1).unwrap(), Some(accept));
        assert!(matches!(
            out.outbound.as_slice(),
            [Outbound::Send {
                to: NodeId(2),
                message: Message::AcceptAck(_)
            }]
        ));
    }

    #[test]
    fn raises_promise_for_higher_ballot() {
        let mut node = follower(1);
        deliver(&mut node, accept_at(4, 2, 1));

        assert_eq!(
            node.progress().highest_promised,
            BallotNumber::new(4, NodeId(2))
        );
    }

    #[test]
    fn nacks_below_promise() {
        let mut node = follower(1);
        deliver(&mut node, accept_at(4, 2, 1));

        let out = deliver(&mut node, accept_at(3, 3, 2));
        assert!(matches!(
            out.outbound.as_slice(),
            [Outbound::Send {
                to: NodeId(3),
                message: Message::AcceptNack(_)
            }]
        ));
        assert_eq!(node.journal().accepted(2).unwrap(), None);
    }

    #[test]
    fn duplicate_accept_keeps_one_copy_and_reacks() {
        let mut node = follower(1);
        let accept = accept_at(2, 2, 1);
        deliver(&mut node, accept.clone());
        let out = deliver(&mut node, accept.clone());

        assert_eq!(node.journal().accepted(1).unwrap(), Some(accept));
        assert_eq!(node.journal().bounds().unwrap().max, 1);
        assert!(matches!(
            out.outbound.as_slice(),
            [Outbound::Send {
                message: Message::AcceptAck(_),
                ..
            }]
        ));
    }

    #[test]
    fn nacks_sealed_slot() {
        let mut node = follower(1);
        // Seal slot 1 by committing it.
        let id = SlotId::new(NodeId(2), BallotNumber::new(1, NodeId(2)), 1);
        deliver(
            &mut node,
            Accept {
                id,
                value: Value::Noop,
            },
        );
        node.apply(
            0,
            Event::Message {
                from: NodeId(2),
                message: Message::Commit(crate::messages::Commit {
                    committed: id,
                    heartbeat: 1,
                }),
            },
            &mut rng(),
        )
        .unwrap();
        assert_eq!(node.progress().highest_committed, id);

        let out = deliver(&mut node, accept_at(9, 3, 1));
        assert!(matches!(
            out.outbound.as_slice(),
            [Outbound::Send {
                message: Message::AcceptNack(_),
                ..
            }]
        ));
    }
}
