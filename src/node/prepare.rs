//! Phase 1 handling, shared by every role.

use rand::Rng;
use tracing::{debug, trace};

use crate::error::PaxosError;
use crate::journal::Journal;
use crate::messages::{Message, Prepare, PrepareAck, PrepareNack};
use crate::node::{Outcome, PaxosNode, Role};

/// The promise rule. A lower ballot is refused, an equal ballot is
/// re-granted without state change, and a higher ballot raises the promise
/// durably before the grant leaves the node. Granting a higher promise
/// forbids accepting under any earlier epoch, so the node drops to
/// follower no matter what it was doing.
pub(super) fn on_prepare<J: Journal>(
    node: &mut PaxosNode<J>,
    now: u64,
    prepare: Prepare,
    rng: &mut impl Rng,
    out: &mut Outcome,
) -> Result<(), PaxosError> {
    let id = prepare.id;
    let reply_to = id.from;
    let promised = node.state.progress.highest_promised;
    let highest_accepted_index = node.journal.bounds()?.max;

    if id.number < promised {
        trace!(%id, %promised, "refusing prepare below promise");
        out.send(
            reply_to,
            Message::PrepareNack(PrepareNack {
                id,
                from: node.node_id,
                progress: node.state.progress,
                highest_accepted_index,
                leader_heartbeat: node.state.leader_heartbeat,
            }),
        );
        return Ok(());
    }

    if id.number == promised {
        trace!(%id, "re-granting current promise");
        let accepted = node.journal.accepted(id.log_index)?;
        out.send(
            reply_to,
            Message::PrepareAck(PrepareAck {
                id,
                from: node.node_id,
                progress: node.state.progress,
                highest_accepted_index,
                leader_heartbeat: node.state.leader_heartbeat,
                accepted,
            }),
        );
        return Ok(());
    }

    // Higher ballot: promise durably, then grant, then step aside.
    node.state.progress.highest_promised = id.number;
    node.save_progress()?;
    debug!(%id, "promised higher ballot");

    let accepted = node.journal.accepted(id.log_index)?;
    out.send(
        reply_to,
        Message::PrepareAck(PrepareAck {
            id,
            from: node.node_id,
            progress: node.state.progress,
            highest_accepted_index,
            leader_heartbeat: node.state.leader_heartbeat,
            accepted,
        }),
    );
    let was = node.role;
    node.backdown(now, rng, out);
    if was != Role::Follower {
        trace!(%id, "higher promise forced backdown");
    }
    Ok(())
}
