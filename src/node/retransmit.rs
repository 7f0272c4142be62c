//! Catch-up: serving journal history to lagging peers and applying the
//! bundles they send back. This is the only way across a hole in the
//! local journal.

use tracing::{debug, trace};

use crate::error::PaxosError;
use crate::journal::Journal;
use crate::messages::{Message, RetransmitRequest, RetransmitResponse};
use crate::node::{Committed, Outcome, PaxosNode};

/// Serve everything above the requester's watermark: the committed range
/// first, then whatever is accepted but not yet committed here. Both runs
/// ascend; the committed run stops at the first hole so the requester
/// never sees a non-contiguous committed prefix.
pub(super) fn on_request<J: Journal>(
    node: &PaxosNode<J>,
    request: &RetransmitRequest,
    out: &mut Outcome,
) -> Result<(), PaxosError> {
    let watermark = node.state.progress.highest_committed.log_index;

    let mut committed = Vec::new();
    let mut index = request.from_index;
    while index < watermark {
        index += 1;
        match node.journal.accepted(index)? {
            Some(accept) => committed.push(accept),
            None => break,
        }
    }

    let mut proposed = Vec::new();
    let mut index = watermark;
    let top = node.journal.bounds()?.max;
    while index < top {
        index += 1;
        if let Some(accept) = node.journal.accepted(index)? {
            proposed.push(accept);
        }
    }

    debug!(
        to = %request.from,
        committed = committed.len(),
        proposed = proposed.len(),
        "serving retransmission"
    );
    out.send(
        request.from,
        Message::RetransmitResponse(RetransmitResponse {
            from: node.node_id,
            to: request.from,
            committed,
            proposed,
        }),
    );
    Ok(())
}

/// Apply a catch-up bundle. Committed entries extend the local prefix one
/// contiguous slot at a time and are delivered; proposed entries are only
/// journalled, and only when they are not below the local promise.
/// Progress is saved once, after the bundle.
pub(super) fn on_response<J: Journal>(
    node: &mut PaxosNode<J>,
    response: RetransmitResponse,
    out: &mut Outcome,
) -> Result<(), PaxosError> {
    let mut advanced = false;
    for accept in response.committed {
        let next = node.state.progress.highest_committed.log_index + 1;
        if accept.id.log_index < next {
            continue;
        }
        if accept.id.log_index > next {
            trace!(id = %accept.id, "retransmitted prefix has a gap, stopping");
            break;
        }
        node.journal.accept(&accept)?;
        node.state.progress.highest_committed = accept.id;
        out.committed.push(Committed {
            id: accept.id,
            value: accept.value,
        });
        advanced = true;
    }

    for accept in response.proposed {
        if accept.id.number >= node.state.progress.highest_promised
            && accept.id.log_index > node.state.progress.highest_committed.log_index
        {
            node.journal.accept(&accept)?;
        }
    }

    if advanced {
        node.save_progress()?;
        debug!(watermark = %node.state.progress.highest_committed, "caught up from retransmission");
    }
    Ok(())
}
