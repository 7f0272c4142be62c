//! The per-node state machine: role, in-memory vote tracking, and the
//! event dispatcher.
//!
//! A node is a pure event processor. The runtime hands it one event at a
//! time together with the current monotonic clock; the node mutates its own
//! state, performs any durable journal writes, and returns an [`Outcome`]
//! describing what to send, deliver and reply. No message ever appears in
//! an outcome before the journal write it depends on has returned.

mod accept;
mod commit;
mod election;
mod prepare;
mod recovery;
mod replication;
mod retransmit;

use std::collections::BTreeMap;

use rand::Rng;
use tracing::{debug, trace};

use crate::ballot::{BallotNumber, NodeId, SlotId};
use crate::config::Config;
use crate::error::PaxosError;
use crate::journal::Journal;
use crate::messages::{Accept, AcceptResponse, Event, Message, PrepareResponse};
use crate::progress::Progress;
use crate::value::Value;

/// The three operating modes of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Accepting, committing on the leader's word, watching for silence.
    Follower,
    /// Holds a majority of promises, still closing out recovery accepts.
    Recoverer,
    /// Recovery complete; streams accepts for client commands.
    Leader,
}

/// A message leaving the node. The transport may drop, duplicate or
/// reorder these freely.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Send { to: NodeId, message: Message },
    Broadcast(Message),
}

/// A slot decided and ready for the host, in log order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Committed {
    pub id: SlotId,
    pub value: Value,
}

/// Client-facing outcome for a submitted command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientReply {
    /// The command holds the named slot; the host's reply for that slot
    /// belongs to this client.
    Committed { msg_id: u64, id: SlotId },
    /// Submitted to a node that is not leading; retry elsewhere.
    NotLeader { msg_id: u64, node: NodeId },
    /// Leadership was lost with the command in flight. Outcome unknown.
    NoLongerLeader { msg_id: u64 },
    /// The log has no indexes left.
    LogExhausted { msg_id: u64 },
}

/// Everything one event produced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    pub outbound: Vec<Outbound>,
    pub committed: Vec<Committed>,
    pub replies: Vec<ClientReply>,
}

impl Outcome {
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.outbound.is_empty() && self.committed.is_empty() && self.replies.is_empty()
    }

    pub(crate) fn send(&mut self, to: NodeId, message: Message) {
        self.outbound.push(Outbound::Send { to, message });
    }

    pub(crate) fn broadcast(&mut self, message: Message) {
        self.outbound.push(Outbound::Broadcast(message));
    }
}

/// Outstanding accept round: the accept to resend, its retry deadline, and
/// the votes gathered so far.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct AcceptVotes {
    pub deadline: u64,
    pub accept: Accept,
    pub votes: BTreeMap<NodeId, AcceptResponse>,
}

/// Per-slot phase 1 vote tracking. `None` marks a slot discovered to be
/// already committed: it needs no accept round but still counts as resolved.
pub(crate) type PrepareVotes = BTreeMap<SlotId, Option<BTreeMap<NodeId, PrepareResponse>>>;

/// In-memory state. Everything here except `progress` is rebuilt from
/// scratch after a crash; `progress` mirrors the journal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct NodeState {
    pub progress: Progress,
    pub leader_heartbeat: u64,
    pub timeout: u64,
    pub prepare_responses: PrepareVotes,
    pub epoch: Option<BallotNumber>,
    pub accept_responses: BTreeMap<SlotId, AcceptVotes>,
    pub client_commands: BTreeMap<SlotId, crate::value::CommandValue>,
}

/// One cluster member's consensus state machine.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PaxosNode<J> {
    pub(crate) node_id: NodeId,
    pub(crate) config: Config,
    pub(crate) journal: J,
    pub(crate) role: Role,
    pub(crate) state: NodeState,
}

impl<J: Journal> PaxosNode<J> {
    /// Boot a node from its journal: follower role, progress rehydrated,
    /// fresh random timeout.
    ///
    /// # Errors
    ///
    /// Fails if the journal cannot be read.
    pub fn recover(
        node_id: NodeId,
        config: Config,
        journal: J,
        now: u64,
        rng: &mut impl Rng,
    ) -> Result<Self, PaxosError> {
        let progress = journal.load()?;
        let timeout = config.random_timeout(now, rng);
        debug!(%node_id, ?progress, "node recovered from journal");
        Ok(Self {
            node_id,
            config,
            journal,
            role: Role::Follower,
            state: NodeState {
                progress,
                leader_heartbeat: 0,
                timeout,
                prepare_responses: BTreeMap::new(),
                epoch: None,
                accept_responses: BTreeMap::new(),
                client_commands: BTreeMap::new(),
            },
        })
    }

    /// Process one event. `now` is a monotonic millisecond clock supplied
    /// by the runtime; `rng` feeds timeout jitter.
    ///
    /// # Errors
    ///
    /// Any error is fatal to this node: journal failure, or a broken
    /// leader invariant. The runtime should restart the node from durable
    /// state and must not use the partially-built outcome.
    pub fn apply(
        &mut self,
        now: u64,
        event: Event,
        rng: &mut impl Rng,
    ) -> Result<Outcome, PaxosError> {
        let mut out = Outcome::default();
        match event {
            Event::Message { from, message } => {
                self.on_message(now, from, message, rng, &mut out)?;
            }
            Event::CheckTimeout => {
                if now >= self.state.timeout {
                    match self.role {
                        Role::Follower => election::on_timeout(self, now, rng, &mut out)?,
                        Role::Recoverer | Role::Leader => {
                            replication::on_resend_timeout(self, now, rng, &mut out);
                        }
                    }
                }
            }
            Event::HeartBeat => replication::on_heartbeat(self, now, &mut out),
            Event::Command(command) => replication::on_command(self, now, command, rng, &mut out)?,
        }
        Ok(out)
    }

    fn on_message(
        &mut self,
        now: u64,
        from: NodeId,
        message: Message,
        rng: &mut impl Rng,
        out: &mut Outcome,
    ) -> Result<(), PaxosError> {
        match message {
            Message::Prepare(prepare) => prepare::on_prepare(self, now, prepare, rng, out)?,
            Message::Accept(accept) => accept::on_accept(self, &accept, out)?,
            Message::PrepareAck(ack) => {
                self.on_prepare_response(now, from, PrepareResponse::Ack(ack), rng, out)?;
            }
            Message::PrepareNack(nack) => {
                self.on_prepare_response(now, from, PrepareResponse::Nack(nack), rng, out)?;
            }
            Message::AcceptAck(ack) => {
                self.on_accept_response(now, from, AcceptResponse::Ack(ack), rng, out)?;
            }
            Message::AcceptNack(nack) => {
                self.on_accept_response(now, from, AcceptResponse::Nack(nack), rng, out)?;
            }
            Message::Commit(commit) => commit::on_commit(self, now, from, &commit, rng, out)?,
            Message::RetransmitRequest(request) => retransmit::on_request(self, &request, out)?,
            Message::RetransmitResponse(response) => {
                retransmit::on_response(self, response, out)?;
            }
        }
        Ok(())
    }

    fn on_prepare_response(
        &mut self,
        now: u64,
        from: NodeId,
        response: PrepareResponse,
        rng: &mut impl Rng,
        out: &mut Outcome,
    ) -> Result<(), PaxosError> {
        match self.role {
            Role::Follower => election::on_probe_response(self, now, from, response, rng, out)?,
            Role::Recoverer => recovery::on_prepare_response(self, now, from, response, rng, out)?,
            Role::Leader => {
                trace!(id = %response.id(), "leader ignoring prepare response");
            }
        }
        Ok(())
    }

    fn on_accept_response(
        &mut self,
        now: u64,
        from: NodeId,
        response: AcceptResponse,
        rng: &mut impl Rng,
        out: &mut Outcome,
    ) -> Result<(), PaxosError> {
        match self.role {
            Role::Follower => {
                trace!(id = %response.id(), "follower dropping stale accept response");
            }
            Role::Recoverer | Role::Leader => {
                replication::on_accept_response(self, now, from, response, rng, out)?;
            }
        }
        Ok(())
    }

    /// Drop to follower: fail in-flight clients, clear vote tracking,
    /// forget the epoch, take a fresh timeout.
    pub(crate) fn backdown(&mut self, now: u64, rng: &mut impl Rng, out: &mut Outcome) {
        for (_, command) in std::mem::take(&mut self.state.client_commands) {
            out.replies.push(ClientReply::NoLongerLeader {
                msg_id: command.msg_id,
            });
        }
        self.state.prepare_responses.clear();
        self.state.accept_responses.clear();
        self.state.epoch = None;
        if self.role != Role::Follower {
            debug!(node = %self.node_id, from = ?self.role, "backing down to follower");
        }
        self.role = Role::Follower;
        self.reset_timeout(now, rng);
    }

    pub(crate) fn reset_timeout(&mut self, now: u64, rng: &mut impl Rng) {
        self.state.timeout = self.config.random_timeout(now, rng);
    }

    pub(crate) fn save_progress(&mut self) -> Result<(), PaxosError> {
        self.journal.save(&self.state.progress)?;
        Ok(())
    }

    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn progress(&self) -> Progress {
        self.state.progress
    }

    /// The epoch this node leads (or is recovering) under, if any.
    #[must_use]
    pub fn epoch(&self) -> Option<BallotNumber> {
        self.state.epoch
    }

    /// Freshest evidence of a live leader, as a heartbeat value.
    #[must_use]
    pub fn leader_heartbeat(&self) -> u64 {
        self.state.leader_heartbeat
    }

    /// The node's current deadline, so the runtime can sleep until it.
    #[must_use]
    pub fn timeout(&self) -> u64 {
        self.state.timeout
    }

    /// Access the journal, e.g. to snapshot it for another process.
    #[must_use]
    pub fn journal(&self) -> &J {
        &self.journal
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::journal::InMemoryJournal;

    pub(crate) fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    pub(crate) fn follower(id: u64) -> PaxosNode<InMemoryJournal> {
        PaxosNode::recover(
            NodeId(id),
            Config::default(),
            InMemoryJournal::new(),
            0,
            &mut rng(),
        )
        .expect("in-memory journal cannot fail")
    }

    /// A leader at `epoch (counter, id)` with its committed watermark at
    /// `committed_index`, as if it had just finished a quiet recovery.
    pub(crate) fn leader(id: u64, counter: i64, committed_index: i64) -> PaxosNode<InMemoryJournal> {
        let mut node = follower(id);
        let number = BallotNumber::new(counter, NodeId(id));
        node.state.progress = Progress::new(
            number,
            SlotId::new(NodeId(id), BallotNumber::new(counter - 1, NodeId(id)), committed_index),
        );
        node.journal
            .save(&node.state.progress)
            .expect("in-memory journal cannot fail");
        node.state.epoch = Some(number);
        node.role = Role::Leader;
        node
    }
}
