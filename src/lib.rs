//! Leader-based Multi-Paxos over a totally-ordered command log.
//!
//! A fixed cluster of nodes agrees on one value per log slot despite
//! crashes, loss, reordering and partitions. Each slot is a classic Paxos
//! instance; a distinguished leader amortizes phase 1 across many accepts,
//! so the steady state costs one round trip per command.
//!
//! # Architecture
//!
//! - **Pure state machine core** — [`PaxosNode::apply`] consumes one event
//!   (wire message, timer check or client command) plus the current clock
//!   and returns an [`Outcome`]: messages to send, values to deliver,
//!   client replies. No I/O, no async, no internal timers.
//! - **Durable seam** — the [`Journal`] trait owns promises, the committed
//!   watermark and accepted values. Every write is durable before any
//!   dependent message appears in an outcome.
//! - **Runtime owns the rest** — transport, timer scheduling, the host
//!   command interpreter and the clock all live outside this crate.
//!
//! # Quick start
//!
//! ```ignore
//! use paxos_log::{Config, Event, InMemoryJournal, NodeId, PaxosNode};
//!
//! let mut node = PaxosNode::recover(NodeId(1), Config::default(), journal, now, &mut rng)?;
//! loop {
//!     let event = runtime.next_event(node.timeout());
//!     let outcome = node.apply(runtime.now(), event, &mut rng)?;
//!     runtime.dispatch(outcome);
//! }
//! ```

#![warn(clippy::pedantic)]

pub mod ballot;
pub mod config;
pub mod error;
pub mod journal;
pub mod messages;
pub mod node;
pub mod progress;
pub mod value;

pub use ballot::{BallotNumber, NodeId, SlotId, recover_prepares};
pub use config::{Config, ConfigError};
pub use error::{JournalError, PaxosError};
pub use journal::{InMemoryJournal, Journal, JournalBounds};
pub use messages::{
    Accept, AcceptAck, AcceptNack, AcceptResponse, Commit, Event, Message, Prepare, PrepareAck,
    PrepareNack, PrepareResponse, RetransmitRequest, RetransmitResponse,
};
pub use node::{ClientReply, Committed, Outbound, Outcome, PaxosNode, Role};
pub use progress::Progress;
pub use value::{CommandValue, Value};
