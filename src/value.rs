//! Values carried through the log: host commands, or the no-op filler a
//! recovering leader uses to close holes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// An opaque client command. The `msg_id` lets the host deduplicate
/// redeliveries; the payload is never interpreted here.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommandValue {
    pub msg_id: u64,
    pub bytes: Bytes,
}

impl CommandValue {
    #[must_use]
    pub fn new(msg_id: u64, bytes: impl Into<Bytes>) -> Self {
        Self {
            msg_id,
            bytes: bytes.into(),
        }
    }
}

/// What a slot decides.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    /// Fills a slot that no client command ever reached.
    Noop,
    /// A client command to hand to the host once the slot commits.
    Command(CommandValue),
}

impl Value {
    #[must_use]
    pub fn command(msg_id: u64, bytes: impl Into<Bytes>) -> Self {
        Value::Command(CommandValue::new(msg_id, bytes))
    }
}
