//! The durable journal contract and an in-memory reference implementation.

use std::collections::BTreeMap;

use crate::error::JournalError;
use crate::messages::Accept;
use crate::progress::Progress;

/// Lowest and highest slot indexes holding a stored accept. `(0, 0)` when
/// nothing is stored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct JournalBounds {
    pub min: i64,
    pub max: i64,
}

/// Durable storage owned exclusively by one node.
///
/// Implementations MUST make every write durable (fsync or equivalent)
/// before returning success, and MUST reload the persisted state on
/// restart. `save` MUST reject progress that moves backwards. No
/// transactional guarantees are assumed beyond per-call durability.
pub trait Journal {
    /// Read back the persisted progress record.
    fn load(&self) -> Result<Progress, JournalError>;

    /// Persist the progress record. Durable before returning.
    fn save(&mut self, progress: &Progress) -> Result<(), JournalError>;

    /// Persist an accepted value for its slot, replacing any earlier accept
    /// stored there. Durable before returning.
    fn accept(&mut self, accept: &Accept) -> Result<(), JournalError>;

    /// The stored accept for a slot, if any.
    fn accepted(&self, log_index: i64) -> Result<Option<Accept>, JournalError>;

    /// The slot range currently holding stored accepts.
    fn bounds(&self) -> Result<JournalBounds, JournalError>;
}

/// Journal backed by process memory. Suitable for tests and for embedders
/// that accept losing a node's vote history on crash.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct InMemoryJournal {
    progress: Progress,
    accepts: BTreeMap<i64, Accept>,
}

impl InMemoryJournal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Journal for InMemoryJournal {
    fn load(&self) -> Result<Progress, JournalError> {
        Ok(self.progress)
    }

    fn save(&mut self, progress: &Progress) -> Result<(), JournalError> {
        if !self.progress.permits(progress) {
            return Err(JournalError::Regression {
                stored: self.progress,
                offered: *progress,
            });
        }
        self.progress = *progress;
        Ok(())
    }

    fn accept(&mut self, accept: &Accept) -> Result<(), JournalError> {
        self.accepts.insert(accept.id.log_index, accept.clone());
        Ok(())
    }

    fn accepted(&self, log_index: i64) -> Result<Option<Accept>, JournalError> {
        Ok(self.accepts.get(&log_index).cloned())
    }

    fn bounds(&self) -> Result<JournalBounds, JournalError> {
        let min = self.accepts.keys().next().copied().unwrap_or(0);
        let max = self.accepts.keys().next_back().copied().unwrap_or(0);
        Ok(JournalBounds { min, max })
    }
}
