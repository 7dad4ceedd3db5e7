use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};

/// Long-running operations that mutate a note's tree or encryption state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Lock,
    Unlock,
    GrammarCheck,
    Glossary,
    Summarize,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Lock => "lock",
            OperationKind::Unlock => "unlock",
            OperationKind::GrammarCheck => "grammar check",
            OperationKind::Glossary => "glossary",
            OperationKind::Summarize => "summarize",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    Pending(OperationKind),
}

/// Per-note `Idle | Pending(kind)` table. Absent notes are idle.
///
/// Clones share one table. A successful [`try_acquire`](Self::try_acquire)
/// hands back an [`OperationGuard`]; the note goes idle again when the guard
/// is dropped, including when the owning future is cancelled.
#[derive(Debug, Clone, Default)]
pub struct OperationLocks {
    pending: Arc<Mutex<HashMap<String, OperationKind>>>,
}

impl OperationLocks {
    fn table(&self) -> MutexGuard<'_, HashMap<String, OperationKind>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self, note_id: &str) -> OperationState {
        match self.table().get(note_id) {
            Some(kind) => OperationState::Pending(*kind),
            None => OperationState::Idle,
        }
    }

    /// Mark `note_id` pending, rejecting if another operation is in flight.
    pub fn try_acquire(&self, note_id: &str, kind: OperationKind) -> Result<OperationGuard> {
        let mut table = self.table();
        if let Some(current) = table.get(note_id) {
            return Err(Error::OperationPending {
                id: note_id.to_string(),
                kind: *current,
            });
        }
        table.insert(note_id.to_string(), kind);
        Ok(OperationGuard {
            locks: self.clone(),
            note_id: note_id.to_string(),
        })
    }

    /// Fail if anything is pending on `note_id`, without acquiring.
    pub fn ensure_idle(&self, note_id: &str) -> Result<()> {
        match self.state(note_id) {
            OperationState::Idle => Ok(()),
            OperationState::Pending(kind) => Err(Error::OperationPending {
                id: note_id.to_string(),
                kind,
            }),
        }
    }
}

/// Holds one note in `Pending` until dropped.
#[derive(Debug)]
pub struct OperationGuard {
    locks: OperationLocks,
    note_id: String,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.locks.table().remove(&self.note_id);
    }
}
