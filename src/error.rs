use thiserror::Error;

use crate::oplock::OperationKind;

/// Store write failures. The in-memory collection is never rolled back on these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error("storage failure: {0}")]
    Storage(String),
}

#[derive(Debug, Error)]
pub enum Error {
    /// Wrong password and tampered payload are deliberately indistinguishable.
    #[error("authentication failed")]
    AuthenticationFailure,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("invalid import: {0}")]
    ImportValidation(String),

    #[error("note not found: {0}")]
    NoteNotFound(String),

    #[error("note {id} already has a pending {kind} operation")]
    OperationPending { id: String, kind: OperationKind },

    #[error("note {0} is locked")]
    NoteLocked(String),

    #[error("note {0} is not locked")]
    NoteNotLocked(String),

    /// An analyzer result arrived for text that has since changed. Not applied.
    #[error("note {0} changed while it was being analyzed")]
    NoteChanged(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("background task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
