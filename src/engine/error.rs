use ulid::Ulid;

use crate::model::Span;
use crate::slot::SlotError;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed date or slot code. Client error, never retried.
    InvalidSlot(SlotError),
    /// Referenced resource does not exist.
    ResourceNotFound(Ulid),
    /// Genuine contention: the slot stayed occupied through the whole
    /// retry budget.
    SlotTaken { resource_id: Ulid, span: Span },
    /// Unknown (or already-removed) reservation.
    NotFound(Ulid),
    /// Caller is neither the owner nor an admin.
    Forbidden(Ulid),
    AlreadyExists(Ulid),
    /// Resource removal refused while active reservations remain.
    HasActiveReservations(Ulid),
    InvalidUpdate(&'static str),
    LimitExceeded(&'static str),
    /// Transient store failure: the WAL writer could not commit.
    Wal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidSlot(e) => write!(f, "invalid slot: {e}"),
            EngineError::ResourceNotFound(id) => write!(f, "resource not found: {id}"),
            EngineError::SlotTaken { resource_id, span } => write!(
                f,
                "slot [{}, {}) on resource {resource_id} is taken",
                span.start, span.end
            ),
            EngineError::NotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::Forbidden(id) => {
                write!(f, "reservation {id} belongs to another user")
            }
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::HasActiveReservations(id) => {
                write!(f, "resource {id} still has active reservations")
            }
            EngineError::InvalidUpdate(msg) => write!(f, "invalid update: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<SlotError> for EngineError {
    fn from(e: SlotError) -> Self {
        EngineError::InvalidSlot(e)
    }
}
