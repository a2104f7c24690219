//! Circulation error taxonomy.

use thiserror::Error;

use libris_core::{BookId, DomainError, MemberId};
use libris_store::StoreError;

/// Kind of record a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Book,
    Member,
    BorrowRecord,
}

impl core::fmt::Display for Entity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Entity::Book => "book",
            Entity::Member => "member",
            Entity::BorrowRecord => "borrow record",
        })
    }
}

/// A rollback write issued after a forward step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compensation {
    /// Put the decremented stock back (borrow).
    RestoreStock,
    /// Clear the return date of the record just closed (return).
    ReopenRecord,
}

impl core::fmt::Display for Compensation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Compensation::RestoreStock => "restore stock",
            Compensation::ReopenRecord => "reopen borrow record",
        })
    }
}

/// Outcome of a failed borrow or return.
///
/// Every variant except `CompensationFailed` leaves stock and borrow records
/// as they were before the call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CirculationError {
    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: i64 },

    #[error("book {0} is out of stock")]
    OutOfStock(BookId),

    /// Stock is already at the largest count it can hold; nothing was written.
    #[error("stock of book {0} cannot grow any further")]
    StockOverflow(BookId),

    /// The member already holds an open loan of this book.
    #[error("member {member_id} already has book {book_id} on loan")]
    AlreadyBorrowed { book_id: BookId, member_id: MemberId },

    #[error("no active borrow of book {book_id} by member {member_id}")]
    NoActiveBorrow { book_id: BookId, member_id: MemberId },

    /// The stock write affected no rows.
    #[error("failed to update stock of book {0}")]
    StockUpdateFailed(BookId),

    /// The borrow record insert was rejected.
    #[error("failed to create borrow record for book {book_id} and member {member_id}")]
    RecordCreationFailed { book_id: BookId, member_id: MemberId },

    /// A rollback write failed: stock and borrow records now disagree and
    /// need repair out of band.
    #[error("{step} failed ({reason}) after: {cause}; stock and borrow records are inconsistent")]
    CompensationFailed {
        step: Compensation,
        reason: String,
        cause: Box<CirculationError>,
    },

    #[error("store transport error: {0}")]
    Transport(String),

    #[error("malformed store row: {0}")]
    InvalidRow(String),
}

impl CirculationError {
    pub fn not_found(entity: Entity, id: impl Into<i64>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// True when the invariant between stock and open records may be broken.
    pub fn is_inconsistent(&self) -> bool {
        matches!(self, Self::CompensationFailed { .. })
    }
}

impl From<StoreError> for CirculationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Decode(msg) => CirculationError::InvalidRow(msg),
            StoreError::Transport(msg) => CirculationError::Transport(msg),
            other => CirculationError::Transport(other.to_string()),
        }
    }
}

impl From<DomainError> for CirculationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::MalformedRecord(msg) => CirculationError::InvalidRow(msg),
            other => CirculationError::InvalidRow(other.to_string()),
        }
    }
}
