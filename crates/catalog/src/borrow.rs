use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use libris_core::{BookId, BorrowRecordId, MemberId};

/// One loan of one copy of a book to one member.
///
/// `return_date == None` means the loan is still open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowRecord {
    pub record_id: BorrowRecordId,
    pub book_id: BookId,
    pub member_id: MemberId,
    pub borrow_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
}

impl BorrowRecord {
    pub fn is_open(&self) -> bool {
        self.return_date.is_none()
    }
}

/// Insert payload for a borrow record; the store assigns `record_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBorrowRecord {
    pub book_id: BookId,
    pub member_id: MemberId,
    pub borrow_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
}

impl NewBorrowRecord {
    /// An open record starting at `at`.
    pub fn open(book_id: BookId, member_id: MemberId, at: DateTime<Utc>) -> Self {
        Self {
            book_id,
            member_id,
            borrow_date: at,
            return_date: None,
        }
    }
}
