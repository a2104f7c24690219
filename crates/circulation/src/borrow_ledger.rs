//! Borrow Ledger: owner of borrow records.
//!
//! Records are never deleted; a loan is closed by stamping its return date.
//! The store does not enforce "one open record per (book, member)"; callers
//! sequence their writes so it holds.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Value as JsonValue, json};

use libris_catalog::schema::{self, borrow_records, members};
use libris_catalog::{BorrowRecord, NewBorrowRecord};
use libris_core::{BookId, BorrowRecordId, MemberId, Row, from_row, to_row};
use libris_store::{Filter, StoreGateway};

use crate::error::CirculationError;

pub trait BorrowLedger: Send + Sync {
    /// Whether `member_id` refers to a registered member.
    fn member_exists(&self, member_id: MemberId) -> Result<bool, CirculationError>;

    /// The open record for the pair, if any.
    fn find_open_record(
        &self,
        book_id: BookId,
        member_id: MemberId,
    ) -> Result<Option<BorrowRecord>, CirculationError>;

    /// Insert an open record. Fails with `RecordCreationFailed` when the store rejects it.
    fn open_record(
        &self,
        book_id: BookId,
        member_id: MemberId,
        at: DateTime<Utc>,
    ) -> Result<BorrowRecordId, CirculationError>;

    /// Close the open record for the pair. Returns the closed record, or
    /// `None` if no open record matched.
    fn close_record(
        &self,
        book_id: BookId,
        member_id: MemberId,
        at: DateTime<Utc>,
    ) -> Result<Option<BorrowRecord>, CirculationError>;

    /// Clear the return date again. Only used to compensate a failed return.
    fn reopen_record(&self, record_id: BorrowRecordId) -> Result<bool, CirculationError>;
}

impl<L> BorrowLedger for Arc<L>
where
    L: BorrowLedger + ?Sized,
{
    fn member_exists(&self, member_id: MemberId) -> Result<bool, CirculationError> {
        (**self).member_exists(member_id)
    }

    fn find_open_record(
        &self,
        book_id: BookId,
        member_id: MemberId,
    ) -> Result<Option<BorrowRecord>, CirculationError> {
        (**self).find_open_record(book_id, member_id)
    }

    fn open_record(
        &self,
        book_id: BookId,
        member_id: MemberId,
        at: DateTime<Utc>,
    ) -> Result<BorrowRecordId, CirculationError> {
        (**self).open_record(book_id, member_id, at)
    }

    fn close_record(
        &self,
        book_id: BookId,
        member_id: MemberId,
        at: DateTime<Utc>,
    ) -> Result<Option<BorrowRecord>, CirculationError> {
        (**self).close_record(book_id, member_id, at)
    }

    fn reopen_record(&self, record_id: BorrowRecordId) -> Result<bool, CirculationError> {
        (**self).reopen_record(record_id)
    }
}

/// Borrow ledger over the `borrow_records` collection.
#[derive(Debug, Clone)]
pub struct StoreBorrowLedger<G> {
    gateway: G,
}

impl<G> StoreBorrowLedger<G> {
    pub fn new(gateway: G) -> Self {
        Self { gateway }
    }
}

fn return_date_patch(value: JsonValue) -> Row {
    let mut patch = Row::new();
    patch.insert(borrow_records::RETURN_DATE.to_string(), value);
    patch
}

impl<G: StoreGateway> StoreBorrowLedger<G> {
    /// All open records for the pair, oldest first.
    fn open_records(
        &self,
        book_id: BookId,
        member_id: MemberId,
    ) -> Result<Vec<BorrowRecord>, CirculationError> {
        let filter = Filter::all()
            .eq(borrow_records::BOOK_ID, book_id)
            .eq(borrow_records::MEMBER_ID, member_id)
            .is_null(borrow_records::RETURN_DATE);

        let mut records = self
            .gateway
            .select(schema::BORROW_RECORDS, &filter)?
            .iter()
            .map(from_row::<BorrowRecord>)
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by_key(|r| (r.borrow_date, r.record_id));

        if records.len() > 1 {
            tracing::warn!(
                %book_id,
                %member_id,
                open = records.len(),
                "more than one open borrow record for the same book and member"
            );
        }
        Ok(records)
    }

    /// Keys of the open records for the pair, read without decoding the rows.
    fn open_record_ids(
        &self,
        book_id: BookId,
        member_id: MemberId,
    ) -> Result<Vec<BorrowRecordId>, CirculationError> {
        let filter = Filter::all()
            .eq(borrow_records::BOOK_ID, book_id)
            .eq(borrow_records::MEMBER_ID, member_id)
            .is_null(borrow_records::RETURN_DATE);
        Ok(self
            .gateway
            .select(schema::BORROW_RECORDS, &filter)?
            .iter()
            .filter_map(|row| row.get(borrow_records::RECORD_ID).and_then(JsonValue::as_i64))
            .map(BorrowRecordId::new)
            .collect())
    }
}

impl<G: StoreGateway> BorrowLedger for StoreBorrowLedger<G> {
    fn member_exists(&self, member_id: MemberId) -> Result<bool, CirculationError> {
        let rows = self
            .gateway
            .select(schema::MEMBERS, &Filter::all().eq(members::MEMBER_ID, member_id))?;
        Ok(!rows.is_empty())
    }

    fn find_open_record(
        &self,
        book_id: BookId,
        member_id: MemberId,
    ) -> Result<Option<BorrowRecord>, CirculationError> {
        Ok(self.open_records(book_id, member_id)?.into_iter().next())
    }

    fn open_record(
        &self,
        book_id: BookId,
        member_id: MemberId,
        at: DateTime<Utc>,
    ) -> Result<BorrowRecordId, CirculationError> {
        let row = to_row(&NewBorrowRecord::open(book_id, member_id, at))?;
        let inserted = self.gateway.insert(schema::BORROW_RECORDS, row)?;

        let Some(row) = inserted.first() else {
            return Err(CirculationError::RecordCreationFailed { book_id, member_id });
        };

        // The record exists from here on. Only its key is read back, so an
        // echo the domain type cannot decode does not turn into a failure.
        if let Some(id) = row.get(borrow_records::RECORD_ID).and_then(JsonValue::as_i64) {
            return Ok(BorrowRecordId::new(id));
        }
        tracing::warn!(%book_id, %member_id, "insert echoed no record id; looking it up");
        self.open_record_ids(book_id, member_id)?
            .into_iter()
            .max()
            .ok_or_else(|| CirculationError::InvalidRow("borrow record written without a key".into()))
    }

    fn close_record(
        &self,
        book_id: BookId,
        member_id: MemberId,
        at: DateTime<Utc>,
    ) -> Result<Option<BorrowRecord>, CirculationError> {
        let Some(open) = self.find_open_record(book_id, member_id)? else {
            return Ok(None);
        };

        // Guarded by `return_date IS NULL` so exactly the record found above is closed.
        let filter = Filter::all()
            .eq(borrow_records::RECORD_ID, open.record_id)
            .is_null(borrow_records::RETURN_DATE);
        let updated = self.gateway.update(
            schema::BORROW_RECORDS,
            return_date_patch(json!(at)),
            &filter,
        )?;

        // Affected rows decide; the echoed row is not decoded after the write.
        if updated.is_empty() {
            return Ok(None);
        }
        Ok(Some(BorrowRecord {
            return_date: Some(at),
            ..open
        }))
    }

    fn reopen_record(&self, record_id: BorrowRecordId) -> Result<bool, CirculationError> {
        let updated = self.gateway.update(
            schema::BORROW_RECORDS,
            return_date_patch(JsonValue::Null),
            &Filter::all().eq(borrow_records::RECORD_ID, record_id),
        )?;
        Ok(!updated.is_empty())
    }
}
