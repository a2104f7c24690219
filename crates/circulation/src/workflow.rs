//! Borrow/Return Workflow.
//!
//! Each call is a two-step saga over the Inventory Ledger and the Borrow
//! Ledger. Forward writes are never retried. When the second write fails the
//! first one is undone by a compensating write; if that also fails the call
//! reports `CompensationFailed` and logs at `error` level, because stock and
//! borrow records no longer agree.
//!
//! A member holds at most one open loan per book; `borrow` refuses a second
//! one before touching stock.
//!
//! Write order is fixed:
//! - `borrow` decrements stock, then opens the record.
//! - `return_book` closes the record, then increments stock.
//!
//! ## Known limitation
//!
//! Stock is read, then overwritten with `read ± 1`. Two borrowers of the same
//! book running concurrently can both observe the same stock and one
//! decrement is lost. Calls for one book are expected to run sequentially.

use chrono::{DateTime, Utc};
use serde::Serialize;

use libris_core::{BookId, BorrowRecordId, Clock, MemberId, SystemClock};
use libris_store::StoreGateway;

use crate::borrow_ledger::{BorrowLedger, StoreBorrowLedger};
use crate::error::{CirculationError, Compensation, Entity};
use crate::inventory_ledger::{InventoryLedger, StoreInventoryLedger};
use crate::saga::{Saga, SagaKind, SagaState};

/// Result of a successful borrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BorrowReceipt {
    pub record_id: BorrowRecordId,
    pub book_id: BookId,
    pub member_id: MemberId,
    pub borrowed_at: DateTime<Utc>,
    pub remaining_stock: i64,
}

/// Result of a successful return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReturnReceipt {
    pub record_id: BorrowRecordId,
    pub book_id: BookId,
    pub member_id: MemberId,
    pub returned_at: DateTime<Utc>,
    pub stock: i64,
}

/// Orchestrates the two ledgers.
#[derive(Debug, Clone)]
pub struct Circulation<I, B, C = SystemClock> {
    inventory: I,
    borrows: B,
    clock: C,
}

impl<I, B> Circulation<I, B>
where
    I: InventoryLedger,
    B: BorrowLedger,
{
    pub fn new(inventory: I, borrows: B) -> Self {
        Self {
            inventory,
            borrows,
            clock: SystemClock,
        }
    }
}

impl<G> Circulation<StoreInventoryLedger<G>, StoreBorrowLedger<G>>
where
    G: StoreGateway + Clone,
{
    /// Both ledgers backed by the same gateway handle.
    pub fn over_store(gateway: G) -> Self {
        Self::new(
            StoreInventoryLedger::new(gateway.clone()),
            StoreBorrowLedger::new(gateway),
        )
    }
}

impl<I, B, C> Circulation<I, B, C>
where
    I: InventoryLedger,
    B: BorrowLedger,
    C: Clock,
{
    pub fn with_clock<C2: Clock>(self, clock: C2) -> Circulation<I, B, C2> {
        Circulation {
            inventory: self.inventory,
            borrows: self.borrows,
            clock,
        }
    }

    /// Lend one copy of `book_id` to `member_id`.
    pub fn borrow(&self, book_id: BookId, member_id: MemberId) -> Result<BorrowReceipt, CirculationError> {
        let span = tracing::info_span!("borrow", %book_id, %member_id);
        let _guard = span.enter();
        let mut saga = Saga::begin(SagaKind::Borrow);

        let stock = match self.inventory.get_stock(book_id) {
            Ok(stock) => stock,
            Err(err) => return Err(saga.abort(err)),
        };
        match self.borrows.member_exists(member_id) {
            Ok(true) => {}
            Ok(false) => return Err(saga.abort(CirculationError::not_found(Entity::Member, member_id))),
            Err(err) => return Err(saga.abort(err)),
        }
        match self.borrows.find_open_record(book_id, member_id) {
            Ok(None) => {}
            Ok(Some(_)) => return Err(saga.abort(CirculationError::AlreadyBorrowed { book_id, member_id })),
            Err(err) => return Err(saga.abort(err)),
        }
        saga.advance(SagaState::StockChecked);

        if stock < 1 {
            return Err(saga.abort(CirculationError::OutOfStock(book_id)));
        }

        match self.inventory.set_stock(book_id, stock - 1) {
            Ok(true) => saga.advance(SagaState::StockUpdated),
            Ok(false) => {
                saga.advance(SagaState::StockUpdateFailed);
                return Err(saga.abort(CirculationError::StockUpdateFailed(book_id)));
            }
            Err(err) => {
                saga.advance(SagaState::StockUpdateFailed);
                return Err(saga.abort(err));
            }
        }

        let borrowed_at = self.clock.now();
        let failure = match self.borrows.open_record(book_id, member_id, borrowed_at) {
            Ok(record_id) => {
                saga.advance(SagaState::RecordWritten);
                saga.advance(SagaState::Done);
                tracing::info!(%record_id, remaining_stock = stock - 1, "book borrowed");
                return Ok(BorrowReceipt {
                    record_id,
                    book_id,
                    member_id,
                    borrowed_at,
                    remaining_stock: stock - 1,
                });
            }
            Err(err) => err,
        };

        saga.advance(SagaState::RecordWriteFailed);
        tracing::warn!(error = %failure, stock, "borrow record not written; restoring stock");
        let restored = self.inventory.set_stock(book_id, stock);
        Err(finish_compensation(
            &mut saga,
            Compensation::RestoreStock,
            SagaState::StockRestored,
            restored,
            failure,
        ))
    }

    /// Take back the copy of `book_id` lent to `member_id`.
    pub fn return_book(&self, book_id: BookId, member_id: MemberId) -> Result<ReturnReceipt, CirculationError> {
        let span = tracing::info_span!("return", %book_id, %member_id);
        let _guard = span.enter();
        let mut saga = Saga::begin(SagaKind::Return);

        // Baseline captured before any mutation, as in `borrow`.
        let stock = match self.inventory.get_stock(book_id) {
            Ok(stock) => stock,
            Err(err) => return Err(saga.abort(err)),
        };
        saga.advance(SagaState::StockChecked);
        let Some(next_stock) = stock.checked_add(1) else {
            return Err(saga.abort(CirculationError::StockOverflow(book_id)));
        };

        let returned_at = self.clock.now();
        let closed = match self.borrows.close_record(book_id, member_id, returned_at) {
            Ok(Some(record)) => record,
            Ok(None) => return Err(saga.abort(CirculationError::NoActiveBorrow { book_id, member_id })),
            Err(err) => return Err(saga.abort(err)),
        };
        saga.advance(SagaState::RecordWritten);

        let failure = match self.inventory.set_stock(book_id, next_stock) {
            Ok(true) => {
                saga.advance(SagaState::StockUpdated);
                saga.advance(SagaState::Done);
                tracing::info!(record_id = %closed.record_id, stock = next_stock, "book returned");
                return Ok(ReturnReceipt {
                    record_id: closed.record_id,
                    book_id,
                    member_id,
                    returned_at,
                    stock: next_stock,
                });
            }
            Ok(false) => CirculationError::StockUpdateFailed(book_id),
            Err(err) => err,
        };

        saga.advance(SagaState::StockUpdateFailed);
        tracing::warn!(error = %failure, record_id = %closed.record_id, "stock not incremented; reopening borrow record");
        let reopened = self.borrows.reopen_record(closed.record_id);
        Err(finish_compensation(
            &mut saga,
            Compensation::ReopenRecord,
            SagaState::RecordRestored,
            reopened,
            failure,
        ))
    }
}

/// Close out a saga whose compensating write returned `outcome`.
fn finish_compensation(
    saga: &mut Saga,
    step: Compensation,
    restored_state: SagaState,
    outcome: Result<bool, CirculationError>,
    failure: CirculationError,
) -> CirculationError {
    let reason = match outcome {
        Ok(true) => {
            saga.advance(restored_state);
            return saga.abort(failure);
        }
        Ok(false) => "store reported no affected rows".to_string(),
        Err(err) => err.to_string(),
    };

    tracing::error!(%step, %reason, cause = %failure, "compensation failed; manual repair required");
    let err = saga.abort(CirculationError::CompensationFailed {
        step,
        reason,
        cause: Box::new(failure),
    });
    debug_assert_eq!(saga.state(), SagaState::Aborted);
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::TimeZone;
    use proptest::prelude::*;

    use libris_catalog::schema::{self, books, borrow_records, members};
    use libris_catalog::{BorrowRecord, NewBook, NewMember};
    use libris_core::{FixedClock, from_row, to_row};
    use libris_store::{Fault, InMemoryStore, Operation};

    type StoreCirculation = Circulation<
        StoreInventoryLedger<Arc<InMemoryStore>>,
        StoreBorrowLedger<Arc<InMemoryStore>>,
        FixedClock,
    >;

    const BOOK: BookId = BookId::new(1);
    const M1: MemberId = MemberId::new(1);
    const M2: MemberId = MemberId::new(2);
    const M3: MemberId = MemberId::new(3);

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn library(stock: i64) -> Arc<InMemoryStore> {
        let store = InMemoryStore::new()
            .with_collection(schema::BOOKS, books::BOOK_ID)
            .with_collection(schema::MEMBERS, members::MEMBER_ID)
            .with_collection(schema::BORROW_RECORDS, borrow_records::RECORD_ID);

        let book = NewBook {
            title: "Dune".into(),
            author: "Frank Herbert".into(),
            category: "SF".into(),
            stock,
        };
        store.insert(schema::BOOKS, to_row(&book).unwrap()).unwrap();
        for name in ["Ada", "Grace", "Barbara"] {
            let member = NewMember {
                name: name.into(),
                email: format!("{}@example.org", name.to_lowercase()),
            };
            store.insert(schema::MEMBERS, to_row(&member).unwrap()).unwrap();
        }
        store.clear_calls();
        Arc::new(store)
    }

    fn circulation(store: &Arc<InMemoryStore>) -> StoreCirculation {
        Circulation::over_store(store.clone()).with_clock(FixedClock(test_time()))
    }

    fn stock(store: &InMemoryStore) -> i64 {
        store.rows(schema::BOOKS)[0][books::STOCK].as_i64().unwrap()
    }

    fn open_records(store: &InMemoryStore) -> Vec<BorrowRecord> {
        store
            .rows(schema::BORROW_RECORDS)
            .iter()
            .map(|r| from_row::<BorrowRecord>(r).unwrap())
            .filter(BorrowRecord::is_open)
            .collect()
    }

    fn open_count(store: &InMemoryStore) -> i64 {
        open_records(store).len() as i64
    }

    #[test]
    fn three_copies_walkthrough() {
        let store = library(3);
        let circ = circulation(&store);

        circ.borrow(BOOK, M1).unwrap();
        assert_eq!((stock(&store), open_count(&store)), (2, 1));

        circ.borrow(BOOK, M2).unwrap();
        assert_eq!((stock(&store), open_count(&store)), (1, 2));

        circ.return_book(BOOK, M1).unwrap();
        assert_eq!((stock(&store), open_count(&store)), (2, 1));
        assert_eq!(open_records(&store)[0].member_id, M2);

        let err = circ.return_book(BOOK, M1).unwrap_err();
        assert_eq!(err, CirculationError::NoActiveBorrow { book_id: BOOK, member_id: M1 });
        assert_eq!((stock(&store), open_count(&store)), (2, 1));
    }

    #[test]
    fn borrow_receipt_reports_record_and_remaining_stock() {
        let store = library(2);
        let receipt = circulation(&store).borrow(BOOK, M1).unwrap();
        assert_eq!(receipt.remaining_stock, 1);
        assert_eq!(receipt.borrowed_at, test_time());
        assert_eq!(open_records(&store)[0].record_id, receipt.record_id);
        assert_eq!(open_records(&store)[0].borrow_date, test_time());
    }

    #[test]
    fn borrow_then_return_restores_stock_and_closes_the_pair() {
        let store = library(1);
        let circ = circulation(&store);

        let borrowed = circ.borrow(BOOK, M1).unwrap();
        let returned = circ.return_book(BOOK, M1).unwrap();

        assert_eq!(returned.record_id, borrowed.record_id);
        assert_eq!(returned.stock, 1);
        assert_eq!(stock(&store), 1);
        assert_eq!(open_count(&store), 0);
    }

    #[test]
    fn borrow_with_zero_stock_is_out_of_stock_and_writes_nothing() {
        let store = library(0);
        let err = circulation(&store).borrow(BOOK, M1).unwrap_err();

        assert_eq!(err, CirculationError::OutOfStock(BOOK));
        assert_eq!(stock(&store), 0);
        assert!(store.rows(schema::BORROW_RECORDS).is_empty());
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn borrow_of_unknown_book_or_member_is_not_found() {
        let store = library(2);
        let circ = circulation(&store);

        assert_eq!(
            circ.borrow(BookId::new(42), M1).unwrap_err(),
            CirculationError::NotFound { entity: Entity::Book, id: 42 }
        );
        assert_eq!(
            circ.borrow(BOOK, MemberId::new(42)).unwrap_err(),
            CirculationError::NotFound { entity: Entity::Member, id: 42 }
        );
        assert_eq!(store.write_count(), 0);
        assert_eq!(stock(&store), 2);
    }

    #[test]
    fn rejected_stock_decrement_aborts_before_any_record() {
        let store = library(2);
        store.inject_fault(Operation::Update, schema::BOOKS, Fault::Reject, 1);

        let err = circulation(&store).borrow(BOOK, M1).unwrap_err();
        assert_eq!(err, CirculationError::StockUpdateFailed(BOOK));
        assert_eq!(stock(&store), 2);
        assert!(store.rows(schema::BORROW_RECORDS).is_empty());
    }

    #[test]
    fn rejected_record_insert_restores_stock() {
        let store = library(2);
        store.inject_fault(Operation::Insert, schema::BORROW_RECORDS, Fault::Reject, 1);

        let err = circulation(&store).borrow(BOOK, M1).unwrap_err();
        assert_eq!(err, CirculationError::RecordCreationFailed { book_id: BOOK, member_id: M1 });
        assert_eq!(stock(&store), 2);
        assert_eq!(open_count(&store), 0);

        let book_updates = store
            .calls()
            .into_iter()
            .filter(|c| c.operation == Operation::Update && c.target == schema::BOOKS)
            .count();
        assert_eq!(book_updates, 2, "decrement then restore");
    }

    #[test]
    fn transport_failure_on_record_insert_also_restores_stock() {
        let store = library(2);
        store.inject_fault(Operation::Insert, schema::BORROW_RECORDS, Fault::Transport, 1);

        let err = circulation(&store).borrow(BOOK, M1).unwrap_err();
        assert!(matches!(err, CirculationError::Transport(_)));
        assert_eq!(stock(&store), 2);
    }

    #[test]
    fn failed_stock_restore_is_reported_as_compensation_failure() {
        let store = library(2);
        store.inject_fault(Operation::Insert, schema::BORROW_RECORDS, Fault::Reject, 1);
        store.inject_fault_after(Operation::Update, schema::BOOKS, Fault::Reject, 1, 1);

        let err = circulation(&store).borrow(BOOK, M1).unwrap_err();
        match &err {
            CirculationError::CompensationFailed { step, cause, .. } => {
                assert_eq!(*step, Compensation::RestoreStock);
                assert_eq!(
                    **cause,
                    CirculationError::RecordCreationFailed { book_id: BOOK, member_id: M1 }
                );
            }
            other => panic!("expected CompensationFailed, got {other:?}"),
        }
        assert!(err.is_inconsistent());
        // The decrement stuck: one copy unaccounted for until repaired.
        assert_eq!(stock(&store), 1);
        assert_eq!(open_count(&store), 0);
    }

    #[test]
    fn return_without_open_record_is_no_active_borrow_and_writes_nothing() {
        let store = library(2);
        let err = circulation(&store).return_book(BOOK, M1).unwrap_err();

        assert_eq!(err, CirculationError::NoActiveBorrow { book_id: BOOK, member_id: M1 });
        assert_eq!(store.write_count(), 0);
        assert_eq!(stock(&store), 2);
    }

    #[test]
    fn return_of_unknown_book_is_not_found() {
        let store = library(2);
        assert_eq!(
            circulation(&store).return_book(BookId::new(7), M1).unwrap_err(),
            CirculationError::NotFound { entity: Entity::Book, id: 7 }
        );
    }

    #[test]
    fn failed_stock_increment_reopens_the_record() {
        let store = library(1);
        let circ = circulation(&store);
        let borrowed = circ.borrow(BOOK, M1).unwrap();

        store.inject_fault(Operation::Update, schema::BOOKS, Fault::Reject, 1);
        let err = circ.return_book(BOOK, M1).unwrap_err();

        assert_eq!(err, CirculationError::StockUpdateFailed(BOOK));
        let open = open_records(&store);
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].record_id, borrowed.record_id);
        assert_eq!(open[0].return_date, None);
        assert_eq!(stock(&store), 0);
    }

    #[test]
    fn failed_reopen_is_reported_as_compensation_failure() {
        let store = library(1);
        let circ = circulation(&store);
        circ.borrow(BOOK, M1).unwrap();

        store.inject_fault(Operation::Update, schema::BOOKS, Fault::Transport, 1);
        // Let the close through, fail the reopen.
        store.inject_fault_after(Operation::Update, schema::BORROW_RECORDS, Fault::Reject, 1, 1);

        let err = circ.return_book(BOOK, M1).unwrap_err();
        match err {
            CirculationError::CompensationFailed { step, cause, .. } => {
                assert_eq!(step, Compensation::ReopenRecord);
                assert!(matches!(*cause, CirculationError::Transport(_)));
            }
            other => panic!("expected CompensationFailed, got {other:?}"),
        }
        assert_eq!(open_count(&store), 0);
        assert_eq!(stock(&store), 0);
    }

    #[test]
    fn second_borrow_of_the_same_book_by_one_member_is_refused() {
        let store = library(3);
        let circ = circulation(&store);
        circ.borrow(BOOK, M1).unwrap();
        store.clear_calls();

        assert_eq!(
            circ.borrow(BOOK, M1).unwrap_err(),
            CirculationError::AlreadyBorrowed { book_id: BOOK, member_id: M1 }
        );
        assert_eq!(store.write_count(), 0);
        assert_eq!((stock(&store), open_count(&store)), (2, 1));
    }

    #[test]
    fn a_member_cannot_return_another_members_copy() {
        let store = library(2);
        let circ = circulation(&store);
        circ.borrow(BOOK, M1).unwrap();

        assert!(matches!(
            circ.return_book(BOOK, M2),
            Err(CirculationError::NoActiveBorrow { .. })
        ));
        assert_eq!((stock(&store), open_count(&store)), (1, 1));
    }

    #[test]
    fn return_at_maximum_stock_is_refused_before_any_write() {
        let store = library(1);
        let circ = circulation(&store);
        circ.borrow(BOOK, M1).unwrap();

        let mut patch = libris_core::Row::new();
        patch.insert(books::STOCK.into(), i64::MAX.into());
        store
            .update(schema::BOOKS, patch, &libris_store::Filter::all())
            .unwrap();
        store.clear_calls();

        assert_eq!(
            circ.return_book(BOOK, M1).unwrap_err(),
            CirculationError::StockOverflow(BOOK)
        );
        assert_eq!(store.write_count(), 0);
        assert_eq!(open_count(&store), 1);
        assert_eq!(stock(&store), i64::MAX);
    }

    #[test]
    fn garbled_write_echoes_still_complete_both_calls() {
        let store = library(2);
        let circ = circulation(&store);

        store.inject_fault(Operation::Insert, schema::BORROW_RECORDS, Fault::Garble, 1);
        let borrowed = circ.borrow(BOOK, M1).unwrap();
        assert_eq!((stock(&store), open_count(&store)), (1, 1));

        store.inject_fault(Operation::Update, schema::BORROW_RECORDS, Fault::Garble, 1);
        store.inject_fault(Operation::Update, schema::BOOKS, Fault::Garble, 1);
        let returned = circ.return_book(BOOK, M1).unwrap();
        assert_eq!(returned.record_id, borrowed.record_id);
        assert_eq!((stock(&store), open_count(&store)), (2, 0));
    }

    /// Gateway that echoes written rows with zone-less timestamps, the way a
    /// `timestamp without time zone` column comes back through `to_jsonb`.
    struct NaiveTimestamps(Arc<InMemoryStore>);

    fn strip_zones(rows: Vec<libris_core::Row>) -> Vec<libris_core::Row> {
        rows.into_iter()
            .map(|mut row| {
                for value in row.values_mut() {
                    let naive = value.as_str().and_then(|s| s.strip_suffix('Z')).map(str::to_owned);
                    if let Some(naive) = naive {
                        *value = naive.into();
                    }
                }
                row
            })
            .collect()
    }

    impl StoreGateway for NaiveTimestamps {
        fn select(
            &self,
            collection: &str,
            filter: &libris_store::Filter,
        ) -> Result<Vec<libris_core::Row>, libris_store::StoreError> {
            self.0.select(collection, filter)
        }

        fn insert(
            &self,
            collection: &str,
            row: libris_core::Row,
        ) -> Result<Vec<libris_core::Row>, libris_store::StoreError> {
            self.0.insert(collection, row).map(strip_zones)
        }

        fn update(
            &self,
            collection: &str,
            patch: libris_core::Row,
            filter: &libris_store::Filter,
        ) -> Result<Vec<libris_core::Row>, libris_store::StoreError> {
            self.0.update(collection, patch, filter).map(strip_zones)
        }

        fn delete(
            &self,
            collection: &str,
            filter: &libris_store::Filter,
        ) -> Result<Vec<libris_core::Row>, libris_store::StoreError> {
            self.0.delete(collection, filter)
        }

        fn call(&self, procedure: &str) -> Result<Vec<libris_core::Row>, libris_store::StoreError> {
            self.0.call(procedure)
        }
    }

    #[test]
    fn zone_less_echoes_keep_stock_and_records_balanced() {
        let store = library(2);
        let circ = Circulation::over_store(Arc::new(NaiveTimestamps(store.clone())))
            .with_clock(FixedClock(test_time()));

        let borrowed = circ.borrow(BOOK, M1).unwrap();
        assert_eq!(borrowed.remaining_stock, 1);
        assert_eq!((stock(&store), open_count(&store)), (1, 1));

        let returned = circ.return_book(BOOK, M1).unwrap();
        assert_eq!(returned.record_id, borrowed.record_id);
        assert_eq!((stock(&store), open_count(&store)), (2, 0));
    }

    /// Inventory ledger that lets a second borrower complete a whole borrow
    /// between our stock read and our stock write.
    struct InterleavedInventory {
        inner: StoreInventoryLedger<Arc<InMemoryStore>>,
        rival: StoreCirculation,
        fired: AtomicBool,
    }

    impl InventoryLedger for InterleavedInventory {
        fn get_stock(&self, book_id: BookId) -> Result<i64, CirculationError> {
            let stock = self.inner.get_stock(book_id)?;
            if !self.fired.swap(true, Ordering::SeqCst) {
                self.rival.borrow(book_id, M2)?;
            }
            Ok(stock)
        }

        fn set_stock(&self, book_id: BookId, stock: i64) -> Result<bool, CirculationError> {
            self.inner.set_stock(book_id, stock)
        }
    }

    /// Known limitation: check-then-act on stock. Both borrowers see one copy
    /// and both succeed, so two loans exist against a single copy.
    #[test]
    fn concurrent_borrowers_can_oversubscribe_a_single_copy() {
        let store = library(1);
        let inventory = InterleavedInventory {
            inner: StoreInventoryLedger::new(store.clone()),
            rival: circulation(&store),
            fired: AtomicBool::new(false),
        };
        let circ = Circulation::new(inventory, StoreBorrowLedger::new(store.clone()));

        circ.borrow(BOOK, M1).unwrap();

        assert_eq!(stock(&store), 0);
        assert_eq!(open_count(&store), 2);
        assert_ne!(stock(&store) + open_count(&store), 1, "lost decrement");
    }

    #[derive(Debug, Clone)]
    enum Step {
        Borrow(usize),
        Return(usize),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0usize..3).prop_map(Step::Borrow),
            (0usize..3).prop_map(Step::Return),
        ]
    }

    fn fault() -> impl Strategy<Value = Option<(Operation, &'static str, Fault)>> {
        let target = prop_oneof![
            Just((Operation::Update, schema::BOOKS)),
            Just((Operation::Insert, schema::BORROW_RECORDS)),
            Just((Operation::Update, schema::BORROW_RECORDS)),
            Just((Operation::Select, schema::BOOKS)),
        ];
        let kind = prop_oneof![Just(Fault::Reject), Just(Fault::Transport), Just(Fault::Garble)];
        prop::option::of((target, kind).prop_map(|((op, t), f)| (op, t, f)))
    }

    fn run(circ: &StoreCirculation, step: &Step) -> Result<(), CirculationError> {
        let members = [M1, M2, M3];
        match step {
            Step::Borrow(m) => circ.borrow(BOOK, members[*m]).map(|_| ()),
            Step::Return(m) => circ.return_book(BOOK, members[*m]).map(|_| ()),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: stock plus open records equals the initial stock after every call.
        #[test]
        fn stock_and_open_records_always_balance(
            initial in 0i64..4,
            steps in prop::collection::vec(step(), 1..30)
        ) {
            let store = library(initial);
            let circ = circulation(&store);

            for step in &steps {
                let _ = run(&circ, step);
                prop_assert_eq!(stock(&store) + open_count(&store), initial);
                prop_assert!(stock(&store) >= 0);
            }
        }

        /// Property: a single failed write per call is always compensated.
        #[test]
        fn single_faults_never_break_the_balance(
            initial in 0i64..4,
            steps in prop::collection::vec((step(), fault()), 1..30)
        ) {
            let store = library(initial);
            let circ = circulation(&store);

            for (step, fault) in &steps {
                if let Some((op, target, kind)) = fault {
                    store.inject_fault(*op, target, *kind, 1);
                }
                let result = run(&circ, step);
                store.clear_faults();

                if let Err(err) = &result {
                    prop_assert!(!err.is_inconsistent(), "unexpected {err}");
                }
                prop_assert_eq!(stock(&store) + open_count(&store), initial);
            }
        }

        /// Property: at most one open record per (book, member) pair.
        #[test]
        fn at_most_one_open_record_per_member(
            steps in prop::collection::vec(step(), 1..30)
        ) {
            let store = library(10);
            let circ = circulation(&store);
            for step in &steps {
                let _ = run(&circ, step);
                let open = open_records(&store);
                for member in [M1, M2, M3] {
                    prop_assert!(open.iter().filter(|r| r.member_id == member).count() <= 1);
                }
            }
        }
    }
}
