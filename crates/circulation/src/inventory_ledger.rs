//! Inventory Ledger: owner of the per-book stock counter.

use std::sync::Arc;

use serde_json::{Value as JsonValue, json};

use libris_catalog::schema::{self, books};
use libris_core::{BookId, Row};
use libris_store::{Filter, StoreGateway};

use crate::error::{CirculationError, Entity};

/// Read and overwrite a book's stock. Single attempt per call, no retries.
pub trait InventoryLedger: Send + Sync {
    /// Current stock, or `NotFound` if the book does not exist.
    fn get_stock(&self, book_id: BookId) -> Result<i64, CirculationError>;

    /// Overwrite the stock. `Ok(false)` means the write affected no rows
    /// (the book vanished, or the store rejected the write).
    fn set_stock(&self, book_id: BookId, stock: i64) -> Result<bool, CirculationError>;
}

impl<L> InventoryLedger for Arc<L>
where
    L: InventoryLedger + ?Sized,
{
    fn get_stock(&self, book_id: BookId) -> Result<i64, CirculationError> {
        (**self).get_stock(book_id)
    }

    fn set_stock(&self, book_id: BookId, stock: i64) -> Result<bool, CirculationError> {
        (**self).set_stock(book_id, stock)
    }
}

/// Inventory ledger over the `books` collection.
#[derive(Debug, Clone)]
pub struct StoreInventoryLedger<G> {
    gateway: G,
}

impl<G> StoreInventoryLedger<G> {
    pub fn new(gateway: G) -> Self {
        Self { gateway }
    }
}

impl<G: StoreGateway> InventoryLedger for StoreInventoryLedger<G> {
    fn get_stock(&self, book_id: BookId) -> Result<i64, CirculationError> {
        let rows = self
            .gateway
            .select(schema::BOOKS, &Filter::all().eq(books::BOOK_ID, book_id))?;
        let row = rows
            .first()
            .ok_or_else(|| CirculationError::not_found(Entity::Book, book_id))?;

        row.get(books::STOCK)
            .and_then(JsonValue::as_i64)
            .ok_or_else(|| CirculationError::InvalidRow(format!("book {book_id} has no integer stock")))
    }

    fn set_stock(&self, book_id: BookId, stock: i64) -> Result<bool, CirculationError> {
        if stock < 0 {
            tracing::warn!(%book_id, stock, "refusing to write negative stock");
            return Ok(false);
        }

        let mut patch = Row::new();
        patch.insert(books::STOCK.to_string(), json!(stock));
        let updated = self.gateway.update(
            schema::BOOKS,
            patch,
            &Filter::all().eq(books::BOOK_ID, book_id),
        )?;
        Ok(!updated.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libris_store::{Fault, InMemoryStore, Operation};

    fn store_with_book(stock: i64) -> Arc<InMemoryStore> {
        let store = InMemoryStore::new().with_collection(schema::BOOKS, books::BOOK_ID);
        let row = json!({"title": "Dune", "author": "Herbert", "category": "SF", "stock": stock});
        store
            .insert(schema::BOOKS, row.as_object().cloned().unwrap())
            .unwrap();
        Arc::new(store)
    }

    #[test]
    fn reads_and_writes_stock() {
        let ledger = StoreInventoryLedger::new(store_with_book(3));
        assert_eq!(ledger.get_stock(BookId::new(1)).unwrap(), 3);
        assert!(ledger.set_stock(BookId::new(1), 2).unwrap());
        assert_eq!(ledger.get_stock(BookId::new(1)).unwrap(), 2);
    }

    #[test]
    fn unknown_book_is_not_found() {
        let ledger = StoreInventoryLedger::new(store_with_book(3));
        assert_eq!(
            ledger.get_stock(BookId::new(9)).unwrap_err(),
            CirculationError::NotFound {
                entity: Entity::Book,
                id: 9
            }
        );
        assert!(!ledger.set_stock(BookId::new(9), 1).unwrap());
    }

    #[test]
    fn rejected_write_reports_false() {
        let store = store_with_book(3);
        store.inject_fault(Operation::Update, schema::BOOKS, Fault::Reject, 1);
        let ledger = StoreInventoryLedger::new(store.clone());
        assert!(!ledger.set_stock(BookId::new(1), 2).unwrap());
        assert_eq!(ledger.get_stock(BookId::new(1)).unwrap(), 3);
    }

    #[test]
    fn negative_stock_is_never_written() {
        let store = store_with_book(0);
        store.clear_calls();
        let ledger = StoreInventoryLedger::new(store.clone());
        assert!(!ledger.set_stock(BookId::new(1), -1).unwrap());
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn transport_failures_propagate() {
        let store = store_with_book(1);
        store.inject_fault(Operation::Select, schema::BOOKS, Fault::Transport, 1);
        let ledger = StoreInventoryLedger::new(store);
        assert!(matches!(
            ledger.get_stock(BookId::new(1)),
            Err(CirculationError::Transport(_))
        ));
    }
}
