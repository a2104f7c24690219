//! Circulation: borrowing and returning books.
//!
//! A book's stock counter and its open borrow records live in two independent
//! collections, and the store offers no transaction spanning both. This crate
//! keeps them consistent with a two-step saga per operation:
//!
//! ```text
//! borrow:  read stock -> decrement stock -> open record
//!                                       \-> (insert failed) restore stock
//! return:  read stock -> close record   -> increment stock
//!                                       \-> (increment failed) reopen record
//! ```
//!
//! Invariant maintained by successful calls:
//! `stock(book) + open_records(book) == total_copies(book)`.

pub mod borrow_ledger;
pub mod error;
pub mod inventory_ledger;
pub mod saga;
pub mod workflow;

pub use borrow_ledger::{BorrowLedger, StoreBorrowLedger};
pub use error::{CirculationError, Compensation, Entity};
pub use inventory_ledger::{InventoryLedger, StoreInventoryLedger};
pub use saga::{SagaKind, SagaState};
pub use workflow::{BorrowReceipt, Circulation, ReturnReceipt};
