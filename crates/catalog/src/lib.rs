//! Catalog domain module: books, members, and borrow records.
//!
//! This crate contains the shapes and validation rules of library records,
//! implemented purely as deterministic domain logic (no IO, no storage).

pub mod book;
pub mod borrow;
pub mod member;
pub mod schema;

pub use book::{Book, NewBook};
pub use borrow::{BorrowRecord, NewBorrowRecord};
pub use member::{Member, NewMember};
