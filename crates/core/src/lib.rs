//! `libris-core`: foundation building blocks shared by every libris crate.
//!
//! This crate contains **pure** primitives (no storage, no IO).

pub mod clock;
pub mod error;
pub mod id;
pub mod row;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{BookId, BorrowRecordId, MemberId};
pub use row::{Row, from_row, to_row};
