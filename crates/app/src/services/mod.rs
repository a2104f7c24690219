//! Request/response services over the store gateway.
//!
//! Stateless, one statement per call. Borrowing and returning live in
//! `libris-circulation`; everything else the menu offers is here.

pub mod catalog;
pub mod errors;
pub mod reports;

pub use catalog::{BorrowDetail, CatalogService};
pub use errors::ServiceError;
pub use reports::{MemberTotal, OverdueBorrow, ReportService, TopBook};
