//! Store Gateway: generic table/query access to the remote relational store.
//!
//! The gateway exposes read/insert/update/delete over named collections plus
//! invocation of server-side procedures. It has **no transaction primitive**;
//! callers that need multi-write consistency compensate on their own.

pub mod gateway;
pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use gateway::{Filter, Predicate, StoreError, StoreGateway, validate_identifier};
pub use in_memory::{Fault, InMemoryStore, Operation, Snapshot, StoreCall};
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

pub use libris_core::Row;
