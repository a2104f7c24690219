//! Store construction: the in-memory store with its report procedures, or a
//! PostgreSQL connection.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use libris_catalog::schema::{self, books, borrow_records, members, procedures};
use libris_catalog::{Book, BorrowRecord, Member, NewBook};
use libris_core::{BookId, Clock, MemberId, Row, SystemClock, from_row, to_row};
use libris_store::{InMemoryStore, Snapshot, StoreError, StoreGateway};

use crate::config::{Config, StoreBackend};
use crate::services::{CatalogService, MemberTotal, OverdueBorrow, ServiceError, TopBook};

/// Open the store `config` selects.
pub fn open(config: &Config) -> Result<Arc<dyn StoreGateway>, ServiceError> {
    match config.store {
        StoreBackend::Memory => {
            let store: Arc<dyn StoreGateway> = Arc::new(memory_store(config.loan_days));
            if config.seed_demo {
                seed_demo(&CatalogService::new(store.clone()))?;
            }
            tracing::info!(loan_days = config.loan_days, "using in-memory store");
            Ok(store)
        }
        StoreBackend::Postgres => connect_postgres(config),
    }
}

#[cfg(feature = "postgres")]
fn connect_postgres(config: &Config) -> Result<Arc<dyn StoreGateway>, ServiceError> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| StoreError::Unavailable("no database url configured".to_string()))?;
    let store = libris_store::PostgresStore::connect(url, config.max_connections)?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
fn connect_postgres(_config: &Config) -> Result<Arc<dyn StoreGateway>, ServiceError> {
    Err(StoreError::Unavailable("built without postgres support".to_string()).into())
}

/// In-memory store with the library collections and report procedures.
pub fn memory_store(loan_days: u32) -> InMemoryStore {
    memory_store_with_clock(loan_days, SystemClock)
}

/// Like [`memory_store`], with `clock` deciding what is overdue.
pub fn memory_store_with_clock<C: Clock + 'static>(loan_days: u32, clock: C) -> InMemoryStore {
    InMemoryStore::new()
        .with_collection(schema::BOOKS, books::BOOK_ID)
        .with_collection(schema::MEMBERS, members::MEMBER_ID)
        .with_collection(schema::BORROW_RECORDS, borrow_records::RECORD_ID)
        .with_procedure(procedures::TOP_5_BOOKS, top_5_books)
        .with_procedure(procedures::OVERDUE, move |snapshot| {
            overdue(snapshot, clock.now(), loan_days)
        })
        .with_procedure(procedures::BORROWED_BOOKS, borrowed_books)
}

/// A small catalog to explore the menu with.
pub fn seed_demo<G: StoreGateway>(catalog: &CatalogService<G>) -> Result<(), ServiceError> {
    let titles = [
        ("Dune", "Frank Herbert", "Science Fiction", 3),
        ("Emma", "Jane Austen", "Classic", 2),
        ("The Hobbit", "J. R. R. Tolkien", "Fantasy", 1),
        ("Neuromancer", "William Gibson", "Science Fiction", 0),
    ];
    for (title, author, category, stock) in titles {
        catalog.add_book(NewBook {
            title: title.to_string(),
            author: author.to_string(),
            category: category.to_string(),
            stock,
        })?;
    }
    catalog.add_member("Ada Lovelace", "ada@example.org")?;
    catalog.add_member("Alan Turing", "alan@example.org")?;
    tracing::info!("seeded demo catalog");
    Ok(())
}

fn decode<T: DeserializeOwned>(snapshot: &Snapshot<'_>, collection: &str) -> Vec<T> {
    snapshot
        .rows(collection)
        .into_iter()
        .filter_map(|row| match from_row(row) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(collection, error = %err, "skipping malformed row in report");
                None
            }
        })
        .collect()
}

fn encode<T: Serialize>(items: Vec<T>) -> Vec<Row> {
    items
        .iter()
        .filter_map(|item| match to_row(item) {
            Ok(row) => Some(row),
            Err(err) => {
                tracing::warn!(error = %err, "dropping report row that failed to encode");
                None
            }
        })
        .collect()
}

fn titles(snapshot: &Snapshot<'_>) -> HashMap<BookId, String> {
    decode::<Book>(snapshot, schema::BOOKS)
        .into_iter()
        .map(|b| (b.book_id, b.title))
        .collect()
}

fn names(snapshot: &Snapshot<'_>) -> HashMap<MemberId, String> {
    decode::<Member>(snapshot, schema::MEMBERS)
        .into_iter()
        .map(|m| (m.member_id, m.name))
        .collect()
}

fn top_5_books(snapshot: &Snapshot<'_>) -> Vec<Row> {
    let titles = titles(snapshot);
    let mut counts: HashMap<BookId, i64> = HashMap::new();
    for record in decode::<BorrowRecord>(snapshot, schema::BORROW_RECORDS) {
        *counts.entry(record.book_id).or_default() += 1;
    }

    let mut top: Vec<TopBook> = counts
        .into_iter()
        .filter_map(|(book_id, borrow_count)| {
            Some(TopBook {
                title: titles.get(&book_id)?.clone(),
                borrow_count,
            })
        })
        .collect();
    top.sort_by(|a, b| {
        b.borrow_count
            .cmp(&a.borrow_count)
            .then_with(|| a.title.cmp(&b.title))
    });
    top.truncate(5);
    encode(top)
}

fn overdue(snapshot: &Snapshot<'_>, now: DateTime<Utc>, loan_days: u32) -> Vec<Row> {
    let titles = titles(snapshot);
    let names = names(snapshot);

    let mut late: Vec<OverdueBorrow> = decode::<BorrowRecord>(snapshot, schema::BORROW_RECORDS)
        .into_iter()
        .filter(BorrowRecord::is_open)
        .filter_map(|record| {
            let overdue_days = (now - record.borrow_date).num_days() - i64::from(loan_days);
            if overdue_days <= 0 {
                return None;
            }
            Some(OverdueBorrow {
                name: names.get(&record.member_id)?.clone(),
                title: titles.get(&record.book_id)?.clone(),
                overdue_days,
            })
        })
        .collect();
    late.sort_by(|a, b| {
        b.overdue_days
            .cmp(&a.overdue_days)
            .then_with(|| a.name.cmp(&b.name))
    });
    encode(late)
}

fn borrowed_books(snapshot: &Snapshot<'_>) -> Vec<Row> {
    let names = names(snapshot);
    let mut counts: HashMap<MemberId, i64> = HashMap::new();
    for record in decode::<BorrowRecord>(snapshot, schema::BORROW_RECORDS) {
        *counts.entry(record.member_id).or_default() += 1;
    }

    let mut totals: Vec<MemberTotal> = counts
        .into_iter()
        .filter_map(|(member_id, total_books)| {
            Some(MemberTotal {
                name: names.get(&member_id)?.clone(),
                total_books,
            })
        })
        .collect();
    totals.sort_by(|a, b| {
        b.total_books
            .cmp(&a.total_books)
            .then_with(|| a.name.cmp(&b.name))
    });
    encode(totals)
}
