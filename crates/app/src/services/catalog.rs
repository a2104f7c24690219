use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use libris_catalog::book::validate_stock;
use libris_catalog::member::validate_email;
use libris_catalog::schema::{self, books, borrow_records, members};
use libris_catalog::{Book, BorrowRecord, Member, NewBook, NewMember};
use libris_core::{BookId, DomainError, MemberId, Row, from_row, to_row};
use libris_store::{Filter, StoreGateway};

use super::errors::ServiceError;

/// Who borrowed what, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BorrowDetail {
    pub book_id: BookId,
    pub member_id: MemberId,
    pub borrow_date: DateTime<Utc>,
}

/// Books and members: creation, listing, search, edits, guarded deletes.
#[derive(Debug, Clone)]
pub struct CatalogService<G> {
    gateway: G,
}

fn decode_all<T: serde::de::DeserializeOwned>(rows: &[Row]) -> Result<Vec<T>, ServiceError> {
    Ok(rows.iter().map(from_row::<T>).collect::<Result<Vec<T>, _>>()?)
}

fn single_column(column: &str, value: serde_json::Value) -> Row {
    let mut row = Row::new();
    row.insert(column.to_string(), value);
    row
}

impl<G: StoreGateway> CatalogService<G> {
    pub fn new(gateway: G) -> Self {
        Self { gateway }
    }

    pub fn add_member(&self, name: &str, email: &str) -> Result<Member, ServiceError> {
        let member = NewMember {
            name: name.trim().to_string(),
            email: email.trim().to_string(),
        };
        member.validate()?;

        let inserted = self.gateway.insert(schema::MEMBERS, to_row(&member)?)?;
        let row = inserted.first().ok_or(ServiceError::Rejected("member"))?;
        let member: Member = from_row(row)?;
        tracing::info!(member_id = %member.member_id, "member added");
        Ok(member)
    }

    pub fn add_book(&self, book: NewBook) -> Result<Book, ServiceError> {
        book.validate()?;

        let inserted = self.gateway.insert(schema::BOOKS, to_row(&book)?)?;
        let row = inserted.first().ok_or(ServiceError::Rejected("book"))?;
        let book: Book = from_row(row)?;
        tracing::info!(book_id = %book.book_id, "book added");
        Ok(book)
    }

    pub fn all_books(&self) -> Result<Vec<Book>, ServiceError> {
        let mut books: Vec<Book> = decode_all(&self.gateway.select(schema::BOOKS, &Filter::all())?)?;
        books.sort_by_key(|b| b.book_id);
        Ok(books)
    }

    /// Books with at least one copy on the shelf.
    pub fn available_books(&self) -> Result<Vec<Book>, ServiceError> {
        Ok(self
            .all_books()?
            .into_iter()
            .filter(Book::is_available)
            .collect())
    }

    /// Case-insensitive substring search over author, title, and category.
    pub fn search_books(&self, key: &str) -> Result<Vec<Book>, ServiceError> {
        let needle = key.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(vec![]);
        }
        Ok(self
            .all_books()?
            .into_iter()
            .filter(|b| b.matches(&needle))
            .collect())
    }

    /// Every borrow record, open or closed.
    pub fn borrow_details(&self) -> Result<Vec<BorrowDetail>, ServiceError> {
        let records: Vec<BorrowRecord> =
            decode_all(&self.gateway.select(schema::BORROW_RECORDS, &Filter::all())?)?;
        Ok(records
            .into_iter()
            .map(|r| BorrowDetail {
                book_id: r.book_id,
                member_id: r.member_id,
                borrow_date: r.borrow_date,
            })
            .collect())
    }

    /// Delete every book no borrow record refers to.
    pub fn delete_unborrowed_books(&self) -> Result<Vec<Book>, ServiceError> {
        let filter = Filter::all().not_in(books::BOOK_ID, schema::BORROW_RECORDS, borrow_records::BOOK_ID);
        let deleted: Vec<Book> = decode_all(&self.gateway.delete(schema::BOOKS, &filter)?)?;
        tracing::info!(count = deleted.len(), "deleted unborrowed books");
        Ok(deleted)
    }

    /// Delete every member no borrow record refers to.
    pub fn delete_inactive_members(&self) -> Result<Vec<Member>, ServiceError> {
        let filter = Filter::all().not_in(
            members::MEMBER_ID,
            schema::BORROW_RECORDS,
            borrow_records::MEMBER_ID,
        );
        let deleted: Vec<Member> = decode_all(&self.gateway.delete(schema::MEMBERS, &filter)?)?;
        tracing::info!(count = deleted.len(), "deleted inactive members");
        Ok(deleted)
    }

    /// Overwrite the stock of every book titled `title`.
    ///
    /// Administrative correction: it bypasses the borrow workflow.
    pub fn update_stock(&self, title: &str, stock: i64) -> Result<Vec<Book>, ServiceError> {
        validate_stock(stock)?;
        let updated = self.gateway.update(
            schema::BOOKS,
            single_column(books::STOCK, json!(stock)),
            &Filter::all().eq(books::TITLE, title.trim()),
        )?;
        tracing::warn!(title, stock, count = updated.len(), "stock overridden");
        decode_all(&updated)
    }

    pub fn update_email(&self, member_id: MemberId, email: &str) -> Result<Member, ServiceError> {
        let email = email.trim();
        validate_email(email)?;
        let updated = self.gateway.update(
            schema::MEMBERS,
            single_column(members::EMAIL, json!(email)),
            &Filter::all().eq(members::MEMBER_ID, member_id),
        )?;
        let row = updated
            .first()
            .ok_or_else(|| DomainError::not_found("member", member_id.get()))?;
        Ok(from_row(row)?)
    }
}
