//! Collection, column, and procedure names shared with the store.

pub const BOOKS: &str = "books";
pub const MEMBERS: &str = "members";
pub const BORROW_RECORDS: &str = "borrow_records";

pub mod books {
    pub const BOOK_ID: &str = "book_id";
    pub const TITLE: &str = "title";
    pub const STOCK: &str = "stock";
}

pub mod members {
    pub const MEMBER_ID: &str = "member_id";
    pub const EMAIL: &str = "email";
}

pub mod borrow_records {
    pub const RECORD_ID: &str = "record_id";
    pub const BOOK_ID: &str = "book_id";
    pub const MEMBER_ID: &str = "member_id";
    pub const RETURN_DATE: &str = "return_date";
}

/// Server-side aggregation procedures.
pub mod procedures {
    pub const TOP_5_BOOKS: &str = "top_5_books";
    pub const OVERDUE: &str = "overdue";
    pub const BORROWED_BOOKS: &str = "borrowed_books";
}
