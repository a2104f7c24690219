use serde::{Deserialize, Serialize};

use libris_core::{BookId, DomainError, DomainResult};

/// A catalogued title and the number of copies currently on the shelf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub book_id: BookId,
    pub title: String,
    pub author: String,
    pub category: String,
    pub stock: i64,
}

impl Book {
    pub fn is_available(&self) -> bool {
        self.stock > 0
    }

    /// Case-insensitive substring match on author, title, or category.
    ///
    /// `needle` must already be lowercased; a blank needle matches nothing.
    pub fn matches(&self, needle: &str) -> bool {
        if needle.trim().is_empty() {
            return false;
        }
        [&self.author, &self.title, &self.category]
            .iter()
            .any(|field| field.to_lowercase().contains(needle))
    }
}

/// Insert payload for a book; the store assigns `book_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub category: String,
    pub stock: i64,
}

impl NewBook {
    pub fn validate(&self) -> DomainResult<()> {
        if self.title.trim().is_empty() {
            return Err(DomainError::validation("title cannot be empty"));
        }
        validate_stock(self.stock)
    }
}

/// Stock is a count of physical copies and never negative.
pub fn validate_stock(stock: i64) -> DomainResult<()> {
    if stock < 0 {
        return Err(DomainError::validation("stock cannot be negative"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_book() -> Book {
        Book {
            book_id: BookId::new(1),
            title: "The Rust Programming Language".into(),
            author: "Klabnik".into(),
            category: "Programming".into(),
            stock: 2,
        }
    }

    #[test]
    fn matches_any_text_field_case_insensitively() {
        let book = sample_book();
        assert!(book.matches("klab"));
        assert!(book.matches("rust"));
        assert!(book.matches("program"));
        assert!(!book.matches("poetry"));
    }

    #[test]
    fn blank_needle_matches_nothing() {
        assert!(!sample_book().matches("  "));
    }

    #[test]
    fn new_book_rejects_negative_stock() {
        let book = NewBook {
            title: "Dune".into(),
            author: "Herbert".into(),
            category: "SF".into(),
            stock: -1,
        };
        assert!(matches!(book.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn new_book_rejects_blank_title() {
        let book = NewBook {
            title: " ".into(),
            author: "Herbert".into(),
            category: "SF".into(),
            stock: 1,
        };
        assert!(matches!(book.validate(), Err(DomainError::Validation(_))));
    }

    proptest! {
        #[test]
        fn availability_tracks_positive_stock(stock in -5i64..50) {
            let mut book = sample_book();
            book.stock = stock;
            prop_assert_eq!(book.is_available(), stock > 0);
        }
    }
}
