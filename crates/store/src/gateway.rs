use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use libris_core::Row;

/// One condition of a [`Filter`]. All predicates of a filter must hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `column = value`
    Eq { column: String, value: JsonValue },
    /// `column IS NULL`
    IsNull { column: String },
    /// `column NOT IN (SELECT source_column FROM collection)`
    NotIn {
        column: String,
        collection: String,
        source_column: String,
    },
}

/// Conjunction of predicates selecting rows of a collection.
///
/// An empty filter selects every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.predicates.push(Predicate::Eq {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    pub fn is_null(mut self, column: impl Into<String>) -> Self {
        self.predicates.push(Predicate::IsNull {
            column: column.into(),
        });
        self
    }

    /// Keep rows whose `column` does not appear in `collection.source_column`.
    pub fn not_in(
        mut self,
        column: impl Into<String>,
        collection: impl Into<String>,
        source_column: impl Into<String>,
    ) -> Self {
        self.predicates.push(Predicate::NotIn {
            column: column.into(),
            collection: collection.into(),
            source_column: source_column.into(),
        });
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }
}

/// Store operation error.
///
/// A *rejected* write is not an error: it is reported as an empty result.
/// These variants cover everything that prevents the store from answering.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Network, driver, or connection failure.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("unknown procedure: {0}")]
    UnknownProcedure(String),

    /// Collection or column names must be plain identifiers.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("failed to decode row: {0}")]
    Decode(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Generic table/query client.
///
/// Every call is a single blocking round trip: no retries, no timeouts, no
/// transactions. Mutations return the affected rows as the store reports
/// them; an empty vector means nothing matched or the write was rejected.
pub trait StoreGateway: Send + Sync {
    fn select(&self, collection: &str, filter: &Filter) -> Result<Vec<Row>, StoreError>;

    fn insert(&self, collection: &str, row: Row) -> Result<Vec<Row>, StoreError>;

    fn update(&self, collection: &str, patch: Row, filter: &Filter) -> Result<Vec<Row>, StoreError>;

    fn delete(&self, collection: &str, filter: &Filter) -> Result<Vec<Row>, StoreError>;

    /// Invoke an argument-free server-side procedure.
    fn call(&self, procedure: &str) -> Result<Vec<Row>, StoreError>;
}

impl<G> StoreGateway for Arc<G>
where
    G: StoreGateway + ?Sized,
{
    fn select(&self, collection: &str, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        (**self).select(collection, filter)
    }

    fn insert(&self, collection: &str, row: Row) -> Result<Vec<Row>, StoreError> {
        (**self).insert(collection, row)
    }

    fn update(&self, collection: &str, patch: Row, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        (**self).update(collection, patch, filter)
    }

    fn delete(&self, collection: &str, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        (**self).delete(collection, filter)
    }

    fn call(&self, procedure: &str) -> Result<Vec<Row>, StoreError> {
        (**self).call(procedure)
    }
}

/// Accept `[A-Za-z_][A-Za-z0-9_]*` only.
pub fn validate_identifier(name: &str) -> Result<&str, StoreError> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}
