//! Postgres-backed store gateway.
//!
//! Rows travel as JSON in both directions: reads use `to_jsonb(row)`, writes
//! go through `jsonb_populate_record`, so the gateway needs no per-table
//! mapping code. Collection and column names are validated identifiers and
//! always quoted; values are always bound.
//!
//! ## Blocking contract
//!
//! `StoreGateway` is synchronous. The store owns a current-thread tokio
//! runtime and blocks on each query, so callers never see async.
//!
//! ## Rejections
//!
//! Database-side errors (constraint or type violations) are reported the way
//! the gateway contract describes rejections: as an empty result, with a
//! warning logged. Connection and driver failures are `StoreError::Transport`.

use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};

use libris_core::Row;

use crate::gateway::{Filter, Predicate, StoreError, StoreGateway, validate_identifier};

pub struct PostgresStore {
    pool: PgPool,
    runtime: tokio::runtime::Runtime,
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("pool_size", &self.pool.size())
            .finish_non_exhaustive()
    }
}

impl PostgresStore {
    /// Connect a pool of at most `max_connections` connections.
    pub fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::Transport(format!("failed to start runtime: {e}")))?;

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .connect(database_url),
            )
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        tracing::info!(max_connections, "connected to postgres");
        Ok(Self { pool, runtime })
    }

    fn fetch(&self, mut query: QueryBuilder<'_, Postgres>, operation: &'static str) -> Result<Vec<Row>, StoreError> {
        tracing::trace!(operation, sql = query.sql(), "store query");

        let result = self.runtime.block_on(
            query
                .build_query_scalar::<Json<JsonValue>>()
                .fetch_all(&self.pool),
        );

        match result {
            Ok(values) => values
                .into_iter()
                .map(|Json(value)| match value {
                    JsonValue::Object(row) => Ok(row),
                    other => Err(StoreError::Decode(format!("expected an object, got {other}"))),
                })
                .collect(),
            Err(sqlx::Error::Database(err)) => {
                tracing::warn!(operation, error = %err, "store rejected statement");
                Ok(vec![])
            }
            Err(err) => Err(StoreError::Transport(err.to_string())),
        }
    }
}

fn quoted(name: &str) -> Result<String, StoreError> {
    validate_identifier(name).map(|n| format!("\"{n}\""))
}

fn push_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &Filter) -> Result<(), StoreError> {
    for (idx, predicate) in filter.predicates().iter().enumerate() {
        query.push(if idx == 0 { " WHERE " } else { " AND " });
        match predicate {
            Predicate::Eq { column, value } => {
                query.push(format!("to_jsonb(t.{}) = ", quoted(column)?));
                query.push_bind(Json(value.clone()));
            }
            Predicate::IsNull { column } => {
                query.push(format!("t.{} IS NULL", quoted(column)?));
            }
            Predicate::NotIn {
                column,
                collection,
                source_column,
            } => {
                let source = quoted(source_column)?;
                query.push(format!(
                    "t.{} NOT IN (SELECT s.{source} FROM {} AS s WHERE s.{source} IS NOT NULL)",
                    quoted(column)?,
                    quoted(collection)?,
                ));
            }
        }
    }
    Ok(())
}

fn column_list(row: &Row, prefix: &str) -> Result<String, StoreError> {
    let columns = row
        .keys()
        .map(|c| quoted(c).map(|q| format!("{prefix}{q}")))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns.join(", "))
}

fn select_query(collection: &str, filter: &Filter) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let mut query = QueryBuilder::new(format!("SELECT to_jsonb(t) FROM {} AS t", quoted(collection)?));
    push_filter(&mut query, filter)?;
    Ok(query)
}

fn insert_query(collection: &str, row: Row) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let table = quoted(collection)?;
    let mut query = QueryBuilder::new(format!("INSERT INTO {table} AS t"));
    if row.is_empty() {
        query.push(" DEFAULT VALUES");
    } else {
        let columns = column_list(&row, "")?;
        query.push(format!(
            " ({columns}) SELECT {columns} FROM jsonb_populate_record(NULL::{table}, "
        ));
        query.push_bind(Json(JsonValue::Object(row)));
        query.push(")");
    }
    query.push(" RETURNING to_jsonb(t)");
    Ok(query)
}

fn update_query(collection: &str, patch: Row, filter: &Filter) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let table = quoted(collection)?;
    let assignments = patch
        .keys()
        .map(|c| quoted(c).map(|q| format!("{q} = p.{q}")))
        .collect::<Result<Vec<_>, _>>()?
        .join(", ");

    let mut query = QueryBuilder::new(format!(
        "UPDATE {table} AS t SET {assignments} FROM jsonb_populate_record(NULL::{table}, "
    ));
    query.push_bind(Json(JsonValue::Object(patch)));
    query.push(") AS p");
    push_filter(&mut query, filter)?;
    query.push(" RETURNING to_jsonb(t)");
    Ok(query)
}

fn delete_query(collection: &str, filter: &Filter) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let mut query = QueryBuilder::new(format!("DELETE FROM {} AS t", quoted(collection)?));
    push_filter(&mut query, filter)?;
    query.push(" RETURNING to_jsonb(t)");
    Ok(query)
}

fn call_query(procedure: &str) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    Ok(QueryBuilder::new(format!(
        "SELECT to_jsonb(r) FROM {}() AS r",
        quoted(procedure)?
    )))
}

impl StoreGateway for PostgresStore {
    fn select(&self, collection: &str, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        self.fetch(select_query(collection, filter)?, "select")
    }

    fn insert(&self, collection: &str, row: Row) -> Result<Vec<Row>, StoreError> {
        self.fetch(insert_query(collection, row)?, "insert")
    }

    fn update(&self, collection: &str, patch: Row, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        if patch.is_empty() {
            return Ok(vec![]);
        }
        self.fetch(update_query(collection, patch, filter)?, "update")
    }

    fn delete(&self, collection: &str, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        self.fetch(delete_query(collection, filter)?, "delete")
    }

    fn call(&self, procedure: &str) -> Result<Vec<Row>, StoreError> {
        self.fetch(call_query(procedure)?, "call")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: JsonValue) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn renders_filtered_select() {
        let query = select_query(
            "borrow_records",
            &Filter::all().eq("book_id", 1).eq("member_id", 2).is_null("return_date"),
        )
        .unwrap();
        assert_eq!(
            query.sql(),
            "SELECT to_jsonb(t) FROM \"borrow_records\" AS t WHERE to_jsonb(t.\"book_id\") = $1 \
             AND to_jsonb(t.\"member_id\") = $2 AND t.\"return_date\" IS NULL"
        );
    }

    #[test]
    fn renders_insert_through_populate_record() {
        let query = insert_query("members", row(json!({"email": "a@b.c", "name": "A"}))).unwrap();
        assert_eq!(
            query.sql(),
            "INSERT INTO \"members\" AS t (\"email\", \"name\") SELECT \"email\", \"name\" \
             FROM jsonb_populate_record(NULL::\"members\", $1) RETURNING to_jsonb(t)"
        );
    }

    #[test]
    fn renders_update_with_patch_before_filter_binds() {
        let query = update_query("books", row(json!({"stock": 2})), &Filter::all().eq("book_id", 7)).unwrap();
        assert_eq!(
            query.sql(),
            "UPDATE \"books\" AS t SET \"stock\" = p.\"stock\" FROM \
             jsonb_populate_record(NULL::\"books\", $1) AS p WHERE to_jsonb(t.\"book_id\") = $2 \
             RETURNING to_jsonb(t)"
        );
    }

    #[test]
    fn renders_guarded_delete() {
        let query = delete_query(
            "books",
            &Filter::all().not_in("book_id", "borrow_records", "book_id"),
        )
        .unwrap();
        assert_eq!(
            query.sql(),
            "DELETE FROM \"books\" AS t WHERE t.\"book_id\" NOT IN (SELECT s.\"book_id\" FROM \
             \"borrow_records\" AS s WHERE s.\"book_id\" IS NOT NULL) RETURNING to_jsonb(t)"
        );
    }

    #[test]
    fn rejects_unsafe_identifiers_before_building_sql() {
        assert!(matches!(
            select_query("books; --", &Filter::all()),
            Err(StoreError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            call_query("top_5_books() --"),
            Err(StoreError::InvalidIdentifier(_))
        ));
    }
}
