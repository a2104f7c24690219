use serde::{Deserialize, Serialize};

use libris_catalog::schema::procedures;
use libris_core::from_row;
use libris_store::StoreGateway;

use super::errors::ServiceError;

/// One of the most borrowed titles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopBook {
    pub title: String,
    pub borrow_count: i64,
}

/// An open borrow past its due date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverdueBorrow {
    pub name: String,
    pub title: String,
    pub overdue_days: i64,
}

/// How many books a member has borrowed over time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberTotal {
    pub name: String,
    pub total_books: i64,
}

/// Read-only reports computed by server-side procedures.
#[derive(Debug, Clone)]
pub struct ReportService<G> {
    gateway: G,
}

impl<G: StoreGateway> ReportService<G> {
    pub fn new(gateway: G) -> Self {
        Self { gateway }
    }

    pub fn top_books(&self) -> Result<Vec<TopBook>, ServiceError> {
        self.call(procedures::TOP_5_BOOKS)
    }

    pub fn overdue(&self) -> Result<Vec<OverdueBorrow>, ServiceError> {
        self.call(procedures::OVERDUE)
    }

    pub fn member_totals(&self) -> Result<Vec<MemberTotal>, ServiceError> {
        self.call(procedures::BORROWED_BOOKS)
    }

    fn call<T: serde::de::DeserializeOwned>(&self, procedure: &str) -> Result<Vec<T>, ServiceError> {
        let rows = self.gateway.call(procedure)?;
        tracing::debug!(procedure, rows = rows.len(), "report fetched");
        Ok(rows.iter().map(from_row::<T>).collect::<Result<Vec<T>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use libris_store::{InMemoryStore, StoreError};

    #[test]
    fn decodes_procedure_rows() {
        let store = InMemoryStore::new().with_procedure(procedures::TOP_5_BOOKS, |_| {
            vec![
                libris_core::to_row(&TopBook {
                    title: "Dune".into(),
                    borrow_count: 3,
                })
                .unwrap(),
            ]
        });
        let reports = ReportService::new(Arc::new(store));
        assert_eq!(
            reports.top_books().unwrap(),
            vec![TopBook {
                title: "Dune".into(),
                borrow_count: 3
            }]
        );
    }

    #[test]
    fn unknown_procedure_surfaces_as_store_error() {
        let reports = ReportService::new(InMemoryStore::new());
        assert!(matches!(
            reports.overdue(),
            Err(ServiceError::Store(StoreError::UnknownProcedure(_)))
        ));
    }
}
