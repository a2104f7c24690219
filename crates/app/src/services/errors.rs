use thiserror::Error;

use libris_core::DomainError;
use libris_store::StoreError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The store answered a write with no rows.
    #[error("store rejected {0}")]
    Rejected(&'static str),
}
