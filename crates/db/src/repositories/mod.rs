use thiserror::Error;

use spendflow_core::approvals::StoreError;

pub mod approval;
pub mod memory;

pub use approval::SqlApprovalStore;
pub use memory::InMemoryApprovalStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        StoreError::Backend(error.to_string())
    }
}
