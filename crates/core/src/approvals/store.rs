use async_trait::async_trait;
use thiserror::Error;

use crate::domain::approval::ApprovalRequest;
use crate::domain::company::{CompanyId, UserId};
use crate::domain::expense::{Expense, ExpenseId};
use crate::domain::flow::{ApprovalFlow, FlowId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("expense `{}` changed concurrently: expected version {expected}, found {actual:?}", expense_id.0)]
    VersionConflict { expense_id: ExpenseId, expected: u64, actual: Option<u64> },
    #[error("approval row `{0}` already exists")]
    DuplicateRow(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Everything one engine transition writes. Stores apply it all-or-nothing
/// and only if the stored expense is still at `expected_version`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalCommit {
    pub expense: Expense,
    pub expected_version: u64,
    /// Rows created by this transition (submission only).
    pub inserted: Vec<ApprovalRequest>,
    /// Rows whose status, activation or audit tag moved.
    pub updated: Vec<ApprovalRequest>,
}

/// Storage seam of the approval engine.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Persists a flow. Saving an active flow deactivates any other active
    /// flow of the same company; deactivated flows remain loadable by id.
    async fn save_flow(&self, flow: ApprovalFlow) -> Result<(), StoreError>;

    async fn load_active_flow(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<ApprovalFlow>, StoreError>;

    async fn load_flow(&self, flow_id: &FlowId) -> Result<Option<ApprovalFlow>, StoreError>;

    /// Creates or replaces an expense as authored by its employee.
    async fn save_expense(&self, expense: Expense) -> Result<(), StoreError>;

    async fn load_expense(&self, expense_id: &ExpenseId) -> Result<Option<Expense>, StoreError>;

    /// Rows for one expense, ordered by level then approver.
    async fn load_approval_requests(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<ApprovalRequest>, StoreError>;

    /// Active, pending rows assigned to `approver` within a company.
    async fn list_active_requests_for_approver(
        &self,
        company_id: &CompanyId,
        approver: &UserId,
    ) -> Result<Vec<ApprovalRequest>, StoreError>;

    async fn commit(&self, commit: ApprovalCommit) -> Result<(), StoreError>;
}
