pub mod projector;
pub mod rules;
pub mod sequencer;
pub mod service;
pub mod store;

use thiserror::Error;

use crate::domain::company::{CompanyId, UserId};
use crate::domain::expense::{ExpenseId, ExpenseStatus};
use crate::domain::flow::{FlowId, FlowValidationError};

pub use projector::{LevelResolution, StatusProjector};
pub use rules::{evaluate_level, required_approvals, LevelEvaluation, LevelOutcome};
pub use sequencer::{
    ApprovalSequencer, ApprovalState, DecisionCommand, DecisionOutcome, DecisionPolicy,
    SubmissionOutcome,
};
pub use service::ApprovalService;
pub use store::{ApprovalCommit, ApprovalStore, StoreError};

/// Reasons the engine refuses a submission or a decision. Every refusal
/// leaves the stored expense and its rows untouched.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("expense `{}` is at level {current}, not level {requested}", expense_id.0)]
    InvalidLevel { expense_id: ExpenseId, current: u32, requested: u32 },
    #[error("`{approver}` is not an approver of level {level} for expense `{}`", expense_id.0)]
    NotEligibleApprover { expense_id: ExpenseId, level: u32, approver: UserId },
    #[error("`{approver}` already acted on level {level} of expense `{}`", expense_id.0)]
    DuplicateAction { expense_id: ExpenseId, level: u32, approver: UserId },
    #[error("expense `{}` is already {}", expense_id.0, status.as_str())]
    AlreadyFinalized { expense_id: ExpenseId, status: ExpenseStatus },
    #[error("expense `{}` is already in approval", expense_id.0)]
    AlreadySubmitted { expense_id: ExpenseId },
    #[error("expense `{}` is {} and has not entered approval", expense_id.0, status.as_str())]
    NotSubmitted { expense_id: ExpenseId, status: ExpenseStatus },
    #[error("malformed approval flow: {0}")]
    MalformedFlow(#[from] FlowValidationError),
    #[error("invalid expense: {0}")]
    InvalidExpense(String),
    #[error("a comment is required when rejecting")]
    CommentRequired,
    #[error("company `{company_id}` has no active approval flow")]
    NoActiveFlow { company_id: CompanyId },
    #[error("expense `{}` not found", expense_id.0)]
    ExpenseNotFound { expense_id: ExpenseId },
    #[error("approval flow `{}` not found", flow_id.0)]
    FlowNotFound { flow_id: FlowId },
    #[error("expense `{}` was modified concurrently (expected version {expected_version})", expense_id.0)]
    ConcurrentModification { expense_id: ExpenseId, expected_version: u64 },
    #[error("approval store failure: {0}")]
    Store(String),
}

impl From<StoreError> for ApprovalError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::VersionConflict { expense_id, expected, .. } => {
                Self::ConcurrentModification { expense_id, expected_version: expected }
            }
            StoreError::DuplicateRow(_) | StoreError::Backend(_) => Self::Store(error.to_string()),
        }
    }
}
