pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;

pub use approvals::{
    ApprovalError, ApprovalSequencer, ApprovalService, ApprovalState, ApprovalStore,
    DecisionCommand, DecisionOutcome, DecisionPolicy, StoreError, SubmissionOutcome,
};
pub use domain::approval::{ApprovalRequest, ApprovalRequestId, ApprovalStatus, Decision};
pub use domain::company::{CompanyId, UserId};
pub use domain::expense::{Expense, ExpenseCategory, ExpenseId, ExpenseStatus};
pub use domain::flow::{ApprovalFlow, ApprovalRule, FlowDraft, FlowId, Level};
pub use errors::{ApplicationError, DomainError, InterfaceError};
