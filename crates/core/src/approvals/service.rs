use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::approvals::sequencer::{
    ApprovalSequencer, DecisionCommand, DecisionOutcome, DecisionPolicy, SubmissionOutcome,
};
use crate::approvals::store::{ApprovalCommit, ApprovalStore};
use crate::approvals::ApprovalError;
use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::approval::{ApprovalRequest, Decision};
use crate::domain::company::{CompanyId, UserId};
use crate::domain::expense::{Expense, ExpenseId};
use crate::domain::flow::{ApprovalFlow, FlowDraft};

/// Entry point used by the approvals collaborator. Each call reads the
/// expense, applies one sequencer transition and commits it atomically;
/// a concurrent writer surfaces as `ConcurrentModification`.
pub struct ApprovalService<S> {
    store: S,
    sequencer: ApprovalSequencer,
    audit: Arc<dyn AuditSink>,
}

impl<S> ApprovalService<S>
where
    S: ApprovalStore,
{
    pub fn new(store: S, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, sequencer: ApprovalSequencer::default(), audit }
    }

    pub fn with_policy(mut self, policy: DecisionPolicy) -> Self {
        self.sequencer = ApprovalSequencer::new(policy);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn create_flow(
        &self,
        company_id: CompanyId,
        draft: FlowDraft,
        audit: &AuditContext,
    ) -> Result<ApprovalFlow, ApprovalError> {
        let flow = draft.into_flow(company_id)?;
        self.store.save_flow(flow.clone()).await?;

        info!(
            event_name = "approval.flow.created",
            correlation_id = %audit.correlation_id,
            company_id = %flow.company_id,
            flow_id = %flow.id.0,
            levels = flow.levels.len(),
            "approval flow activated"
        );
        self.audit.emit(
            AuditEvent::new(
                None,
                audit,
                "approval.flow_activated",
                AuditCategory::Flow,
                AuditOutcome::Success,
            )
            .with_metadata("company_id", flow.company_id.0.clone())
            .with_metadata("flow_id", flow.id.0.clone()),
        );

        Ok(flow)
    }

    pub async fn submit_expense(
        &self,
        expense_id: &ExpenseId,
        audit: &AuditContext,
    ) -> Result<SubmissionOutcome, ApprovalError> {
        let expense = self.require_expense(expense_id).await?;
        let flow = self
            .store
            .load_active_flow(&expense.company_id)
            .await?
            .ok_or_else(|| ApprovalError::NoActiveFlow { company_id: expense.company_id.clone() })?;

        let expected_version = expense.version;
        let outcome = match self.sequencer.submit(expense, &flow, Utc::now()) {
            Ok(outcome) => outcome,
            Err(error) => {
                self.emit_rejection(expense_id, audit, "submit", &error);
                return Err(error);
            }
        };

        self.store
            .commit(ApprovalCommit {
                expense: outcome.expense.clone(),
                expected_version,
                inserted: outcome.rows.clone(),
                updated: Vec::new(),
            })
            .await?;

        info!(
            event_name = "approval.expense.submitted",
            correlation_id = %audit.correlation_id,
            expense_id = %expense_id.0,
            flow_id = %flow.id.0,
            rows = outcome.rows.len(),
            "expense entered approval"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(expense_id.clone()),
                audit,
                "approval.expense_submitted",
                AuditCategory::Submission,
                AuditOutcome::Success,
            )
            .with_metadata("flow_id", flow.id.0.clone())
            .with_metadata("levels", flow.levels.len().to_string()),
        );

        Ok(outcome)
    }

    pub async fn record_decision(
        &self,
        command: DecisionCommand,
        audit: &AuditContext,
    ) -> Result<DecisionOutcome, ApprovalError> {
        let expense = self.require_expense(&command.expense_id).await?;
        let flow = self.flow_for(&expense).await?;
        let rows = self.store.load_approval_requests(&expense.id).await?;

        let expected_version = expense.version;
        let outcome = match self.sequencer.record_decision(expense, &flow, rows, &command, Utc::now())
        {
            Ok(outcome) => outcome,
            Err(error) => {
                self.emit_rejection(&command.expense_id, audit, "decide", &error);
                return Err(error);
            }
        };

        self.store
            .commit(ApprovalCommit {
                expense: outcome.expense.clone(),
                expected_version,
                inserted: Vec::new(),
                updated: outcome.changed_rows.clone(),
            })
            .await?;

        let decision = match command.decision {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
        };
        info!(
            event_name = "approval.decision.recorded",
            correlation_id = %audit.correlation_id,
            expense_id = %command.expense_id.0,
            approver = %command.approver,
            decision,
            from = ?outcome.from,
            to = ?outcome.to,
            "approval decision applied"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(command.expense_id.clone()),
                audit,
                "approval.decision_recorded",
                AuditCategory::Decision,
                AuditOutcome::Success,
            )
            .with_metadata("approver", command.approver.0.clone())
            .with_metadata("decision", decision)
            .with_metadata("from", format!("{:?}", outcome.from))
            .with_metadata("to", format!("{:?}", outcome.to)),
        );
        if let Some(resolution) = &outcome.resolution {
            self.audit.emit(
                AuditEvent::new(
                    Some(command.expense_id.clone()),
                    audit,
                    "approval.level_resolved",
                    AuditCategory::Decision,
                    AuditOutcome::Success,
                )
                .with_metadata("level", resolution.level_number.to_string())
                .with_metadata("action", resolution.action.as_str())
                .with_metadata("rule_applied", resolution.rule_applied.clone().unwrap_or_default()),
            );
        }

        Ok(outcome)
    }

    /// Full approval plan of an expense, one row per level and approver.
    pub async fn approval_plan(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        self.require_expense(expense_id).await?;
        Ok(self.store.load_approval_requests(expense_id).await?)
    }

    /// Expenses currently waiting on `approver`.
    pub async fn pending_for_approver(
        &self,
        company_id: &CompanyId,
        approver: &UserId,
    ) -> Result<Vec<Expense>, ApprovalError> {
        let rows = self.store.list_active_requests_for_approver(company_id, approver).await?;
        let mut expenses = Vec::with_capacity(rows.len());
        for row in rows {
            if expenses.iter().any(|expense: &Expense| expense.id == row.expense_id) {
                continue;
            }
            if let Some(expense) = self.store.load_expense(&row.expense_id).await? {
                expenses.push(expense);
            }
        }
        Ok(expenses)
    }

    async fn require_expense(&self, expense_id: &ExpenseId) -> Result<Expense, ApprovalError> {
        self.store
            .load_expense(expense_id)
            .await?
            .ok_or_else(|| ApprovalError::ExpenseNotFound { expense_id: expense_id.clone() })
    }

    async fn flow_for(&self, expense: &Expense) -> Result<ApprovalFlow, ApprovalError> {
        let Some(flow_id) = &expense.flow_id else {
            return Err(ApprovalError::NotSubmitted {
                expense_id: expense.id.clone(),
                status: expense.status,
            });
        };
        self.store
            .load_flow(flow_id)
            .await?
            .ok_or_else(|| ApprovalError::FlowNotFound { flow_id: flow_id.clone() })
    }

    fn emit_rejection(
        &self,
        expense_id: &ExpenseId,
        audit: &AuditContext,
        operation: &'static str,
        error: &ApprovalError,
    ) {
        warn!(
            event_name = "approval.request.rejected",
            correlation_id = %audit.correlation_id,
            expense_id = %expense_id.0,
            operation,
            error = %error,
            "approval request refused"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(expense_id.clone()),
                audit,
                "approval.decision_rejected",
                AuditCategory::Decision,
                AuditOutcome::Rejected,
            )
            .with_metadata("operation", operation)
            .with_metadata("error", error.to_string()),
        );
    }
}
