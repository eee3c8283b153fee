use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use spendflow_core::approvals::{ApprovalCommit, ApprovalStore, StoreError};
use spendflow_core::domain::approval::{ApprovalRequest, ApprovalStatus};
use spendflow_core::domain::company::{CompanyId, UserId};
use spendflow_core::domain::expense::{Expense, ExpenseId};
use spendflow_core::domain::flow::{ApprovalFlow, FlowId};

#[derive(Default)]
struct MemoryState {
    flows: HashMap<String, ApprovalFlow>,
    expenses: HashMap<String, Expense>,
    requests: HashMap<String, ApprovalRequest>,
}

/// Store for tests and embedding. A single write lock makes each commit
/// atomic.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    state: RwLock<MemoryState>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn save_flow(&self, flow: ApprovalFlow) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if flow.is_active {
            for other in state.flows.values_mut() {
                if other.company_id == flow.company_id && other.id != flow.id && other.is_active {
                    other.is_active = false;
                    other.updated_at = flow.updated_at;
                }
            }
        }
        state.flows.insert(flow.id.0.clone(), flow);
        Ok(())
    }

    async fn load_active_flow(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<ApprovalFlow>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .flows
            .values()
            .find(|flow| flow.is_active && &flow.company_id == company_id)
            .cloned())
    }

    async fn load_flow(&self, flow_id: &FlowId) -> Result<Option<ApprovalFlow>, StoreError> {
        let state = self.state.read().await;
        Ok(state.flows.get(&flow_id.0).cloned())
    }

    async fn save_expense(&self, expense: Expense) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.expenses.insert(expense.id.0.clone(), expense);
        Ok(())
    }

    async fn load_expense(&self, expense_id: &ExpenseId) -> Result<Option<Expense>, StoreError> {
        let state = self.state.read().await;
        Ok(state.expenses.get(&expense_id.0).cloned())
    }

    async fn load_approval_requests(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<ApprovalRequest>, StoreError> {
        let state = self.state.read().await;
        let mut rows = state
            .requests
            .values()
            .filter(|row| &row.expense_id == expense_id)
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| {
            a.level_number.cmp(&b.level_number).then_with(|| a.approver.cmp(&b.approver))
        });
        Ok(rows)
    }

    async fn list_active_requests_for_approver(
        &self,
        company_id: &CompanyId,
        approver: &UserId,
    ) -> Result<Vec<ApprovalRequest>, StoreError> {
        let state = self.state.read().await;
        let mut rows = state
            .requests
            .values()
            .filter(|row| {
                &row.company_id == company_id
                    && &row.approver == approver
                    && row.is_active
                    && row.status == ApprovalStatus::Pending
            })
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| {
            a.created_at.cmp(&b.created_at).then_with(|| a.expense_id.0.cmp(&b.expense_id.0))
        });
        Ok(rows)
    }

    async fn commit(&self, commit: ApprovalCommit) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let expense_id = &commit.expense.id;

        let actual = state.expenses.get(&expense_id.0).map(|expense| expense.version);
        if actual != Some(commit.expected_version) {
            return Err(StoreError::VersionConflict {
                expense_id: expense_id.clone(),
                expected: commit.expected_version,
                actual,
            });
        }

        for row in &commit.inserted {
            let clash = state.requests.contains_key(&row.id.0)
                || state.requests.values().any(|existing| {
                    existing.expense_id == row.expense_id
                        && existing.level_number == row.level_number
                        && existing.approver == row.approver
                });
            if clash {
                return Err(StoreError::DuplicateRow(format!(
                    "{} (level {}, approver {})",
                    row.expense_id.0, row.level_number, row.approver
                )));
            }
        }
        if let Some(missing) =
            commit.updated.iter().find(|row| !state.requests.contains_key(&row.id.0))
        {
            return Err(StoreError::Backend(format!(
                "approval row `{}` does not exist",
                missing.id.0
            )));
        }

        for row in commit.inserted.into_iter().chain(commit.updated) {
            state.requests.insert(row.id.0.clone(), row);
        }
        let key = commit.expense.id.0.clone();
        state.expenses.insert(key, commit.expense);
        Ok(())
    }
}
