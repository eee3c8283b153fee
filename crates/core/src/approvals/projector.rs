use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::approvals::sequencer::ApprovalState;
use crate::domain::company::UserId;
use crate::domain::expense::{ApprovalLogEntry, Expense, ExpenseStatus, LevelAction};
use crate::domain::flow::ApprovalFlow;

/// How a level was closed, as seen by the expense's audit trail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelResolution {
    pub level_number: u32,
    pub role: String,
    pub action: LevelAction,
    pub decided_by: UserId,
    pub comments: String,
    pub rule_applied: Option<String>,
}

/// Maps sequencer state onto the expense's visible status, current approver
/// set and approval log.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusProjector;

impl StatusProjector {
    pub fn visible_status(state: &ApprovalState) -> ExpenseStatus {
        match state {
            ApprovalState::NotSubmitted => ExpenseStatus::Submitted,
            ApprovalState::AwaitingLevel(_) => ExpenseStatus::PendingApproval,
            ApprovalState::Approved => ExpenseStatus::Approved,
            ApprovalState::Rejected => ExpenseStatus::Rejected,
        }
    }

    pub fn project(
        &self,
        expense: &mut Expense,
        flow: &ApprovalFlow,
        state: &ApprovalState,
        resolution: Option<&LevelResolution>,
        now: DateTime<Utc>,
    ) {
        if let Some(resolution) = resolution {
            expense.approvals.push(ApprovalLogEntry {
                level_number: resolution.level_number,
                approver: resolution.decided_by.clone(),
                role: resolution.role.clone(),
                action: resolution.action,
                comments: resolution.comments.clone(),
                acted_at: now,
            });
        }

        expense.status = Self::visible_status(state);
        match state {
            ApprovalState::NotSubmitted => {
                expense.current_level = None;
                expense.current_approvers.clear();
            }
            ApprovalState::AwaitingLevel(level_number) => {
                expense.current_level = Some(*level_number);
                expense.current_approvers = flow
                    .level(*level_number)
                    .map(|level| level.eligible_approvers())
                    .unwrap_or_default();
            }
            ApprovalState::Approved | ApprovalState::Rejected => {
                expense.current_level = None;
                expense.current_approvers.clear();
                expense.resolved_at = Some(now);
                if let Some(resolution) = resolution {
                    if *state == ApprovalState::Rejected || !resolution.comments.is_empty() {
                        expense.final_comments = resolution.comments.clone();
                    }
                }
            }
        }

        expense.version += 1;
        expense.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use super::{LevelResolution, StatusProjector};
    use crate::approvals::sequencer::ApprovalState;
    use crate::domain::company::{CompanyId, UserId};
    use crate::domain::expense::{Expense, ExpenseCategory, ExpenseStatus, LevelAction};
    use crate::domain::flow::{ApprovalFlow, ApprovalRule, FlowId, Level};

    fn flow() -> ApprovalFlow {
        ApprovalFlow {
            id: FlowId("FLOW-1".to_owned()),
            company_id: CompanyId::new("acme"),
            name: "Standard".to_owned(),
            description: None,
            levels: vec![
                Level {
                    level_number: 1,
                    role: "Manager".to_owned(),
                    approvers: vec![UserId::new("mgr")],
                    rule: ApprovalRule::All,
                },
                Level {
                    level_number: 2,
                    role: "Finance".to_owned(),
                    approvers: vec![UserId::new("fin-1")],
                    rule: ApprovalRule::Specific { approver: UserId::new("cfo") },
                },
            ],
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn expense() -> Expense {
        Expense::draft(
            CompanyId::new("acme"),
            UserId::new("emp"),
            Decimal::new(4_000, 2),
            "EUR",
            ExpenseCategory::Food,
            "Team lunch",
            NaiveDate::from_ymd_opt(2026, 5, 2).expect("valid date"),
        )
        .expect("valid draft")
    }

    #[test]
    fn awaiting_level_exposes_next_approvers() {
        let mut expense = expense();
        StatusProjector.project(&mut expense, &flow(), &ApprovalState::AwaitingLevel(2), None, Utc::now());

        assert_eq!(expense.status, ExpenseStatus::PendingApproval);
        assert_eq!(expense.current_level, Some(2));
        assert_eq!(expense.current_approvers, vec![UserId::new("fin-1"), UserId::new("cfo")]);
        assert_eq!(expense.version, 1);
        assert!(expense.approvals.is_empty());
    }

    #[test]
    fn rejection_clears_approvers_and_logs_the_level() {
        let mut expense = expense();
        let now = Utc::now();
        let resolution = LevelResolution {
            level_number: 1,
            role: "Manager".to_owned(),
            action: LevelAction::Rejected,
            decided_by: UserId::new("mgr"),
            comments: "not a business expense".to_owned(),
            rule_applied: Some("ALL_REJECTED_BY_ANY".to_owned()),
        };

        StatusProjector.project(&mut expense, &flow(), &ApprovalState::Rejected, Some(&resolution), now);

        assert_eq!(expense.status, ExpenseStatus::Rejected);
        assert!(expense.current_approvers.is_empty());
        assert_eq!(expense.current_level, None);
        assert_eq!(expense.resolved_at, Some(now));
        assert_eq!(expense.final_comments, "not a business expense");
        assert_eq!(expense.approvals.len(), 1);
        assert_eq!(expense.approvals[0].role, "Manager");
        assert_eq!(expense.approvals[0].action, LevelAction::Rejected);
    }
}
