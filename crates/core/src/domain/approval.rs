use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::company::{CompanyId, UserId};
use crate::domain::expense::ExpenseId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalRequestId(pub String);

impl ApprovalRequestId {
    pub fn generate() -> Self {
        Self(format!("APR-{}", Uuid::new_v4()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Skipped,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// An approver's vote on one level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn as_status(&self) -> ApprovalStatus {
        match self {
            Self::Approve => ApprovalStatus::Approved,
            Self::Reject => ApprovalStatus::Rejected,
        }
    }
}

/// Execution record for one approver at one level of one expense.
///
/// Identity columns (`expense_id`, `level_number`, `approver`) never change
/// after creation; only status, comments, timestamps, activation and the rule
/// audit tag move.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalRequestId,
    pub expense_id: ExpenseId,
    pub company_id: CompanyId,
    pub approver: UserId,
    pub approver_role: String,
    pub level_number: u32,
    pub status: ApprovalStatus,
    pub comments: String,
    pub action_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub rule_applied: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn pending(
        expense_id: ExpenseId,
        company_id: CompanyId,
        approver: UserId,
        approver_role: impl Into<String>,
        level_number: u32,
        is_active: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ApprovalRequestId::generate(),
            expense_id,
            company_id,
            approver,
            approver_role: approver_role.into(),
            level_number,
            status: ApprovalStatus::Pending,
            comments: String::new(),
            action_at: None,
            is_active,
            rule_applied: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn record(&mut self, decision: Decision, comments: &str, now: DateTime<Utc>) {
        self.status = decision.as_status();
        self.comments = comments.trim().to_owned();
        self.action_at = Some(now);
        self.is_active = false;
        self.updated_at = now;
    }

    pub fn skip(&mut self, now: DateTime<Utc>) {
        self.status = ApprovalStatus::Skipped;
        self.is_active = false;
        self.updated_at = now;
    }
}
