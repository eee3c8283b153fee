use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::company::{CompanyId, UserId};
use crate::domain::flow::FlowId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpenseId(pub String);

impl ExpenseId {
    pub fn generate() -> Self {
        Self(format!("EXP-{}", Uuid::new_v4()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpenseStatus {
    Draft,
    Submitted,
    PendingApproval,
    Approved,
    Rejected,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "pending_approval" => Some(Self::PendingApproval),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseCategory {
    Travel,
    Food,
    Accommodation,
    OfficeSupplies,
    Transportation,
    Entertainment,
    #[default]
    Other,
}

impl ExpenseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Travel => "travel",
            Self::Food => "food",
            Self::Accommodation => "accommodation",
            Self::OfficeSupplies => "office_supplies",
            Self::Transportation => "transportation",
            Self::Entertainment => "entertainment",
            Self::Other => "other",
        }
    }

    /// Case and separator insensitive; `None` for anything outside the list.
    pub fn parse(value: &str) -> Option<Self> {
        let category = match value.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "travel" => Self::Travel,
            "food" => Self::Food,
            "accommodation" => Self::Accommodation,
            "office_supplies" => Self::OfficeSupplies,
            "transportation" => Self::Transportation,
            "entertainment" => Self::Entertainment,
            "other" => Self::Other,
            _ => return None,
        };
        Some(category)
    }
}

/// Final action recorded for a resolved level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelAction {
    Approved,
    Rejected,
}

impl LevelAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// One entry of an expense's approval audit trail, appended per resolved level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLogEntry {
    pub level_number: u32,
    pub approver: UserId,
    pub role: String,
    pub action: LevelAction,
    pub comments: String,
    pub acted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub company_id: CompanyId,
    pub employee_id: UserId,
    pub amount: Decimal,
    pub currency: String,
    pub category: ExpenseCategory,
    pub description: String,
    pub expense_date: NaiveDate,
    pub status: ExpenseStatus,
    pub flow_id: Option<FlowId>,
    pub current_level: Option<u32>,
    pub current_approvers: Vec<UserId>,
    pub approvals: Vec<ApprovalLogEntry>,
    pub final_comments: String,
    pub submitted_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Expense {
    pub fn draft(
        company_id: CompanyId,
        employee_id: UserId,
        amount: Decimal,
        currency: &str,
        category: ExpenseCategory,
        description: impl Into<String>,
        expense_date: NaiveDate,
    ) -> Result<Self, DomainError> {
        if amount.is_sign_negative() {
            return Err(DomainError::InvariantViolation(format!(
                "expense amount must not be negative, got {amount}"
            )));
        }
        let currency = currency.trim().to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_alphabetic()) {
            return Err(DomainError::InvariantViolation(format!(
                "currency must be a three-letter code, got `{currency}`"
            )));
        }

        let now = Utc::now();
        Ok(Self {
            id: ExpenseId::generate(),
            company_id,
            employee_id,
            amount,
            currency,
            category,
            description: description.into().trim().to_owned(),
            expense_date,
            status: ExpenseStatus::Draft,
            flow_id: None,
            current_level: None,
            current_approvers: Vec::new(),
            approvals: Vec::new(),
            final_comments: String::new(),
            submitted_at: None,
            resolved_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// `Draft -> Submitted`, owned by the expense author.
    pub fn submit(&mut self) -> Result<(), DomainError> {
        if self.status != ExpenseStatus::Draft {
            return Err(DomainError::InvalidExpenseTransition {
                from: self.status,
                to: ExpenseStatus::Submitted,
            });
        }
        self.status = ExpenseStatus::Submitted;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// "Category - amount currency", as shown in listings.
    pub fn label(&self) -> String {
        format!("{} - {} {}", self.category.as_str(), self.amount, self.currency)
    }
}
