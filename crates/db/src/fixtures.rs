use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;

use spendflow_core::approvals::{ApprovalStore, StoreError};
use spendflow_core::domain::company::{CompanyId, UserId};
use spendflow_core::domain::expense::{Expense, ExpenseCategory, ExpenseId};
use spendflow_core::domain::flow::{ApprovalFlow, ApprovalRule, FlowId, Level};

pub const DEMO_COMPANY_ID: &str = "acme";
pub const DEMO_FLOW_ID: &str = "FLOW-DEMO-STANDARD";

const SEED_EXPENSES: &[SeedExpenseContract] = &[
    SeedExpenseContract {
        expense_id: "EXP-DEMO-001",
        employee_id: "emp-olivia",
        amount_cents: 42_000,
        currency: "USD",
        category: ExpenseCategory::Travel,
        description: "Flight to the Berlin customer workshop",
        expense_date: (2026, 9, 14),
    },
    SeedExpenseContract {
        expense_id: "EXP-DEMO-002",
        employee_id: "emp-noah",
        amount_cents: 3_850,
        currency: "USD",
        category: ExpenseCategory::Food,
        description: "Team lunch after release",
        expense_date: (2026, 9, 22),
    },
    SeedExpenseContract {
        expense_id: "EXP-DEMO-003",
        employee_id: "emp-olivia",
        amount_cents: 61_000,
        currency: "EUR",
        category: ExpenseCategory::Accommodation,
        description: "Hotel, three nights",
        expense_date: (2026, 9, 15),
    },
];

struct SeedExpenseContract {
    expense_id: &'static str,
    employee_id: &'static str,
    amount_cents: i64,
    currency: &'static str,
    category: ExpenseCategory,
    description: &'static str,
    expense_date: (i32, u32, u32),
}

/// Demo company with a three-level flow and draft expenses, for trying the
/// CLI against a fresh database.
///
/// Loading is idempotent: the flow is upserted and expenses that already
/// exist are left as they are, so progress made on them survives a reseed.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub fn flow() -> ApprovalFlow {
        let now = Utc::now();
        let users = |ids: &[&str]| ids.iter().map(|id| UserId::new(*id)).collect::<Vec<_>>();
        ApprovalFlow {
            id: FlowId(DEMO_FLOW_ID.to_owned()),
            company_id: CompanyId::new(DEMO_COMPANY_ID),
            name: "Standard expense approval".to_owned(),
            description: Some("Manager, then finance, then the CFO".to_owned()),
            levels: vec![
                Level {
                    level_number: 1,
                    role: "Manager".to_owned(),
                    approvers: users(&["mgr-alice", "mgr-bob"]),
                    rule: ApprovalRule::Any,
                },
                Level {
                    level_number: 2,
                    role: "Finance".to_owned(),
                    approvers: users(&["fin-carol", "fin-dan", "fin-erin"]),
                    rule: ApprovalRule::Percentage { threshold: Decimal::from(60) },
                },
                Level {
                    level_number: 3,
                    role: "Director".to_owned(),
                    approvers: users(&["dir-frank"]),
                    rule: ApprovalRule::Specific { approver: UserId::new("cfo-grace") },
                },
            ],
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn load<S: ApprovalStore + ?Sized>(store: &S) -> Result<SeedResult, StoreError> {
        let flow = Self::flow();
        flow.validate().map_err(|error| StoreError::Backend(error.to_string()))?;
        store.save_flow(flow).await?;

        let mut expenses_created = Vec::new();
        for seed in SEED_EXPENSES {
            let expense_id = ExpenseId(seed.expense_id.to_owned());
            if store.load_expense(&expense_id).await?.is_some() {
                continue;
            }
            store.save_expense(seed.to_expense()?).await?;
            expenses_created.push(seed.expense_id);
        }

        Ok(SeedResult {
            company_id: DEMO_COMPANY_ID,
            flow_id: DEMO_FLOW_ID,
            expense_ids: SEED_EXPENSES.iter().map(|seed| seed.expense_id).collect(),
            expenses_created,
        })
    }

    pub async fn verify<S: ApprovalStore + ?Sized>(
        store: &S,
    ) -> Result<VerificationResult, StoreError> {
        let mut checks = Vec::new();

        let active = store.load_active_flow(&CompanyId::new(DEMO_COMPANY_ID)).await?;
        checks.push((
            DEMO_FLOW_ID,
            active.is_some_and(|flow| flow.id.0 == DEMO_FLOW_ID && flow.levels.len() == 3),
        ));

        for seed in SEED_EXPENSES {
            let stored = store.load_expense(&ExpenseId(seed.expense_id.to_owned())).await?;
            let matches = stored.is_some_and(|expense| {
                expense.company_id.0 == DEMO_COMPANY_ID
                    && expense.amount == Decimal::new(seed.amount_cents, 2)
                    && expense.currency == seed.currency
            });
            checks.push((seed.expense_id, matches));
        }

        let all_present = checks.iter().all(|(_, passed)| *passed);
        Ok(VerificationResult { all_present, checks })
    }
}

impl SeedExpenseContract {
    fn to_expense(&self) -> Result<Expense, StoreError> {
        let (year, month, day) = self.expense_date;
        let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
            StoreError::Backend(format!("invalid seed date for `{}`", self.expense_id))
        })?;
        let mut expense = Expense::draft(
            CompanyId::new(DEMO_COMPANY_ID),
            UserId::new(self.employee_id),
            Decimal::new(self.amount_cents, 2),
            self.currency,
            self.category,
            self.description,
            date,
        )
        .map_err(|error| StoreError::Backend(error.to_string()))?;
        expense.id = ExpenseId(self.expense_id.to_owned());
        Ok(expense)
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub company_id: &'static str,
    pub flow_id: &'static str,
    pub expense_ids: Vec<&'static str>,
    pub expenses_created: Vec<&'static str>,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
