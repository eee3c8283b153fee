use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;

use crate::commands::{approval_failure, finish, to_data, with_engine, CommandResult};
use spendflow_core::approvals::{ApprovalError, ApprovalStore, DecisionCommand};
use spendflow_core::domain::approval::Decision;
use spendflow_core::domain::company::{CompanyId, UserId};
use spendflow_core::domain::expense::{Expense, ExpenseCategory, ExpenseId};

/// Fields of a new draft expense as typed on the command line.
#[derive(Debug, Clone)]
pub struct NewExpense {
    pub company_id: String,
    pub employee_id: String,
    pub amount: String,
    pub currency: String,
    pub category: String,
    pub description: String,
    pub date: String,
}

pub fn create(input: NewExpense) -> CommandResult {
    let draft = parse_new_expense(&input);
    let result = draft.and_then(|expense| {
        with_engine("expense create", &input.employee_id, |engine| async move {
            engine
                .service
                .store()
                .save_expense(expense.clone())
                .await
                .map_err(|error| {
                    approval_failure(ApprovalError::from(error), &engine.audit.correlation_id)
                })?;
            Ok((format!("draft `{}` created: {}", expense.id.0, expense.label()), to_data(&expense)?))
        })
    });

    finish("expense create", result)
}

pub fn submit(expense_id: &str) -> CommandResult {
    let expense_id = ExpenseId(expense_id.to_owned());
    let result = with_engine("expense submit", "cli", |engine| async move {
        let outcome = engine
            .service
            .submit_expense(&expense_id, &engine.audit)
            .await
            .map_err(|error| approval_failure(error, &engine.audit.correlation_id))?;

        let statuses =
            outcome.statuses.iter().map(|status| status.as_str()).collect::<Vec<_>>();
        Ok((
            format!(
                "`{}` is awaiting level 1 ({})",
                outcome.expense.id.0,
                approver_list(&outcome.expense.current_approvers)
            ),
            json!({
                "expense_id": outcome.expense.id,
                "status": outcome.expense.status.as_str(),
                "statuses": statuses,
                "current_level": outcome.expense.current_level,
                "current_approvers": outcome.expense.current_approvers,
                "requests_created": outcome.rows.len(),
            }),
        ))
    });

    finish("expense submit", result)
}

pub fn decide(
    expense_id: &str,
    approver: &str,
    decision: Decision,
    comment: Option<String>,
    level: Option<u32>,
) -> CommandResult {
    let command = DecisionCommand {
        expense_id: ExpenseId(expense_id.to_owned()),
        approver: UserId::new(approver),
        decision,
        comments: comment.unwrap_or_default(),
        level,
    };

    let result = with_engine("expense decide", approver, |engine| async move {
        let outcome = engine
            .service
            .record_decision(command, &engine.audit)
            .await
            .map_err(|error| approval_failure(error, &engine.audit.correlation_id))?;

        let expense = &outcome.expense;
        let message = match expense.current_level {
            Some(level) if !expense.status.is_terminal() => {
                format!("`{}` is awaiting level {level}", expense.id.0)
            }
            _ => format!("`{}` is {}", expense.id.0, expense.status.as_str()),
        };
        Ok((
            message,
            json!({
                "expense_id": expense.id,
                "status": expense.status.as_str(),
                "current_level": expense.current_level,
                "current_approvers": expense.current_approvers,
                "level_resolution": outcome.resolution,
                "rows_changed": outcome.changed_rows.len(),
            }),
        ))
    });

    finish("expense decide", result)
}

pub fn status(expense_id: &str) -> CommandResult {
    let expense_id = ExpenseId(expense_id.to_owned());
    let result = with_engine("expense status", "cli", |engine| async move {
        let plan = engine
            .service
            .approval_plan(&expense_id)
            .await
            .map_err(|error| approval_failure(error, &engine.audit.correlation_id))?;
        let expense = engine
            .service
            .store()
            .load_expense(&expense_id)
            .await
            .map_err(|error| approval_failure(error.into(), &engine.audit.correlation_id))?
            .ok_or_else(|| {
                approval_failure(
                    ApprovalError::ExpenseNotFound { expense_id: expense_id.clone() },
                    &engine.audit.correlation_id,
                )
            })?;

        Ok((
            format!("`{}` is {}", expense.id.0, expense.status.as_str()),
            json!({
                "status": expense.status.as_str(),
                "expense": to_data(&expense)?,
                "plan": to_data(&plan)?,
            }),
        ))
    });

    finish("expense status", result)
}

fn parse_new_expense(input: &NewExpense) -> Result<Expense, (&'static str, String, u8)> {
    let amount = Decimal::from_str(input.amount.trim())
        .map_err(|error| ("bad_request", format!("invalid amount `{}`: {error}", input.amount), 7u8))?;
    let date = NaiveDate::parse_from_str(input.date.trim(), "%Y-%m-%d").map_err(|error| {
        ("bad_request", format!("invalid date `{}` (expected YYYY-MM-DD): {error}", input.date), 7u8)
    })?;
    let category = ExpenseCategory::parse(&input.category).ok_or_else(|| {
        ("bad_request", format!("unknown category `{}`", input.category), 7u8)
    })?;

    Expense::draft(
        CompanyId::new(input.company_id.trim()),
        UserId::new(input.employee_id.trim()),
        amount,
        &input.currency,
        category,
        input.description.as_str(),
        date,
    )
    .map_err(|error| ("bad_request", error.to_string(), 7u8))
}

fn approver_list(approvers: &[UserId]) -> String {
    approvers.iter().map(|approver| approver.0.as_str()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::{parse_new_expense, NewExpense};

    fn input() -> NewExpense {
        NewExpense {
            company_id: "acme".to_owned(),
            employee_id: "emp-1".to_owned(),
            amount: "125.40".to_owned(),
            currency: "usd".to_owned(),
            category: "travel".to_owned(),
            description: "Taxi to airport".to_owned(),
            date: "2026-10-01".to_owned(),
        }
    }

    #[test]
    fn parses_a_draft_expense() {
        let expense = parse_new_expense(&input()).expect("valid input");
        assert_eq!(expense.currency, "USD");
        assert_eq!(expense.amount.to_string(), "125.40");
        assert_eq!(expense.status.as_str(), "draft");
    }

    #[test]
    fn rejects_unparseable_amount_and_date() {
        let mut bad_amount = input();
        bad_amount.amount = "twelve".to_owned();
        assert_eq!(parse_new_expense(&bad_amount).map(|_| ()).unwrap_err().0, "bad_request");

        let mut bad_date = input();
        bad_date.date = "01/10/2026".to_owned();
        let error = parse_new_expense(&bad_date).map(|_| ()).unwrap_err();
        assert!(error.1.contains("YYYY-MM-DD"));
    }

    #[test]
    fn unknown_category_is_refused() {
        let mut typo = input();
        typo.category = "travle".to_owned();
        let error = parse_new_expense(&typo).map(|_| ()).unwrap_err();
        assert_eq!(error.0, "bad_request");
        assert!(error.1.contains("travle"));

        let mut spaced = input();
        spaced.category = "Office Supplies".to_owned();
        let expense = parse_new_expense(&spaced).expect("known category");
        assert_eq!(expense.category.as_str(), "office_supplies");
    }

    #[test]
    fn negative_amount_is_refused_by_the_domain() {
        let mut negative = input();
        negative.amount = "-4.00".to_owned();
        assert_eq!(parse_new_expense(&negative).map(|_| ()).unwrap_err().2, 7);
    }
}
