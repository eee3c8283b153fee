use serde_json::json;

use crate::commands::{approval_failure, finish, with_engine, CommandResult};
use spendflow_core::domain::company::{CompanyId, UserId};

/// Expenses waiting on `approver` at their current level.
pub fn run(company_id: &str, approver: &str) -> CommandResult {
    let company_id = CompanyId::new(company_id);
    let approver = UserId::new(approver);

    let result = with_engine("inbox", "cli", |engine| async move {
        let expenses = engine
            .service
            .pending_for_approver(&company_id, &approver)
            .await
            .map_err(|error| approval_failure(error, &engine.audit.correlation_id))?;

        let items = expenses
            .iter()
            .map(|expense| {
                json!({
                    "expense_id": expense.id,
                    "employee_id": expense.employee_id,
                    "label": expense.label(),
                    "current_level": expense.current_level,
                    "submitted_at": expense.submitted_at,
                })
            })
            .collect::<Vec<_>>();

        Ok((
            format!("{} expense(s) waiting on `{approver}`", items.len()),
            json!({ "company_id": company_id, "approver": approver, "expenses": items }),
        ))
    });

    finish("inbox", result)
}
