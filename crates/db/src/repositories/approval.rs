use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tracing::debug;

use spendflow_core::approvals::{ApprovalCommit, ApprovalStore, StoreError};
use spendflow_core::domain::approval::{ApprovalRequest, ApprovalRequestId, ApprovalStatus};
use spendflow_core::domain::company::{CompanyId, UserId};
use spendflow_core::domain::expense::{
    ApprovalLogEntry, Expense, ExpenseCategory, ExpenseId, ExpenseStatus, LevelAction,
};
use spendflow_core::domain::flow::{ApprovalFlow, ApprovalRule, FlowId, Level};

use super::RepositoryError;
use crate::DbPool;

const EXPENSE_COLUMNS: &str = "id, company_id, employee_id, amount, currency, category, description,
    expense_date, status, flow_id, current_level, current_approvers_json, final_comments,
    submitted_at, resolved_at, version, created_at, updated_at";

const REQUEST_COLUMNS: &str = "id, expense_id, company_id, approver, approver_role, level_number,
    status, comments, action_at, is_active, rule_applied, created_at, updated_at";

/// SQLite-backed approval store. `commit` runs in one transaction guarded by
/// the expense version column.
#[derive(Clone)]
pub struct SqlApprovalStore {
    pool: DbPool,
}

impl SqlApprovalStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn levels_for(&self, flow_id: &str) -> Result<Vec<Level>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT level_number, role, approvers_json, rule_json
             FROM approval_flow_level WHERE flow_id = ? ORDER BY level_number ASC",
        )
        .bind(flow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_level).collect()
    }

    async fn hydrate_flow(&self, row: &SqliteRow) -> Result<ApprovalFlow, RepositoryError> {
        let id: String = get(row, "id")?;
        let levels = self.levels_for(&id).await?;
        Ok(ApprovalFlow {
            company_id: CompanyId(get(row, "company_id")?),
            name: get(row, "name")?,
            description: get(row, "description")?,
            levels,
            is_active: get::<i64>(row, "is_active")? != 0,
            created_at: parse_timestamp(&get::<String>(row, "created_at")?)?,
            updated_at: parse_timestamp(&get::<String>(row, "updated_at")?)?,
            id: FlowId(id),
        })
    }

    /// Reads the expense row and its approval log in one transaction so the
    /// log always matches the row's version.
    async fn read_expense(&self, expense_id: &str) -> Result<Option<Expense>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!("SELECT {EXPENSE_COLUMNS} FROM expense WHERE id = ?"))
            .bind(expense_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        let log_rows = sqlx::query(
            "SELECT level_number, approver, role, action, comments, acted_at
             FROM expense_approval_log WHERE expense_id = ? ORDER BY position ASC",
        )
        .bind(expense_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let approvals = log_rows.iter().map(row_to_log_entry).collect::<Result<Vec<_>, _>>()?;
        row_to_expense(&row, approvals).map(Some)
    }

    async fn write_flow(&self, flow: &ApprovalFlow) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        if flow.is_active {
            sqlx::query(
                "UPDATE approval_flow SET is_active = 0, updated_at = ?
                 WHERE company_id = ? AND id <> ? AND is_active = 1",
            )
            .bind(&now)
            .bind(&flow.company_id.0)
            .bind(&flow.id.0)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO approval_flow (id, company_id, name, description, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 description = excluded.description,
                 is_active = excluded.is_active,
                 updated_at = excluded.updated_at",
        )
        .bind(&flow.id.0)
        .bind(&flow.company_id.0)
        .bind(&flow.name)
        .bind(&flow.description)
        .bind(i64::from(flow.is_active))
        .bind(flow.created_at.to_rfc3339())
        .bind(flow.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM approval_flow_level WHERE flow_id = ?")
            .bind(&flow.id.0)
            .execute(&mut *tx)
            .await?;

        for level in &flow.levels {
            let approvers = level.approvers.iter().map(|user| user.0.as_str()).collect::<Vec<_>>();
            sqlx::query(
                "INSERT INTO approval_flow_level
                     (flow_id, level_number, role, approvers_json, rule_kind, rule_json)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&flow.id.0)
            .bind(i64::from(level.level_number))
            .bind(&level.role)
            .bind(encode_json(&approvers)?)
            .bind(level.rule.as_str())
            .bind(encode_json(&level.rule)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn write_expense(&self, expense: &Expense) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO expense ({EXPENSE_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 employee_id = excluded.employee_id,
                 amount = excluded.amount,
                 currency = excluded.currency,
                 category = excluded.category,
                 description = excluded.description,
                 expense_date = excluded.expense_date,
                 status = excluded.status,
                 flow_id = excluded.flow_id,
                 current_level = excluded.current_level,
                 current_approvers_json = excluded.current_approvers_json,
                 final_comments = excluded.final_comments,
                 submitted_at = excluded.submitted_at,
                 resolved_at = excluded.resolved_at,
                 version = excluded.version,
                 updated_at = excluded.updated_at"
        ))
        .bind(&expense.id.0)
        .bind(&expense.company_id.0)
        .bind(&expense.employee_id.0)
        .bind(expense.amount.to_string())
        .bind(&expense.currency)
        .bind(expense.category.as_str())
        .bind(&expense.description)
        .bind(expense.expense_date.to_string())
        .bind(expense.status.as_str())
        .bind(expense.flow_id.as_ref().map(|id| id.0.as_str()))
        .bind(expense.current_level.map(i64::from))
        .bind(encode_approvers(&expense.current_approvers)?)
        .bind(&expense.final_comments)
        .bind(expense.submitted_at.map(|at| at.to_rfc3339()))
        .bind(expense.resolved_at.map(|at| at.to_rfc3339()))
        .bind(encode_version(expense.version)?)
        .bind(expense.created_at.to_rfc3339())
        .bind(expense.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        replace_log(&mut tx, expense).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn apply_commit(&self, commit: &ApprovalCommit) -> Result<(), CommitFailure> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        let expense = &commit.expense;

        let updated = sqlx::query(
            "UPDATE expense SET
                 status = ?,
                 flow_id = ?,
                 current_level = ?,
                 current_approvers_json = ?,
                 final_comments = ?,
                 submitted_at = ?,
                 resolved_at = ?,
                 version = ?,
                 updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(expense.status.as_str())
        .bind(expense.flow_id.as_ref().map(|id| id.0.as_str()))
        .bind(expense.current_level.map(i64::from))
        .bind(encode_approvers(&expense.current_approvers)?)
        .bind(&expense.final_comments)
        .bind(expense.submitted_at.map(|at| at.to_rfc3339()))
        .bind(expense.resolved_at.map(|at| at.to_rfc3339()))
        .bind(encode_version(expense.version)?)
        .bind(expense.updated_at.to_rfc3339())
        .bind(&expense.id.0)
        .bind(encode_version(commit.expected_version)?)
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        if updated.rows_affected() == 0 {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM expense WHERE id = ?")
                    .bind(&expense.id.0)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(RepositoryError::from)?;
            return Err(CommitFailure::Store(StoreError::VersionConflict {
                expense_id: expense.id.clone(),
                expected: commit.expected_version,
                actual: actual.and_then(|version| u64::try_from(version).ok()),
            }));
        }

        replace_log(&mut tx, expense).await?;

        for row in &commit.inserted {
            let inserted = sqlx::query(&format!(
                "INSERT INTO approval_request ({REQUEST_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(&row.id.0)
            .bind(&row.expense_id.0)
            .bind(&row.company_id.0)
            .bind(&row.approver.0)
            .bind(&row.approver_role)
            .bind(i64::from(row.level_number))
            .bind(row.status.as_str())
            .bind(&row.comments)
            .bind(row.action_at.map(|at| at.to_rfc3339()))
            .bind(i64::from(row.is_active))
            .bind(&row.rule_applied)
            .bind(row.created_at.to_rfc3339())
            .bind(row.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await;

            match inserted {
                Ok(_) => {}
                Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                    return Err(CommitFailure::Store(StoreError::DuplicateRow(format!(
                        "{} (level {}, approver {})",
                        row.expense_id.0, row.level_number, row.approver
                    ))));
                }
                Err(error) => return Err(RepositoryError::from(error).into()),
            }
        }

        for row in &commit.updated {
            let changed = sqlx::query(
                "UPDATE approval_request SET
                     status = ?,
                     comments = ?,
                     action_at = ?,
                     is_active = ?,
                     rule_applied = ?,
                     updated_at = ?
                 WHERE id = ? AND expense_id = ?",
            )
            .bind(row.status.as_str())
            .bind(&row.comments)
            .bind(row.action_at.map(|at| at.to_rfc3339()))
            .bind(i64::from(row.is_active))
            .bind(&row.rule_applied)
            .bind(row.updated_at.to_rfc3339())
            .bind(&row.id.0)
            .bind(&row.expense_id.0)
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;

            if changed.rows_affected() == 0 {
                return Err(CommitFailure::Store(StoreError::Backend(format!(
                    "approval row `{}` does not exist",
                    row.id.0
                ))));
            }
        }

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }
}

/// Failure of a commit transaction; the transaction is rolled back on drop.
enum CommitFailure {
    Store(StoreError),
    Repository(RepositoryError),
}

impl From<RepositoryError> for CommitFailure {
    fn from(error: RepositoryError) -> Self {
        Self::Repository(error)
    }
}

impl From<CommitFailure> for StoreError {
    fn from(failure: CommitFailure) -> Self {
        match failure {
            CommitFailure::Store(error) => error,
            CommitFailure::Repository(error) => error.into(),
        }
    }
}

#[async_trait]
impl ApprovalStore for SqlApprovalStore {
    async fn save_flow(&self, flow: ApprovalFlow) -> Result<(), StoreError> {
        self.write_flow(&flow).await?;
        debug!(flow_id = %flow.id.0, company_id = %flow.company_id, "approval flow saved");
        Ok(())
    }

    async fn load_active_flow(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<ApprovalFlow>, StoreError> {
        let row = sqlx::query(
            "SELECT id, company_id, name, description, is_active, created_at, updated_at
             FROM approval_flow WHERE company_id = ? AND is_active = 1",
        )
        .bind(&company_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        match row {
            Some(ref r) => Ok(Some(self.hydrate_flow(r).await?)),
            None => Ok(None),
        }
    }

    async fn load_flow(&self, flow_id: &FlowId) -> Result<Option<ApprovalFlow>, StoreError> {
        let row = sqlx::query(
            "SELECT id, company_id, name, description, is_active, created_at, updated_at
             FROM approval_flow WHERE id = ?",
        )
        .bind(&flow_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        match row {
            Some(ref r) => Ok(Some(self.hydrate_flow(r).await?)),
            None => Ok(None),
        }
    }

    async fn save_expense(&self, expense: Expense) -> Result<(), StoreError> {
        self.write_expense(&expense).await?;
        Ok(())
    }

    async fn load_expense(&self, expense_id: &ExpenseId) -> Result<Option<Expense>, StoreError> {
        Ok(self.read_expense(&expense_id.0).await?)
    }

    async fn load_approval_requests(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<ApprovalRequest>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_request
             WHERE expense_id = ? ORDER BY level_number ASC, approver ASC"
        ))
        .bind(&expense_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_request).collect::<Result<Vec<_>, _>>()?)
    }

    async fn list_active_requests_for_approver(
        &self,
        company_id: &CompanyId,
        approver: &UserId,
    ) -> Result<Vec<ApprovalRequest>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_request
             WHERE company_id = ? AND approver = ? AND is_active = 1 AND status = 'pending'
             ORDER BY created_at ASC, expense_id ASC"
        ))
        .bind(&company_id.0)
        .bind(&approver.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_request).collect::<Result<Vec<_>, _>>()?)
    }

    async fn commit(&self, commit: ApprovalCommit) -> Result<(), StoreError> {
        self.apply_commit(&commit).await?;
        debug!(
            expense_id = %commit.expense.id.0,
            version = commit.expense.version,
            inserted = commit.inserted.len(),
            updated = commit.updated.len(),
            "approval transition committed"
        );
        Ok(())
    }
}

async fn replace_log(
    tx: &mut Transaction<'_, Sqlite>,
    expense: &Expense,
) -> Result<(), RepositoryError> {
    sqlx::query("DELETE FROM expense_approval_log WHERE expense_id = ?")
        .bind(&expense.id.0)
        .execute(&mut **tx)
        .await?;

    for (position, entry) in expense.approvals.iter().enumerate() {
        sqlx::query(
            "INSERT INTO expense_approval_log
                 (expense_id, position, level_number, approver, role, action, comments, acted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&expense.id.0)
        .bind(position as i64)
        .bind(i64::from(entry.level_number))
        .bind(&entry.approver.0)
        .bind(&entry.role)
        .bind(entry.action.as_str())
        .bind(&entry.comments)
        .bind(entry.acted_at.to_rfc3339())
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(column).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn row_to_level(row: &SqliteRow) -> Result<Level, RepositoryError> {
    let approvers: Vec<String> = decode_json(&get::<String>(row, "approvers_json")?)?;
    let rule: ApprovalRule = decode_json(&get::<String>(row, "rule_json")?)?;

    Ok(Level {
        level_number: decode_u32("level_number", get(row, "level_number")?)?,
        role: get(row, "role")?,
        approvers: approvers.into_iter().map(UserId).collect(),
        rule,
    })
}

fn row_to_expense(
    row: &SqliteRow,
    approvals: Vec<ApprovalLogEntry>,
) -> Result<Expense, RepositoryError> {
    let id: String = get(row, "id")?;
    let status: String = get(row, "status")?;
    let status = ExpenseStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown expense status `{status}`")))?;
    let amount: String = get(row, "amount")?;
    let amount = Decimal::from_str(&amount)
        .map_err(|error| RepositoryError::Decode(format!("amount `{amount}`: {error}")))?;
    let expense_date: String = get(row, "expense_date")?;
    let expense_date = NaiveDate::from_str(&expense_date).map_err(|error| {
        RepositoryError::Decode(format!("expense_date `{expense_date}`: {error}"))
    })?;
    let category: String = get(row, "category")?;
    let category = ExpenseCategory::parse(&category)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown expense category `{category}`")))?;
    let current_approvers: Vec<String> =
        decode_json(&get::<String>(row, "current_approvers_json")?)?;

    Ok(Expense {
        id: ExpenseId(id),
        company_id: CompanyId(get(row, "company_id")?),
        employee_id: UserId(get(row, "employee_id")?),
        amount,
        currency: get(row, "currency")?,
        category,
        description: get(row, "description")?,
        expense_date,
        status,
        flow_id: get::<Option<String>>(row, "flow_id")?.map(FlowId),
        current_level: get::<Option<i64>>(row, "current_level")?
            .map(|level| decode_u32("current_level", level))
            .transpose()?,
        current_approvers: current_approvers.into_iter().map(UserId).collect(),
        approvals,
        final_comments: get(row, "final_comments")?,
        submitted_at: parse_optional_timestamp(get(row, "submitted_at")?)?,
        resolved_at: parse_optional_timestamp(get(row, "resolved_at")?)?,
        version: u64::try_from(get::<i64>(row, "version")?)
            .map_err(|error| RepositoryError::Decode(format!("version: {error}")))?,
        created_at: parse_timestamp(&get::<String>(row, "created_at")?)?,
        updated_at: parse_timestamp(&get::<String>(row, "updated_at")?)?,
    })
}

fn row_to_log_entry(row: &SqliteRow) -> Result<ApprovalLogEntry, RepositoryError> {
    let action: String = get(row, "action")?;
    Ok(ApprovalLogEntry {
        level_number: decode_u32("level_number", get(row, "level_number")?)?,
        approver: UserId(get(row, "approver")?),
        role: get(row, "role")?,
        action: LevelAction::parse(&action)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown level action `{action}`")))?,
        comments: get(row, "comments")?,
        acted_at: parse_timestamp(&get::<String>(row, "acted_at")?)?,
    })
}

fn row_to_request(row: &SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let status: String = get(row, "status")?;
    Ok(ApprovalRequest {
        id: ApprovalRequestId(get(row, "id")?),
        expense_id: ExpenseId(get(row, "expense_id")?),
        company_id: CompanyId(get(row, "company_id")?),
        approver: UserId(get(row, "approver")?),
        approver_role: get(row, "approver_role")?,
        level_number: decode_u32("level_number", get(row, "level_number")?)?,
        status: ApprovalStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown approval status `{status}`")))?,
        comments: get(row, "comments")?,
        action_at: parse_optional_timestamp(get(row, "action_at")?)?,
        is_active: get::<i64>(row, "is_active")? != 0,
        rule_applied: get(row, "rule_applied")?,
        created_at: parse_timestamp(&get::<String>(row, "created_at")?)?,
        updated_at: parse_timestamp(&get::<String>(row, "updated_at")?)?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("timestamp `{value}`: {error}")))
}

fn parse_optional_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.as_deref().map(parse_timestamp).transpose()
}

fn decode_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| RepositoryError::Decode(format!("{column} out of range: {value}")))
}

fn encode_version(version: u64) -> Result<i64, RepositoryError> {
    i64::try_from(version)
        .map_err(|_| RepositoryError::Decode(format!("version out of range: {version}")))
}

fn encode_approvers(approvers: &[UserId]) -> Result<String, RepositoryError> {
    encode_json(&approvers.iter().map(|user| user.0.as_str()).collect::<Vec<_>>())
}

fn encode_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|error| RepositoryError::Decode(error.to_string()))
}

fn decode_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(raw).map_err(|error| RepositoryError::Decode(format!("`{raw}`: {error}")))
}
