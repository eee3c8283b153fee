pub mod config;
pub mod doctor;
pub mod expense;
pub mod flow;
pub mod inbox;
pub mod migrate;
pub mod seed;

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use spendflow_core::approvals::{ApprovalError, ApprovalService, DecisionPolicy};
use spendflow_core::audit::{AuditContext, TracingAuditSink};
use spendflow_core::config::AppConfig;
use spendflow_core::errors::{ApplicationError, InterfaceError};
use spendflow_db::{connect_with_config, migrations, SqlApprovalStore};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// `(error_class, message, exit_code)` carried out of a command body.
pub(crate) type CommandFailure = (&'static str, String, u8);

/// Everything an engine command needs: a migrated store behind the approval
/// service, and the audit context of this invocation.
pub(crate) struct Engine {
    pub service: ApprovalService<SqlApprovalStore>,
    pub audit: AuditContext,
}

/// Loads config, opens and migrates the database, then runs `body` on a
/// current-thread runtime.
pub(crate) fn with_engine<T, F, Fut>(
    command: &'static str,
    actor: &str,
    body: F,
) -> Result<T, CommandFailure>
where
    F: FnOnce(Engine) -> Fut,
    Fut: Future<Output = Result<T, CommandFailure>>,
{
    let config = AppConfig::load(None)
        .map_err(|error| ("config_validation", format!("configuration issue: {error}"), 2u8))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| ("runtime_init", format!("failed to initialize async runtime: {error}"), 3u8))?;

    let correlation_id = format!("cli-{}", Uuid::new_v4());
    tracing::debug!(event_name = "cli.command.start", command, correlation_id = %correlation_id);

    runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let service = ApprovalService::new(SqlApprovalStore::new(pool.clone()), Arc::new(TracingAuditSink))
            .with_policy(DecisionPolicy::from(&config.approvals));
        let engine = Engine { service, audit: AuditContext::new(correlation_id, actor) };

        let outcome = body(engine).await;
        pool.close().await;
        outcome
    })
}

/// Maps an engine refusal onto the interface taxonomy and a process exit code.
pub(crate) fn approval_failure(error: ApprovalError, correlation_id: &str) -> CommandFailure {
    let message = error.to_string();
    match ApplicationError::from(error).into_interface(correlation_id) {
        InterfaceError::BadRequest { .. } => ("bad_request", message, 7),
        InterfaceError::NotFound { .. } => ("not_found", message, 8),
        InterfaceError::Conflict { .. } => ("conflict", message, 9),
        InterfaceError::ServiceUnavailable { .. } => ("service_unavailable", message, 10),
        InterfaceError::Internal { .. } => ("internal", message, 1),
    }
}

pub(crate) fn to_data(value: &impl Serialize) -> Result<Value, CommandFailure> {
    serde_json::to_value(value).map_err(|error| ("serialization", error.to_string(), 1u8))
}

pub(crate) fn finish(command: &str, result: Result<(String, Value), CommandFailure>) -> CommandResult {
    match result {
        Ok((message, data)) => CommandResult::success_with_data(command, message, Some(data)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(command, error_class, message, exit_code)
        }
    }
}
