use std::fs;
use std::path::Path;

use serde_json::json;

use crate::commands::{approval_failure, finish, to_data, with_engine, CommandFailure, CommandResult};
use spendflow_core::domain::company::CompanyId;
use spendflow_core::domain::flow::FlowDraft;

/// Parses and validates a flow definition without touching the database.
pub fn validate(path: &Path) -> CommandResult {
    let result = read_draft(path).and_then(|draft| {
        let flow = draft
            .into_flow(CompanyId::new("validation"))
            .map_err(|error| ("malformed_flow", error.to_string(), 7u8))?;
        let levels = flow
            .levels
            .iter()
            .map(|level| {
                json!({
                    "level_number": level.level_number,
                    "role": level.role_label(),
                    "rule": level.rule.as_str(),
                    "eligible_approvers": level.eligible_approvers(),
                })
            })
            .collect::<Vec<_>>();
        Ok((
            format!("flow `{}` is valid with {} level(s)", flow.name, flow.levels.len()),
            json!({ "name": flow.name, "levels": levels }),
        ))
    });

    finish("flow validate", result)
}

/// Stores the flow as the company's active flow, retiring the previous one.
pub fn activate(company_id: &str, path: &Path) -> CommandResult {
    let company_id = CompanyId::new(company_id);
    let result = read_draft(path).and_then(|draft| {
        with_engine("flow activate", "cli", |engine| async move {
            let flow = engine
                .service
                .create_flow(company_id, draft, &engine.audit)
                .await
                .map_err(|error| approval_failure(error, &engine.audit.correlation_id))?;
            Ok((
                format!("flow `{}` is now active for `{}`", flow.id.0, flow.company_id),
                to_data(&flow)?,
            ))
        })
    });

    finish("flow activate", result)
}

fn read_draft(path: &Path) -> Result<FlowDraft, CommandFailure> {
    let raw = fs::read_to_string(path).map_err(|error| {
        ("flow_file", format!("failed to read `{}`: {error}", path.display()), 2u8)
    })?;
    toml::from_str::<FlowDraft>(&raw).map_err(|error| {
        ("flow_file", format!("failed to parse `{}`: {error}", path.display()), 2u8)
    })
}
