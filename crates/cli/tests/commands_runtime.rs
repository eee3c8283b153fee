use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use spendflow_cli::commands::{config, doctor, expense, flow, inbox, migrate, seed};
use spendflow_core::domain::approval::Decision;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("SPENDFLOW_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("SPENDFLOW_DATABASE_URL", "postgres://localhost/spendflow")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    with_database(&[], |_| {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["command"], "seed");
        assert_eq!(first_payload["status"], "ok");
        assert_eq!(first_payload["data"]["expenses_created"].as_array().map(Vec::len), Some(3));

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let second_payload = parse_payload(&second.output);
        assert_eq!(second_payload["data"]["flow_id"], first_payload["data"]["flow_id"]);
        assert_eq!(second_payload["data"]["expenses_created"].as_array().map(Vec::len), Some(0));
    });
}

#[test]
fn seeded_expense_walks_every_level_to_approval() {
    with_database(&[], |_| {
        assert_eq!(seed::run().exit_code, 0);

        let submitted = parse_payload(&expense::submit("EXP-DEMO-001").output);
        assert_eq!(submitted["status"], "ok", "{submitted}");
        assert_eq!(submitted["data"]["status"], "pending_approval");
        assert_eq!(submitted["data"]["current_level"], 1);
        assert_eq!(submitted["data"]["requests_created"], 7);

        let manager = decide("EXP-DEMO-001", "mgr-alice", Decision::Approve, None);
        assert_eq!(manager["data"]["current_level"], 2, "{manager}");

        let waiting = parse_payload(&inbox::run("acme", "fin-carol").output);
        assert_eq!(waiting["data"]["expenses"][0]["expense_id"], "EXP-DEMO-001");
        let manager_inbox = parse_payload(&inbox::run("acme", "mgr-bob").output);
        assert_eq!(manager_inbox["data"]["expenses"].as_array().map(Vec::len), Some(0));

        let first_finance = decide("EXP-DEMO-001", "fin-carol", Decision::Approve, None);
        assert_eq!(first_finance["data"]["current_level"], 2, "60% of three needs two votes");
        let second_finance = decide("EXP-DEMO-001", "fin-dan", Decision::Approve, None);
        assert_eq!(second_finance["data"]["current_level"], 3);

        let director = decide("EXP-DEMO-001", "dir-frank", Decision::Approve, None);
        assert_eq!(director["data"]["status"], "pending_approval", "only the CFO decides level 3");
        let cfo = decide("EXP-DEMO-001", "cfo-grace", Decision::Approve, Some("ok"));
        assert_eq!(cfo["data"]["status"], "approved");

        let status = parse_payload(&expense::status("EXP-DEMO-001").output);
        assert_eq!(status["data"]["status"], "approved");
        assert_eq!(status["data"]["plan"].as_array().map(Vec::len), Some(7));

        let late = expense::decide("EXP-DEMO-001", "fin-erin", Decision::Approve, None, None);
        assert_eq!(late.exit_code, 9);
        assert_eq!(parse_payload(&late.output)["error_class"], "conflict");
    });
}

#[test]
fn rejection_requires_comment_when_configured() {
    with_database(&[("SPENDFLOW_APPROVALS_REQUIRE_COMMENT_ON_REJECT", "true")], |_| {
        assert_eq!(seed::run().exit_code, 0);
        assert_eq!(expense::submit("EXP-DEMO-002").exit_code, 0);

        let bare = expense::decide("EXP-DEMO-002", "mgr-bob", Decision::Reject, None, None);
        assert_eq!(bare.exit_code, 7);
        assert_eq!(parse_payload(&bare.output)["error_class"], "bad_request");

        let first =
            decide("EXP-DEMO-002", "mgr-bob", Decision::Reject, Some("no receipt attached"));
        assert_eq!(first["data"]["status"], "pending_approval", "any rule still open");
        let second = decide("EXP-DEMO-002", "mgr-alice", Decision::Reject, Some("agreed"));
        assert_eq!(second["data"]["status"], "rejected");
    });
}

#[test]
fn stale_level_and_unknown_expense_are_refused() {
    with_database(&[], |_| {
        assert_eq!(seed::run().exit_code, 0);
        assert_eq!(expense::submit("EXP-DEMO-003").exit_code, 0);

        let stale = expense::decide("EXP-DEMO-003", "fin-carol", Decision::Approve, None, Some(2));
        assert_eq!(stale.exit_code, 9);

        let outsider = expense::decide("EXP-DEMO-003", "emp-olivia", Decision::Approve, None, None);
        assert_eq!(outsider.exit_code, 7);

        let resubmit = expense::submit("EXP-DEMO-003");
        assert_eq!(resubmit.exit_code, 9);

        let missing = expense::status("EXP-MISSING");
        assert_eq!(missing.exit_code, 8);
        assert_eq!(parse_payload(&missing.output)["error_class"], "not_found");
    });
}

#[test]
fn activated_flow_drives_a_new_expense() {
    with_database(&[], |dir| {
        let flow_path = dir.join("two-step.toml");
        fs::write(
            &flow_path,
            r#"
name = "Two step"

[[levels]]
level_number = 1
role = "Lead"
approvers = ["lead-1", "lead-2"]
rule = { kind = "all" }

[[levels]]
level_number = 2
role = "Finance"
approvers = ["fin-1"]
rule = { kind = "any" }
"#,
        )
        .expect("write flow file");

        let no_flow = expense::create(new_expense("globex"));
        let draft_id = parse_payload(&no_flow.output)["data"]["id"].as_str().map(str::to_owned);
        let draft_id = draft_id.expect("created expense id");
        let refused = expense::submit(&draft_id);
        assert_eq!(refused.exit_code, 8, "no active flow yet");

        let activated = flow::activate("globex", &flow_path);
        assert_eq!(activated.exit_code, 0, "{}", activated.output);

        assert_eq!(expense::submit(&draft_id).exit_code, 0);
        decide(&draft_id, "lead-1", Decision::Approve, None);
        let second = decide(&draft_id, "lead-2", Decision::Approve, None);
        assert_eq!(second["data"]["current_level"], 2);
        let finance = decide(&draft_id, "fin-1", Decision::Approve, None);
        assert_eq!(finance["data"]["status"], "approved");
    });
}

#[test]
fn config_reports_env_source() {
    with_env(&[("SPENDFLOW_DATABASE_URL", "sqlite::memory:")], || {
        let output = config::run();
        assert!(output.starts_with("effective config (source precedence: env > file > default):"));
        assert!(output
            .contains("- database.url = sqlite::memory: (source: env (SPENDFLOW_DATABASE_URL))"));
        assert!(output.contains("- approvals.require_comment_on_reject = false (source: default)"));
    });
}

#[test]
fn doctor_reports_pending_schema_then_passes() {
    with_database(&[], |_| {
        let before: Value = serde_json::from_str(&doctor::run(true)).expect("doctor json");
        assert_eq!(before["overall_status"], "fail");
        assert_eq!(before["checks"][2]["name"], "schema_migrations");
        assert_eq!(before["checks"][2]["status"], "fail");

        assert_eq!(migrate::run().exit_code, 0);
        let after: Value = serde_json::from_str(&doctor::run(true)).expect("doctor json");
        assert_eq!(after["overall_status"], "pass");
    });
}

fn decide(expense_id: &str, approver: &str, decision: Decision, comment: Option<&str>) -> Value {
    let result =
        expense::decide(expense_id, approver, decision, comment.map(str::to_owned), None);
    assert_eq!(result.exit_code, 0, "decision by {approver} failed: {}", result.output);
    parse_payload(&result.output)
}

fn new_expense(company_id: &str) -> expense::NewExpense {
    expense::NewExpense {
        company_id: company_id.to_owned(),
        employee_id: "emp-zoe".to_owned(),
        amount: "89.90".to_owned(),
        currency: "usd".to_owned(),
        category: "transportation".to_owned(),
        description: "Airport shuttle".to_owned(),
        date: "2026-10-02".to_owned(),
    }
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

/// Runs `test_fn` against a fresh file database shared by every command it
/// invokes.
fn with_database(vars: &[(&str, &str)], test_fn: impl FnOnce(&Path)) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let url = format!("sqlite://{}", dir.path().join("spendflow.db").display());

    let mut all_vars = vec![("SPENDFLOW_DATABASE_URL", url.as_str())];
    all_vars.extend_from_slice(vars);
    with_env(&all_vars, || test_fn(dir.path()));
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "SPENDFLOW_DATABASE_URL",
        "SPENDFLOW_DATABASE_MAX_CONNECTIONS",
        "SPENDFLOW_DATABASE_TIMEOUT_SECS",
        "SPENDFLOW_LOGGING_LEVEL",
        "SPENDFLOW_LOGGING_FORMAT",
        "SPENDFLOW_APPROVALS_REQUIRE_COMMENT_ON_REJECT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
