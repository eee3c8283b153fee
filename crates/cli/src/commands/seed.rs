use serde_json::json;

use crate::commands::CommandResult;
use spendflow_core::config::AppConfig;
use spendflow_db::{connect_with_config, migrations, DemoSeedDataset, SqlApprovalStore};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(None) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let store = SqlApprovalStore::new(pool.clone());
        let seed_result = DemoSeedDataset::load(&store)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoSeedDataset::verify(&store)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result = if verification.all_present {
            Ok(seed_result)
        } else {
            Err(("seed_verification", verification_failure_message(&verification.checks), 6u8))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(seeded) => {
            let message = format!(
                "demo company `{}` ready with flow `{}` ({} of {} expenses newly created)",
                seeded.company_id,
                seeded.flow_id,
                seeded.expenses_created.len(),
                seeded.expense_ids.len()
            );
            let data = json!({
                "company_id": seeded.company_id,
                "flow_id": seeded.flow_id,
                "expense_ids": seeded.expense_ids,
                "expenses_created": seeded.expenses_created,
            });
            CommandResult::success_with_data("seed", message, Some(data))
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn verification_failure_message(checks: &[(&str, bool)]) -> String {
    let failed_checks =
        checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect::<Vec<_>>();
    if failed_checks.is_empty() {
        "some seed data failed to load".to_string()
    } else {
        format!("seed verification failed for: {}", failed_checks.join(", "))
    }
}
