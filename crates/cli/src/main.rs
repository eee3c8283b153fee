use std::process::ExitCode;

use spendflow_core::config::AppConfig;

fn main() -> ExitCode {
    // Config errors are reported by the command itself as structured output.
    if let Ok(config) = AppConfig::load(None) {
        if let Err(error) = spendflow_cli::init_logging(&config) {
            eprintln!("{error:#}");
        }
    }

    spendflow_cli::run()
}
