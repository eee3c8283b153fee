pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::anyhow;
use clap::{Args, Parser, Subcommand};
use spendflow_core::config::{AppConfig, LogFormat};
use spendflow_core::domain::approval::Decision;

#[derive(Debug, Parser)]
#[command(
    name = "spendflow",
    about = "Spendflow expense approval CLI",
    long_about = "Run multi-level expense approvals: manage the schema, activate approval flows, submit expenses, record approver decisions, and inspect progress.",
    after_help = "Examples:\n  spendflow migrate\n  spendflow seed\n  spendflow expense submit EXP-DEMO-001\n  spendflow expense decide EXP-DEMO-001 --approver mgr-alice --approve\n  spendflow inbox acme fin-carol"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo company, its approval flow, and draft expenses (idempotent)")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, database connectivity, and schema readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Validate or activate approval flow definitions")]
    Flow {
        #[command(subcommand)]
        command: FlowCommand,
    },
    #[command(about = "Create, submit, decide on, and inspect expenses")]
    Expense {
        #[command(subcommand)]
        command: ExpenseCommand,
    },
    #[command(about = "List expenses waiting on an approver at their current level")]
    Inbox { company_id: String, approver: String },
}

#[derive(Debug, Subcommand)]
enum FlowCommand {
    #[command(about = "Parse and validate a flow definition file without storing it")]
    Validate { file: PathBuf },
    #[command(about = "Store a flow definition as the company's active flow")]
    Activate { company_id: String, file: PathBuf },
}

#[derive(Debug, Subcommand)]
enum ExpenseCommand {
    #[command(about = "Create a draft expense")]
    Create(CreateArgs),
    #[command(about = "Submit an expense into its company's active approval flow")]
    Submit { expense_id: String },
    #[command(about = "Record an approver's decision on the expense's current level")]
    Decide(DecideArgs),
    #[command(about = "Show an expense with its full approval plan")]
    Status { expense_id: String },
}

#[derive(Debug, Args)]
struct CreateArgs {
    company_id: String,
    #[arg(long)]
    employee: String,
    #[arg(long)]
    amount: String,
    #[arg(long, default_value = "USD")]
    currency: String,
    #[arg(long, default_value = "other")]
    category: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long, help = "Expense date as YYYY-MM-DD")]
    date: String,
}

#[derive(Debug, Args)]
struct DecideArgs {
    expense_id: String,
    #[arg(long)]
    approver: String,
    #[command(flatten)]
    verdict: Verdict,
    #[arg(long)]
    comment: Option<String>,
    #[arg(long, help = "Level the approver expects to act on; defaults to the current level")]
    level: Option<u32>,
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct Verdict {
    #[arg(long)]
    approve: bool,
    #[arg(long)]
    reject: bool,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Flow { command: FlowCommand::Validate { file } } => commands::flow::validate(&file),
        Command::Flow { command: FlowCommand::Activate { company_id, file } } => {
            commands::flow::activate(&company_id, &file)
        }
        Command::Expense { command: ExpenseCommand::Create(args) } => {
            commands::expense::create(commands::expense::NewExpense {
                company_id: args.company_id,
                employee_id: args.employee,
                amount: args.amount,
                currency: args.currency,
                category: args.category,
                description: args.description,
                date: args.date,
            })
        }
        Command::Expense { command: ExpenseCommand::Submit { expense_id } } => {
            commands::expense::submit(&expense_id)
        }
        Command::Expense { command: ExpenseCommand::Decide(args) } => {
            let decision = if args.verdict.approve { Decision::Approve } else { Decision::Reject };
            commands::expense::decide(
                &args.expense_id,
                &args.approver,
                decision,
                args.comment,
                args.level,
            )
        }
        Command::Expense { command: ExpenseCommand::Status { expense_id } } => {
            commands::expense::status(&expense_id)
        }
        Command::Inbox { company_id, approver } => commands::inbox::run(&company_id, &approver),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Installs the global subscriber. Logs go to stderr so stdout stays one
/// JSON payload per command.
pub fn init_logging(config: &AppConfig) -> anyhow::Result<()> {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let installed = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|error| anyhow!("failed to install log subscriber: {error}"))
}
