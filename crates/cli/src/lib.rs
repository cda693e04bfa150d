pub mod commands;

use clap::{Parser, Subcommand};
use formflow_core::config::{AppConfig, LoadOptions, LogFormat};
use formflow_core::domain::request::RequestType;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "formflow",
    about = "Formflow operator CLI",
    long_about = "Operate the request routing store: migrations, seeding, plans, unit managers and diagnostics.",
    after_help = "Examples:\n  formflow seed\n  formflow plan show --type drop\n  formflow doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Seed roles, the default unit tree and default approval plans")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, DB connectivity and routability of every plan")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(subcommand, about = "Inspect or replace a request type's approval plan")]
    Plan(PlanCommand),
    #[command(subcommand, about = "Administer organizational units")]
    Unit(UnitCommand),
    #[command(subcommand, about = "Inspect stored requests")]
    Request(RequestCommand),
}

#[derive(Debug, Subcommand)]
enum PlanCommand {
    #[command(about = "Print the ordered steps of a plan")]
    Show {
        #[arg(long = "type", value_parser = parse_request_type)]
        request_type: RequestType,
    },
    #[command(about = "Replace a plan with the given units, in order")]
    Replace {
        #[arg(long = "type", value_parser = parse_request_type)]
        request_type: RequestType,
        #[arg(long = "unit", help = "Unit name; repeat once per step")]
        units: Vec<String>,
        #[arg(long, help = "Starting unit when the plan has no steps")]
        entry_unit: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum UnitCommand {
    #[command(about = "Make a user the manager of a unit")]
    AssignManager {
        #[arg(long = "unit")]
        unit_name: String,
        #[arg(long = "user")]
        user_id: String,
    },
}

#[derive(Debug, Subcommand)]
enum RequestCommand {
    #[command(about = "Print a request and its transition history")]
    Show {
        #[arg(long)]
        id: String,
    },
}

fn parse_request_type(value: &str) -> Result<RequestType, String> {
    RequestType::parse(value).ok_or_else(|| {
        let known: Vec<&str> = RequestType::ALL.iter().map(RequestType::as_str).collect();
        format!("unknown request type `{value}` (expected one of: {})", known.join(", "))
    })
}

/// Logs go to stderr so stdout carries only the command payload.
fn init_logging(config: &AppConfig) -> anyhow::Result<()> {
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
    installed.map_err(|error| anyhow::anyhow!("failed to install subscriber: {error}"))
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    // Commands report bad config themselves; logging still needs a level.
    let config = AppConfig::load(LoadOptions::default()).unwrap_or_default();
    if let Err(error) = init_logging(&config) {
        eprintln!("logging disabled: {error}");
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Plan(PlanCommand::Show { request_type }) => commands::plan::show(request_type),
        Command::Plan(PlanCommand::Replace { request_type, units, entry_unit }) => {
            commands::plan::replace(request_type, units, entry_unit)
        }
        Command::Unit(UnitCommand::AssignManager { unit_name, user_id }) => {
            commands::unit::assign_manager(&unit_name, &user_id)
        }
        Command::Request(RequestCommand::Show { id }) => commands::request::show(&id),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
