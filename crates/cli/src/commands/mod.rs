pub mod config;
pub mod doctor;
pub mod migrate;
pub mod plan;
pub mod request;
pub mod seed;
pub mod unit;

use formflow_core::config::{AppConfig, LoadOptions};
use formflow_core::errors::InterfaceError;
use formflow_db::{connect_with_settings, migrations, DbPool, WorkflowError};
use serde::Serialize;
use tokio::runtime::Runtime;

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
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
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

/// `(error_class, message, exit_code)` carried out of a command's async body.
pub(crate) type Failure = (&'static str, String, u8);

/// Loads config and builds the single-threaded runtime every database-backed
/// command runs on.
pub(crate) fn prepare(command: &str) -> Result<(AppConfig, Runtime), CommandResult> {
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })?;

    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
            CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            )
        })?;

    Ok((config, runtime))
}

/// Connects and brings the schema up to date.
pub(crate) async fn open_database(config: &AppConfig) -> Result<DbPool, Failure> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    migrations::run_pending(&pool)
        .await
        .map_err(|error| ("migration", error.to_string(), 5u8))?;
    Ok(pool)
}

pub(crate) fn correlation_id(command: &str) -> String {
    format!("cli-{command}-{}", uuid::Uuid::new_v4())
}

pub(crate) fn workflow_failure(error: WorkflowError, correlation_id: &str) -> Failure {
    let interface = error.into_application().into_interface(correlation_id);
    let (class, code) = match &interface {
        InterfaceError::BadRequest { .. } => ("bad_request", 6),
        InterfaceError::Forbidden { .. } => ("forbidden", 7),
        InterfaceError::Conflict { .. } => ("conflict", 8),
        InterfaceError::ServiceUnavailable { .. } => ("service_unavailable", 9),
        InterfaceError::Internal { .. } => ("internal", 10),
    };
    (class, format!("{interface} (correlation id {})", interface.correlation_id()), code)
}

pub(crate) fn finish(command: &str, result: Result<String, Failure>) -> CommandResult {
    match result {
        Ok(message) => CommandResult::success(command, message),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(command, error_class, message, exit_code)
        }
    }
}
