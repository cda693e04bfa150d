use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use formflow_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::CommandResult;

/// `(key path, rendered value, env var that can override it)`.
type ConfigField = (&'static str, String, Option<&'static str>);

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            );
        }
    };

    CommandResult::success("config", render(&config))
}

fn render(config: &AppConfig) -> String {
    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let entry_units = if config.routing.entry_units.is_empty() {
        "<none>".to_string()
    } else {
        config
            .routing
            .entry_units
            .iter()
            .map(|(request_type, unit)| format!("{request_type}={unit}"))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let fields: Vec<ConfigField> = vec![
        ("database.url", config.database.url.clone(), Some("FORMFLOW_DATABASE_URL")),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            Some("FORMFLOW_DATABASE_MAX_CONNECTIONS"),
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            Some("FORMFLOW_DATABASE_TIMEOUT_SECS"),
        ),
        ("logging.level", config.logging.level.clone(), Some("FORMFLOW_LOGGING_LEVEL")),
        ("logging.format", format!("{:?}", config.logging.format), Some("FORMFLOW_LOGGING_FORMAT")),
        (
            "routing.conflict_retries",
            config.routing.conflict_retries.to_string(),
            Some("FORMFLOW_ROUTING_CONFLICT_RETRIES"),
        ),
        ("routing.entry_units", entry_units, Some("FORMFLOW_ROUTING_ENTRY_UNITS")),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in fields {
        let source =
            field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    ["formflow.toml", "config/formflow.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
