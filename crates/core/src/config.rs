use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::request::RequestType;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub routing: RoutingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoutingConfig {
    /// Extra attempts after an optimistic-concurrency conflict before the
    /// caller sees `ConcurrentModification`.
    pub conflict_retries: u32,
    /// Starting unit (by name) for request types whose plan has no steps.
    pub entry_units: BTreeMap<RequestType, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub conflict_retries: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://formflow.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            routing: RoutingConfig { conflict_retries: 1, entry_units: BTreeMap::new() },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    /// Layers, lowest first: defaults, TOML file, `FORMFLOW_*` env vars,
    /// programmatic overrides. Every layer is a [`ConfigPatch`].
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        match resolve_config_path(options.config_path.as_deref()) {
            Some(path) => config.merge(read_patch(&path)?)?,
            None if options.require_file => {
                let expected =
                    options.config_path.unwrap_or_else(|| PathBuf::from("formflow.toml"));
                return Err(ConfigError::MissingConfigFile(expected));
            }
            None => {}
        }

        config.merge(ConfigPatch::from_env()?)?;
        config.merge(options.overrides.into())?;
        config.validate()?;

        Ok(config)
    }

    fn merge(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        let ConfigPatch { database, logging, routing } = patch;

        let database = database.unwrap_or_default();
        replace(&mut self.database.url, database.url);
        replace(&mut self.database.max_connections, database.max_connections);
        replace(&mut self.database.timeout_secs, database.timeout_secs);

        let logging = logging.unwrap_or_default();
        replace(&mut self.logging.level, logging.level);
        replace(&mut self.logging.format, logging.format);

        let routing = routing.unwrap_or_default();
        replace(&mut self.routing.conflict_retries, routing.conflict_retries);
        for (raw_type, unit_name) in routing.entry_units.unwrap_or_default() {
            let request_type = RequestType::parse(&raw_type).ok_or_else(|| {
                ConfigError::Validation(format!(
                    "routing.entry_units has unknown request type `{raw_type}` (expected ferpa|info|medical|drop)"
                ))
            })?;
            self.routing.entry_units.insert(request_type, unit_name);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.database.url.trim();
        require(
            url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:",
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)",
        )?;
        require(
            self.database.max_connections > 0,
            "database.max_connections must be greater than zero",
        )?;
        require(
            (1..=300).contains(&self.database.timeout_secs),
            "database.timeout_secs must be in range 1..=300",
        )?;

        require(
            matches!(
                self.logging.level.trim().to_ascii_lowercase().as_str(),
                "trace" | "debug" | "info" | "warn" | "error"
            ),
            "logging.level must be one of trace|debug|info|warn|error",
        )?;

        require(
            self.routing.conflict_retries <= MAX_CONFLICT_RETRIES,
            "routing.conflict_retries must be in range 0..=5; persistent conflicts should surface to the caller",
        )?;
        if let Some((request_type, _)) =
            self.routing.entry_units.iter().find(|(_, unit_name)| unit_name.trim().is_empty())
        {
            return Err(ConfigError::Validation(format!(
                "routing.entry_units.{request_type} must name an organizational unit"
            )));
        }

        Ok(())
    }
}

const MAX_CONFLICT_RETRIES: u32 = 5;

fn replace<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn require(condition: bool, message: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Validation(message.to_string()))
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    match explicit_path {
        Some(path) => path.exists().then(|| path.to_path_buf()),
        None => ["formflow.toml", "config/formflow.toml"]
            .into_iter()
            .map(PathBuf::from)
            .find(|path| path.exists()),
    }
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    toml::from_str(&interpolate_env_vars(&raw)?)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Expands every `${VAR}` from the process environment.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let var = &after[..end];
        let value = env::var(var)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: var.to_string() })?;
        output.push_str(&value);
        rest = &after[end + 1..];
    }
    output.push_str(rest);

    Ok(output)
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    read_env(key)
        .map(|value| {
            value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
                key: key.to_string(),
                value,
            })
        })
        .transpose()
}

/// `ferpa=Advising,info=Identity and Records`
fn parse_entry_units(key: &str, value: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    value
        .split(',')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((request_type, unit)) => {
                Ok((request_type.trim().to_string(), unit.trim().to_string()))
            }
            None => Err(ConfigError::InvalidEnvOverride {
                key: key.to_string(),
                value: value.to_string(),
            }),
        })
        .collect()
}

/// One configuration layer; `None` leaves the lower layer's value alone.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    logging: Option<LoggingPatch>,
    routing: Option<RoutingPatch>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RoutingPatch {
    conflict_retries: Option<u32>,
    entry_units: Option<BTreeMap<String, String>>,
}

impl ConfigPatch {
    fn from_env() -> Result<Self, ConfigError> {
        let entry_units = match read_env("FORMFLOW_ROUTING_ENTRY_UNITS") {
            Some(value) => Some(parse_entry_units("FORMFLOW_ROUTING_ENTRY_UNITS", &value)?),
            None => None,
        };
        let format = match read_env("FORMFLOW_LOGGING_FORMAT").or_else(|| read_env("FORMFLOW_LOG_FORMAT")) {
            Some(value) => Some(value.parse()?),
            None => None,
        };

        Ok(Self {
            database: Some(DatabasePatch {
                url: read_env("FORMFLOW_DATABASE_URL"),
                max_connections: parse_env("FORMFLOW_DATABASE_MAX_CONNECTIONS")?,
                timeout_secs: parse_env("FORMFLOW_DATABASE_TIMEOUT_SECS")?,
            }),
            logging: Some(LoggingPatch {
                level: read_env("FORMFLOW_LOGGING_LEVEL").or_else(|| read_env("FORMFLOW_LOG_LEVEL")),
                format,
            }),
            routing: Some(RoutingPatch {
                conflict_retries: parse_env("FORMFLOW_ROUTING_CONFLICT_RETRIES")?,
                entry_units,
            }),
        })
    }
}

impl From<ConfigOverrides> for ConfigPatch {
    fn from(overrides: ConfigOverrides) -> Self {
        Self {
            database: Some(DatabasePatch { url: overrides.database_url, ..DatabasePatch::default() }),
            logging: Some(LoggingPatch { level: overrides.log_level, format: overrides.log_format }),
            routing: Some(RoutingPatch {
                conflict_retries: overrides.conflict_retries,
                entry_units: None,
            }),
        }
    }
}
