use crate::core::db::connection::DEFAULT_BUSY_TIMEOUT;
use crate::core::{Result, StoreError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Config file read when no path is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = ".env";

/// Configuration values from a TOML file or a `.env` file, with the process
/// environment taking precedence.
///
/// A TOML file keeps its tables, so
///
/// ```toml
/// [database]
/// dsn = "app.db"
/// ```
///
/// is read as `database.dsn`. A `.env` file holds `KEY=VALUE` lines named like
/// environment variables (`DATABASE_DSN=app.db`). Either way, the
/// `DATABASE_DSN` environment variable overrides the value.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    file: toml::value::Table,
    dotenv: BTreeMap<String, String>,
}

impl ConfigSource {
    /// Loads `path`, as a `.env` file when its name starts with `.env` or it
    /// has the `env` extension, and as TOML otherwise.
    ///
    /// A missing file is not an error: the source is empty and every lookup
    /// falls through to the environment.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "No config file found, continuing with environment only");
                return Ok(ConfigSource::default());
            }
            Err(e) => return Err(e.into()),
        };

        if is_env_file(path) {
            ConfigSource::from_env_str(&content)
        } else {
            ConfigSource::from_toml_str(&content)
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: toml::value::Table = toml::from_str(content)
            .map_err(|e| StoreError::Config(format!("invalid TOML: {}", e)))?;
        Ok(ConfigSource {
            file,
            dotenv: BTreeMap::new(),
        })
    }

    pub fn from_env_str(content: &str) -> Result<Self> {
        let dotenv = dotenvy::from_read_iter(content.as_bytes())
            .map(|item| item.map(|(key, value)| (key.to_ascii_uppercase(), value)))
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()
            .map_err(|e| StoreError::Config(format!("invalid env file: {}", e)))?;
        Ok(ConfigSource {
            file: toml::value::Table::new(),
            dotenv,
        })
    }

    /// Looks up a dotted key: environment, then `.env` entries, then the
    /// TOML file.
    pub fn get_string(&self, key: &str) -> Option<String> {
        let name = env_key(key);
        env::var(&name)
            .ok()
            .or_else(|| self.dotenv.get(&name).cloned())
            .or_else(|| {
                lookup(&self.file, key).map(|value| match value {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
            })
    }

    /// Deserializes the table `name`, with every `NAME_FIELD` entry of the
    /// `.env` file and then of the environment replacing `name.field`.
    pub fn section<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let mut table = match self.file.get(name) {
            Some(toml::Value::Table(table)) => table.clone(),
            Some(_) => {
                return Err(StoreError::Config(format!("`{}` must be a table", name)));
            }
            None => toml::value::Table::new(),
        };

        let prefix = format!("{}_", env_key(name));
        let overrides = self
            .dotenv
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .chain(env::vars());
        for (key, raw) in overrides {
            if let Some(field) = key.strip_prefix(&prefix) {
                if !field.is_empty() {
                    table.insert(field.to_ascii_lowercase(), scalar(&raw));
                }
            }
        }

        toml::Value::Table(table)
            .try_into()
            .map_err(|e| StoreError::Config(format!("invalid `{}` section: {}", name, e)))
    }
}

/// Environment variable consulted for `key`: `database.dsn` -> `DATABASE_DSN`.
pub fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

fn is_env_file(path: &Path) -> bool {
    let named_env = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(".env"))
        .unwrap_or(false);
    named_env || path.extension().map(|e| e == "env").unwrap_or(false)
}

fn lookup<'a>(table: &'a toml::value::Table, key: &str) -> Option<&'a toml::Value> {
    let mut parts = key.split('.');
    let mut current = table.get(parts.next()?)?;
    for part in parts {
        current = current.as_table()?.get(part)?;
    }
    Some(current)
}

/// Reads an environment string as a TOML scalar when it is one
/// (`250`, `true`), and as a plain string otherwise.
fn scalar(raw: &str) -> toml::Value {
    let parsed: std::result::Result<toml::value::Table, _> =
        toml::from_str(&format!("v = {}", raw.trim()));
    match parsed.ok().and_then(|mut t| t.remove("v")) {
        Some(value @ (toml::Value::Integer(_) | toml::Value::Float(_) | toml::Value::Boolean(_))) => value,
        _ => toml::Value::String(raw.to_string()),
    }
}

/// Connection settings for a `ConnectionHandle`, read from `[database]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dsn: String,
    pub busy_timeout_ms: u64,
    pub foreign_keys: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            dsn: String::new(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT.as_millis() as u64,
            foreign_keys: true,
        }
    }
}

impl StoreConfig {
    /// Reads the `database` section. `dsn` is required.
    pub fn from_source(source: &ConfigSource) -> Result<Self> {
        let config: StoreConfig = source.section("database")?;
        if config.dsn.trim().is_empty() {
            return Err(StoreError::Config("`database.dsn` is not set".to_string()));
        }
        Ok(config)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
