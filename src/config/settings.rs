//! `quarry.toml`.
//!
//! ```toml
//! [compile]
//! dialect = "duckdb"
//! default_row_limit = 1000
//!
//! [connections.warehouse]
//! dialect = "bigquery"
//!
//! [connections.local]
//! dialect = "${LOCAL_DIALECT}"
//!
//! [translator]
//! max_import_depth = 16
//! ```
//!
//! `${VAR}` and `$VAR` are expanded in every string value before the file
//! is deserialized.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::{env, fs};

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::sql::dialect::Dialect;

pub const DEFAULT_MAX_IMPORT_DEPTH: usize = 16;

/// Where [`Settings::load`] looks when no path is given.
pub const CONFIG_FILE: &str = "quarry.toml";
/// Overrides [`CONFIG_FILE`].
pub const CONFIG_ENV: &str = "QUARRY_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid quarry.toml: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable ${0} is not set")]
    MissingEnvVar(String),

    #[error("no connection named '{0}'")]
    UnknownConnection(String),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub compile: CompileSettings,
    /// Keyed by the connection name sources and SQL blocks refer to.
    pub connections: HashMap<String, ConnectionSettings>,
    pub translator: TranslatorSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CompileSettings {
    /// Dialect for queries whose source names no known connection.
    pub dialect: Dialect,
    /// Limit for the final stage of queries that set none.
    pub default_row_limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConnectionSettings {
    pub dialect: Dialect,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TranslatorSettings {
    /// Longest chain of imports below the root document.
    pub max_import_depth: usize,
}

impl Default for TranslatorSettings {
    fn default() -> Self {
        Self {
            max_import_depth: DEFAULT_MAX_IMPORT_DEPTH,
        }
    }
}

impl Settings {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, SettingsError> {
        let mut value = toml::Value::Table(toml::from_str(text)?);
        expand_strings(&mut value)?;
        let settings: Settings = value.try_into()?;
        if settings.translator.max_import_depth == 0 {
            return Err(SettingsError::Invalid(
                "translator.max_import_depth must be at least 1".into(),
            ));
        }
        Ok(settings)
    }

    /// `$QUARRY_CONFIG` if set, else `./quarry.toml` if present, else defaults.
    pub fn load() -> Result<Self, SettingsError> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }
        let local = Path::new(CONFIG_FILE);
        if local.is_file() {
            return Self::from_file(local);
        }
        tracing::debug!("no {CONFIG_FILE} found, using defaults");
        Ok(Settings::default())
    }

    pub fn connection(&self, name: &str) -> Result<&ConnectionSettings, SettingsError> {
        self.connections
            .get(name)
            .ok_or_else(|| SettingsError::UnknownConnection(name.to_string()))
    }

    /// Dialect for a source on `connection`; unknown or absent connections
    /// use `compile.dialect`.
    pub fn dialect_for_connection(&self, connection: Option<&str>) -> Dialect {
        connection
            .and_then(|name| self.connections.get(name))
            .map_or(self.compile.dialect, |conn| conn.dialect)
    }
}

fn expand_strings(value: &mut toml::Value) -> Result<(), SettingsError> {
    match value {
        toml::Value::String(s) => *s = expand_env_vars(s)?,
        toml::Value::Array(items) => items.iter_mut().try_for_each(expand_strings)?,
        toml::Value::Table(table) => table
            .iter_mut()
            .try_for_each(|(_, value)| expand_strings(value))?,
        _ => {}
    }
    Ok(())
}

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}]*)\}|\$([A-Za-z0-9_]+)").expect("env reference pattern")
});

/// Replace `${VAR}` and `$VAR` with the variable's value. A `$` not
/// followed by a name is kept.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in ENV_REFERENCE.captures_iter(s) {
        let (whole, name) = reference(&caps);
        let value = env::var(name).map_err(|_| SettingsError::MissingEnvVar(name.to_string()))?;
        out.push_str(&s[last..whole.0]);
        out.push_str(&value);
        last = whole.1;
    }
    out.push_str(&s[last..]);
    Ok(out)
}

fn reference<'a>(caps: &Captures<'a>) -> ((usize, usize), &'a str) {
    let whole = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
    let name = caps
        .get(1)
        .or_else(|| caps.get(2))
        .map_or("", |m| m.as_str());
    (whole, name)
}
