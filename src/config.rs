//! Configuration handling for the database access facade.
//!
//! The facade needs four connection properties (`url`, `driver`, `username`,
//! `password`) from whatever key-value source the surrounding application
//! uses. This module provides those sources (lookup function, map, properties
//! text or file, environment) plus the command-line configuration of the
//! bundled binary.

use crate::error::{FacadeError, FacadeResult};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

// Pool policy defaults (fixed, not configurable through properties)
pub const DEFAULT_MIN_IDLE: u32 = 5;
pub const DEFAULT_MAX_IDLE: u32 = 10;
pub const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 100;

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_ENV_PREFIX: &str = "DB";

/// Property keys understood by the facade.
pub const KEY_URL: &str = "url";
pub const KEY_DRIVER: &str = "driver";
pub const KEY_USERNAME: &str = "username";
pub const KEY_PASSWORD: &str = "password";

/// Connection pool policy.
///
/// sqlx pools keep every open connection eligible for idling, so the idle
/// ceiling is also the pool ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolPolicy {
    /// Connections the pool keeps open even when idle.
    pub min_idle: u32,
    /// Maximum connections the pool keeps open.
    pub max_idle: u32,
    /// Prepared statements cached per connection.
    pub statement_cache_capacity: usize,
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self {
            min_idle: DEFAULT_MIN_IDLE,
            max_idle: DEFAULT_MAX_IDLE,
            statement_cache_capacity: DEFAULT_STATEMENT_CACHE_CAPACITY,
        }
    }
}

/// Raw connection properties as read from a configuration source.
///
/// Any field may be missing; [`DatabaseProperties::validate`] decides whether
/// the bundle is usable.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DatabaseProperties {
    pub driver: Option<String>,
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl DatabaseProperties {
    /// Build properties from a key-value lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            driver: lookup(KEY_DRIVER),
            url: lookup(KEY_URL),
            username: lookup(KEY_USERNAME),
            password: lookup(KEY_PASSWORD),
        }
    }

    pub fn from_map(map: &HashMap<String, String>) -> Self {
        Self::from_lookup(|key| map.get(key).cloned())
    }

    /// Parse properties text.
    ///
    /// # Format
    ///
    /// ```text
    /// # comment
    /// ! also a comment
    /// url = postgres://localhost:5432/sakila
    /// driver: postgres
    /// username=app
    /// password=secret
    /// ```
    ///
    /// Keys are case-sensitive; the last occurrence of a key wins.
    pub fn from_properties_str(text: &str) -> Self {
        let map = parse_properties(text);
        Self::from_map(&map)
    }

    /// Read a properties file from disk.
    pub fn from_file(path: impl AsRef<Path>) -> FacadeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            FacadeError::configuration(format!(
                "Cannot read database properties file {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self::from_properties_str(&text))
    }

    /// Read `{PREFIX}_URL`, `{PREFIX}_DRIVER`, `{PREFIX}_USERNAME` and
    /// `{PREFIX}_PASSWORD` from the environment.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_lookup(|key| {
            std::env::var(format!("{}_{}", prefix, key.to_ascii_uppercase())).ok()
        })
    }

    /// Overlay the fields set in `other` on top of these properties.
    pub fn merge(self, other: DatabaseProperties) -> Self {
        Self {
            driver: other.driver.or(self.driver),
            url: other.url.or(self.url),
            username: other.username.or(self.username),
            password: other.password.or(self.password),
        }
    }

    /// Check that every required property is present and non-blank.
    ///
    /// All missing keys are reported at once.
    pub fn validate(&self) -> FacadeResult<ConnectionSettings> {
        let present = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };

        let driver = present(&self.driver);
        let url = present(&self.url);
        let username = present(&self.username);
        // Passwords are taken verbatim; only emptiness is rejected
        let password = self.password.clone().filter(|p| !p.is_empty());

        match (driver, url, username, password) {
            (Some(driver), Some(url), Some(username), Some(password)) => Ok(ConnectionSettings {
                driver,
                url,
                username,
                password,
            }),
            (driver, url, username, password) => {
                let missing: Vec<&str> = [
                    (KEY_URL, url.is_none()),
                    (KEY_DRIVER, driver.is_none()),
                    (KEY_USERNAME, username.is_none()),
                    (KEY_PASSWORD, password.is_none()),
                ]
                .into_iter()
                .filter_map(|(key, missing)| missing.then_some(key))
                .collect();

                Err(FacadeError::configuration(format!(
                    "Missing database properties: {}. Check the source of the database properties.",
                    missing.join(", ")
                )))
            }
        }
    }
}

impl fmt::Debug for DatabaseProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseProperties")
            .field("driver", &self.driver)
            .field("url", &self.url.as_deref().map(mask_url))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .finish()
    }
}

/// Validated connection settings. Every field is present and non-empty.
#[derive(Clone)]
pub struct ConnectionSettings {
    pub driver: String,
    pub url: String,
    pub username: String,
    /// Contains sensitive data - never log
    pub password: String,
}

impl ConnectionSettings {
    /// Get a display-safe version of the URL (credentials masked).
    pub fn masked_url(&self) -> String {
        mask_url(&self.url)
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("driver", &self.driver)
            .field("url", &self.masked_url())
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

/// Replace any password embedded in a URL with `****`.
pub fn mask_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            // set_password only fails for cannot-be-a-base URLs, which carry no password
            let _ = url.set_password(Some("****"));
            url.to_string()
        }
        _ => raw.to_string(),
    }
}

fn parse_properties(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| {
            let idx = line.find(['=', ':'])?;
            let key = line[..idx].trim();
            let value = line[idx + 1..].trim();
            (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// Statement to run from the command line.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run a read statement and print the rows
    Select {
        /// Complete SQL text
        sql: String,
    },
    /// Run a write statement and print the generated keys
    Update {
        /// Complete SQL text
        sql: String,

        /// Execute inside a transaction
        #[arg(long)]
        transaction: bool,
    },
}

/// Configuration for the db-facade binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-facade",
    about = "Run one SQL statement through the pooled database access facade",
    version,
    author
)]
pub struct Config {
    /// Properties file holding url, driver, username and password
    #[arg(short, long, value_name = "FILE", env = "DB_PROPERTIES")]
    pub properties: Option<PathBuf>,

    /// Connection URL (overrides the properties file)
    #[arg(long, env = "DB_URL")]
    pub url: Option<String>,

    /// Driver identifier: postgres, mysql, mariadb or sqlite
    #[arg(long, env = "DB_DRIVER")]
    pub driver: Option<String>,

    /// Database user (overrides the properties file)
    #[arg(long, env = "DB_USERNAME")]
    pub username: Option<String>,

    /// Database password (overrides the properties file)
    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "DB_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DB_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Config {
    /// Collect database properties: file first, then explicit flags and
    /// environment on top.
    pub fn database_properties(&self) -> FacadeResult<DatabaseProperties> {
        let base = match &self.properties {
            Some(path) => DatabaseProperties::from_file(path)?,
            None => DatabaseProperties::default(),
        };

        Ok(base.merge(DatabaseProperties {
            driver: self.driver.clone(),
            url: self.url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }))
    }
}
