//! Database driver resolution.
//!
//! The configured driver identifier selects one of the backends compiled into
//! sqlx. The URL scheme must agree with the selected driver.

use crate::error::{FacadeError, FacadeResult};
use std::fmt;
use url::Url;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Resolve a driver identifier (case-insensitive).
    pub fn from_driver_name(driver: &str) -> FacadeResult<Self> {
        match driver.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::PostgreSQL),
            "mysql" | "mariadb" => Ok(Self::MySQL),
            "sqlite" | "sqlite3" => Ok(Self::SQLite),
            _ => Err(FacadeError::driver_load(
                driver,
                "no such driver is available in this build",
            )),
        }
    }

    /// Resolve the driver and check that it can open `url`.
    pub fn load(driver: &str, url: &str) -> FacadeResult<Self> {
        let db_type = Self::from_driver_name(driver)?;
        let scheme = url_scheme(url)?;

        if !db_type.accepts_scheme(&scheme) {
            return Err(FacadeError::driver_load(
                driver,
                format!(
                    "the {} driver does not accept '{}:' URLs",
                    db_type, scheme
                ),
            ));
        }
        Ok(db_type)
    }

    /// Check whether a URL scheme belongs to this backend.
    pub fn accepts_scheme(&self, scheme: &str) -> bool {
        let scheme = scheme.to_ascii_lowercase();
        match self {
            Self::PostgreSQL => scheme == "postgres" || scheme == "postgresql",
            Self::MySQL => scheme == "mysql" || scheme == "mariadb",
            Self::SQLite => scheme == "sqlite",
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

fn url_scheme(url: &str) -> FacadeResult<String> {
    Url::parse(url)
        .map(|u| u.scheme().to_string())
        .map_err(|e| FacadeError::configuration(format!("Invalid connection URL: {e}")))
}
