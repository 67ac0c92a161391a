//! Error types for the database access facade.
//!
//! Every failure the facade can produce is a [`FacadeError`]. Initialization
//! failures are split by cause (configuration, driver, connection) so that a
//! process can report a precise startup problem; everything that goes wrong
//! once the facade is running is a [`FacadeError::Query`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FacadeError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Driver '{driver}' could not be loaded: {reason}")]
    DriverLoad { driver: String, reason: String },

    #[error("Connection failed: {message}")]
    Connection {
        message: String,
        suggestion: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("{message}")]
    Query {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("Database access layer is not initialized; call initialize() first")]
    Uninitialized,
}

impl FacadeError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a driver load error.
    pub fn driver_load(driver: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DriverLoad {
            driver: driver.into(),
            reason: reason.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(
        message: impl Into<String>,
        suggestion: impl Into<String>,
        source: Option<sqlx::Error>,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
            source,
        }
    }

    /// Wrap a driver failure that happened while serving a query.
    pub fn query(message: impl Into<String>, source: sqlx::Error) -> Self {
        let sql_state = match &source {
            sqlx::Error::Database(db_err) => db_err.code().map(|c| c.to_string()),
            _ => None,
        };
        let message = format!("{}: {}", message.into(), source);
        Self::Query {
            message,
            sql_state,
            source: Some(source),
        }
    }

    /// Query failure without an underlying driver error.
    pub fn query_message(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql_state: None,
            source: None,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Uninitialized => Some("Initialize the database access layer at process start"),
            Self::DriverLoad { .. } => Some("Use one of: postgres, mysql, mariadb, sqlite"),
            _ => None,
        }
    }

    /// SQLSTATE reported by the database, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Query { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }
}

/// Result type alias for facade operations.
pub type FacadeResult<T> = Result<T, FacadeError>;
