//! Typed errors for configuration, tenant resolution and storage operations.

use thiserror::Error;

/// Raised while loading or validating the configuration surface. Always at boot, never deferred
/// to the first tenant access.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config load: {0}")]
    Load(String),
    #[error("conflicting configuration: {0}")]
    Conflict(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("no database named '{0}' in this environment")]
    MissingDatabase(String),
    #[error("no configuration for environment '{0}'")]
    MissingEnvironment(String),
}

#[derive(Error, Debug)]
pub enum TenantError {
    #[error("no tenant selected: {0}")]
    NoTenant(String),
    #[error("tenant already exists: {0}")]
    TenantAlreadyExists(String),
    #[error("{reason}: {identifier:?}")]
    BadTenantName { reason: String, identifier: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(
        "invalid {kind}: {given:?}. Valid options are: {valid}\n\nDid you mean {suggestion:?}?"
    )]
    UnsupportedDatabase {
        kind: &'static str,
        given: String,
        valid: String,
        suggestion: String,
    },
    #[error("tenant was destroyed while connecting: {0}")]
    TenantDestroyed(String),
    #[error("connection pool limit reached for '{config}' (max {max}, all pools in use)")]
    PoolLimitReached { config: String, max: usize },
    #[error("migration {version}: {message}")]
    Migration { version: i64, message: String },
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl TenantError {
    pub(crate) fn without_tenant(config: &str) -> Self {
        TenantError::NoTenant(format!(
            "cannot connect to tenanted database {:?} without a tenant; \
             select one with TenantContext::with_tenant",
            config
        ))
    }

    pub(crate) fn bad_name(reason: impl Into<String>, identifier: impl Into<String>) -> Self {
        TenantError::BadTenantName {
            reason: reason.into(),
            identifier: identifier.into(),
        }
    }
}

pub type Result<T, E = TenantError> = std::result::Result<T, E>;
