//! Config validation: key combinations that are wrong regardless of strategy.
//!
//! Strategy-specific rules live in the adapter factory.

use crate::config::DatabaseConfig;
use crate::error::ConfigError;
use crate::validation::has_tenant_placeholder;

pub fn validate(name: &str, config: &DatabaseConfig) -> Result<(), ConfigError> {
    if config.adapter.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{}: `adapter` is required", name)));
    }
    if config.tenanted && config.database.as_deref().map(str::is_empty).unwrap_or(true) {
        return Err(ConfigError::Invalid(format!(
            "{}: tenanted databases need a `database` pattern",
            name
        )));
    }
    if config.max_connection_pools == Some(0) {
        return Err(ConfigError::Invalid(format!(
            "{}: `max_connection_pools` must be at least 1",
            name
        )));
    }
    if config.pool == Some(0) {
        return Err(ConfigError::Invalid(format!("{}: `pool` must be at least 1", name)));
    }
    for (key, value) in [("encoding", &config.encoding), ("collation", &config.collation)] {
        if let Some(value) = value {
            let valid = !value.is_empty()
                && value.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
            if !valid {
                let message = format!("{}: invalid `{}` {:?}", name, key, value);
                return Err(ConfigError::Invalid(message));
            }
        }
    }
    if !config.tenanted {
        return validate_untenanted(name, config);
    }
    Ok(())
}

fn validate_untenanted(name: &str, config: &DatabaseConfig) -> Result<(), ConfigError> {
    if config.database.as_deref().map(has_tenant_placeholder).unwrap_or(false) {
        return Err(ConfigError::Invalid(format!(
            "{}: `database` contains a tenant placeholder but `tenanted` is not set",
            name
        )));
    }
    let tenant_only = [
        ("postgresql_strategy", config.postgresql_strategy.is_some()),
        ("schema_name_pattern", config.schema_name_pattern.is_some()),
        ("max_connection_pools", config.max_connection_pools.is_some()),
        ("untenanted_reads", config.untenanted_reads),
    ];
    if let Some((key, _)) = tenant_only.iter().find(|(_, set)| *set) {
        return Err(ConfigError::Invalid(format!("{}: `{}` requires `tenanted: true`", name, key)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenanted(database: &str) -> DatabaseConfig {
        DatabaseConfig {
            tenanted: true,
            adapter: "sqlite3".into(),
            database: Some(database.into()),
            ..Default::default()
        }
    }

    #[test]
    fn accepts_minimal_tenanted_config() {
        assert!(validate("primary", &tenanted("db/%{tenant}.sqlite3")).is_ok());
    }

    #[test]
    fn rejects_zero_limits() {
        let mut config = tenanted("db/%{tenant}.sqlite3");
        config.max_connection_pools = Some(0);
        assert!(validate("primary", &config).is_err());
    }

    #[test]
    fn rejects_injected_encoding() {
        let mut config = tenanted("db/%{tenant}.sqlite3");
        config.encoding = Some("utf8; DROP DATABASE x".into());
        assert!(validate("primary", &config).is_err());
    }

    #[test]
    fn untenanted_config_cannot_use_placeholder() {
        let mut config = tenanted("db/%{tenant}.sqlite3");
        config.tenanted = false;
        assert!(matches!(validate("cache", &config), Err(ConfigError::Invalid(_))));
    }
}
