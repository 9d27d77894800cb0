//! Strategy selection for a tenanted configuration.
//!
//! PostgreSQL inference: an explicit `postgresql_strategy` wins; otherwise a `%{tenant}` in
//! `database` selects the database strategy and a static `database` selects the schema strategy.
//! Keys belonging to the other strategy are configuration errors.

use super::{DatabaseAdapter, Engine, FileAdapter, SchemaAdapter, ServerAdapter};
use crate::config::DatabaseConfig;
use crate::error::{ConfigError, Result, TenantError};
use crate::validation::{has_tenant_placeholder, TENANT_PLACEHOLDER};

const POSTGRES_STRATEGIES: &[&str] = &["database", "schema"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PostgresStrategy {
    Database,
    Schema,
}

/// Build the adapter for the tenanted configuration `name`.
pub fn adapter_for(name: &str, config: &DatabaseConfig) -> Result<DatabaseAdapter> {
    let engine = Engine::from_adapter(&config.adapter)?;
    let database = config
        .database
        .as_deref()
        .ok_or_else(|| ConfigError::Invalid(format!("{}: `database` is required", name)))?;

    if config.tenant_schema.is_some() {
        return Err(conflict(
            name,
            "`tenant_schema` is derived for each tenant and cannot be configured",
        ));
    }

    match engine {
        Engine::Sqlite => {
            reject_postgres_keys(name, config)?;
            require_placeholder(name, "database", database)?;
            Ok(DatabaseAdapter::File(FileAdapter::new(database)))
        }
        Engine::MySql => {
            reject_postgres_keys(name, config)?;
            require_placeholder(name, "database", database)?;
            reject_hash_placeholders(name, database)?;
            Ok(DatabaseAdapter::Server(
                ServerAdapter::new(database, config.endpoint(engine))
                    .with_charset(config.encoding.clone(), config.collation.clone()),
            ))
        }
        Engine::Postgres => postgres_adapter(name, config, database),
    }
}

fn postgres_adapter(
    name: &str,
    config: &DatabaseConfig,
    database: &str,
) -> Result<DatabaseAdapter> {
    let strategy = match config.postgresql_strategy.as_deref() {
        Some(value) => parse_strategy(value)?,
        None if has_tenant_placeholder(database) => PostgresStrategy::Database,
        None => PostgresStrategy::Schema,
    };
    reject_hash_placeholders(name, database)?;
    let endpoint = config.endpoint(Engine::Postgres);

    match strategy {
        PostgresStrategy::Database => {
            if config.schema_name_pattern.is_some() {
                return Err(conflict(
                    name,
                    "`schema_name_pattern` only applies to the schema strategy; \
                     remove it or set postgresql_strategy to \"schema\"",
                ));
            }
            if config.schema_search_path.is_some() {
                return Err(conflict(
                    name,
                    "the database strategy does not use `schema_search_path`; \
                     remove it or use `schema_name_pattern` for schema-based tenancy",
                ));
            }
            require_placeholder(name, "database", database)?;
            Ok(DatabaseAdapter::Server(
                ServerAdapter::new(database, endpoint)
                    .with_charset(config.encoding.clone(), config.collation.clone()),
            ))
        }
        PostgresStrategy::Schema => {
            if has_tenant_placeholder(database) {
                return Err(conflict(
                    name,
                    "the schema strategy needs a static `database`; \
                     a tenant pattern in both the database and the schema name is ambiguous",
                ));
            }
            let schema_pattern =
                config.schema_name_pattern.as_deref().unwrap_or(TENANT_PLACEHOLDER);
            require_placeholder(name, "schema_name_pattern", schema_pattern)?;
            reject_hash_placeholders(name, schema_pattern)?;
            let extra = config
                .schema_search_path
                .as_deref()
                .map(|path| {
                    path.split(',')
                        .map(|s| s.trim().trim_matches('"').to_string())
                        .filter(|s| !s.is_empty())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            Ok(DatabaseAdapter::Schema(
                SchemaAdapter::new(database, schema_pattern, endpoint)
                    .with_search_path(extra)
                    .with_charset(config.encoding.clone(), config.collation.clone()),
            ))
        }
    }
}

fn parse_strategy(value: &str) -> Result<PostgresStrategy> {
    match value.to_ascii_lowercase().as_str() {
        "database" => Ok(PostgresStrategy::Database),
        "schema" => Ok(PostgresStrategy::Schema),
        _ => Err(TenantError::UnsupportedDatabase {
            kind: "postgresql_strategy",
            given: value.to_string(),
            valid: POSTGRES_STRATEGIES.join(", "),
            suggestion: did_you_mean(value, POSTGRES_STRATEGIES),
        }),
    }
}

fn reject_postgres_keys(name: &str, config: &DatabaseConfig) -> Result<()> {
    let present = [
        ("postgresql_strategy", config.postgresql_strategy.is_some()),
        ("schema_name_pattern", config.schema_name_pattern.is_some()),
        ("schema_search_path", config.schema_search_path.is_some()),
    ];
    match present.iter().find(|(_, set)| *set) {
        Some((key, _)) => Err(conflict(
            name,
            &format!("`{}` only applies to the postgresql adapter ({} given)", key, config.adapter),
        )),
        None => Ok(()),
    }
}

fn require_placeholder(name: &str, key: &str, value: &str) -> Result<()> {
    if has_tenant_placeholder(value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{}: `{}` must contain {} (got {:?})",
            name, key, TENANT_PLACEHOLDER, value
        ))
        .into())
    }
}

fn reject_hash_placeholders(name: &str, value: &str) -> Result<()> {
    if value.contains("%{tenant_hash") {
        Err(ConfigError::Invalid(format!(
            "{}: hashed placeholders are only supported by file-based databases (got {:?})",
            name, value
        ))
        .into())
    } else {
        Ok(())
    }
}

fn conflict(name: &str, message: &str) -> TenantError {
    ConfigError::Conflict(format!("{}: {}", name, message)).into()
}

/// Closest entry of `valid` to `given` by edit distance. Ties go to the earlier entry.
pub fn did_you_mean(given: &str, valid: &[&str]) -> String {
    let given = given.to_ascii_lowercase();
    valid
        .iter()
        .enumerate()
        .min_by_key(|(idx, candidate)| (levenshtein(&given, candidate), *idx))
        .map(|(_, candidate)| candidate.to_string())
        .unwrap_or_default()
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == *cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg(database: &str) -> DatabaseConfig {
        DatabaseConfig {
            tenanted: true,
            adapter: "postgresql".into(),
            database: Some(database.into()),
            ..Default::default()
        }
    }

    #[test]
    fn placeholder_selects_database_strategy() {
        let adapter = adapter_for("primary", &pg("tenant_%{tenant}_db")).unwrap();
        assert_eq!(adapter.strategy_name(), "database");
        assert_eq!(adapter.database_for("foo").unwrap(), "tenant_foo_db");
    }

    #[test]
    fn static_database_selects_schema_strategy() {
        let adapter = adapter_for("primary", &pg("myapp_production")).unwrap();
        assert_eq!(adapter.strategy_name(), "schema");
        let target = adapter.target_for("acct-1", None).unwrap();
        assert_eq!(target.database, "myapp_production");
        assert_eq!(target.schema.as_deref(), Some("acct-1"));
    }

    #[test]
    fn explicit_strategy_wins() {
        let mut config = pg("myapp_production");
        config.postgresql_strategy = Some("schema".into());
        config.schema_name_pattern = Some("%{tenant}_schema".into());
        let adapter = adapter_for("primary", &config).unwrap();
        assert_eq!(adapter.database_for("foo").unwrap(), "foo_schema");
        let err = adapter.database_for("1abc").unwrap_err();
        assert!(err.to_string().contains("must start with a letter or underscore"));
    }

    #[test]
    fn schema_keys_conflict_with_database_strategy() {
        let mut config = pg("tenant_%{tenant}_db");
        config.schema_name_pattern = Some("%{tenant}".into());
        assert!(matches!(
            adapter_for("primary", &config),
            Err(TenantError::Config(ConfigError::Conflict(_)))
        ));

        let mut config = pg("tenant_%{tenant}_db");
        config.postgresql_strategy = Some("database".into());
        config.schema_search_path = Some("public".into());
        assert!(matches!(
            adapter_for("primary", &config),
            Err(TenantError::Config(ConfigError::Conflict(_)))
        ));
    }

    #[test]
    fn dynamic_database_conflicts_with_schema_strategy() {
        let mut config = pg("tenant_%{tenant}_db");
        config.postgresql_strategy = Some("schema".into());
        assert!(matches!(
            adapter_for("primary", &config),
            Err(TenantError::Config(ConfigError::Conflict(_)))
        ));
    }

    #[test]
    fn tenant_schema_is_never_configurable() {
        let mut config = pg("myapp_production");
        config.tenant_schema = Some("acct".into());
        assert!(adapter_for("primary", &config).is_err());
    }

    #[test]
    fn unknown_strategy_suggests() {
        let mut config = pg("myapp");
        config.postgresql_strategy = Some("shcema".into());
        match adapter_for("primary", &config) {
            Err(e @ TenantError::UnsupportedDatabase { .. }) => {
                let message = e.to_string();
                assert!(message.contains("Did you mean \"schema\"?"), "{}", message);
                assert!(message.contains("database, schema"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn sqlite_requires_placeholder_and_rejects_postgres_keys() {
        let config = DatabaseConfig {
            tenanted: true,
            adapter: "sqlite3".into(),
            database: Some("db/static.sqlite3".into()),
            ..Default::default()
        };
        assert!(matches!(
            adapter_for("primary", &config),
            Err(TenantError::Config(ConfigError::Invalid(_)))
        ));

        let config = DatabaseConfig {
            tenanted: true,
            adapter: "sqlite3".into(),
            database: Some("db/%{tenant}.sqlite3".into()),
            schema_name_pattern: Some("%{tenant}".into()),
            ..Default::default()
        };
        assert!(matches!(
            adapter_for("primary", &config),
            Err(TenantError::Config(ConfigError::Conflict(_)))
        ));
    }

    #[test]
    fn levenshtein_distances() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(did_you_mean("mysql3", Engine::ADAPTER_NAMES), "mysql");
    }
}
