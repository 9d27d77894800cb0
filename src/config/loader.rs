//! Load database configurations from a JSON file, string, or the process environment.
//!
//! Layout: `{ "<env>": { "<logical name>": { ...keys... } } }`. Declaration order is kept, so the
//! first database of an environment is its primary unless one is named `primary`.

use crate::adapters::{file, Engine};
use crate::config::{BaseConfig, DatabaseConfig};
use crate::error::{ConfigError, Result};
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_CONFIG_PATH: &str = "config/database.json";
pub const DEFAULT_ENV: &str = "development";

/// Environment name from `TENANTED_ENV`, then `APP_ENV`, then `development`.
pub fn current_env() -> String {
    std::env::var("TENANTED_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.into())
}

/// Config file path from `TENANTED_CONFIG`, default `config/database.json`.
pub fn config_path() -> PathBuf {
    std::env::var("TENANTED_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// An ordinary shared database declared next to the tenanted ones.
#[derive(Clone, Debug)]
pub struct UntenantedConfig {
    pub name: String,
    pub engine: Engine,
    pub database: Option<String>,
    pub primary: bool,
}

/// Every database of one environment, tenanted configs already validated and resolved.
#[derive(Clone, Debug)]
pub struct DatabaseConfigurations {
    env_name: String,
    tenanted: Vec<Arc<BaseConfig>>,
    untenanted: Vec<UntenantedConfig>,
}

impl DatabaseConfigurations {
    /// Load `config_path()` for `current_env()`.
    pub fn load_from_env() -> Result<Self> {
        Self::load_file(config_path(), &current_env())
    }

    pub fn load_file(path: impl AsRef<Path>, env_name: &str) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        Self::load_str(&text, env_name)
    }

    pub fn load_str(json: &str, env_name: &str) -> Result<Self> {
        let mut root: Value =
            serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))?;
        expand_env(&mut root)?;
        let env = root
            .get(env_name)
            .and_then(Value::as_object)
            .ok_or_else(|| ConfigError::MissingEnvironment(env_name.to_string()))?;

        let mut declared = Vec::with_capacity(env.len());
        for (name, value) in env {
            let config: DatabaseConfig = serde_json::from_value(value.clone())
                .map_err(|e| ConfigError::Load(format!("{}.{}: {}", env_name, name, e)))?;
            declared.push((name.clone(), config));
        }
        let primary_name = declared
            .iter()
            .find(|(name, _)| name == "primary")
            .or_else(|| declared.first())
            .map(|(name, _)| name.clone());

        let mut tenanted = Vec::new();
        let mut untenanted = Vec::new();
        for (name, config) in &declared {
            let primary = primary_name.as_deref() == Some(name.as_str());
            if config.tenanted {
                tenanted.push(BaseConfig::new(env_name, name, primary, config)?);
            } else {
                crate::config::validate(name, config)?;
                untenanted.push(UntenantedConfig {
                    name: name.clone(),
                    engine: Engine::from_adapter(&config.adapter)?,
                    database: config.database.clone(),
                    primary,
                });
            }
        }
        tracing::debug!(
            env = %env_name,
            tenanted = tenanted.len(),
            untenanted = untenanted.len(),
            "loaded database configurations"
        );
        Ok(Self::assemble(env_name.to_string(), tenanted, untenanted))
    }

    fn assemble(
        env_name: String,
        mut tenanted: Vec<BaseConfig>,
        untenanted: Vec<UntenantedConfig>,
    ) -> Self {
        let shared: Vec<String> = untenanted.iter().filter_map(|c| c.database.clone()).collect();
        for base in &mut tenanted {
            base.set_shared_databases(shared.clone());
        }
        DatabaseConfigurations {
            env_name,
            tenanted: tenanted.into_iter().map(Arc::new).collect(),
            untenanted,
        }
    }

    /// Suffix every store name with `_<worker>` so parallel test processes never share a store.
    pub fn with_test_worker(self, worker: impl ToString) -> Self {
        let worker = worker.to_string();
        let untenanted: Vec<UntenantedConfig> = self
            .untenanted
            .into_iter()
            .map(|mut c| {
                c.database = c.database.map(|db| match c.engine {
                    Engine::Sqlite => file::test_workerize(&db, &worker),
                    Engine::MySql | Engine::Postgres => {
                        crate::adapters::workerize_suffix(&db, &worker)
                    }
                });
                c
            })
            .collect();
        let tenanted: Vec<BaseConfig> = self
            .tenanted
            .into_iter()
            .map(|base| {
                let mut base = Arc::unwrap_or_clone(base);
                base.set_test_worker(Some(worker.clone()));
                base
            })
            .collect();
        Self::assemble(self.env_name, tenanted, untenanted)
    }

    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    pub fn tenanted(&self) -> &[Arc<BaseConfig>] {
        &self.tenanted
    }

    pub fn untenanted(&self) -> &[UntenantedConfig] {
        &self.untenanted
    }

    /// Tenanted config by logical name.
    pub fn base(&self, name: &str) -> Result<Arc<BaseConfig>> {
        self.tenanted
            .iter()
            .find(|b| b.name() == name)
            .cloned()
            .ok_or_else(|| ConfigError::MissingDatabase(name.to_string()).into())
    }

    /// The primary tenanted config, or the first tenanted one.
    pub fn primary(&self) -> Option<Arc<BaseConfig>> {
        self.tenanted
            .iter()
            .find(|b| b.is_primary())
            .or_else(|| self.tenanted.first())
            .cloned()
    }
}

/// Replace `${VAR}` in every string value with the variable's value. A missing variable is a load
/// error.
fn expand_env(value: &mut Value) -> std::result::Result<(), ConfigError> {
    match value {
        Value::String(s) if s.contains("${") => {
            *s = expand_str(s)?;
            Ok(())
        }
        Value::Array(items) => items.iter_mut().try_for_each(expand_env),
        Value::Object(map) => map.values_mut().try_for_each(expand_env),
        _ => Ok(()),
    }
}

fn expand_str(s: &str) -> std::result::Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ConfigError::Load(e.to_string()))?;
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in re.captures_iter(s) {
        let (Some(whole), Some(var)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = std::env::var(var.as_str()).map_err(|_| {
            ConfigError::Load(format!("environment variable {} is not set", var.as_str()))
        })?;
        out.push_str(&s[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&s[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TenantError;

    const CONFIG: &str = r#"{
        "development": {
            "main": {
                "tenanted": true,
                "adapter": "sqlite3",
                "database": "storage/%{tenant}.sqlite3"
            },
            "shared": { "adapter": "sqlite3", "database": "storage/shared.sqlite3" }
        },
        "production": {
            "cache": { "tenanted": true, "adapter": "mysql", "database": "cache_%{tenant}" },
            "primary": { "tenanted": true, "adapter": "postgresql", "database": "myapp_production" }
        }
    }"#;

    #[test]
    fn first_declared_is_primary() {
        let configs = DatabaseConfigurations::load_str(CONFIG, "development").unwrap();
        let main = configs.base("main").unwrap();
        assert!(main.is_primary());
        assert_eq!(configs.untenanted().len(), 1);
        assert!(!configs.untenanted()[0].primary);
    }

    #[test]
    fn named_primary_wins() {
        let configs = DatabaseConfigurations::load_str(CONFIG, "production").unwrap();
        assert!(configs.base("primary").unwrap().is_primary());
        assert!(!configs.base("cache").unwrap().is_primary());
        assert_eq!(configs.primary().unwrap().name(), "primary");
        assert_eq!(configs.base("primary").unwrap().adapter().strategy_name(), "schema");
    }

    #[test]
    fn missing_environment_and_database() {
        assert!(matches!(
            DatabaseConfigurations::load_str(CONFIG, "staging"),
            Err(TenantError::Config(ConfigError::MissingEnvironment(_)))
        ));
        let configs = DatabaseConfigurations::load_str(CONFIG, "development").unwrap();
        assert!(matches!(
            configs.base("nope"),
            Err(TenantError::Config(ConfigError::MissingDatabase(_)))
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let json = r#"{ "test": { "main": {
            "tenanted": true, "adapter": "sqlite3", "database": "%{tenant}", "databse": "x"
        } } }"#;
        assert!(matches!(
            DatabaseConfigurations::load_str(json, "test"),
            Err(TenantError::Config(ConfigError::Load(_)))
        ));
    }

    #[test]
    fn misconfiguration_fails_at_load() {
        let json = r#"{ "test": { "main": {
            "tenanted": true,
            "adapter": "postgresql",
            "database": "app_%{tenant}",
            "schema_name_pattern": "%{tenant}"
        } } }"#;
        assert!(matches!(
            DatabaseConfigurations::load_str(json, "test"),
            Err(TenantError::Config(ConfigError::Conflict(_)))
        ));
        let json = r#"{ "test": { "main": {
            "tenanted": true, "adapter": "postgress", "database": "app_%{tenant}"
        } } }"#;
        assert!(matches!(
            DatabaseConfigurations::load_str(json, "test"),
            Err(TenantError::UnsupportedDatabase { .. })
        ));
    }

    #[test]
    fn expands_environment_variables() {
        std::env::set_var("TENANTED_LOADER_TEST_DIR", "/var/data");
        let json = r#"{ "test": { "main": {
            "tenanted": true,
            "adapter": "sqlite3",
            "database": "${TENANTED_LOADER_TEST_DIR}/%{tenant}.sqlite3"
        } } }"#;
        let configs = DatabaseConfigurations::load_str(json, "test").unwrap();
        let main = configs.base("main").unwrap();
        assert_eq!(main.database_for("foo").unwrap(), "/var/data/foo.sqlite3");

        let json = r#"{ "test": { "main": {
            "tenanted": true,
            "adapter": "sqlite3",
            "database": "${TENANTED_LOADER_TEST_UNSET}/%{tenant}"
        } } }"#;
        assert!(DatabaseConfigurations::load_str(json, "test").is_err());
    }

    #[test]
    fn test_worker_suffixes_everything() {
        let configs = DatabaseConfigurations::load_str(CONFIG, "development")
            .unwrap()
            .with_test_worker(3);
        let main = configs.base("main").unwrap();
        assert_eq!(main.database_for("foo").unwrap(), "storage/foo.sqlite3_3");
        assert_eq!(configs.untenanted()[0].database.as_deref(), Some("storage/shared.sqlite3_3"));
    }
}
