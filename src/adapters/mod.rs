//! Storage strategies: how a tenant name becomes a physical store and how that store is created,
//! dropped, probed and enumerated.
//!
//! [`DatabaseAdapter`] is a closed set of variants chosen once by [`factory::adapter_for`] when the
//! configuration is loaded.

pub mod factory;
pub mod file;
pub mod schema;
pub mod server;

pub use factory::{adapter_for, did_you_mean};
pub use file::FileAdapter;
pub use schema::SchemaAdapter;
pub use server::ServerAdapter;

use crate::error::{Result, TenantError};
use crate::validation::{IdentifierRules, TenantNameValidator, ValidatedName};

/// Database engine behind a configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Engine {
    Sqlite,
    MySql,
    Postgres,
}

impl Engine {
    /// Accepted values of the `adapter` configuration key.
    pub const ADAPTER_NAMES: &'static [&'static str] = &[
        "sqlite3",
        "sqlite",
        "mysql",
        "mysql2",
        "trilogy",
        "postgresql",
        "postgres",
    ];

    pub fn from_adapter(name: &str) -> Result<Engine> {
        match name.to_ascii_lowercase().as_str() {
            "sqlite3" | "sqlite" => Ok(Engine::Sqlite),
            "mysql" | "mysql2" | "trilogy" => Ok(Engine::MySql),
            "postgresql" | "postgres" => Ok(Engine::Postgres),
            _ => Err(TenantError::UnsupportedDatabase {
                kind: "adapter",
                given: name.to_string(),
                valid: Engine::ADAPTER_NAMES.join(", "),
                suggestion: did_you_mean(name, Engine::ADAPTER_NAMES),
            }),
        }
    }

    /// URL scheme understood by the sqlx `Any` driver.
    pub fn scheme(&self) -> &'static str {
        match self {
            Engine::Sqlite => "sqlite",
            Engine::MySql => "mysql",
            Engine::Postgres => "postgres",
        }
    }

    /// Session statement that makes every later transaction on the connection read-only.
    pub fn read_only_statement(&self) -> &'static str {
        match self {
            Engine::Sqlite => "PRAGMA query_only = ON",
            Engine::MySql => "SET SESSION TRANSACTION READ ONLY",
            Engine::Postgres => "SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY",
        }
    }

    /// Bind marker for the `n`th (1-based) parameter; the `Any` driver passes SQL through verbatim.
    pub fn bind_marker(&self, n: usize) -> String {
        match self {
            Engine::Postgres => format!("${}", n),
            Engine::MySql | Engine::Sqlite => "?".to_string(),
        }
    }

    pub fn quote_ident(&self, name: &str) -> String {
        match self {
            Engine::MySql => crate::sql::quote_mysql_ident(name),
            Engine::Sqlite | Engine::Postgres => crate::sql::quote_ident(name),
        }
    }
}

/// Where one tenant's data lives. For the file strategy `database` is a path; for the server
/// strategies it is a database name. `schema` is set only under the colocated strategy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreTarget {
    pub tenant: String,
    pub database: String,
    pub schema: Option<String>,
    /// Host override derived from a tenant-templated `host` key.
    pub host: Option<String>,
}

impl StoreTarget {
    /// Key of the ready lock guarding creation and migration of this store.
    pub fn lock_key(&self) -> String {
        let host = self.host.as_deref().unwrap_or("");
        match &self.schema {
            Some(schema) => format!("{}/{}/{}", host, self.database, schema),
            None => format!("{}/{}", host, self.database),
        }
    }
}

/// Strategy variant selected for one logical database.
#[derive(Clone, Debug)]
pub enum DatabaseAdapter {
    File(FileAdapter),
    Server(ServerAdapter),
    Schema(SchemaAdapter),
}

impl DatabaseAdapter {
    pub fn engine(&self) -> Engine {
        match self {
            DatabaseAdapter::File(_) => Engine::Sqlite,
            DatabaseAdapter::Server(a) => a.engine(),
            DatabaseAdapter::Schema(_) => Engine::Postgres,
        }
    }

    /// Short strategy label used in logs and the CLI.
    pub fn strategy_name(&self) -> &'static str {
        match self {
            DatabaseAdapter::File(_) => "file",
            DatabaseAdapter::Server(_) => "database",
            DatabaseAdapter::Schema(_) => "schema",
        }
    }

    pub fn rules(&self) -> &'static IdentifierRules {
        match self {
            DatabaseAdapter::File(_) => &IdentifierRules::FILE,
            DatabaseAdapter::Server(a) => a.rules(),
            DatabaseAdapter::Schema(_) => &IdentifierRules::POSTGRES_SCHEMA,
        }
    }

    /// The pattern that varies per tenant: the database pattern, or the schema pattern under the
    /// colocated strategy.
    pub fn tenant_pattern(&self) -> &str {
        match self {
            DatabaseAdapter::File(a) => a.pattern(),
            DatabaseAdapter::Server(a) => a.pattern(),
            DatabaseAdapter::Schema(a) => a.schema_pattern(),
        }
    }

    pub fn validate_tenant_name(&self, tenant: &str) -> Result<ValidatedName> {
        TenantNameValidator::validate(tenant, self.tenant_pattern(), self.rules())
    }

    /// Resolved identifier for `tenant`: validated, formatted and suffixed with the test worker id
    /// when one is set.
    pub fn database_for(&self, tenant: &str) -> Result<String> {
        let validated = self.validate_tenant_name(tenant)?;
        Ok(match self.test_worker() {
            Some(worker) => self.test_workerize(&validated.identifier, worker),
            None => validated.identifier,
        })
    }

    /// Physical target for `tenant`, with an already resolved host override.
    pub fn target_for(&self, tenant: &str, host: Option<String>) -> Result<StoreTarget> {
        let identifier = self.database_for(tenant)?;
        Ok(match self {
            DatabaseAdapter::Schema(a) => StoreTarget {
                tenant: tenant.to_string(),
                database: a.database().to_string(),
                schema: Some(identifier),
                host,
            },
            DatabaseAdapter::File(_) | DatabaseAdapter::Server(_) => StoreTarget {
                tenant: tenant.to_string(),
                database: identifier,
                schema: None,
                host,
            },
        })
    }

    pub async fn create_database(&self, target: &StoreTarget) -> Result<()> {
        match self {
            DatabaseAdapter::File(a) => a.create_database(target).await,
            DatabaseAdapter::Server(a) => a.create_database(target).await,
            DatabaseAdapter::Schema(a) => a.create_schema(target).await,
        }
    }

    pub async fn drop_database(&self, target: &StoreTarget) -> Result<()> {
        match self {
            DatabaseAdapter::File(a) => a.drop_database(target).await,
            DatabaseAdapter::Server(a) => a.drop_database(target).await,
            DatabaseAdapter::Schema(a) => a.drop_schema(target).await,
        }
    }

    pub async fn database_exists(&self, target: &StoreTarget) -> Result<bool> {
        match self {
            DatabaseAdapter::File(a) => Ok(a.database_exists(target)),
            DatabaseAdapter::Server(a) => a.database_exists(target).await,
            DatabaseAdapter::Schema(a) => a.schema_exists(target).await,
        }
    }

    /// Tenant names that currently have a store. Never fails: catalog errors are logged and
    /// produce an empty list.
    pub async fn tenant_databases(&self) -> Vec<String> {
        match self {
            DatabaseAdapter::File(a) => a.tenant_databases(),
            DatabaseAdapter::Server(a) => a.tenant_databases().await,
            DatabaseAdapter::Schema(a) => a.tenant_schemas().await,
        }
    }

    /// Append `_<worker>` to `name` unless it already ends with it.
    pub fn test_workerize(&self, name: &str, worker: &str) -> String {
        match self {
            DatabaseAdapter::File(_) => file::test_workerize(name, worker),
            DatabaseAdapter::Server(_) | DatabaseAdapter::Schema(_) => {
                workerize_suffix(name, worker)
            }
        }
    }

    /// Filesystem path (file strategy) or catalog name (server strategies) behind a resolved
    /// identifier.
    pub fn path_for<'a>(&self, name: &'a str) -> &'a str {
        match self {
            DatabaseAdapter::File(_) => file::path_for(name),
            DatabaseAdapter::Server(_) | DatabaseAdapter::Schema(_) => name,
        }
    }

    pub fn test_worker(&self) -> Option<&str> {
        match self {
            DatabaseAdapter::File(a) => a.test_worker(),
            DatabaseAdapter::Server(a) => a.test_worker(),
            DatabaseAdapter::Schema(a) => a.test_worker(),
        }
    }

    pub fn set_test_worker(&mut self, worker: Option<String>) {
        match self {
            DatabaseAdapter::File(a) => a.set_test_worker(worker),
            DatabaseAdapter::Server(a) => a.set_test_worker(worker),
            DatabaseAdapter::Schema(a) => a.set_test_worker(worker),
        }
    }
}

pub(crate) fn workerize_suffix(name: &str, worker: &str) -> String {
    let suffix = format!("_{}", worker);
    if name.ends_with(&suffix) {
        name.to_string()
    } else {
        format!("{}{}", name, suffix)
    }
}
