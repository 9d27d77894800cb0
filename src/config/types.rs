//! Raw config types matching the JSON configuration file.

use crate::adapters::Engine;
use crate::connection::Endpoint;
use serde::{Deserialize, Serialize};

/// One logical database as declared for an environment. Unknown keys are rejected.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Handled by the tenant engine rather than as an ordinary shared database.
    #[serde(default)]
    pub tenanted: bool,
    pub adapter: String,
    /// Database pattern (`%{tenant}`), static database name, or SQLite file path.
    #[serde(default)]
    pub database: Option<String>,
    /// May contain `%{tenant}` for host-based sharding.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub migrations_path: Option<String>,
    #[serde(default)]
    pub db_dir: Option<String>,
    #[serde(default)]
    pub schema_dump: Option<String>,
    #[serde(default)]
    pub max_connection_pools: Option<usize>,
    /// Connections per tenant pool.
    #[serde(default)]
    pub pool: Option<u32>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub collation: Option<String>,
    #[serde(default)]
    pub postgresql_strategy: Option<String>,
    #[serde(default)]
    pub schema_name_pattern: Option<String>,
    #[serde(default)]
    pub tenant_schema: Option<String>,
    #[serde(default)]
    pub schema_search_path: Option<String>,
    #[serde(default)]
    pub untenanted_reads: bool,
    #[serde(default)]
    pub dump_schema_after_migration: Option<bool>,
}

impl DatabaseConfig {
    pub fn endpoint(&self, engine: Engine) -> Endpoint {
        Endpoint {
            engine,
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}
