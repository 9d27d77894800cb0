//! Root configuration of one tenanted logical database.
//!
//! A [`BaseConfig`] is a template: it resolves tenant names to stores and derives
//! [`TenantConfig`]s, but it never opens a connection itself.

use crate::adapters::{adapter_for, DatabaseAdapter};
use crate::config::{DatabaseConfig, TenantConfig};
use crate::connection::{Endpoint, TenantPool};
use crate::error::{ConfigError, Result, TenantError};
use crate::validation::{format_pattern, has_tenant_placeholder};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_MAX_CONNECTION_POOLS: usize = 50;
pub const DEFAULT_POOL_SIZE: u32 = 5;
pub const DEFAULT_DB_DIR: &str = "db";

/// Tenant name of the store behind untenanted reads. Never accepted from callers.
pub const UNTENANTED_TENANT: &str = "__untenanted__";

#[derive(Clone, Debug)]
pub struct BaseConfig {
    env_name: String,
    name: String,
    primary: bool,
    adapter: DatabaseAdapter,
    endpoint: Endpoint,
    host_pattern: Option<String>,
    migrations_path: PathBuf,
    db_dir: PathBuf,
    schema_dump: Option<String>,
    max_connection_pools: usize,
    pool_size: u32,
    untenanted_reads: bool,
    dump_schema_after_migration: bool,
    /// Databases of untenanted siblings in the same environment.
    shared_databases: Vec<String>,
}

impl BaseConfig {
    /// Build from a validated raw config. Strategy errors surface here, at load time.
    pub fn new(
        env_name: &str,
        name: &str,
        primary: bool,
        config: &DatabaseConfig,
    ) -> Result<BaseConfig> {
        crate::config::validate(name, config)?;
        if !config.tenanted {
            return Err(ConfigError::Invalid(format!("{}: not a tenanted database", name)).into());
        }
        let adapter = adapter_for(name, config)?;
        let db_dir = PathBuf::from(config.db_dir.as_deref().unwrap_or(DEFAULT_DB_DIR));
        let migrations_path = match &config.migrations_path {
            Some(path) => PathBuf::from(path),
            None if primary => db_dir.join("migrate"),
            None => db_dir.join(format!("{}_migrate", name)),
        };
        Ok(BaseConfig {
            env_name: env_name.to_string(),
            name: name.to_string(),
            primary,
            endpoint: config.endpoint(adapter.engine()),
            adapter,
            host_pattern: config.host.clone(),
            migrations_path,
            db_dir,
            schema_dump: config.schema_dump.clone(),
            max_connection_pools: config
                .max_connection_pools
                .unwrap_or(DEFAULT_MAX_CONNECTION_POOLS),
            pool_size: config.pool.unwrap_or(DEFAULT_POOL_SIZE),
            untenanted_reads: config.untenanted_reads,
            dump_schema_after_migration: config
                .dump_schema_after_migration
                .unwrap_or(env_name == "development"),
            shared_databases: Vec::new(),
        })
    }

    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn adapter(&self) -> &DatabaseAdapter {
        &self.adapter
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn migrations_path(&self) -> &Path {
        &self.migrations_path
    }

    pub fn pool_size(&self) -> u32 {
        self.pool_size
    }

    /// Cap on simultaneous tenant pools for this logical database.
    pub fn max_connection_pools(&self) -> usize {
        self.max_connection_pools
    }

    pub fn untenanted_reads(&self) -> bool {
        self.untenanted_reads
    }

    pub fn dump_schema_after_migration(&self) -> bool {
        self.dump_schema_after_migration
    }

    /// `schema.sql` for the primary database, `<name>_schema.sql` otherwise, inside `db_dir`.
    pub fn schema_dump_path(&self) -> PathBuf {
        let file = match &self.schema_dump {
            Some(file) => file.clone(),
            None if self.primary => "schema.sql".to_string(),
            None => format!("{}_schema.sql", self.name),
        };
        self.db_dir.join(file)
    }

    /// Validated, formatted and worker-suffixed store identifier for `tenant`.
    pub fn database_for(&self, tenant: &str) -> Result<String> {
        reject_reserved(tenant, &self.adapter)?;
        self.adapter.database_for(tenant)
    }

    /// Host for `tenant` when the configured host is tenant-templated.
    pub fn host_for(&self, tenant: &str) -> Option<String> {
        self.host_pattern
            .as_deref()
            .filter(|host| has_tenant_placeholder(host))
            .map(|host| format_pattern(host, tenant))
    }

    /// Existing tenants, excluding names whose store coincides with an untenanted sibling.
    pub async fn tenants(&self) -> Vec<String> {
        self.adapter
            .tenant_databases()
            .await
            .into_iter()
            .filter(|tenant| tenant != UNTENANTED_TENANT)
            .filter(|tenant| match self.adapter.database_for(tenant) {
                Ok(database) => !self.shared_databases.contains(&database),
                Err(_) => false,
            })
            .collect()
    }

    pub fn new_tenant_config(self: &Arc<Self>, tenant: &str) -> Result<TenantConfig> {
        reject_reserved(tenant, &self.adapter)?;
        let target = self.adapter.target_for(tenant, self.host_for(tenant))?;
        Ok(TenantConfig::new(self.clone(), target))
    }

    /// Config of the read-only store serving untenanted reads, when enabled.
    pub fn untenanted_config(self: &Arc<Self>) -> Result<TenantConfig> {
        if !self.untenanted_reads {
            return Err(TenantError::NoTenant(format!(
                "{}: untenanted reads are disabled; enable `untenanted_reads` or select a tenant",
                self.name
            )));
        }
        let target = self
            .adapter
            .target_for(UNTENANTED_TENANT, self.host_for(UNTENANTED_TENANT))?;
        Ok(TenantConfig::new(self.clone(), target))
    }

    /// Always fails: the template itself is never a live target.
    pub async fn new_connection(&self) -> Result<TenantPool> {
        Err(TenantError::without_tenant(&self.name))
    }

    /// Drop every tenant store; under the colocated strategy the shared database too.
    pub async fn drop_all(self: &Arc<Self>) -> Result<Vec<String>> {
        let tenants = self.adapter.tenant_databases().await;
        for tenant in &tenants {
            let target = self.adapter.target_for(tenant, self.host_for(tenant))?;
            self.adapter.drop_database(&target).await?;
            tracing::info!(config = %self.name, "dropped tenant store [tenant={}]", tenant);
        }
        if let DatabaseAdapter::Schema(schema) = &self.adapter {
            schema.drop_base_database().await?;
        }
        Ok(tenants)
    }

    pub(crate) fn set_test_worker(&mut self, worker: Option<String>) {
        self.adapter.set_test_worker(worker);
    }

    pub(crate) fn set_shared_databases(&mut self, databases: Vec<String>) {
        self.shared_databases = databases;
    }
}

fn reject_reserved(tenant: &str, adapter: &DatabaseAdapter) -> Result<()> {
    if tenant == UNTENANTED_TENANT {
        let identifier = format_pattern(adapter.tenant_pattern(), tenant);
        return Err(TenantError::bad_name(
            "Tenant name is reserved for untenanted reads",
            identifier,
        ));
    }
    Ok(())
}
