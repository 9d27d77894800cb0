//! Concrete per-tenant configuration derived from a [`BaseConfig`].

use crate::adapters::{DatabaseAdapter, Engine, StoreTarget};
use crate::config::BaseConfig;
use crate::connection::{PoolSettings, Role, TenantPool};
use crate::error::Result;
use crate::sql::quoted_search_path;
use sqlx::{AnyConnection, Executor};
use std::sync::Arc;

/// Value object describing one tenant's store. Cheap to rebuild; carries no connection.
#[derive(Clone, Debug)]
pub struct TenantConfig {
    base: Arc<BaseConfig>,
    target: StoreTarget,
}

impl TenantConfig {
    pub(crate) fn new(base: Arc<BaseConfig>, target: StoreTarget) -> Self {
        TenantConfig { base, target }
    }

    /// `<logical name>_<tenant>`.
    pub fn name(&self) -> String {
        format!("{}_{}", self.base.name(), self.target.tenant)
    }

    pub fn tenant(&self) -> &str {
        &self.target.tenant
    }

    /// Logical name of the owning base config; selects shared dump and migration files.
    pub fn config_name(&self) -> &str {
        self.base.name()
    }

    pub fn base(&self) -> &Arc<BaseConfig> {
        &self.base
    }

    pub fn adapter(&self) -> &DatabaseAdapter {
        self.base.adapter()
    }

    pub fn engine(&self) -> Engine {
        self.base.adapter().engine()
    }

    pub fn target(&self) -> &StoreTarget {
        &self.target
    }

    pub fn database(&self) -> &str {
        &self.target.database
    }

    /// Schema holding the tenant's tables under the colocated strategy.
    pub fn tenant_schema(&self) -> Option<&str> {
        self.target.schema.as_deref()
    }

    /// Schemas searched on every connection: the tenant schema, then configured extras.
    pub fn schema_search_path(&self) -> Option<Vec<String>> {
        match (self.base.adapter(), self.tenant_schema()) {
            (DatabaseAdapter::Schema(schema), Some(tenant_schema)) => {
                Some(schema.search_path_for(tenant_schema))
            }
            _ => None,
        }
    }

    pub fn url(&self) -> Result<String> {
        self.base
            .endpoint()
            .url(Some(&self.target.database), self.target.host.as_deref())
    }

    /// Statements run right after connecting: search path first, then the read-only switch.
    pub fn session_statements(&self, role: Role) -> Vec<String> {
        let mut statements = Vec::new();
        if let Some(path) = self.schema_search_path() {
            statements.push(format!("SET search_path TO {}", quoted_search_path(&path)));
        }
        if role == Role::Reading {
            statements.push(self.engine().read_only_statement().to_string());
        }
        statements
    }

    pub fn pool_settings(&self, role: Role) -> Result<PoolSettings> {
        Ok(PoolSettings {
            url: self.url()?,
            engine: self.engine(),
            max_connections: self.base.pool_size(),
            session_statements: self.session_statements(role),
        })
    }

    /// Open a pool for this tenant. Every log line it emits carries ` [tenant=<name>]`.
    pub async fn new_connection(&self, role: Role) -> Result<TenantPool> {
        TenantPool::open(self.base.name(), self.tenant(), role, &self.pool_settings(role)?).await
    }

    /// Single writing connection with the session prepared, for migrations and schema loads.
    pub async fn connect(&self) -> Result<AnyConnection> {
        let mut conn = self
            .base
            .endpoint()
            .connect(Some(&self.target.database), self.target.host.as_deref())
            .await?;
        for sql in self.session_statements(Role::Writing) {
            conn.execute(sql.as_str()).await?;
        }
        Ok(conn)
    }

    pub async fn exists(&self) -> Result<bool> {
        self.adapter().database_exists(&self.target).await
    }

    pub async fn create_store(&self) -> Result<()> {
        self.adapter().create_database(&self.target).await
    }

    pub async fn drop_store(&self) -> Result<()> {
        self.adapter().drop_database(&self.target).await
    }
}
