//! Operational commands over the tenants of one logical database: migrate, rollback and drop,
//! for a single tenant or for every existing one.

use crate::config::BaseConfig;
use crate::error::Result;
use crate::lifecycle::TenantLifecycleService;
use crate::migration::ReadyReport;
use std::sync::Arc;

/// Commands bound to one tenanted [`BaseConfig`].
#[derive(Clone, Debug)]
pub struct DatabaseTasks {
    base: Arc<BaseConfig>,
    lifecycle: TenantLifecycleService,
}

impl DatabaseTasks {
    pub fn new(base: Arc<BaseConfig>, lifecycle: TenantLifecycleService) -> Self {
        DatabaseTasks { base, lifecycle }
    }

    pub fn base(&self) -> &Arc<BaseConfig> {
        &self.base
    }

    /// Create `tenant`'s store if needed and apply pending migrations.
    pub async fn migrate_tenant(&self, tenant: &str) -> Result<ReadyReport> {
        let config = self.base.new_tenant_config(tenant)?;
        let report = self.lifecycle.ensure_ready(&config).await?;
        if report.is_noop() {
            tracing::debug!(config = %self.base.name(), "nothing to migrate [tenant={}]", tenant);
        }
        Ok(report)
    }

    /// Migrate every existing tenant. Stops at the first failure.
    pub async fn migrate_all(&self) -> Result<Vec<(String, ReadyReport)>> {
        let mut reports = Vec::new();
        for tenant in self.base.tenants().await {
            let report = self.migrate_tenant(&tenant).await?;
            reports.push((tenant, report));
        }
        Ok(reports)
    }

    /// Revert the `steps` most recent migrations of `tenant`. A tenant without a store has
    /// nothing to revert.
    pub async fn rollback_tenant(&self, tenant: &str, steps: usize) -> Result<Vec<i64>> {
        let config = self.base.new_tenant_config(tenant)?;
        if !config.exists().await? {
            return Ok(Vec::new());
        }
        self.lifecycle.rollback(&config, steps).await
    }

    pub async fn rollback_all(&self, steps: usize) -> Result<Vec<(String, Vec<i64>)>> {
        let mut reverted = Vec::new();
        for tenant in self.base.tenants().await {
            let versions = self.rollback_tenant(&tenant, steps).await?;
            reverted.push((tenant, versions));
        }
        Ok(reverted)
    }

    pub async fn drop_tenant(&self, tenant: &str) -> Result<()> {
        self.lifecycle.destroy_tenant(&self.base, tenant).await
    }

    /// Drop every tenant store and, under the schema strategy, the shared database. Returns the
    /// tenants that were dropped.
    pub async fn drop_all(&self) -> Result<Vec<String>> {
        let pools = self.lifecycle.registry().take_config(self.base.name());
        for pool in &pools {
            pool.close().await;
        }
        let dropped = self.base.drop_all().await?;
        tracing::info!(config = %self.base.name(), tenants = dropped.len(), "dropped all tenants");
        Ok(dropped)
    }
}
