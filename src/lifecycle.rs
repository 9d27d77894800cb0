//! Tenant store lifecycle: create on demand, bring to the current schema, destroy.
//!
//! A store moves `absent -> present-unmigrated -> present-ready -> absent`. [`prepare`] covers the
//! first two transitions and is what the pool registry runs on every cache miss; it is a no-op on a
//! ready store.

use crate::adapters::DatabaseAdapter;
use crate::config::{BaseConfig, TenantConfig};
use crate::connection::TenantPool;
use crate::context::TenantContext;
use crate::error::{Result, TenantError};
use crate::migration::{ReadyReport, SchemaMigrator};
use crate::registry::ConnectionPoolRegistry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per physical store, keyed by [`crate::adapters::StoreTarget::lock_key`].
/// Unrelated tenants never wait on each other.
#[derive(Debug, Default)]
pub struct ReadyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ReadyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: String) -> Arc<Mutex<()>> {
        self.locks.entry(key).or_default().clone()
    }

    /// Hold the in-process lock of one store.
    pub async fn hold(&self, key: String) -> OwnedMutexGuard<()> {
        self.lock_for(key).lock_owned().await
    }

    /// Hold `config`'s store: the in-process lock and, for file stores, the OS lock on
    /// `<path>.lock` that keeps parallel test processes apart.
    pub async fn acquire(&self, config: &TenantConfig) -> Result<ReadyGuard> {
        let held = self.hold(config.target().lock_key()).await;
        let file = match config.adapter() {
            DatabaseAdapter::File(file) => Some(file.lock_exclusive(config.target()).await?),
            DatabaseAdapter::Server(_) | DatabaseAdapter::Schema(_) => None,
        };
        Ok(ReadyGuard { _file: file, _held: held })
    }

    /// Forget the lock of a destroyed store unless someone is waiting on it.
    fn release(&self, key: &str) {
        self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// A held store lock. The file lock is released before the in-process one.
#[derive(Debug)]
pub struct ReadyGuard {
    _file: Option<std::fs::File>,
    _held: OwnedMutexGuard<()>,
}

/// Create the store behind `config` if it is missing, then migrate it.
///
/// Runs under the store's ready lock, so a second caller for the same tenant waits and then finds
/// nothing pending.
pub async fn prepare(
    config: &TenantConfig,
    locks: &ReadyLocks,
    migrator: &dyn SchemaMigrator,
) -> Result<ReadyReport> {
    let _guard = locks.acquire(config).await?;
    prepare_held(config, migrator).await
}

/// [`prepare`] for a caller that already holds the store's [`ReadyGuard`].
pub async fn prepare_held(
    config: &TenantConfig,
    migrator: &dyn SchemaMigrator,
) -> Result<ReadyReport> {
    if !config.exists().await? {
        config.create_store().await?;
        tracing::info!(
            config = %config.config_name(),
            database = %config.database(),
            "created tenant store [tenant={}]",
            config.tenant()
        );
    }
    let report = migrator.ensure_ready(config).await?;
    if !report.is_noop() {
        tracing::info!(
            config = %config.config_name(),
            loaded_schema = report.loaded_schema,
            applied = report.applied.len(),
            "tenant store ready [tenant={}]",
            config.tenant()
        );
    }
    Ok(report)
}

/// Creates and destroys tenants on top of a [`ConnectionPoolRegistry`].
#[derive(Clone, Debug)]
pub struct TenantLifecycleService {
    registry: Arc<ConnectionPoolRegistry>,
}

impl TenantLifecycleService {
    pub fn new(registry: Arc<ConnectionPoolRegistry>) -> Self {
        TenantLifecycleService { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionPoolRegistry> {
        &self.registry
    }

    /// Bring `config`'s store to the current schema. Idempotent.
    pub async fn ensure_ready(&self, config: &TenantConfig) -> Result<ReadyReport> {
        prepare(config, self.registry.ready_locks(), self.registry.migrator()).await
    }

    /// Revert the `steps` most recent migrations of `config`'s store, under its ready lock.
    pub async fn rollback(&self, config: &TenantConfig, steps: usize) -> Result<Vec<i64>> {
        let _guard = self.registry.ready_locks().acquire(config).await?;
        self.registry.migrator().rollback(config, steps).await
    }

    pub async fn tenant_exist(&self, base: &Arc<BaseConfig>, tenant: &str) -> Result<bool> {
        base.new_tenant_config(tenant)?.exists().await
    }

    /// Create `tenant` and run `f` inside its scope with the freshly opened pool.
    ///
    /// Fails with `TenantAlreadyExists` when the store is already there.
    pub async fn create_tenant<F, Fut, T>(
        &self,
        base: &Arc<BaseConfig>,
        tenant: &str,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(Arc<TenantPool>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let config = base.new_tenant_config(tenant)?;
        if config.exists().await? {
            return Err(TenantError::TenantAlreadyExists(format!(
                "{} already exists in {}",
                tenant,
                base.name()
            )));
        }
        TenantContext::with_tenant(tenant, async {
            let pool = self.registry.current_pool(base).await?;
            tracing::info!(config = %base.name(), "created tenant{}", pool.tag());
            f(pool).await
        })
        .await
    }

    /// Close the tenant's pools and remove its store. A tenant without a store is left alone.
    ///
    /// Everything happens under the store's ready lock, so a connection being opened for the same
    /// tenant either finishes first (and its pool is closed here) or sees the tenant gone.
    pub async fn destroy_tenant(&self, base: &Arc<BaseConfig>, tenant: &str) -> Result<()> {
        let config = base.new_tenant_config(tenant)?;
        let lock_key = config.target().lock_key();
        let destroyed = {
            let _held = self.registry.ready_locks().hold(lock_key.clone()).await;
            self.destroy_held(base, &config).await
        };
        self.registry.ready_locks().release(&lock_key);
        destroyed
    }

    async fn destroy_held(&self, base: &Arc<BaseConfig>, config: &TenantConfig) -> Result<()> {
        let tenant = config.tenant();
        let closed = self.registry.take_tenant(base.name(), tenant);
        for pool in &closed {
            pool.close().await;
        }
        if !config.exists().await? {
            tracing::debug!(config = %base.name(), "destroy skipped, no store [tenant={}]", tenant);
            return Ok(());
        }
        match closed.first() {
            Some(pool) => pool.log("/* destroying tenant database */", "DESTROY"),
            None => tracing::info!(
                sql = "/* destroying tenant database */",
                config = %base.name(),
                "DESTROY [tenant={}]",
                tenant
            ),
        }
        config.drop_store().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locks_are_shared_per_key() {
        let locks = ReadyLocks::new();
        let a = locks.lock_for("db/foo.sqlite3".into());
        let b = locks.lock_for("db/foo.sqlite3".into());
        let c = locks.lock_for("db/bar.sqlite3".into());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn release_keeps_locks_in_use() {
        let locks = ReadyLocks::new();
        let held = locks.lock_for("db/foo.sqlite3".into());
        locks.release("db/foo.sqlite3");
        assert_eq!(locks.len(), 1);
        drop(held);
        locks.release("db/foo.sqlite3");
        assert!(locks.is_empty());
    }
}
