//! Process-wide cache of tenant pools.
//!
//! Each `(config, tenant, role)` key maps to a slot that is initialised at most once, so
//! concurrent first access to the same tenant opens exactly one pool while unrelated tenants
//! proceed in parallel. A miss validates the tenant, makes room under the config's pool cap,
//! prepares the store (create + migrate) and only then publishes the pool.

use crate::config::{BaseConfig, TenantConfig, UNTENANTED_TENANT};
use crate::connection::{Role, TenantPool};
use crate::context::{TenantContext, TenantScope};
use crate::error::{Result, TenantError};
use crate::lifecycle::{prepare_held, ReadyLocks};
use crate::migration::{SchemaMigrator, SqlMigrator};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub config: String,
    pub tenant: String,
    pub role: Role,
}

impl PoolKey {
    pub fn new(config: &str, tenant: &str, role: Role) -> Self {
        PoolKey {
            config: config.to_string(),
            tenant: tenant.to_string(),
            role,
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.config, self.tenant, self.role)
    }
}

type Slot = Arc<OnceCell<Arc<TenantPool>>>;

pub struct ConnectionPoolRegistry {
    pools: DashMap<PoolKey, Slot>,
    ready_locks: ReadyLocks,
    migrator: Arc<dyn SchemaMigrator>,
    /// Serialises slot admission so the per-config cap is never overshot.
    admission: Mutex<()>,
    clock: AtomicU64,
}

impl Default for ConnectionPoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionPoolRegistry {
    pub fn new() -> Self {
        Self::with_migrator(Arc::new(SqlMigrator))
    }

    pub fn with_migrator(migrator: Arc<dyn SchemaMigrator>) -> Self {
        ConnectionPoolRegistry {
            pools: DashMap::new(),
            ready_locks: ReadyLocks::new(),
            migrator,
            admission: Mutex::new(()),
            clock: AtomicU64::new(0),
        }
    }

    pub fn ready_locks(&self) -> &ReadyLocks {
        &self.ready_locks
    }

    pub fn migrator(&self) -> &dyn SchemaMigrator {
        self.migrator.as_ref()
    }

    /// Pool for the tenant and role selected in the current task.
    pub async fn current_pool(&self, base: &Arc<BaseConfig>) -> Result<Arc<TenantPool>> {
        self.get_or_create_pool(base, &TenantContext::current()).await
    }

    /// Pool for `scope` under `base`, opening (and preparing the store) on first use.
    ///
    /// Without a tenant only the reading role is served, and only when `untenanted_reads` is on.
    pub async fn get_or_create_pool(
        &self,
        base: &Arc<BaseConfig>,
        scope: &TenantScope,
    ) -> Result<Arc<TenantPool>> {
        let (config, tenant) = match scope.tenant_name() {
            Some(tenant) => (base.new_tenant_config(tenant)?, tenant),
            None if scope.role == Role::Reading => (base.untenanted_config()?, UNTENANTED_TENANT),
            None => return Err(TenantError::without_tenant(base.name())),
        };
        let key = PoolKey::new(base.name(), tenant, scope.role);

        let existing = self.pools.get(&key).map(|slot| slot.value().clone());
        let slot = match existing {
            Some(slot) => slot,
            None => self.admit(&key, base.max_connection_pools()).await?,
        };

        match slot.get_or_try_init(|| self.open(&key, &slot, &config)).await {
            Ok(pool) if !self.is_registered(&key, &slot) => {
                // Unregistered between open and publish: nobody else will close it.
                pool.close().await;
                Err(TenantError::TenantDestroyed(key.to_string()))
            }
            Ok(pool) => {
                pool.touch(self.tick());
                Ok(pool.clone())
            }
            Err(e) => {
                // Others still waiting on the slot retry the open themselves.
                self.pools.remove_if(&key, |_, current| {
                    Arc::ptr_eq(current, &slot)
                        && !current.initialized()
                        && Arc::strong_count(current) <= 2
                });
                Err(e)
            }
        }
    }

    /// Prepare the store and connect, all under the store's ready lock. A slot that was
    /// unregistered while waiting for the lock belongs to a destroyed tenant and must not
    /// recreate its store.
    async fn open(
        &self,
        key: &PoolKey,
        slot: &Slot,
        config: &TenantConfig,
    ) -> Result<Arc<TenantPool>> {
        let _guard = self.ready_locks.acquire(config).await?;
        if !self.is_registered(key, slot) {
            return Err(TenantError::TenantDestroyed(key.to_string()));
        }
        prepare_held(config, self.migrator.as_ref()).await?;
        Ok(Arc::new(config.new_connection(key.role).await?))
    }

    fn is_registered(&self, key: &PoolKey, slot: &Slot) -> bool {
        self.pools.get(key).map_or(false, |current| Arc::ptr_eq(current.value(), slot))
    }

    /// Insert an empty slot for `key`, evicting an idle pool of the same config if the cap is
    /// reached.
    async fn admit(&self, key: &PoolKey, max: usize) -> Result<Slot> {
        let evicted;
        let slot = {
            let _admission = self.admission.lock().await;
            if let Some(slot) = self.pools.get(key) {
                return Ok(slot.value().clone());
            }
            evicted = self.make_room(&key.config, max)?;
            let slot: Slot = Arc::new(OnceCell::new());
            self.pools.insert(key.clone(), slot.clone());
            slot
        };
        if let Some(pool) = evicted {
            pool.close().await;
        }
        Ok(slot)
    }

    /// Remove the least recently used idle pool of `config` when it already has `max` slots. A
    /// pool is idle when nobody outside the registry holds it.
    fn make_room(&self, config: &str, max: usize) -> Result<Option<Arc<TenantPool>>> {
        let mut in_use = 0;
        let mut victim: Option<(PoolKey, u64)> = None;
        for entry in self.pools.iter().filter(|e| e.key().config == config) {
            in_use += 1;
            let slot = entry.value();
            let Some(pool) = slot.get() else { continue };
            if Arc::strong_count(slot) > 1 || Arc::strong_count(pool) > 1 {
                continue;
            }
            if victim.as_ref().map_or(true, |(_, used)| pool.last_used() < *used) {
                victim = Some((entry.key().clone(), pool.last_used()));
            }
        }
        if in_use < max {
            return Ok(None);
        }
        let Some((key, _)) = victim else {
            return Err(TenantError::PoolLimitReached {
                config: config.to_string(),
                max,
            });
        };
        let removed = self.pools.remove_if(&key, |_, slot| {
            Arc::strong_count(slot) == 1
                && slot.get().map_or(false, |pool| Arc::strong_count(pool) == 1)
        });
        match removed.and_then(|(_, slot)| slot.get().cloned()) {
            Some(pool) => {
                tracing::debug!(
                    config = %config,
                    role = %key.role,
                    "evicted idle pool{}",
                    pool.tag()
                );
                Ok(Some(pool))
            }
            None => Err(TenantError::PoolLimitReached {
                config: config.to_string(),
                max,
            }),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn contains(&self, config: &str, tenant: &str, role: Role) -> bool {
        self.pools
            .get(&PoolKey::new(config, tenant, role))
            .map_or(false, |slot| slot.initialized())
    }

    /// Open pools across every config.
    pub fn pool_count(&self) -> usize {
        self.pools.iter().filter(|e| e.value().initialized()).count()
    }

    pub fn pool_count_for(&self, config: &str) -> usize {
        self.pools
            .iter()
            .filter(|e| e.key().config == config && e.value().initialized())
            .count()
    }

    /// Unregister every pool of `tenant` under `config` without closing them. Slots still
    /// opening are dropped too; their openers notice and close what they open.
    pub fn take_tenant(&self, config: &str, tenant: &str) -> Vec<Arc<TenantPool>> {
        [Role::Writing, Role::Reading]
            .into_iter()
            .filter_map(|role| self.pools.remove(&PoolKey::new(config, tenant, role)))
            .filter_map(|(_, slot)| slot.get().cloned())
            .collect()
    }

    /// Unregister every pool of `config`, all tenants and roles, without closing them.
    pub fn take_config(&self, config: &str) -> Vec<Arc<TenantPool>> {
        let keys: Vec<PoolKey> = self
            .pools
            .iter()
            .filter(|e| e.key().config == config)
            .map(|e| e.key().clone())
            .collect();
        keys.iter()
            .filter_map(|key| self.pools.remove(key))
            .filter_map(|(_, slot)| slot.get().cloned())
            .collect()
    }

    /// Unregister and close every pool of `tenant` under `config`. Returns how many were open.
    pub async fn remove_tenant(&self, config: &str, tenant: &str) -> usize {
        let pools = self.take_tenant(config, tenant);
        for pool in &pools {
            pool.close().await;
        }
        pools.len()
    }

    /// Close every pool. Used on shutdown and between tests.
    pub async fn clear(&self) {
        let keys: Vec<PoolKey> = self.pools.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some(pool) = self.pools.remove(&key).and_then(|(_, slot)| slot.get().cloned()) {
                pool.close().await;
            }
        }
    }
}

impl fmt::Debug for ConnectionPoolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPoolRegistry")
            .field("pools", &self.pools.len())
            .field("ready_locks", &self.ready_locks.len())
            .finish()
    }
}
