//! Shared entry point for an application: loaded configurations plus the process-wide pool
//! registry and lifecycle service built on it.

use crate::config::{BaseConfig, DatabaseConfigurations};
use crate::error::Result;
use crate::lifecycle::TenantLifecycleService;
use crate::migration::SchemaMigrator;
use crate::model::ConnectionClass;
use crate::registry::ConnectionPoolRegistry;
use crate::tasks::DatabaseTasks;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct Tenanted {
    pub configs: Arc<DatabaseConfigurations>,
    pub registry: Arc<ConnectionPoolRegistry>,
    pub lifecycle: TenantLifecycleService,
}

impl Tenanted {
    pub fn new(configs: DatabaseConfigurations) -> Self {
        Self::with_registry(configs, Arc::new(ConnectionPoolRegistry::new()))
    }

    /// Same as [`Tenanted::new`] with a custom migrator for every store.
    pub fn with_migrator(
        configs: DatabaseConfigurations,
        migrator: Arc<dyn SchemaMigrator>,
    ) -> Self {
        let registry = ConnectionPoolRegistry::with_migrator(migrator);
        Self::with_registry(configs, Arc::new(registry))
    }

    fn with_registry(
        configs: DatabaseConfigurations,
        registry: Arc<ConnectionPoolRegistry>,
    ) -> Self {
        Tenanted {
            configs: Arc::new(configs),
            lifecycle: TenantLifecycleService::new(registry.clone()),
            registry,
        }
    }

    /// Load `TENANTED_CONFIG` for `TENANTED_ENV`.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(DatabaseConfigurations::load_from_env()?))
    }

    pub fn base(&self, name: &str) -> Result<Arc<BaseConfig>> {
        self.configs.base(name)
    }

    /// Owning record group for the logical database `name`.
    pub fn connection_class(&self, class_name: &str, name: &str) -> Result<Arc<ConnectionClass>> {
        Ok(ConnectionClass::tenanted(class_name, self.base(name)?, self.registry.clone()))
    }

    pub fn tasks(&self, name: &str) -> Result<DatabaseTasks> {
        Ok(DatabaseTasks::new(self.base(name)?, self.lifecycle.clone()))
    }

    /// Close every open pool.
    pub async fn shutdown(&self) {
        self.registry.clear().await;
    }
}
