//! Record groups: which tenanted database a set of records lives in.
//!
//! A [`ConnectionClass`] either owns a [`BaseConfig`] (declared with [`ConnectionClass::tenanted`])
//! or shares another class's connection ([`ConnectionClass::tenanted_with`]). Sharing classes never
//! open pools of their own, so any number of them map to one pool per tenant.

use crate::config::BaseConfig;
use crate::connection::TenantPool;
use crate::context::TenantScope;
use crate::error::Result;
use crate::registry::ConnectionPoolRegistry;
use std::sync::Arc;

#[derive(Debug)]
enum Tenancy {
    Owns {
        base: Arc<BaseConfig>,
        registry: Arc<ConnectionPoolRegistry>,
    },
    Shares(Arc<ConnectionClass>),
}

#[derive(Debug)]
pub struct ConnectionClass {
    name: String,
    tenancy: Tenancy,
}

impl ConnectionClass {
    /// A class whose records live in `base`'s per-tenant stores.
    pub fn tenanted(
        name: impl Into<String>,
        base: Arc<BaseConfig>,
        registry: Arc<ConnectionPoolRegistry>,
    ) -> Arc<ConnectionClass> {
        Arc::new(ConnectionClass {
            name: name.into(),
            tenancy: Tenancy::Owns { base, registry },
        })
    }

    /// A class that uses `owner`'s connection for every tenant.
    pub fn tenanted_with(
        name: impl Into<String>,
        owner: &Arc<ConnectionClass>,
    ) -> Arc<ConnectionClass> {
        Arc::new(ConnectionClass {
            name: name.into(),
            tenancy: Tenancy::Shares(owner.clone()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True for classes declared with [`ConnectionClass::tenanted`].
    pub fn is_connection_class(&self) -> bool {
        matches!(self.tenancy, Tenancy::Owns { .. })
    }

    /// The class that owns the connection, following sharing links.
    pub fn connection_class(&self) -> &ConnectionClass {
        match &self.tenancy {
            Tenancy::Owns { .. } => self,
            Tenancy::Shares(owner) => owner.connection_class(),
        }
    }

    /// Config and registry of the owning class.
    fn owner(&self) -> (&Arc<BaseConfig>, &Arc<ConnectionPoolRegistry>) {
        match &self.tenancy {
            Tenancy::Owns { base, registry } => (base, registry),
            Tenancy::Shares(owner) => owner.owner(),
        }
    }

    pub fn base_config(&self) -> &Arc<BaseConfig> {
        self.owner().0
    }

    /// Logical database name of the owning class.
    pub fn tenanted_config_name(&self) -> &str {
        self.base_config().name()
    }

    fn registry(&self) -> &Arc<ConnectionPoolRegistry> {
        self.owner().1
    }

    /// Pool for the tenant selected in the current task.
    pub async fn connection_pool(&self) -> Result<Arc<TenantPool>> {
        self.registry().current_pool(self.base_config()).await
    }

    pub async fn pool_for(&self, scope: &TenantScope) -> Result<Arc<TenantPool>> {
        self.registry().get_or_create_pool(self.base_config(), scope).await
    }

    pub async fn tenants(&self) -> Vec<String> {
        self.base_config().tenants().await
    }
}
