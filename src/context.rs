//! Ambient current tenant, carried in a tokio task-local.
//!
//! Scopes nest and are restored on every exit path, including panics and early returns, because
//! the value only lives for the duration of the future (or closure) it wraps. Tasks spawned inside
//! a scope do not inherit it; wrap them explicitly.

use crate::connection::Role;
use crate::error::{Result, TenantError};
use std::fmt;
use std::future::Future;

tokio::task_local! {
    static CURRENT: TenantScope;
}

/// Which tenant is selected. `Untenanted` is distinct from every tenant name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CurrentTenant {
    Named(String),
    #[default]
    Untenanted,
}

impl fmt::Display for CurrentTenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurrentTenant::Named(name) => f.write_str(name),
            CurrentTenant::Untenanted => f.write_str("(untenanted)"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TenantScope {
    pub tenant: CurrentTenant,
    pub role: Role,
}

impl TenantScope {
    pub fn tenant_name(&self) -> Option<&str> {
        match &self.tenant {
            CurrentTenant::Named(name) => Some(name),
            CurrentTenant::Untenanted => None,
        }
    }
}

pub struct TenantContext;

impl TenantContext {
    /// Scope active in this task, or the untenanted writing scope outside any.
    pub fn current() -> TenantScope {
        CURRENT.try_with(|scope| scope.clone()).unwrap_or_default()
    }

    pub fn current_tenant() -> Option<String> {
        CURRENT
            .try_with(|scope| scope.tenant_name().map(str::to_string))
            .ok()
            .flatten()
    }

    pub fn current_role() -> Role {
        Self::current().role
    }

    /// Selected tenant, or `NoTenant`.
    pub fn require_tenant() -> Result<String> {
        Self::current_tenant()
            .ok_or_else(|| TenantError::NoTenant("no tenant selected for this task".into()))
    }

    /// Run `f` with `scope` selected.
    pub async fn scope<F: Future>(scope: TenantScope, f: F) -> F::Output {
        CURRENT.scope(scope, f).await
    }

    /// Run `f` with `tenant` selected, keeping the current role.
    pub async fn with_tenant<F: Future>(tenant: impl Into<String>, f: F) -> F::Output {
        let scope = TenantScope {
            tenant: CurrentTenant::Named(tenant.into()),
            role: Self::current_role(),
        };
        Self::scope(scope, f).await
    }

    /// Run `f` with no tenant selected, keeping the current role.
    pub async fn with_untenanted<F: Future>(f: F) -> F::Output {
        let scope = TenantScope {
            tenant: CurrentTenant::Untenanted,
            role: Self::current_role(),
        };
        Self::scope(scope, f).await
    }

    /// Run `f` with `role`, keeping the current tenant.
    pub async fn with_role<F: Future>(role: Role, f: F) -> F::Output {
        let scope = TenantScope {
            tenant: Self::current().tenant,
            role,
        };
        Self::scope(scope, f).await
    }

    /// Synchronous variant of [`TenantContext::with_tenant`] for non-async call stacks.
    pub fn sync_with_tenant<R>(tenant: impl Into<String>, f: impl FnOnce() -> R) -> R {
        let scope = TenantScope {
            tenant: CurrentTenant::Named(tenant.into()),
            role: Self::current_role(),
        };
        CURRENT.sync_scope(scope, f)
    }
}
