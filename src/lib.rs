//! Tenanted SDK: per-tenant database routing, pool lifecycle and migrations over sqlx.

pub mod adapters;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod migration;
pub mod model;
pub mod registry;
pub mod sql;
pub mod state;
pub mod tasks;
pub mod validation;

pub use adapters::{DatabaseAdapter, Engine, StoreTarget};
pub use config::{BaseConfig, DatabaseConfig, DatabaseConfigurations, TenantConfig};
pub use connection::{Role, TenantPool, TenantTag};
pub use context::{CurrentTenant, TenantContext, TenantScope};
pub use error::{ConfigError, Result, TenantError};
pub use lifecycle::TenantLifecycleService;
pub use migration::{ReadyReport, SchemaMigrator, SqlMigrator};
pub use model::ConnectionClass;
pub use registry::ConnectionPoolRegistry;
pub use state::Tenanted;
pub use tasks::DatabaseTasks;
pub use validation::{TenantNameValidator, ValidatedName};
