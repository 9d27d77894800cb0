//! Colocated strategy: one static PostgreSQL database per logical database, one schema per tenant.
//!
//! The shared database is created on first use. Tenant connections select their schema with a
//! session-level `search_path`.

use super::StoreTarget;
use crate::connection::Endpoint;
use crate::error::{Result, TenantError};
use crate::sql::{quote_ident, quote_literal};
use crate::validation::format_pattern;
use sqlx::{AnyConnection, Executor};

/// Schemas never reported as tenants.
const SYSTEM_SCHEMAS: &[&str] = &["pg_catalog", "information_schema", "pg_toast", "public"];

const DUPLICATE_DATABASE: &str = "42P04";
const INVALID_CATALOG_NAME: &str = "3D000";

#[derive(Clone, Debug)]
pub struct SchemaAdapter {
    database: String,
    schema_pattern: String,
    extra_search_path: Vec<String>,
    endpoint: Endpoint,
    encoding: Option<String>,
    collation: Option<String>,
    test_worker: Option<String>,
}

impl SchemaAdapter {
    pub fn new(
        database: impl Into<String>,
        schema_pattern: impl Into<String>,
        endpoint: Endpoint,
    ) -> Self {
        SchemaAdapter {
            database: database.into(),
            schema_pattern: schema_pattern.into(),
            extra_search_path: Vec::new(),
            endpoint,
            encoding: None,
            collation: None,
            test_worker: None,
        }
    }

    /// Schemas searched after the tenant schema.
    pub fn with_search_path(mut self, extra: Vec<String>) -> Self {
        self.extra_search_path = extra;
        self
    }

    pub fn with_charset(mut self, encoding: Option<String>, collation: Option<String>) -> Self {
        self.encoding = encoding;
        self.collation = collation;
        self
    }

    /// The shared database every tenant schema lives in.
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn schema_pattern(&self) -> &str {
        &self.schema_pattern
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn test_worker(&self) -> Option<&str> {
        self.test_worker.as_deref()
    }

    pub fn set_test_worker(&mut self, worker: Option<String>) {
        self.test_worker = worker;
    }

    /// `search_path` for a tenant schema: the schema itself, then the configured extras.
    pub fn search_path_for(&self, schema: &str) -> Vec<String> {
        let mut path = vec![schema.to_string()];
        path.extend(self.extra_search_path.iter().cloned());
        path
    }

    /// Create the tenant schema if missing and grant it to the configured user.
    pub async fn create_schema(&self, target: &StoreTarget) -> Result<()> {
        let schema = schema_of(target)?;
        let mut conn = self.base_connection(target.host.as_deref()).await?;
        let quoted = quote_ident(schema);
        let create = format!("CREATE SCHEMA IF NOT EXISTS {}", quoted);
        tracing::debug!(sql = %create, database = %self.database, "create schema");
        (&mut conn).execute(sqlx::raw_sql(&create)).await?;
        let grantee = self.endpoint.username.as_deref().unwrap_or("postgres");
        let grant = format!("GRANT ALL ON SCHEMA {} TO {}", quoted, quote_ident(grantee));
        (&mut conn).execute(sqlx::raw_sql(&grant)).await?;
        Ok(())
    }

    pub async fn drop_schema(&self, target: &StoreTarget) -> Result<()> {
        let schema = schema_of(target)?;
        let host = target.host.as_deref();
        let mut conn = match self.endpoint.connect(Some(&self.database), host).await {
            Ok(conn) => conn,
            Err(e) if is_missing_database(&e) => return Ok(()),
            Err(e) => return Err(e),
        };
        let sql = format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(schema));
        tracing::debug!(sql = %sql, database = %self.database, "drop schema");
        (&mut conn).execute(sqlx::raw_sql(&sql)).await?;
        Ok(())
    }

    /// False when either the schema or the shared database is missing.
    pub async fn schema_exists(&self, target: &StoreTarget) -> Result<bool> {
        let schema = schema_of(target)?;
        let host = target.host.as_deref();
        let mut conn = match self.endpoint.connect(Some(&self.database), host).await {
            Ok(conn) => conn,
            Err(e) if is_missing_database(&e) => return Ok(false),
            Err(e) => return Err(e),
        };
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.schemata WHERE schema_name = $1",
        )
        .bind(schema)
        .fetch_one(&mut conn)
        .await?;
        Ok(count > 0)
    }

    pub async fn tenant_schemas(&self) -> Vec<String> {
        match self.scan().await {
            Ok(tenants) => tenants,
            Err(e) => {
                tracing::warn!(database = %self.database, "could not list tenant schemas: {}", e);
                Vec::new()
            }
        }
    }

    async fn scan(&self) -> Result<Vec<String>> {
        let like_pattern = self.workerized(&format_pattern(&self.schema_pattern, "%"));
        let capture = self.workerized(&format_pattern(&self.schema_pattern, "(.+)"));
        let scanner = super::server::scanner_for(&capture)?;
        let excluded = SYSTEM_SCHEMAS
            .iter()
            .map(|s| quote_literal(s))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT schema_name::text FROM information_schema.schemata \
             WHERE schema_name LIKE $1 AND schema_name NOT IN ({}) \
             AND schema_name NOT LIKE 'pg\\_%' \
             ORDER BY schema_name",
            excluded
        );
        let mut conn = self.endpoint.connect(Some(&self.database), None).await?;
        let names: Vec<String> = sqlx::query_scalar(&sql)
            .bind(like_pattern.as_str())
            .fetch_all(&mut conn)
            .await?;
        Ok(super::server::extract_tenants(&scanner, names))
    }

    /// Create the shared database when missing. A concurrent creator winning the race is fine.
    pub async fn ensure_base_database(&self, host: Option<&str>) -> Result<()> {
        let mut conn = self.endpoint.connect_maintenance(host).await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pg_database WHERE datname = $1")
            .bind(self.database.as_str())
            .fetch_one(&mut conn)
            .await?;
        if count > 0 {
            return Ok(());
        }
        tracing::info!(database = %self.database, "creating base database");
        let mut sql = format!("CREATE DATABASE {}", quote_ident(&self.database));
        if let Some(encoding) = &self.encoding {
            sql.push_str(&format!(" ENCODING {}", quote_literal(encoding)));
        }
        if let Some(collation) = &self.collation {
            sql.push_str(&format!(" LC_COLLATE {}", quote_literal(collation)));
        }
        match (&mut conn).execute(sqlx::raw_sql(&sql)).await {
            Ok(_) => Ok(()),
            Err(e) if db_error_code(&e).as_deref() == Some(DUPLICATE_DATABASE) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop the shared database after terminating its sessions.
    pub async fn drop_base_database(&self) -> Result<()> {
        let mut conn = self.endpoint.connect_maintenance(None).await?;
        let terminate = format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = {} AND pid <> pg_backend_pid()",
            quote_literal(&self.database)
        );
        (&mut conn).execute(sqlx::raw_sql(&terminate)).await?;
        let sql = format!("DROP DATABASE IF EXISTS {}", quote_ident(&self.database));
        tracing::info!(sql = %sql, "drop base database");
        (&mut conn).execute(sqlx::raw_sql(&sql)).await?;
        Ok(())
    }

    async fn base_connection(&self, host: Option<&str>) -> Result<AnyConnection> {
        self.ensure_base_database(host).await?;
        self.endpoint.connect(Some(&self.database), host).await
    }

    fn workerized(&self, name: &str) -> String {
        match &self.test_worker {
            Some(worker) => super::workerize_suffix(name, worker),
            None => name.to_string(),
        }
    }
}

fn schema_of(target: &StoreTarget) -> Result<&str> {
    target
        .schema
        .as_deref()
        .ok_or_else(|| {
            TenantError::NoTenant(format!("no schema resolved for database {}", target.database))
        })
}

fn db_error_code(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

fn is_missing_database(e: &TenantError) -> bool {
    match e {
        TenantError::Db(db) => db_error_code(db).as_deref() == Some(INVALID_CATALOG_NAME),
        _ => false,
    }
}
