//! Database-per-tenant strategy on a MySQL or PostgreSQL server.
//!
//! Create, drop and listing run on a maintenance connection (no database selected on MySQL,
//! `postgres` on PostgreSQL).

use super::{Engine, StoreTarget};
use crate::connection::Endpoint;
use crate::error::Result;
use crate::sql::quote_literal;
use crate::validation::{format_pattern, IdentifierRules};
use regex::Regex;
use sqlx::Executor;

#[derive(Clone, Debug)]
pub struct ServerAdapter {
    pattern: String,
    endpoint: Endpoint,
    encoding: Option<String>,
    collation: Option<String>,
    test_worker: Option<String>,
}

impl ServerAdapter {
    pub fn new(pattern: impl Into<String>, endpoint: Endpoint) -> Self {
        ServerAdapter {
            pattern: pattern.into(),
            endpoint,
            encoding: None,
            collation: None,
            test_worker: None,
        }
    }

    /// Character set / encoding and collation for `CREATE DATABASE`.
    pub fn with_charset(mut self, encoding: Option<String>, collation: Option<String>) -> Self {
        self.encoding = encoding;
        self.collation = collation;
        self
    }

    pub fn engine(&self) -> Engine {
        self.endpoint.engine
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn rules(&self) -> &'static IdentifierRules {
        match self.engine() {
            Engine::MySql => &IdentifierRules::MYSQL,
            Engine::Postgres | Engine::Sqlite => &IdentifierRules::POSTGRES_DATABASE,
        }
    }

    pub fn test_worker(&self) -> Option<&str> {
        self.test_worker.as_deref()
    }

    pub fn set_test_worker(&mut self, worker: Option<String>) {
        self.test_worker = worker;
    }

    pub async fn create_database(&self, target: &StoreTarget) -> Result<()> {
        let sql = create_database_sql(
            self.engine(),
            &target.database,
            self.encoding.as_deref(),
            self.collation.as_deref(),
        );
        let mut conn = self.endpoint.connect_maintenance(target.host.as_deref()).await?;
        tracing::debug!(sql = %sql, "create database");
        (&mut conn).execute(sqlx::raw_sql(&sql)).await?;
        Ok(())
    }

    /// Drop the tenant database. On PostgreSQL other sessions on it are terminated first; failing
    /// to terminate them fails the drop.
    pub async fn drop_database(&self, target: &StoreTarget) -> Result<()> {
        let mut conn = self.endpoint.connect_maintenance(target.host.as_deref()).await?;
        if self.engine() == Engine::Postgres {
            let terminate = format!(
                "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
                 WHERE datname = {} AND pid <> pg_backend_pid()",
                quote_literal(&target.database)
            );
            tracing::debug!(sql = %terminate, "terminate sessions");
            (&mut conn).execute(sqlx::raw_sql(&terminate)).await?;
        }
        let name = self.engine().quote_ident(&target.database);
        let sql = format!("DROP DATABASE IF EXISTS {}", name);
        tracing::debug!(sql = %sql, "drop database");
        (&mut conn).execute(sqlx::raw_sql(&sql)).await?;
        Ok(())
    }

    pub async fn database_exists(&self, target: &StoreTarget) -> Result<bool> {
        let mut conn = self.endpoint.connect_maintenance(target.host.as_deref()).await?;
        let sql = match self.engine() {
            Engine::MySql => format!(
                "SELECT COUNT(*) FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = {}",
                self.engine().bind_marker(1)
            ),
            Engine::Postgres | Engine::Sqlite => format!(
                "SELECT COUNT(*) FROM pg_database WHERE datname = {}",
                self.engine().bind_marker(1)
            ),
        };
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(target.database.as_str())
            .fetch_one(&mut conn)
            .await?;
        Ok(count > 0)
    }

    /// Tenant names of every database on the server matching the pattern.
    pub async fn tenant_databases(&self) -> Vec<String> {
        match self.scan().await {
            Ok(tenants) => tenants,
            Err(e) => {
                tracing::warn!(pattern = %self.pattern, "could not list tenant databases: {}", e);
                Vec::new()
            }
        }
    }

    async fn scan(&self) -> Result<Vec<String>> {
        let like_pattern = self.workerized(&format_pattern(&self.pattern, "%"));
        let scanner = scanner_for(&self.workerized(&format_pattern(&self.pattern, "(.+)")))?;
        let sql = match self.engine() {
            Engine::MySql => format!(
                "SELECT CAST(SCHEMA_NAME AS CHAR) FROM information_schema.SCHEMATA \
                 WHERE SCHEMA_NAME LIKE {} ORDER BY SCHEMA_NAME",
                self.engine().bind_marker(1)
            ),
            Engine::Postgres | Engine::Sqlite => format!(
                "SELECT datname::text FROM pg_database \
                 WHERE datname LIKE {} AND datistemplate = false ORDER BY datname",
                self.engine().bind_marker(1)
            ),
        };
        let mut conn = self.endpoint.connect_maintenance(None).await?;
        let names: Vec<String> = sqlx::query_scalar(&sql)
            .bind(like_pattern.as_str())
            .fetch_all(&mut conn)
            .await?;
        Ok(extract_tenants(&scanner, names))
    }

    fn workerized(&self, name: &str) -> String {
        match &self.test_worker {
            Some(worker) => super::workerize_suffix(name, worker),
            None => name.to_string(),
        }
    }
}

fn create_database_sql(
    engine: Engine,
    database: &str,
    encoding: Option<&str>,
    collation: Option<&str>,
) -> String {
    let name = engine.quote_ident(database);
    match engine {
        Engine::MySql => {
            let mut sql = format!("CREATE DATABASE IF NOT EXISTS {}", name);
            if let Some(encoding) = encoding {
                sql.push_str(&format!(" CHARACTER SET {}", encoding));
            }
            if let Some(collation) = collation {
                sql.push_str(&format!(" COLLATE {}", collation));
            }
            sql
        }
        Engine::Postgres | Engine::Sqlite => {
            let mut sql = format!("CREATE DATABASE {}", name);
            if let Some(encoding) = encoding {
                sql.push_str(&format!(" ENCODING {}", quote_literal(encoding)));
            }
            if let Some(collation) = collation {
                sql.push_str(&format!(" LC_COLLATE {}", quote_literal(collation)));
            }
            sql
        }
    }
}

/// Anchored regex for a name formatted with the `(.+)` sentinel; group 1 is the tenant.
pub(crate) fn scanner_for(sentinel_formatted: &str) -> Result<Regex> {
    let source = regex::escape(sentinel_formatted).replace(&regex::escape("(.+)"), "(.+)");
    Regex::new(&format!("^{}$", source))
        .map_err(|e| crate::error::ConfigError::Invalid(format!("tenant scanner: {}", e)).into())
}

pub(crate) fn extract_tenants(scanner: &Regex, names: Vec<String>) -> Vec<String> {
    names
        .into_iter()
        .filter_map(|name| match scanner.captures(&name).and_then(|c| c.get(1)) {
            Some(m) => Some(m.as_str().to_string()),
            None => {
                tracing::warn!("cannot parse tenant name from database {:?}", name);
                None
            }
        })
        .collect()
}
