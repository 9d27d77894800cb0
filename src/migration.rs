//! Apply migrations to a tenant store: schema dump load, pending migrations, rollback, re-dump.
//!
//! Migrations are plain SQL files in the config's migrations directory:
//! `<version>_<name>.sql` (or `.up.sql`) with an optional `<version>_<name>.down.sql`.
//! Applied versions are recorded in `schema_migrations`. The schema dump is the tracking table DDL,
//! the applied migrations in version order, and the version inserts, so loading it reproduces a
//! migrated store in one script.

use crate::adapters::Engine;
use crate::config::TenantConfig;
use crate::error::{Result, TenantError};
use crate::sql::quote_literal;
use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::{AnyConnection, Connection, Executor};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;

pub const TRACKING_TABLE: &str = "schema_migrations";

const TRACKING_TABLE_DDL: &str =
    "CREATE TABLE IF NOT EXISTS schema_migrations (version VARCHAR(255) NOT NULL PRIMARY KEY)";

/// One migration file pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub up: PathBuf,
    pub down: Option<PathBuf>,
}

/// What [`SchemaMigrator::ensure_ready`] did. Empty when the store was already current.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadyReport {
    pub loaded_schema: bool,
    pub applied: Vec<i64>,
}

impl ReadyReport {
    pub fn is_noop(&self) -> bool {
        !self.loaded_schema && self.applied.is_empty()
    }
}

/// Brings a tenant store to the current schema. Callers hold the store's ready lock.
#[async_trait]
pub trait SchemaMigrator: Send + Sync {
    async fn ensure_ready(&self, config: &TenantConfig) -> Result<ReadyReport>;

    /// Revert the `steps` most recent migrations. Returns the reverted versions, newest first.
    async fn rollback(&self, config: &TenantConfig, steps: usize) -> Result<Vec<i64>>;
}

/// Migrator backed by SQL files on disk.
#[derive(Clone, Copy, Debug, Default)]
pub struct SqlMigrator;

#[async_trait]
impl SchemaMigrator for SqlMigrator {
    async fn ensure_ready(&self, config: &TenantConfig) -> Result<ReadyReport> {
        let base = config.base();
        let mut conn = config.connect().await?;
        let mut report = ReadyReport::default();

        if !tracking_table_exists(&mut conn, config.engine()).await? {
            let dump = base.schema_dump_path();
            if tokio::fs::try_exists(&dump).await? {
                load_schema(&mut conn, &dump).await?;
                tracing::info!(
                    dump = %dump.display(),
                    "loaded schema [tenant={}]",
                    config.tenant()
                );
                report.loaded_schema = true;
            } else {
                (&mut conn).execute(sqlx::raw_sql(TRACKING_TABLE_DDL)).await?;
            }
        }

        let migrations = discover(base.migrations_path())?;
        let applied: HashSet<i64> = applied_versions(&mut conn).await?.into_iter().collect();
        for migration in migrations.iter().filter(|m| !applied.contains(&m.version)) {
            apply(&mut conn, migration).await?;
            tracing::info!(
                version = migration.version,
                name = %migration.name,
                "migrated [tenant={}]",
                config.tenant()
            );
            report.applied.push(migration.version);
        }

        if !report.applied.is_empty() && base.dump_schema_after_migration() {
            dump_schema(&mut conn, config, &migrations).await?;
        }
        conn.close().await?;
        Ok(report)
    }

    async fn rollback(&self, config: &TenantConfig, steps: usize) -> Result<Vec<i64>> {
        let base = config.base();
        let mut conn = config.connect().await?;
        if !tracking_table_exists(&mut conn, config.engine()).await? {
            return Ok(Vec::new());
        }
        let migrations = discover(base.migrations_path())?;
        let by_version: BTreeMap<i64, &Migration> =
            migrations.iter().map(|m| (m.version, m)).collect();
        let mut applied = applied_versions(&mut conn).await?;
        applied.sort_unstable_by(|a, b| b.cmp(a));

        let mut reverted = Vec::new();
        for version in applied.into_iter().take(steps) {
            let migration = by_version.get(&version).ok_or_else(|| TenantError::Migration {
                version,
                message: "applied but no migration file found".into(),
            })?;
            revert(&mut conn, migration).await?;
            tracing::info!(
                version,
                name = %migration.name,
                "rolled back [tenant={}]",
                config.tenant()
            );
            reverted.push(version);
        }
        if !reverted.is_empty() && base.dump_schema_after_migration() {
            dump_schema(&mut conn, config, &migrations).await?;
        }
        conn.close().await?;
        Ok(reverted)
    }
}

/// Migrations in `dir`, ascending by version. A missing directory has none.
pub fn discover(dir: &Path) -> Result<Vec<Migration>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut ups: BTreeMap<i64, Migration> = BTreeMap::new();
    let mut downs: BTreeMap<i64, PathBuf> = BTreeMap::new();
    for entry in entries {
        let path = entry?.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((version, name, is_down)) = parse_file_name(file_name) else {
            continue;
        };
        if is_down {
            downs.insert(version, path);
            continue;
        }
        if ups.contains_key(&version) {
            return Err(TenantError::Migration {
                version,
                message: format!("duplicate migration version in {}", dir.display()),
            });
        }
        ups.insert(
            version,
            Migration {
                version,
                name: name.to_string(),
                up: path,
                down: None,
            },
        );
    }
    for (version, path) in downs {
        match ups.get_mut(&version) {
            Some(migration) => migration.down = Some(path),
            None => {
                tracing::warn!(path = %path.display(), "down migration without an up migration")
            }
        }
    }
    Ok(ups.into_values().collect())
}

/// `(version, name, is_down)` for `<version>_<name>[.up|.down].sql`.
fn parse_file_name(file_name: &str) -> Option<(i64, &str, bool)> {
    let stem = file_name.strip_suffix(".sql")?;
    let (stem, is_down) = match stem.strip_suffix(".down") {
        Some(stem) => (stem, true),
        None => (stem.strip_suffix(".up").unwrap_or(stem), false),
    };
    let (version, name) = stem.split_once('_')?;
    if version.is_empty() || !version.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((version.parse().ok()?, name, is_down))
}

pub async fn tracking_table_exists(conn: &mut AnyConnection, engine: Engine) -> Result<bool> {
    let sql = match engine {
        Engine::Sqlite => {
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name = 'schema_migrations'"
        }
        Engine::MySql => {
            "SELECT COUNT(*) FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = 'schema_migrations'"
        }
        Engine::Postgres => {
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = 'schema_migrations'"
        }
    };
    let count: i64 = sqlx::query_scalar(sql).fetch_one(&mut *conn).await?;
    Ok(count > 0)
}

/// Versions recorded in the tracking table, ascending.
pub async fn applied_versions(conn: &mut AnyConnection) -> Result<Vec<i64>> {
    let rows: Vec<String> = sqlx::query_scalar("SELECT version FROM schema_migrations")
        .fetch_all(&mut *conn)
        .await?;
    let mut versions: Vec<i64> = rows
        .iter()
        .filter_map(|v| match v.trim().parse() {
            Ok(version) => Some(version),
            Err(_) => {
                tracing::warn!("ignoring unparsable migration version {:?}", v);
                None
            }
        })
        .collect();
    versions.sort_unstable();
    Ok(versions)
}

async fn apply(conn: &mut AnyConnection, migration: &Migration) -> Result<()> {
    let sql = tokio::fs::read_to_string(&migration.up).await?;
    let mut tx = conn.begin().await?;
    (&mut *tx)
        .execute(sqlx::raw_sql(&sql))
        .await
        .map_err(|e| TenantError::Migration {
            version: migration.version,
            message: e.to_string(),
        })?;
    let record = format!(
        "INSERT INTO {} (version) VALUES ({})",
        TRACKING_TABLE,
        quote_literal(&migration.version.to_string())
    );
    (&mut *tx).execute(sqlx::raw_sql(&record)).await?;
    tx.commit().await?;
    Ok(())
}

async fn revert(conn: &mut AnyConnection, migration: &Migration) -> Result<()> {
    let down = migration.down.as_ref().ok_or_else(|| TenantError::Migration {
        version: migration.version,
        message: "irreversible migration: no .down.sql file".into(),
    })?;
    let sql = tokio::fs::read_to_string(down).await?;
    let mut tx = conn.begin().await?;
    (&mut *tx)
        .execute(sqlx::raw_sql(&sql))
        .await
        .map_err(|e| TenantError::Migration {
            version: migration.version,
            message: e.to_string(),
        })?;
    let forget = format!(
        "DELETE FROM {} WHERE version = {}",
        TRACKING_TABLE,
        quote_literal(&migration.version.to_string())
    );
    (&mut *tx).execute(sqlx::raw_sql(&forget)).await?;
    tx.commit().await?;
    Ok(())
}

pub async fn load_schema(conn: &mut AnyConnection, path: &Path) -> Result<()> {
    let script = tokio::fs::read_to_string(path).await?;
    (&mut *conn).execute(sqlx::raw_sql(&script)).await?;
    Ok(())
}

static DUMP_LOCKS: OnceLock<DashMap<PathBuf, Arc<Mutex<()>>>> = OnceLock::new();

fn dump_lock(path: &Path) -> Arc<Mutex<()>> {
    DUMP_LOCKS
        .get_or_init(DashMap::new)
        .entry(path.to_path_buf())
        .or_default()
        .clone()
}

/// Write the schema dump for the store's logical database from its applied migrations.
pub async fn dump_schema(
    conn: &mut AnyConnection,
    config: &TenantConfig,
    migrations: &[Migration],
) -> Result<PathBuf> {
    let applied: HashSet<i64> = applied_versions(conn).await?.into_iter().collect();
    let mut script = format!(
        "-- Schema dump for {}. Generated after migrating; do not edit.\n\n{};\n",
        config.config_name(),
        TRACKING_TABLE_DDL
    );
    let mut versions = Vec::new();
    for migration in migrations.iter().filter(|m| applied.contains(&m.version)) {
        let sql = tokio::fs::read_to_string(&migration.up).await?;
        script.push_str(&format!(
            "\n-- {}_{}\n{}\n",
            migration.version,
            migration.name,
            sql.trim_end()
        ));
        if !sql.trim_end().ends_with(';') {
            script.push_str(";\n");
        }
        versions.push(format!("({})", quote_literal(&migration.version.to_string())));
    }
    if !versions.is_empty() {
        script.push_str(&format!(
            "\nINSERT INTO {} (version) VALUES {};\n",
            TRACKING_TABLE,
            versions.join(", ")
        ));
    }

    let path = config.base().schema_dump_path();
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent.to_path_buf(),
        None => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&parent).await?;

    // Every tenant of a logical database shares one dump file.
    let lock = dump_lock(&path);
    let _held = lock.lock().await;
    let target = path.clone();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(script.as_bytes())?;
        tmp.persist(&target)?;
        Ok(())
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
    tracing::info!(dump = %path.display(), config = %config.config_name(), "dumped schema");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_migration_file_names() {
        assert_eq!(
            parse_file_name("20240101_create_users.sql"),
            Some((20240101, "create_users", false))
        );
        assert_eq!(parse_file_name("2_add_index.up.sql"), Some((2, "add_index", false)));
        assert_eq!(parse_file_name("2_add_index.down.sql"), Some((2, "add_index", true)));
        assert_eq!(parse_file_name("README.md"), None);
        assert_eq!(parse_file_name("v2_thing.sql"), None);
        assert_eq!(parse_file_name("_thing.sql"), None);
    }

    #[test]
    fn discovers_in_version_order_with_downs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("10_second.sql"), "SELECT 1;").unwrap();
        std::fs::write(dir.path().join("2_first.up.sql"), "SELECT 1;").unwrap();
        std::fs::write(dir.path().join("2_first.down.sql"), "SELECT 1;").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        let migrations = discover(dir.path()).unwrap();
        assert_eq!(migrations.iter().map(|m| m.version).collect::<Vec<_>>(), vec![2, 10]);
        assert!(migrations[0].down.is_some());
        assert!(migrations[1].down.is_none());
    }

    #[test]
    fn duplicate_versions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1_a.sql"), "").unwrap();
        std::fs::write(dir.path().join("1_b.sql"), "").unwrap();
        assert!(matches!(discover(dir.path()), Err(TenantError::Migration { version: 1, .. })));
    }

    #[test]
    fn missing_directory_has_no_migrations() {
        assert!(discover(Path::new("/nonexistent/tenanted/migrate")).unwrap().is_empty());
    }

    #[test]
    fn report_noop() {
        assert!(ReadyReport::default().is_noop());
        assert!(!ReadyReport { loaded_schema: true, applied: vec![] }.is_noop());
    }
}
