#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tenanted_sdk::migration::{ReadyReport, SchemaMigrator, SqlMigrator};
use tenanted_sdk::{BaseConfig, DatabaseConfigurations, TenantConfig, Tenanted};

pub struct Fixture {
    pub dir: TempDir,
    pub tenanted: Tenanted,
    pub base: Arc<BaseConfig>,
}

impl Fixture {
    pub fn migrate_dir(&self) -> PathBuf {
        self.dir.path().join("db").join("migrate")
    }

    pub fn dump_path(&self) -> PathBuf {
        self.base.schema_dump_path()
    }

    pub fn store_path(&self, tenant: &str) -> PathBuf {
        self.dir.path().join("storage").join(format!("{}.sqlite3", tenant))
    }
}

/// SQLite-backed tenanted `primary` database in a scratch directory, with one migration
/// creating `notes`. `extra` is spliced into the config object, e.g. `"max_connection_pools": 2`.
pub fn fixture(extra: &str) -> Fixture {
    fixture_with(extra, None)
}

pub fn fixture_with(extra: &str, migrator: Option<Arc<dyn SchemaMigrator>>) -> Fixture {
    fixture_at("storage/%{tenant}.sqlite3", extra, migrator)
}

/// Like [`fixture_with`], with the database pattern given relative to the scratch directory.
pub fn fixture_at(
    database: &str,
    extra: &str,
    migrator: Option<Arc<dyn SchemaMigrator>>,
) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().display().to_string();
    let extra = if extra.is_empty() { String::new() } else { format!(", {}", extra) };
    let json = format!(
        r#"{{ "test": {{ "primary": {{
            "tenanted": true,
            "adapter": "sqlite3",
            "database": "{root}/{database}",
            "db_dir": "{root}/db",
            "dump_schema_after_migration": true{extra}
        }} }} }}"#
    );
    let configs = DatabaseConfigurations::load_str(&json, "test").unwrap();
    let tenanted = match migrator {
        Some(migrator) => Tenanted::with_migrator(configs, migrator),
        None => Tenanted::new(configs),
    };
    let base = tenanted.base("primary").unwrap();
    let fixture = Fixture { dir, tenanted, base };
    write_migration(
        &fixture.migrate_dir(),
        1,
        "create_notes",
        "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL);",
        Some("DROP TABLE notes;"),
    );
    fixture
}

pub fn write_migration(dir: &Path, version: i64, name: &str, up: &str, down: Option<&str>) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(format!("{}_{}.sql", version, name)), up).unwrap();
    if let Some(down) = down {
        std::fs::write(dir.join(format!("{}_{}.down.sql", version, name)), down).unwrap();
    }
}

/// Delegates to [`SqlMigrator`] and counts how often stores are prepared.
#[derive(Default)]
pub struct CountingMigrator {
    pub ensure_calls: AtomicUsize,
}

impl CountingMigrator {
    pub fn calls(&self) -> usize {
        self.ensure_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaMigrator for CountingMigrator {
    async fn ensure_ready(&self, config: &TenantConfig) -> tenanted_sdk::Result<ReadyReport> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        // Widen the window in which concurrent callers could race.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        SqlMigrator.ensure_ready(config).await
    }

    async fn rollback(
        &self,
        config: &TenantConfig,
        steps: usize,
    ) -> tenanted_sdk::Result<Vec<i64>> {
        SqlMigrator.rollback(config, steps).await
    }
}
