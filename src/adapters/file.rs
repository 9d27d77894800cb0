//! File-based strategy: one SQLite file per tenant.
//!
//! Patterns may shard tenants into hashed subdirectories with `%{tenant_hash1}`..`%{tenant_hash4}`
//! (see [`crate::validation::tenant_hash_path`]), so external tooling can enumerate tenants by
//! walking the directory tree.

use super::StoreTarget;
use crate::error::{Result, TenantError};
use crate::validation::{format_pattern, SCAN_SENTINELS, TENANT_PLACEHOLDER};
use regex::Regex;
use std::path::{Path, PathBuf};

/// Files SQLite and the ready lock leave next to a database.
pub const SIDECAR_SUFFIXES: &[&str] = &["-wal", "-shm", "-journal", ".lock"];

#[derive(Clone, Debug)]
pub struct FileAdapter {
    pattern: String,
    test_worker: Option<String>,
}

impl FileAdapter {
    pub fn new(pattern: impl Into<String>) -> Self {
        FileAdapter {
            pattern: pattern.into(),
            test_worker: None,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn test_worker(&self) -> Option<&str> {
        self.test_worker.as_deref()
    }

    pub fn set_test_worker(&mut self, worker: Option<String>) {
        self.test_worker = worker;
    }

    pub async fn create_database(&self, target: &StoreTarget) -> Result<()> {
        let path = PathBuf::from(path_for(&target.database));
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;
        tracing::debug!(path = %path.display(), "created database file");
        Ok(())
    }

    /// Remove the database file and its sidecars. Missing files are not an error.
    pub async fn drop_database(&self, target: &StoreTarget) -> Result<()> {
        let path = path_for(&target.database).to_string();
        remove_if_present(Path::new(&path)).await?;
        for suffix in SIDECAR_SUFFIXES {
            remove_if_present(Path::new(&format!("{}{}", path, suffix))).await?;
        }
        Ok(())
    }

    pub fn database_exists(&self, target: &StoreTarget) -> bool {
        Path::new(path_for(&target.database)).is_file()
    }

    /// Path of the OS lock file that serialises preparation of `target` across processes.
    pub fn lock_path(&self, target: &StoreTarget) -> PathBuf {
        PathBuf::from(format!("{}.lock", path_for(&target.database)))
    }

    /// Take an exclusive lock on the lock file of `target`. The lock is held until the returned
    /// file is dropped.
    pub async fn lock_exclusive(&self, target: &StoreTarget) -> Result<std::fs::File> {
        let lock_path = self.lock_path(target);
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
            use fs2::FileExt;
            if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&lock_path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(|e| TenantError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
        Ok(file)
    }

    /// Scan the filesystem for databases matching the pattern and return their tenant names.
    pub fn tenant_databases(&self) -> Vec<String> {
        let template = self.scan_template();
        let scanner = match scanner_for(&template) {
            Ok(re) => re,
            Err(e) => {
                tracing::warn!(pattern = %template, "cannot build tenant scanner: {}", e);
                return Vec::new();
            }
        };
        let (root, depth) = scan_root(&template);
        let mut found = Vec::new();
        if let Err(e) = walk(&root, depth, &mut |candidate| {
            if SIDECAR_SUFFIXES.iter().any(|s| candidate.ends_with(s)) {
                return;
            }
            let Some(caps) = scanner.captures(candidate) else {
                return;
            };
            let Some(tenant) = caps.get(1).map(|m| m.as_str()) else {
                return;
            };
            // Re-deriving the path checks hash segments and repeated placeholders.
            match self.resolved_path(tenant) {
                Some(expected) if expected == candidate => found.push(tenant.to_string()),
                _ => tracing::warn!(
                    path = %candidate,
                    "skipping file that does not match its tenant hash"
                ),
            }
        }) {
            tracing::warn!(root = %root, "tenant scan failed: {}", e);
            return Vec::new();
        }
        found.sort();
        found.dedup();
        found
    }

    fn scan_template(&self) -> String {
        let pattern = match &self.test_worker {
            Some(worker) => test_workerize(&self.pattern, worker),
            None => self.pattern.clone(),
        };
        path_for(&pattern).to_string()
    }

    fn resolved_path(&self, tenant: &str) -> Option<String> {
        if SCAN_SENTINELS.contains(&tenant) {
            return None;
        }
        let formatted = format_pattern(&self.pattern, tenant);
        let formatted = match &self.test_worker {
            Some(worker) => test_workerize(&formatted, worker),
            None => formatted,
        };
        Some(path_for(&formatted).to_string())
    }
}

/// Insert `_<worker>` before the query of a `file:` URI, or append it to a plain path.
pub fn test_workerize(name: &str, worker: &str) -> String {
    let suffix = format!("_{}", worker);
    if name.starts_with("file:") {
        if let Some((path, query)) = name.split_once('?') {
            if path.ends_with(&suffix) {
                return name.to_string();
            }
            return format!("{}{}?{}", path, suffix, query);
        }
    }
    super::workerize_suffix(name, worker)
}

/// Filesystem path behind a database value: the path of a `file:` URI, or the value itself.
pub fn path_for(name: &str) -> &str {
    match name.strip_prefix("file:") {
        Some(rest) => rest.split('?').next().unwrap_or(rest),
        None => name,
    }
}

/// Query string of a `file:` URI, if any.
pub fn query_for(name: &str) -> Option<&str> {
    name.strip_prefix("file:").and_then(|rest| rest.split_once('?').map(|(_, q)| q))
}

fn scanner_for(template: &str) -> std::result::Result<Regex, regex::Error> {
    let escaped = regex::escape(template);
    let tenant_placeholder = regex::escape(TENANT_PLACEHOLDER);
    let mut source = escaped.replace(&tenant_placeholder, "([^/]+)");
    for depth in 1..=crate::validation::MAX_HASH_DEPTH {
        let placeholder = regex::escape(&format!("%{{tenant_hash{}}}", depth));
        let segments = vec!["[0-9a-f]{2}"; depth].join("/");
        source = source.replace(&placeholder, &format!("(?:{})", segments));
    }
    Regex::new(&format!("^{}$", source))
}

/// Directory to start the scan from (the static prefix of the template) and how many directory
/// levels below it the template reaches.
fn scan_root(template: &str) -> (String, usize) {
    let first_placeholder = template.find("%{").unwrap_or(template.len());
    let static_prefix = &template[..first_placeholder];
    let root = match static_prefix.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => static_prefix[..idx].to_string(),
        None => String::new(),
    };
    let rest = &template[root.len()..];
    let depth = format_pattern(rest, "x").trim_start_matches('/').matches('/').count() + 1;
    (root, depth)
}

fn walk(dir: &str, depth: usize, visit: &mut dyn FnMut(&str)) -> std::io::Result<()> {
    let read_from = if dir.is_empty() { "." } else { dir };
    let entries = match std::fs::read_dir(read_from) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = match dir {
            "" => name,
            "/" => format!("/{}", name),
            _ => format!("{}/{}", dir, name),
        };
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if depth > 1 {
                walk(&path, depth - 1, visit)?;
            }
        } else if file_type.is_file() {
            visit(&path);
        }
    }
    Ok(())
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workerize_plain_path() {
        assert_eq!(test_workerize("db/foo.sqlite3", "3"), "db/foo.sqlite3_3");
        assert_eq!(test_workerize("db/foo.sqlite3_3", "3"), "db/foo.sqlite3_3");
    }

    #[test]
    fn workerize_file_uri_keeps_query() {
        let once = test_workerize("file:db/foo.sqlite3?mode=memory&cache=shared", "99");
        assert_eq!(once, "file:db/foo.sqlite3_99?mode=memory&cache=shared");
        assert_eq!(test_workerize(&once, "99"), once);
    }

    #[test]
    fn path_for_strips_uri() {
        assert_eq!(path_for("file:db/foo.sqlite3?mode=rwc"), "db/foo.sqlite3");
        assert_eq!(path_for("file:db/foo.sqlite3"), "db/foo.sqlite3");
        assert_eq!(path_for("db/foo.sqlite3"), "db/foo.sqlite3");
        assert_eq!(query_for("file:db/foo.sqlite3?mode=rwc"), Some("mode=rwc"));
    }

    #[test]
    fn scan_root_stops_at_static_prefix() {
        assert_eq!(
            scan_root("storage/tenants/%{tenant}.sqlite3"),
            ("storage/tenants".to_string(), 1)
        );
        assert_eq!(
            scan_root("storage/%{tenant_hash4}/secondary-%{tenant}.sqlite3"),
            ("storage".to_string(), 5)
        );
        assert_eq!(scan_root("%{tenant}.sqlite3"), (String::new(), 1));
    }

    #[test]
    fn scanner_matches_hashed_layout() {
        let re = scanner_for("storage/%{tenant_hash2}/t-%{tenant}.sqlite3").unwrap();
        let caps = re.captures("storage/2c/26/t-foo.sqlite3").unwrap();
        assert_eq!(&caps[1], "foo");
        assert!(re.captures("storage/2c/t-foo.sqlite3").is_none());
    }

    #[test]
    fn lists_tenants_and_skips_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/%{{tenant}}.sqlite3", dir.path().display());
        let adapter = FileAdapter::new(pattern);
        for name in ["foo", "bar"] {
            std::fs::write(dir.path().join(format!("{}.sqlite3", name)), b"").unwrap();
        }
        std::fs::write(dir.path().join("foo.sqlite3-wal"), b"").unwrap();
        std::fs::write(dir.path().join("foo.sqlite3.lock"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        assert_eq!(adapter.tenant_databases(), vec!["bar".to_string(), "foo".to_string()]);
    }

    #[test]
    fn hashed_listing_verifies_segments() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/%{{tenant_hash2}}/%{{tenant}}.sqlite3", dir.path().display());
        let adapter = FileAdapter::new(pattern);
        std::fs::create_dir_all(dir.path().join("2c/26")).unwrap();
        std::fs::write(dir.path().join("2c/26/foo.sqlite3"), b"").unwrap();
        // Right shape, wrong hash for "bar".
        std::fs::write(dir.path().join("2c/26/bar.sqlite3"), b"").unwrap();
        assert_eq!(adapter.tenant_databases(), vec!["foo".to_string()]);
    }

    #[test]
    fn missing_directory_lists_nothing() {
        let adapter = FileAdapter::new("/nonexistent/tenanted/%{tenant}.sqlite3");
        assert!(adapter.tenant_databases().is_empty());
    }
}
