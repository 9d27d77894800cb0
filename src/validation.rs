//! Tenant name validation and pattern formatting.
//!
//! A tenant name is untrusted input that ends up inside database names, schema names and file
//! paths. [`TenantNameValidator::validate`] formats the name into the target pattern with
//! [`format_pattern`] and checks the result, and resolution goes through the same function, so the
//! identifier that was validated is always the identifier that gets created.

use crate::error::{Result, TenantError};
use sha2::{Digest, Sha256};

/// Placeholder substituted with the tenant name.
pub const TENANT_PLACEHOLDER: &str = "%{tenant}";

/// Tenant names used internally to build catalog scans; they skip validation.
pub const SCAN_SENTINELS: [&str; 2] = ["%", "(.+)"];

/// Maximum depth of `%{tenant_hashN}` path sharding.
pub const MAX_HASH_DEPTH: usize = 4;

const MYSQL_RESERVED: &[&str] = &[
    "database", "databases", "table", "tables", "column", "columns", "index", "indexes", "select",
    "insert", "update", "delete", "create", "drop", "alter", "user", "users", "group", "groups",
    "order", "by", "from", "where", "and", "or", "not", "null", "true", "false",
];

const POSTGRES_RESERVED: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric", "both", "case",
    "cast", "check", "collate", "column", "constraint", "create", "current_catalog",
    "current_date", "current_role", "current_time", "current_timestamp", "current_user", "default",
    "deferrable", "desc", "distinct", "do", "else", "end", "except", "false", "fetch", "for",
    "foreign", "from", "grant", "group", "having", "in", "initially", "intersect", "into",
    "lateral", "leading", "limit", "localtime", "localtimestamp", "not", "null", "offset", "on",
    "only", "or", "order", "placing", "primary", "references", "returning", "select",
    "session_user", "some", "symmetric", "table", "then", "to", "trailing", "true", "union",
    "unique", "user", "using", "variadic", "when", "where", "window", "with",
];

const POSTGRES_SCHEMA_RESERVED: &[&str] = &["public", "information_schema"];

/// Identifier rules of one storage target kind.
#[derive(Clone, Copy, Debug)]
pub struct IdentifierRules {
    /// How the computed identifier is named in error messages.
    pub label: &'static str,
    /// Maximum identifier length in bytes.
    pub max_len: Option<usize>,
    /// Restrict the identifier to `[A-Za-z0-9_$-]` starting with a letter or underscore.
    pub strict_charset: bool,
    pub reject_trailing_period: bool,
    /// Reject characters with meaning inside a connection URI (`?`, `#`, `%`).
    pub uri_safe: bool,
    /// The name becomes part of a file path: no leading period, so `.` and `..` can never act
    /// as directory segments and no hidden files are created.
    pub path_segment: bool,
    pub reserved: &'static [&'static str],
    /// Names reserved by the catalog itself rather than the SQL grammar.
    pub catalog_reserved: &'static [&'static str],
    pub reserved_prefixes: &'static [&'static str],
}

impl IdentifierRules {
    pub const FILE: IdentifierRules = IdentifierRules {
        label: "Database path",
        max_len: None,
        strict_charset: false,
        reject_trailing_period: false,
        uri_safe: true,
        path_segment: true,
        reserved: &[],
        catalog_reserved: &[],
        reserved_prefixes: &[],
    };

    pub const MYSQL: IdentifierRules = IdentifierRules {
        label: "Database name",
        max_len: Some(64),
        strict_charset: true,
        reject_trailing_period: true,
        uri_safe: false,
        path_segment: false,
        reserved: MYSQL_RESERVED,
        catalog_reserved: &[],
        reserved_prefixes: &[],
    };

    pub const POSTGRES_DATABASE: IdentifierRules = IdentifierRules {
        label: "PostgreSQL identifier",
        max_len: Some(63),
        strict_charset: true,
        reject_trailing_period: true,
        uri_safe: false,
        path_segment: false,
        reserved: POSTGRES_RESERVED,
        catalog_reserved: &[],
        reserved_prefixes: &[],
    };

    pub const POSTGRES_SCHEMA: IdentifierRules = IdentifierRules {
        label: "Schema name",
        max_len: Some(63),
        strict_charset: true,
        reject_trailing_period: true,
        uri_safe: false,
        path_segment: false,
        reserved: POSTGRES_RESERVED,
        catalog_reserved: POSTGRES_SCHEMA_RESERVED,
        reserved_prefixes: &["pg_"],
    };

    fn is_reserved(&self, identifier: &str) -> bool {
        let lower = identifier.to_ascii_lowercase();
        self.reserved.contains(&lower.as_str()) || self.catalog_reserved.contains(&lower.as_str())
    }
}

/// A tenant name together with the identifier it produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedName {
    pub tenant: String,
    pub identifier: String,
}

pub struct TenantNameValidator;

impl TenantNameValidator {
    /// Format `raw` into `pattern` and check both the raw name and the resulting identifier.
    /// Pure; the scan sentinels `%` and `(.+)` pass through unchecked.
    pub fn validate(raw: &str, pattern: &str, rules: &IdentifierRules) -> Result<ValidatedName> {
        let identifier = format_pattern(pattern, raw);
        if SCAN_SENTINELS.contains(&raw) {
            return Ok(ValidatedName {
                tenant: raw.to_string(),
                identifier,
            });
        }
        check_raw_name(raw, &identifier, rules)?;
        check_identifier(&identifier, rules)?;
        Ok(ValidatedName {
            tenant: raw.to_string(),
            identifier,
        })
    }
}

fn check_raw_name(raw: &str, identifier: &str, rules: &IdentifierRules) -> Result<()> {
    if raw.is_empty() {
        return Err(TenantError::bad_name("Tenant name must not be empty", identifier));
    }
    if raw.contains('/') || raw.contains('\\') {
        return Err(TenantError::bad_name("Tenant name contains a path separator", identifier));
    }
    if raw.contains(['\'', '"', '`']) {
        return Err(TenantError::bad_name("Tenant name contains a quote character", identifier));
    }
    if raw.chars().any(char::is_control) {
        return Err(TenantError::bad_name("Tenant name contains a control character", identifier));
    }
    if raw.chars().any(char::is_whitespace) {
        return Err(TenantError::bad_name("Tenant name contains whitespace", identifier));
    }
    if rules.path_segment && raw.starts_with('.') {
        return Err(TenantError::bad_name("Tenant name cannot start with a period", identifier));
    }
    if rules.uri_safe && raw.contains(['?', '#', '%']) {
        return Err(TenantError::bad_name(
            "Tenant name contains a character reserved in database URIs (?, # or %)",
            identifier,
        ));
    }
    Ok(())
}

fn check_identifier(identifier: &str, rules: &IdentifierRules) -> Result<()> {
    let label = rules.label;
    if rules.reject_trailing_period && identifier.ends_with('.') {
        let reason = format!("{} cannot end with a period", label);
        return Err(TenantError::bad_name(reason, identifier));
    }
    if let Some(max) = rules.max_len {
        if identifier.len() > max {
            return Err(TenantError::bad_name(
                format!("{} too long (max {} characters)", label, max),
                identifier,
            ));
        }
    }
    if rules.strict_charset {
        let valid = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '-');
        if !identifier.chars().all(valid) {
            return Err(TenantError::bad_name(
                format!(
                    "{} contains invalid characters \
                     (only letters, numbers, underscore, $ and hyphen allowed)",
                    label
                ),
                identifier,
            ));
        }
        let starts_ok = identifier
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false);
        if !starts_ok {
            return Err(TenantError::bad_name(
                format!("{} must start with a letter or underscore", label),
                identifier,
            ));
        }
    }
    if rules.is_reserved(identifier) {
        return Err(TenantError::bad_name(format!("{} is a reserved keyword", label), identifier));
    }
    let lower = identifier.to_ascii_lowercase();
    if let Some(prefix) = rules.reserved_prefixes.iter().find(|p| lower.starts_with(**p)) {
        return Err(TenantError::bad_name(
            format!("{} cannot start with the reserved prefix {:?}", label, prefix),
            identifier,
        ));
    }
    Ok(())
}

/// Substitute `%{tenant}` and `%{tenant_hash1}`..`%{tenant_hash4}` in `pattern`.
pub fn format_pattern(pattern: &str, tenant: &str) -> String {
    let mut out = pattern.to_string();
    if out.contains("%{tenant_hash") {
        for depth in 1..=MAX_HASH_DEPTH {
            let placeholder = format!("%{{tenant_hash{}}}", depth);
            if out.contains(&placeholder) {
                out = out.replace(&placeholder, &tenant_hash_path(tenant, depth));
            }
        }
    }
    out.replace(TENANT_PLACEHOLDER, tenant)
}

/// On-disk sharding path for a tenant: the first `depth` bytes of SHA-256(tenant), each rendered
/// as two lowercase hex characters and used as one directory segment (`"2c/26/b4/6b"` for `foo`
/// at depth 4).
pub fn tenant_hash_path(tenant: &str, depth: usize) -> String {
    let digest = Sha256::digest(tenant.as_bytes());
    digest
        .iter()
        .take(depth.min(MAX_HASH_DEPTH))
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join("/")
}

pub fn has_tenant_placeholder(pattern: &str) -> bool {
    pattern.contains(TENANT_PLACEHOLDER)
}
