//! Identifier and literal quoting for the engines we issue DDL against.

/// Quote identifier for PostgreSQL (and SQLite). Embedded double quotes are doubled.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote identifier for MySQL. Embedded backticks are doubled.
pub fn quote_mysql_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quote a string literal. Embedded single quotes are doubled.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Comma-separated search path with every schema quoted, e.g. `"acct-1", "public"`.
pub fn quoted_search_path<S: AsRef<str>>(schemas: &[S]) -> String {
    schemas
        .iter()
        .map(|s| quote_ident(s.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_hyphenated_identifiers() {
        assert_eq!(quote_ident("acct-1"), "\"acct-1\"");
        assert_eq!(quote_mysql_ident("tenant-db"), "`tenant-db`");
    }

    #[test]
    fn doubles_embedded_quotes() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_mysql_ident("a`b"), "`a``b`");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn search_path_quotes_each_schema() {
        assert_eq!(quoted_search_path(&["acct-1", "public"]), "\"acct-1\", \"public\"");
        assert_eq!(quoted_search_path(&["solo"]), "\"solo\"");
    }
}
