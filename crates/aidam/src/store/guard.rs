//! Statement-shape validation for the restricted SQL surface.
//!
//! The memory MCP server hands agents a raw `db_select` / `db_execute` /
//! scoped-migration surface; these checks are the only thing standing
//! between a misbehaving agent and the schema, so they are deliberately
//! conservative: first-token dispatch for reads/writes, and a
//! whitelist-plus-denylist pass for migrations.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{AidamError, Result};

/// Every table the scoped-migration surface may ever touch.
pub const KNOWN_TABLES: &[&str] = &[
    "projects",
    "learnings",
    "patterns",
    "errors_solutions",
    "tools",
    "commands",
    "sessions",
    "user_preferences",
    "knowledge_details",
    "knowledge_index",
    "cognitive_inbox",
    "retrieval_inbox",
    "generated_tools",
    "orchestrator_state",
    "agent_usage",
    "session_state",
    "memory_meta",
    "memory_associations",
];

/// Statements that are never allowed through a scoped migration.
const FORBIDDEN: &[&str] = &[
    "DROP DATABASE",
    "TRUNCATE",
    "ALTER SYSTEM",
    "CREATE EXTENSION",
    "DROP EXTENSION",
];

static TABLE_STMT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\b(?:ALTER|CREATE|DROP)\s+TABLE\s+(?:IF\s+(?:NOT\s+)?EXISTS\s+)?"?([A-Za-z_][A-Za-z0-9_]*)"#,
    )
    .unwrap()
});

/// First keyword of a statement, uppercased.
pub fn first_token(sql: &str) -> Option<String> {
    sql.split_whitespace().next().map(|t| t.to_ascii_uppercase())
}

/// Reject anything that is not a plain `SELECT`.
pub fn check_select(sql: &str) -> Result<()> {
    match first_token(sql).as_deref() {
        Some("SELECT") => Ok(()),
        other => Err(AidamError::validation(format!(
            "select_query only accepts SELECT statements, got {}",
            other.unwrap_or("empty input")
        ))),
    }
}

/// Reject anything that is not `UPDATE` / `INSERT` / `DELETE`.
pub fn check_write(sql: &str) -> Result<()> {
    match first_token(sql).as_deref() {
        Some("UPDATE") | Some("INSERT") | Some("DELETE") => Ok(()),
        other => Err(AidamError::validation(format!(
            "execute_write only accepts UPDATE/INSERT/DELETE statements, got {}",
            other.unwrap_or("empty input")
        ))),
    }
}

/// Validate a scoped migration against its declared table whitelist.
///
/// - `allowed_tables` must be a non-empty subset of [`KNOWN_TABLES`];
/// - the forbidden statement list is matched case-insensitively anywhere;
/// - every `ALTER TABLE` / `CREATE TABLE` / `DROP TABLE` must name a table
///   in `allowed_tables`.
pub fn check_scoped_migration(allowed_tables: &[String], sql: &str) -> Result<()> {
    if allowed_tables.is_empty() {
        return Err(AidamError::validation(
            "scoped migration must declare at least one table",
        ));
    }

    for table in allowed_tables {
        if !KNOWN_TABLES.contains(&table.as_str()) {
            return Err(AidamError::validation(format!(
                "table '{}' is not in the migration whitelist",
                table
            )));
        }
    }

    let upper = sql.to_ascii_uppercase();
    for banned in FORBIDDEN {
        if upper.contains(banned) {
            return Err(AidamError::validation(format!(
                "migration contains forbidden statement: {}",
                banned
            )));
        }
    }

    for capture in TABLE_STMT.captures_iter(sql) {
        let table = capture[1].to_ascii_lowercase();
        if !allowed_tables.iter().any(|t| t == &table) {
            return Err(AidamError::validation(format!(
                "migration touches undeclared table '{}'",
                table
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed(tables: &[&str]) -> Vec<String> {
        tables.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_select_guard() {
        assert!(check_select("SELECT 1").is_ok());
        assert!(check_select("  select * from learnings").is_ok());
        assert!(check_select("DELETE FROM learnings").is_err());
        assert!(check_select("").is_err());
    }

    #[test]
    fn test_write_guard() {
        assert!(check_write("INSERT INTO learnings (title) VALUES ('x')").is_ok());
        assert!(check_write("update learnings set title = 'y'").is_ok());
        assert!(check_write("DELETE FROM learnings WHERE id = 1").is_ok());
        assert!(check_write("SELECT 1").is_err());
        assert!(check_write("DROP TABLE learnings").is_err());
    }

    #[test]
    fn test_migration_requires_declared_tables() {
        assert!(check_scoped_migration(&[], "CREATE TABLE learnings (id int)").is_err());
        assert!(check_scoped_migration(&allowed(&["no_such_table"]), "SELECT 1").is_err());
    }

    #[test]
    fn test_migration_forbidden_statements() {
        let tables = allowed(&["learnings"]);
        assert!(check_scoped_migration(&tables, "TRUNCATE learnings").is_err());
        assert!(check_scoped_migration(&tables, "drop database claude_memory").is_err());
        assert!(check_scoped_migration(&tables, "CREATE EXTENSION pg_trgm").is_err());
        assert!(check_scoped_migration(&tables, "ALTER SYSTEM SET work_mem = '1GB'").is_err());
    }

    #[test]
    fn test_migration_table_scope() {
        let tables = allowed(&["learnings"]);
        assert!(
            check_scoped_migration(&tables, "ALTER TABLE learnings ADD COLUMN notes TEXT").is_ok()
        );
        assert!(check_scoped_migration(&tables, "ALTER TABLE patterns ADD COLUMN x TEXT").is_err());
        assert!(check_scoped_migration(
            &tables,
            "CREATE TABLE IF NOT EXISTS learnings (id BIGSERIAL PRIMARY KEY)"
        )
        .is_ok());
        assert!(check_scoped_migration(&tables, "DROP TABLE IF EXISTS generated_tools").is_err());
    }

    #[test]
    fn test_migration_multiple_statements() {
        let tables = allowed(&["learnings", "patterns"]);
        let sql = "ALTER TABLE learnings ADD COLUMN a TEXT;\nALTER TABLE patterns ADD COLUMN b TEXT;";
        assert!(check_scoped_migration(&tables, sql).is_ok());

        let sneaky = "ALTER TABLE learnings ADD COLUMN a TEXT;\nDROP TABLE orchestrator_state;";
        assert!(check_scoped_migration(&tables, sneaky).is_err());
    }
}
