//! Schema 迁移
//!
//! `schema.sql` 是 V1，之后每个版本追加一段 SQL。每个迁移连同其历史记录
//! 在同一事务中提交；已记录的版本直接跳过。

use rusqlite::{params, Connection, OptionalExtension};

use crate::storage::models::format_datetime;
use crate::storage::{StorageError, StorageResult};

/// 当前数据库 schema 版本
pub const CURRENT_SCHEMA_VERSION: i32 = 3;

/// 一个 schema 版本
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i32,
    pub name: &'static str,
    pub sql: &'static str,
}

/// 已应用的版本
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationRecord {
    pub version: i32,
    pub name: String,
    /// RFC 3339
    pub applied_at: String,
}

/// 按版本号升序排列
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial schema",
        sql: include_str!("schema.sql"),
    },
    Migration {
        version: 2,
        name: "bundle content hash index",
        sql: "CREATE INDEX IF NOT EXISTS idx_bundle_content_hash ON subject_bundle(content_hash);",
    },
    Migration {
        version: 3,
        name: "bundle version index stamp",
        sql: "ALTER TABLE subject_bundle ADD COLUMN index_stamp TEXT;",
    },
];

const HISTORY_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_migrations (
        version INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        applied_at TEXT NOT NULL
    );
"#;

/// 已记录的最高版本，空库为 0
pub fn schema_version(conn: &Connection) -> StorageResult<i32> {
    conn.execute_batch(HISTORY_TABLE)?;
    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

/// 应用所有未记录的迁移，返回最终版本
pub fn run_migrations(conn: &Connection) -> StorageResult<i32> {
    let start = schema_version(conn)?;
    tracing::debug!(current = start, target = CURRENT_SCHEMA_VERSION, "checking database schema");

    let mut version = start;
    for migration in MIGRATIONS.iter().filter(|m| m.version > start) {
        tracing::info!(version = migration.version, name = migration.name, "applying migration");
        apply(conn, migration).map_err(|e| {
            tracing::error!(version = migration.version, error = %e, "migration failed");
            StorageError::Migration(format!("v{} ({}): {}", migration.version, migration.name, e))
        })?;
        version = migration.version;
    }

    Ok(version)
}

fn apply(conn: &Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
        params![
            migration.version,
            migration.name,
            format_datetime(chrono::Utc::now())
        ],
    )?;
    tx.commit()
}

/// 迁移历史 (按版本升序)
pub fn migration_history(conn: &Connection) -> StorageResult<Vec<MigrationRecord>> {
    conn.execute_batch(HISTORY_TABLE)?;
    let mut stmt =
        conn.prepare("SELECT version, name, applied_at FROM schema_migrations ORDER BY version")?;
    let records = stmt
        .query_map([], |row| {
            Ok(MigrationRecord {
                version: row.get(0)?,
                name: row.get(1)?,
                applied_at: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )
        .unwrap_or(false)
    }

    #[test]
    fn test_versions_are_contiguous() {
        assert_eq!(MIGRATIONS.len() as i32, CURRENT_SCHEMA_VERSION);
        for (i, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version, i as i32 + 1);
        }
    }

    #[test]
    fn test_fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);
        assert_eq!(run_migrations(&conn).unwrap(), CURRENT_SCHEMA_VERSION);

        for table in [
            "subject_bundle",
            "question",
            "assessment_session",
            "mastery",
            "student_stats",
            "sync_metadata",
            "schema_migrations",
        ] {
            assert!(table_exists(&conn, table), "missing table {table}");
        }
    }

    #[test]
    fn test_rerun_applies_nothing() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(run_migrations(&conn).unwrap(), CURRENT_SCHEMA_VERSION);

        let history = migration_history(&conn).unwrap();
        assert_eq!(history.len(), MIGRATIONS.len());
        assert_eq!(history[1].name, "bundle content hash index");
    }

    #[test]
    fn test_partial_database_is_upgraded() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(HISTORY_TABLE).unwrap();
        apply(&conn, &MIGRATIONS[0]).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 1);

        assert_eq!(run_migrations(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
        let indexed: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'index' AND name = 'idx_bundle_content_hash'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(indexed);

        let stamped: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM pragma_table_info('subject_bundle') WHERE name = 'index_stamp'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(stamped);
    }
}
