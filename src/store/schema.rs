//! Database schema definitions and migrations.

use rusqlite::Connection;

use super::error::StoreError;

/// Current schema version. Increment when making schema changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Schema DDL for version 1.
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS assets (
    id TEXT PRIMARY KEY NOT NULL,
    owner_id TEXT NOT NULL,
    blob_url TEXT NOT NULL,
    thumbnail_url TEXT,
    pathname TEXT NOT NULL,
    mime TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    width INTEGER,
    height INTEGER,
    checksum_sha256 TEXT NOT NULL,
    favorite INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    UNIQUE (owner_id, checksum_sha256)
);

CREATE INDEX IF NOT EXISTS idx_assets_owner_created ON assets(owner_id, created_at);

CREATE TABLE IF NOT EXISTS asset_embeddings (
    asset_id TEXT PRIMARY KEY NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
    model TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
"#;

/// Get the current schema version from the database.
pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32, StoreError> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(StoreError::Migration)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StoreError> {
    conn.pragma_update(None, "user_version", version)
        .map_err(StoreError::Migration)
}

/// Initialize or migrate the database schema.
///
/// Idempotent; safe to call on both new and existing databases.
pub(crate) fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let current_version = get_schema_version(conn)?;

    if current_version > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchemaVersion {
            found: current_version,
            expected: SCHEMA_VERSION,
        });
    }

    if current_version < SCHEMA_VERSION {
        conn.execute_batch(SCHEMA_V1)
            .map_err(StoreError::Migration)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        tracing::debug!("Initialized database schema at version {}", SCHEMA_VERSION);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_ddl_failure_is_a_migration_error() {
        let conn = Connection::open_in_memory().unwrap();
        // A view under the table's name cannot be indexed
        conn.execute_batch("CREATE VIEW assets AS SELECT 1 AS owner_id, 2 AS created_at")
            .unwrap();
        let err = migrate(&conn).unwrap_err();
        assert!(matches!(err, StoreError::Migration(_)));
        assert_eq!(get_schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_rejects_newer_schema() {
        let conn = Connection::open_in_memory().unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();
        let err = migrate(&conn).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedSchemaVersion { .. }));
    }
}
