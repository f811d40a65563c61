//! Tables and connection setup for [`SqliteStore`](crate::SqliteStore).
//!
//! Two tables back the store: `projects` holds one row per project with its
//! scene snapshot as JSON text, and `histories` holds the matching undo
//! history document keyed by project id. Deleting a project row cascades to
//! its history. The schema version lives in `user_version`, advanced by
//! `rusqlite_migration` from the embedded `migrations/*.sql` files.

use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};

use crate::error::StorageError;

/// Schema steps in order; step N leaves `user_version` at N.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(include_str!("migrations/001_initial_schema.sql"))])
}

/// Opens or creates the project database at `path`, bringing the
/// `projects` and `histories` tables up to date.
pub fn open_database(path: &str) -> Result<Connection, StorageError> {
    let mut conn = Connection::open(path)?;
    configure_and_migrate(&mut conn)?;
    Ok(conn)
}

/// An in-memory project database, for tests and throwaway stores.
pub fn open_in_memory() -> Result<Connection, StorageError> {
    let mut conn = Connection::open_in_memory()?;
    configure_and_migrate(&mut conn)?;
    Ok(conn)
}

/// WAL journal with NORMAL sync. Foreign keys on for the history cascade.
fn configure_and_migrate(conn: &mut Connection) -> Result<(), StorageError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations()
        .to_latest(conn)
        .map_err(|e| StorageError::Migration(e.to_string()))?;

    Ok(())
}
