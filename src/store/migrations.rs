//! Versioned schema migrations tracked through `PRAGMA user_version`.

use rusqlite::Connection;

use crate::{Error, Result};

const CURRENT_SCHEMA_VERSION: i64 = 1;

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(Error::invalid_data(format!(
            "database schema version {version} is newer than supported {CURRENT_SCHEMA_VERSION}"
        )));
    }

    if version < 1 {
        apply(conn, 1, include_str!("schema_v1.sql"))?;
    }

    Ok(())
}

fn apply(conn: &mut Connection, version: i64, sql: &str) -> Result<()> {
    log::info!("store: applying schema migration v{version}");
    let tx = conn.transaction()?;
    tx.execute_batch(sql)?;
    tx.pragma_update(None, "user_version", version)?;
    tx.commit()?;
    Ok(())
}
