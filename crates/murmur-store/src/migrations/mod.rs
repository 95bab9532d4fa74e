//! Schema migrations, gated on `PRAGMA user_version`.
//!
//! Every open walks [`MIGRATIONS`] and applies the steps above the stored
//! version, each in its own transaction.

pub mod v001_kv;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Step = fn(&Connection) -> std::result::Result<(), rusqlite::Error>;

/// Ordered `(version, name, step)` list. Versions must be contiguous from 1.
const MIGRATIONS: &[(u32, &str, Step)] = &[(1, "v001_kv", v001_kv::up)];

/// Schema version after every migration has run.
pub const CURRENT_VERSION: u32 = MIGRATIONS.len() as u32;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{current} is newer than this build (v{CURRENT_VERSION})"
        )));
    }

    for &(version, name, step) in MIGRATIONS.iter().filter(|(v, _, _)| *v > current) {
        tracing::info!(version, name, "applying migration");

        conn.execute_batch("BEGIN")?;
        let applied = step(conn).and_then(|()| conn.pragma_update(None, "user_version", version));
        match applied {
            Ok(()) => conn.execute_batch("COMMIT")?,
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(StoreError::Migration(format!("{name}: {e}")));
            }
        }
    }

    Ok(())
}
