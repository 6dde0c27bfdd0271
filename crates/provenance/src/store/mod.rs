//! Provenance store over SQLite
//!
//! Every relationship has its own query function; nothing is loaded
//! implicitly. Multi-step writes go through [`Store::immediate_transaction`],
//! which takes the write lock up front and rolls back on drop.

mod assets;
mod changes;
mod health;
mod indices;
mod runs;
pub mod schema;
mod scenes;

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::debug;

use crate::error::{Error, Result};

pub use health::HealthReport;
pub use scenes::SceneFilter;

pub(crate) use assets::insert_asset;
pub(crate) use changes::{insert_change_event, NewChangeEvent};
pub(crate) use indices::{
    index_for_run as index_for_run_in, insert_index, insert_index_feature, NewIndex,
};
pub(crate) use runs::{
    active_run as active_run_in, deactivate_run, finish_run, insert_run, mark_superseded,
    run as run_in,
};
pub(crate) use scenes::insert_scene as insert_scene_row;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the provenance database
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) a database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(Error::io(parent))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        debug!(path = %path.display(), "opened store");
        Self::init(conn)
    }

    /// Private in-memory database, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Start a transaction holding the write lock from its first statement
    pub fn immediate_transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }
}

/// Paths are stored as UTF-8 text
pub(crate) fn path_to_sql(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub(crate) fn usize_from_sql(value: i64, column: usize) -> rusqlite::Result<usize> {
    usize::try_from(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Integer, Box::new(e))
    })
}

/// Whether `err` is a UNIQUE / CHECK / FOREIGN KEY violation
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
