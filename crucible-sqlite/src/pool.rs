//! Thin connection holder. A single SQLite connection guarded by a mutex is
//! enough here: writers (entity-change handlers) and the FTS layer both run
//! on the query-evaluation thread, never concurrently with each other
//! (spec §5 "the database connection is serialized").

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::FtsResult;
use crate::schema;

pub struct SqliteConfig {
    pub path: String,
}

impl SqliteConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_memory() -> Self {
        Self {
            path: ":memory:".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct SqlitePool {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePool {
    pub fn new(config: SqliteConfig) -> FtsResult<Self> {
        let conn = if config.path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(Path::new(&config.path))?
        };
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::apply_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> FtsResult<T>) -> FtsResult<T> {
        let guard = self.conn.lock();
        f(&guard)
    }

    pub fn with_connection_mut<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> FtsResult<T>,
    ) -> FtsResult<T> {
        let mut guard = self.conn.lock();
        f(&mut guard)
    }
}
