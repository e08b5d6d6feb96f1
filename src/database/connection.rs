//! Database connection and initialization
//!
//! Handles the shared SQLite connection and database setup

use anyhow::{Context, anyhow};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::schema;
use crate::error::{Error, Result};

/// How long SQLite waits on a lock held by another connection
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database wrapper with thread-safe connection
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Creates a new database connection
    ///
    /// # Arguments
    /// * `path` - Path to the SQLite database file (created if not exists)
    pub fn new(path: PathBuf) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(&path).context("Failed to open database")?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("Failed to configure busy timeout")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        };

        db.initialize()?;

        Ok(db)
    }

    /// Creates an in-memory database (for testing)
    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        };

        db.initialize()?;

        Ok(db)
    }

    /// Initialize database schema
    fn initialize(&self) -> anyhow::Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned during initialization"))?;
        schema::create_tables(&conn)?;
        Ok(())
    }

    /// Locks the shared connection for a unit of work
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::LockPoisoned)
    }

    /// Get database path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Get default database path for the application
    pub fn default_path() -> PathBuf {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("assetscan").join("inventory.db")
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            path: self.path.clone(),
        }
    }
}
