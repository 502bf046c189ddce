//! Database module for Gatekeeper
//!
//! This module provides a Turso/libSQL database layer with:
//! - In-memory, local file, and Turso-replica databases
//! - Automatic schema migrations
//! - Transaction handles that commit or roll back as a unit
//! - Health check capabilities
//!
//! In-memory databases keep a single persistent connection, since every new
//! connection to `:memory:` would otherwise see an empty database. All access to
//! an in-memory database is serialized through that connection.

mod migrations;

use libsql::{Connection, Database as LibSqlDatabase, TransactionBehavior};
use serde::Deserialize;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

pub use migrations::{Migration, MigrationRunner};

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Internal database error: {0}")]
    Internal(#[from] libsql::Error),
}

/// Configuration for database connections
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the database file (None for in-memory)
    pub path: Option<String>,
    /// Optional Turso URL for remote database sync
    pub turso_url: Option<String>,
    /// Optional Turso auth token
    pub turso_auth_token: Option<String>,
}

/// Whether a transaction only reads or may also write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Deferred transaction; takes the write lock lazily.
    Read,
    /// Immediate transaction; takes the write lock up front.
    Write,
}

impl From<TxMode> for TransactionBehavior {
    fn from(mode: TxMode) -> Self {
        match mode {
            TxMode::Read => TransactionBehavior::Deferred,
            TxMode::Write => TransactionBehavior::Immediate,
        }
    }
}

/// Wrapper around a libsql database
#[derive(Clone)]
pub struct Database {
    db: Arc<LibSqlDatabase>,
    name: String,
    persistent: Option<Arc<Mutex<Connection>>>,
}

impl Database {
    /// Open the database described by `config`.
    pub async fn open(name: &str, config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        match (&config.path, &config.turso_url, &config.turso_auth_token) {
            (Some(path), Some(url), Some(token)) => {
                Self::open_with_sync(name, path, url, token).await
            }
            (Some(path), _, _) => Self::open_local(name, path).await,
            _ => Self::in_memory(name).await,
        }
    }

    /// Create a new in-memory database
    #[instrument(skip_all)]
    pub async fn in_memory(name: &str) -> Result<Self, DatabaseError> {
        debug!("Creating in-memory database: {}", name);
        let db = libsql::Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        Ok(Self {
            db: Arc::new(db),
            name: name.to_string(),
            persistent: Some(Arc::new(Mutex::new(conn))),
        })
    }

    /// Create or open a local file-based database
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open_local(name: &str, path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        debug!("Opening local database '{}' at: {:?}", name, path);

        ensure_parent_dir(path)?;

        let db = libsql::Builder::new_local(path).build().await?;
        enable_wal(&db).await?;

        info!("Opened database '{}' at {:?}", name, path);
        Ok(Self {
            db: Arc::new(db),
            name: name.to_string(),
            persistent: None,
        })
    }

    /// Create a database with Turso sync (embedded replica)
    #[instrument(skip_all, fields(name = %name))]
    pub async fn open_with_sync(
        name: &str,
        local_path: impl AsRef<Path>,
        turso_url: &str,
        auth_token: &str,
    ) -> Result<Self, DatabaseError> {
        let path = local_path.as_ref();
        debug!("Opening synced database '{}' with Turso", name);

        ensure_parent_dir(path)?;

        let db = libsql::Builder::new_remote_replica(
            path,
            turso_url.to_string(),
            auth_token.to_string(),
        )
        .build()
        .await?;
        if let Err(e) = enable_wal(&db).await {
            warn!("Could not switch synced database '{}' to WAL: {}", name, e);
        }

        info!("Opened synced database '{}' with Turso", name);
        Ok(Self {
            db: Arc::new(db),
            name: name.to_string(),
            persistent: None,
        })
    }

    /// Get the database name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shared connection used by in-memory databases, if any.
    pub fn persistent_connection(&self) -> Option<&Arc<Mutex<Connection>>> {
        self.persistent.as_ref()
    }

    /// Acquire a connection with foreign key enforcement turned on.
    pub async fn acquire(&self) -> Result<DbConnection<'_>, DatabaseError> {
        let conn = match &self.persistent {
            Some(persistent) => DbConnection::Shared(persistent.lock().await),
            None => DbConnection::Owned(self.db.connect()?),
        };
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute("PRAGMA foreign_keys = ON", ()).await?;
        Ok(conn)
    }

    /// Begin a transaction. The returned [`Tx`] must be committed; dropping it
    /// or calling [`Tx::rollback`] discards its writes.
    pub async fn begin(&self, mode: TxMode) -> Result<Tx<'_>, DatabaseError> {
        let conn = self.acquire().await?;
        let tx = conn.transaction_with_behavior(mode.into()).await?;
        Ok(Tx { tx, _conn: conn })
    }

    /// Check if the database is healthy by executing a simple query
    #[instrument(skip_all, fields(name = %self.name))]
    pub async fn health_check(&self) -> Result<bool, DatabaseError> {
        let conn = self.acquire().await?;
        match conn.query("SELECT 1", ()).await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Database health check failed: {}", e);
                Ok(false)
            }
        }
    }

    /// Execute a simple statement (for testing/health checks)
    #[instrument(skip_all, fields(name = %self.name))]
    pub async fn execute(&self, sql: &str) -> Result<u64, DatabaseError> {
        let conn = self.acquire().await?;
        Ok(conn.execute(sql, ()).await?)
    }

    /// Execute a batch of statements, used to load fixtures.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), DatabaseError> {
        let conn = self.acquire().await?;
        conn.execute_batch(sql).await?;
        Ok(())
    }
}

/// Put a file database in WAL mode so readers never wait on a writer.
async fn enable_wal(db: &LibSqlDatabase) -> Result<(), DatabaseError> {
    let conn = db.connect()?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let mut rows = conn.query("PRAGMA journal_mode = WAL", ()).await?;
    if let Some(row) = rows.next().await? {
        let mode: String = row.get(0)?;
        debug!("Journal mode: {}", mode);
    }
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<(), DatabaseError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Failed to create database directory: {}", e))
        })?;
    }
    Ok(())
}

/// A connection borrowed from a [`Database`].
pub enum DbConnection<'a> {
    Shared(MutexGuard<'a, Connection>),
    Owned(Connection),
}

impl Deref for DbConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self {
            DbConnection::Shared(guard) => guard,
            DbConnection::Owned(conn) => conn,
        }
    }
}

/// An open transaction. Dereferences to the underlying connection so queries
/// can be issued directly against it.
pub struct Tx<'a> {
    // Declared first so the transaction is dropped before the connection guard.
    tx: libsql::Transaction,
    _conn: DbConnection<'a>,
}

impl Tx<'_> {
    /// Commit every write made in this transaction.
    pub async fn commit(self) -> Result<(), DatabaseError> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Discard every write made in this transaction.
    pub async fn rollback(self) -> Result<(), DatabaseError> {
        self.tx.rollback().await?;
        Ok(())
    }

    /// Commit when `result` is `Ok`, roll back when it is `Err`.
    ///
    /// A failed rollback is logged and the original error is returned.
    pub async fn finish<T, E>(self, result: Result<T, E>) -> Result<T, E>
    where
        E: From<DatabaseError> + std::fmt::Display,
    {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    warn!("Rollback after '{}' failed: {}", err, rollback_err);
                }
                Err(err)
            }
        }
    }
}

impl Deref for Tx<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.tx
    }
}
