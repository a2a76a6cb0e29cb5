use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::debug;

use super::error::Result;
use super::migrations;

/// Owns the single sqlite connection backing the whole runtime. Wrapped in
/// a `tokio::sync::Mutex` rather than a connection pool: spec.md §5 calls
/// for storage writes to take a coarse mutex and run synchronously to
/// completion without yielding, which a single shared connection gives for
/// free — there is never more than one writer or reader active.
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Open (creating if absent) the sqlite database at `path`, apply
    /// pragmas, and run pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let path = path.to_path_buf();
        let mut conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&path)?;
            apply_pragmas(&conn)?;
            Ok(conn)
        })
        .await
        .expect("storage open task panicked")?;

        migrations::run(&mut conn)?;
        debug!("storage opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database, used by tests and by `Runtime::ephemeral`.
    pub async fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        apply_pragmas(&conn)?;
        migrations::run(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure with exclusive access to the raw connection. All
    /// repository methods are built on top of this; it is the single
    /// choke point that enforces "one writer or reader at a time".
    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let guard = conn.lock_owned().await;
        tokio::task::spawn_blocking(move || f(&guard))
            .await
            .expect("storage task panicked")
    }

    /// Same as `with_conn` but the closure gets a mutable borrow, for
    /// callers that need `Connection::transaction()`.
    pub async fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let mut guard = conn.lock_owned().await;
        tokio::task::spawn_blocking(move || f(&mut guard))
            .await
            .expect("storage task panicked")
    }

    /// Checkpoint the WAL file to truncate it, then close. Called as the
    /// last step of `Runtime::shutdown`.
    pub async fn checkpoint_and_close(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
            Ok(())
        })
        .await
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA foreign_keys=ON;
         PRAGMA mmap_size=268435456;
         PRAGMA busy_timeout=5000;",
    )?;
    Ok(())
}
