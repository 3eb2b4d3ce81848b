//! SQLite storage: extension loading, schema, migrations, and the [`Store`]
//! client handle shared by every component.

pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::{Connection, InterruptHandle};
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};

use crate::error::KnowledgeError;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (or create) the database at the given path, with sqlite-vec loaded,
/// schema initialized and migrations applied.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    load_sqlite_vec();

    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(Duration::from_millis(5000))?;

    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&mut conn).context("failed to run migrations")?;

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open an in-memory database with schema and migrations applied.
pub fn open_memory_database() -> Result<Connection> {
    load_sqlite_vec();
    let mut conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&mut conn).context("failed to run migrations")?;
    Ok(conn)
}

/// Long-lived store client. Constructed once at startup, cloned into every
/// component, and closed once at shutdown.
///
/// All SQL runs on the blocking pool under [`Store::run`], bounded by the
/// configured timeout.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
    timeout: Duration,
}

// Lifecycle of one `Store::run` call.
const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const FINISHED: u8 = 2;
const ABANDONED: u8 = 3;

impl Store {
    /// Open the on-disk store at `path`.
    pub fn open(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let conn = open_database(path)?;
        Ok(Self::from_connection(conn, timeout))
    }

    /// Open a throwaway in-memory store.
    pub fn open_in_memory(timeout: Duration) -> Result<Self> {
        let conn = open_memory_database()?;
        Ok(Self::from_connection(conn, timeout))
    }

    pub fn from_connection(conn: Connection, timeout: Duration) -> Self {
        let interrupt = Arc::new(conn.get_interrupt_handle());
        Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
            timeout,
        }
    }

    /// Run `f` against the connection on the blocking pool.
    ///
    /// Elapsing the timeout yields [`KnowledgeError::Storage`] and abandons
    /// the call: a statement in flight is interrupted and any commit it
    /// attempts afterwards is turned into a rollback, so a timed-out write
    /// never lands. A call that has not reached the connection yet is skipped.
    pub async fn run<T, F>(&self, f: F) -> Result<T, KnowledgeError>
    where
        F: FnOnce(&mut Connection) -> Result<T, KnowledgeError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let state = Arc::new(AtomicU8::new(PENDING));
        let task_state = Arc::clone(&state);

        let mut task = tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| KnowledgeError::Storage(format!("db lock poisoned: {e}")))?;
            if task_state
                .compare_exchange(PENDING, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Err(KnowledgeError::Storage("storage call abandoned".into()));
            }

            let hook_state = Arc::clone(&task_state);
            conn.commit_hook(Some(move || hook_state.load(Ordering::SeqCst) == ABANDONED))?;
            let result = f(&mut conn);
            conn.commit_hook(None::<fn() -> bool>)?;

            let _ = task_state.compare_exchange(RUNNING, FINISHED, Ordering::SeqCst, Ordering::SeqCst);
            result
        });

        match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(joined) => joined_result(joined),
            Err(_) => match state.swap(ABANDONED, Ordering::SeqCst) {
                // Finished right at the deadline; the result is ready.
                FINISHED => joined_result(task.await),
                previous => {
                    if previous == RUNNING {
                        self.interrupt.interrupt();
                    }
                    tracing::warn!(
                        timeout_ms = self.timeout.as_millis() as u64,
                        started = previous == RUNNING,
                        "storage call timed out"
                    );
                    Err(KnowledgeError::Storage(format!(
                        "storage call timed out after {}ms",
                        self.timeout.as_millis()
                    )))
                }
            },
        }
    }

    /// Synchronous access for CLI paths and tests that already own the thread.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, KnowledgeError>,
    ) -> Result<T, KnowledgeError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| KnowledgeError::Storage(format!("db lock poisoned: {e}")))?;
        f(&mut conn)
    }

    /// Wait up to `limit` for every other clone of this store to be dropped.
    pub async fn wait_exclusive(&self, limit: Duration) -> bool {
        let started = Instant::now();
        while Arc::strong_count(&self.conn) > 1 {
            if started.elapsed() >= limit {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }

    /// Close the underlying connection. Fails if other clones are still alive.
    pub fn close(self) -> Result<()> {
        let mutex = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow::anyhow!("store is still shared; cannot close"))?;
        let conn = mutex
            .into_inner()
            .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
        conn.close()
            .map_err(|(_, e)| anyhow::anyhow!("failed to close database: {e}"))?;
        tracing::info!("database closed");
        Ok(())
    }
}

fn joined_result<T>(
    joined: Result<Result<T, KnowledgeError>, tokio::task::JoinError>,
) -> Result<T, KnowledgeError> {
    joined.map_err(|e| KnowledgeError::Storage(format!("db task failed: {e}")))?
}

/// Database health summary for the `health` operation and `doctor` output.
#[derive(Debug, serde::Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub schema_version: u32,
    pub sqlite_vec_version: String,
    pub checked_at: String,
}

/// Run a trivial query plus version lookups.
pub fn check_health(conn: &Connection) -> Result<HealthReport, KnowledgeError> {
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
    let sqlite_vec_version: String = conn.query_row("SELECT vec_version()", [], |r| r.get(0))?;
    let schema_version = migrations::get_schema_version(conn)?;
    Ok(HealthReport {
        status: "healthy",
        schema_version,
        sqlite_vec_version,
        checked_at: crate::knowledge::now_timestamp(),
    })
}
