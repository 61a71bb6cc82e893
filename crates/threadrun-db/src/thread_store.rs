use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use threadrun_common::{ConversationKey, Error, Result, ThreadHandle};
use tracing::info;

/// Durable backing for the conversation → thread mapping.
///
/// Entries are only ever inserted, never updated or removed.
pub trait ThreadStore: Send + Sync {
    fn load(&self, key: &ConversationKey) -> Result<Option<ThreadHandle>>;

    /// Insert the mapping unless one exists and return whichever handle is
    /// stored afterwards.
    fn insert_if_absent(&self, key: &ConversationKey, thread: &ThreadHandle)
    -> Result<ThreadHandle>;
}

pub struct SqliteThreadStore {
    conn: Mutex<Connection>,
}

impl SqliteThreadStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening thread store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS conversation_threads (
                    conversation_key TEXT PRIMARY KEY,
                    thread_id TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );",
            )
            .map_err(|e| Error::Database(format!("migration failed: {e}")))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("thread store lock poisoned".into()))
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM conversation_threads", [], |row| {
                row.get(0)
            })
            .map_err(|e| Error::Database(format!("failed to count threads: {e}")))?;
        Ok(n as usize)
    }
}

impl ThreadStore for SqliteThreadStore {
    fn load(&self, key: &ConversationKey) -> Result<Option<ThreadHandle>> {
        let thread_id: Option<String> = self
            .lock()?
            .query_row(
                "SELECT thread_id FROM conversation_threads WHERE conversation_key = ?1",
                params![key.storage_key()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load thread: {e}")))?;
        Ok(thread_id.map(ThreadHandle::new))
    }

    fn insert_if_absent(
        &self,
        key: &ConversationKey,
        thread: &ThreadHandle,
    ) -> Result<ThreadHandle> {
        let conn = self.lock()?;
        let storage_key = key.storage_key();
        conn.execute(
            "INSERT OR IGNORE INTO conversation_threads (conversation_key, thread_id)
             VALUES (?1, ?2)",
            params![storage_key, thread.as_str()],
        )
        .map_err(|e| Error::Database(format!("failed to store thread: {e}")))?;

        let stored: String = conn
            .query_row(
                "SELECT thread_id FROM conversation_threads WHERE conversation_key = ?1",
                params![storage_key],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to read back thread: {e}")))?;
        Ok(ThreadHandle::new(stored))
    }
}
