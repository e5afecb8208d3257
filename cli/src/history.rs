//! Run history store: one SQLite row per completed task.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history db: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("history path: {0}")]
    Path(String),
}

/// One recorded run.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub id: i64,
    pub created_at: String,
    pub task: String,
    pub domain: String,
    pub success: bool,
    pub output: String,
}

/// SQLite-backed history of orchestrator runs.
pub struct HistoryStore {
    conn: Connection,
}

impl HistoryStore {
    /// Opens (and migrates) the store at the default data path:
    /// `<data_dir>/strand/history.db`.
    pub fn open_default() -> Result<Self, HistoryError> {
        let base = dirs::data_dir()
            .ok_or_else(|| HistoryError::Path("no data directory for this platform".into()))?;
        let dir = base.join("strand");
        std::fs::create_dir_all(&dir)
            .map_err(|e| HistoryError::Path(format!("cannot create {}: {e}", dir.display())))?;
        Self::open(dir.join("history.db"))
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                task TEXT NOT NULL,
                domain TEXT NOT NULL,
                success INTEGER NOT NULL,
                output TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_created ON history(created_at);",
        )?;
        Ok(Self { conn })
    }

    /// Default on-disk location, for display in `status`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("strand").join("history.db"))
    }

    pub fn record(
        &self,
        task: &str,
        domain: &str,
        success: bool,
        output: &str,
    ) -> Result<(), HistoryError> {
        // Keep stored outputs bounded.
        let preview: String = output.chars().take(2000).collect();
        self.conn.execute(
            "INSERT INTO history (created_at, task, domain, success, output)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                chrono::Utc::now().to_rfc3339(),
                task,
                domain,
                success as i64,
                preview
            ],
        )?;
        Ok(())
    }

    /// Most recent entries, optionally filtered by a substring over the task
    /// text (case-insensitive).
    pub fn list(
        &self,
        search: Option<&str>,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, created_at, task, domain, success, output
             FROM history
             WHERE (?1 IS NULL OR lower(task) LIKE '%' || lower(?1) || '%')
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![search, limit as i64], |row| {
            Ok(HistoryEntry {
                id: row.get(0)?,
                created_at: row.get(1)?,
                task: row.get(2)?,
                domain: row.get(3)?,
                success: row.get::<_, i64>(4)? != 0,
                output: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count(&self) -> Result<i64, HistoryError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?)
    }

    pub fn clear(&self) -> Result<usize, HistoryError> {
        Ok(self.conn.execute("DELETE FROM history", [])?)
    }
}
