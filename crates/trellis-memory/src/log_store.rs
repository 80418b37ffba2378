use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use tracing::debug;

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::TelemetrySink;
use trellis_core::types::{ExecutionId, ExecutionLogEntry, LogStatus};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS execution_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        execution_id TEXT NOT NULL,
        agent_name TEXT NOT NULL,
        status TEXT NOT NULL,
        latency_ms INTEGER NOT NULL,
        input_tokens INTEGER,
        output_tokens INTEGER,
        total_tokens INTEGER,
        error_details TEXT,
        timestamp TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_execution_logs_execution
        ON execution_logs(execution_id, id);

    CREATE INDEX IF NOT EXISTS idx_execution_logs_agent
        ON execution_logs(agent_name);";

const SELECT_COLUMNS: &str = "execution_id, agent_name, status, latency_ms, input_tokens, \
     output_tokens, total_tokens, error_details, timestamp";

/// Aggregate numbers for one agent across all logged invocations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStats {
    pub agent_name: String,
    pub runs: u64,
    pub errors: u64,
    pub avg_latency_ms: f64,
    pub total_tokens: u64,
}

/// SQLite-backed execution log.
pub struct SqliteLogStore {
    conn: Mutex<Connection>,
}

fn db_err(e: impl std::fmt::Display) -> TrellisError {
    TrellisError::Database(e.to_string())
}

impl SqliteLogStore {
    /// Open or create the log database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| db_err(format!("Failed to create db directory: {}", e)))?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "Execution log opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, entry: &ExecutionLogEntry) -> Result<()> {
        let conn = self.conn.lock().map_err(db_err)?;
        conn.execute(
            "INSERT INTO execution_logs (execution_id, agent_name, status, latency_ms,
                input_tokens, output_tokens, total_tokens, error_details, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.execution_id.as_str(),
                entry.agent_name,
                entry.status.as_str(),
                entry.latency_ms as i64,
                entry.input_tokens.map(|t| t as i64),
                entry.output_tokens.map(|t| t as i64),
                entry.total_tokens.map(|t| t as i64),
                entry.error_details,
                entry.timestamp.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Most recent entries first.
    pub fn recent(&self, limit: usize) -> Result<Vec<ExecutionLogEntry>> {
        let conn = self.conn.lock().map_err(db_err)?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM execution_logs ORDER BY id DESC LIMIT ?1",
                SELECT_COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_entry)
            .map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)?);
        }
        Ok(out)
    }

    /// Entries for one execution, in append order.
    pub fn for_execution(&self, execution_id: &ExecutionId) -> Result<Vec<ExecutionLogEntry>> {
        let conn = self.conn.lock().map_err(db_err)?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM execution_logs WHERE execution_id = ?1 ORDER BY id ASC",
                SELECT_COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![execution_id.as_str()], row_to_entry)
            .map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)?);
        }
        Ok(out)
    }

    /// Per-agent aggregates, sorted by agent name.
    pub fn agent_stats(&self) -> Result<Vec<AgentStats>> {
        let conn = self.conn.lock().map_err(db_err)?;
        let mut stmt = conn
            .prepare(
                "SELECT agent_name,
                        COUNT(*),
                        SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END),
                        AVG(latency_ms),
                        COALESCE(SUM(total_tokens), 0)
                 FROM execution_logs
                 GROUP BY agent_name
                 ORDER BY agent_name ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AgentStats {
                    agent_name: row.get(0)?,
                    runs: row.get::<_, i64>(1)? as u64,
                    errors: row.get::<_, i64>(2)? as u64,
                    avg_latency_ms: row.get(3)?,
                    total_tokens: row.get::<_, i64>(4)? as u64,
                })
            })
            .map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)?);
        }
        Ok(out)
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<ExecutionLogEntry> {
    let status: String = row.get(2)?;
    let timestamp: String = row.get(8)?;
    Ok(ExecutionLogEntry {
        execution_id: ExecutionId(row.get(0)?),
        agent_name: row.get(1)?,
        status: if status == "error" {
            LogStatus::Error
        } else {
            LogStatus::Success
        },
        latency_ms: row.get::<_, i64>(3)? as u64,
        input_tokens: row.get::<_, Option<i64>>(4)?.map(|t| t as u64),
        output_tokens: row.get::<_, Option<i64>>(5)?.map(|t| t as u64),
        total_tokens: row.get::<_, Option<i64>>(6)?.map(|t| t as u64),
        error_details: row.get(7)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

impl TelemetrySink for SqliteLogStore {
    fn append(&self, entry: ExecutionLogEntry) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.insert(&entry) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::types::TokenUsage;

    fn exec(id: &str) -> ExecutionId {
        ExecutionId::from_string(id)
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let store = SqliteLogStore::in_memory().unwrap();
        let ok = ExecutionLogEntry::success(&exec("e1"), "researcher", 120, Some(TokenUsage::new(10, 5)));
        let failed = ExecutionLogEntry::error(&exec("e1"), "writer", 30, "model unavailable");

        store.append(ok.clone()).await.unwrap();
        store.append(failed).await.unwrap();

        let entries = store.for_execution(&exec("e1")).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].agent_name, "researcher");
        assert_eq!(entries[0].total_tokens, Some(15));
        assert_eq!(entries[0].timestamp.timestamp(), ok.timestamp.timestamp());
        assert_eq!(entries[1].status, LogStatus::Error);
        assert_eq!(entries[1].error_details.as_deref(), Some("model unavailable"));
        assert_eq!(entries[1].input_tokens, None);
    }

    #[tokio::test]
    async fn test_recent_newest_first() {
        let store = SqliteLogStore::in_memory().unwrap();
        for i in 0..5 {
            store
                .append(ExecutionLogEntry::success(&exec(&format!("e{}", i)), "a", i, None))
                .await
                .unwrap();
        }
        let recent = store.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].execution_id, exec("e4"));
        assert_eq!(recent[1].execution_id, exec("e3"));
    }

    #[tokio::test]
    async fn test_agent_stats() {
        let store = SqliteLogStore::in_memory().unwrap();
        store
            .append(ExecutionLogEntry::success(&exec("e1"), "writer", 100, Some(TokenUsage::new(3, 4))))
            .await
            .unwrap();
        store
            .append(ExecutionLogEntry::error(&exec("e2"), "writer", 300, "timeout"))
            .await
            .unwrap();
        store
            .append(ExecutionLogEntry::success(&exec("e2"), "analyst", 50, None))
            .await
            .unwrap();

        let stats = store.agent_stats().unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].agent_name, "analyst");
        assert_eq!(stats[0].total_tokens, 0);
        assert_eq!(stats[1].runs, 2);
        assert_eq!(stats[1].errors, 1);
        assert_eq!(stats[1].avg_latency_ms, 200.0);
        assert_eq!(stats[1].total_tokens, 7);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("executions.db");
        let store = SqliteLogStore::open(&path).unwrap();
        assert!(path.exists());
        assert!(store.recent(10).unwrap().is_empty());
    }
}
