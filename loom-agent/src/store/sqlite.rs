use crate::audit::{ApprovedBy, AuditLog, AuditLogEntry};
use crate::classifier::IssueCategory;
use crate::error::{AgentError, Result};
use crate::learning::{LearningPattern, LearningStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_log (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  id TEXT NOT NULL UNIQUE,
  tool_call_id TEXT NOT NULL,
  tool_name TEXT NOT NULL,
  args TEXT NOT NULL,
  result TEXT NOT NULL,
  approved_by TEXT NOT NULL,
  success INTEGER NOT NULL,
  timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS learning_patterns (
  category TEXT PRIMARY KEY,
  successes INTEGER NOT NULL,
  total_uses INTEGER NOT NULL,
  success_rate REAL NOT NULL,
  last_used TEXT NOT NULL,
  description TEXT NOT NULL,
  keywords TEXT NOT NULL
);
"#;

/// SQLite-backed audit log and learning store sharing one connection.
///
/// rusqlite is blocking, so every query runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgentError::Store(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "sqlite store opened");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| AgentError::Store("sqlite connection lock poisoned".to_string()))?;
            f(&guard)
        })
        .await?
    }
}

#[async_trait]
impl AuditLog for SqliteStore {
    async fn append(&self, entry: AuditLogEntry) -> Result<()> {
        let args = serde_json::to_string(&entry.args)?;
        let result = serde_json::to_string(&entry.result)?;
        self.with_conn(move |conn| {
            conn.execute(
                r#"
INSERT INTO audit_log (id, tool_call_id, tool_name, args, result, approved_by, success, timestamp)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
"#,
                params![
                    entry.id,
                    entry.tool_call_id,
                    entry.tool_name,
                    args,
                    result,
                    entry.approved_by.as_str(),
                    entry.success,
                    entry.timestamp.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn read_all(&self) -> Result<Vec<AuditLogEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                r#"
SELECT id, tool_call_id, tool_name, args, result, approved_by, success, timestamp
FROM audit_log
ORDER BY seq ASC
"#,
            )?;
            let rows = stmt
                .query_map([], |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, String>(4)?,
                        r.get::<_, String>(5)?,
                        r.get::<_, bool>(6)?,
                        r.get::<_, String>(7)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(
                    |(id, tool_call_id, tool_name, args, result, approved_by, success, ts)| {
                        Ok(AuditLogEntry {
                            id,
                            tool_call_id,
                            tool_name,
                            args: serde_json::from_str(&args)?,
                            result: serde_json::from_str(&result)?,
                            approved_by: parse_approved_by(&approved_by)?,
                            success,
                            timestamp: parse_timestamp(&ts)?,
                        })
                    },
                )
                .collect()
        })
        .await
    }
}

#[async_trait]
impl LearningStore for SqliteStore {
    async fn get(&self, category: IssueCategory) -> Result<Option<LearningPattern>> {
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    r#"
SELECT category, successes, total_uses, success_rate, last_used, description, keywords
FROM learning_patterns
WHERE category = ?1
"#,
                    params![category.as_str()],
                    pattern_row,
                )
                .optional()?;
            row.map(pattern_from_row).transpose()
        })
        .await
    }

    async fn upsert(&self, pattern: LearningPattern) -> Result<()> {
        let keywords = serde_json::to_string(&pattern.keywords)?;
        self.with_conn(move |conn| {
            conn.execute(
                r#"
INSERT INTO learning_patterns
    (category, successes, total_uses, success_rate, last_used, description, keywords)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(category) DO UPDATE SET
  successes = excluded.successes,
  total_uses = excluded.total_uses,
  success_rate = excluded.success_rate,
  last_used = excluded.last_used,
  description = excluded.description,
  keywords = excluded.keywords
"#,
                params![
                    pattern.category.as_str(),
                    pattern.successes,
                    pattern.total_uses,
                    pattern.success_rate,
                    pattern.last_used.to_rfc3339(),
                    pattern.description,
                    keywords,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn read_all(&self) -> Result<Vec<LearningPattern>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                r#"
SELECT category, successes, total_uses, success_rate, last_used, description, keywords
FROM learning_patterns
ORDER BY category ASC
"#,
            )?;
            let rows = stmt
                .query_map([], pattern_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(pattern_from_row).collect()
        })
        .await
    }
}

type PatternRow = (String, u32, u32, f64, String, String, String);

fn pattern_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<PatternRow> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
    ))
}

fn pattern_from_row(row: PatternRow) -> Result<LearningPattern> {
    let (category, successes, total_uses, success_rate, last_used, description, keywords) = row;
    Ok(LearningPattern {
        category: category.parse().map_err(AgentError::Store)?,
        successes,
        total_uses,
        success_rate,
        last_used: parse_timestamp(&last_used)?,
        description,
        keywords: serde_json::from_str(&keywords)?,
    })
}

fn parse_approved_by(s: &str) -> Result<ApprovedBy> {
    match s {
        "auto" => Ok(ApprovedBy::Auto),
        "user" => Ok(ApprovedBy::User),
        other => Err(AgentError::Store(format!("unknown approved_by value: {other}"))),
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AgentError::Store(format!("bad timestamp {s:?}: {e}")))
}
