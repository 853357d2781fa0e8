//! SQLite 记忆存储
//!
//! 整条记录以 JSON 存在 body 列，scope_id / kind / importance 单独成列用于过滤。
//! 连接由 std Mutex 保护，锁只在同步辅助函数内持有，不跨 await。

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::memory::store::{check_scope, MemoryFilter, MemoryStore, MemoryStoreError};
use crate::memory::MemoryRecord;

impl From<rusqlite::Error> for MemoryStoreError {
    fn from(e: rusqlite::Error) -> Self {
        MemoryStoreError::Storage(e.to_string())
    }
}

pub struct SqliteMemoryStore {
    conn: Mutex<Connection>,
}

impl SqliteMemoryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MemoryStoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, MemoryStoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, MemoryStoreError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS memory_records (
                id TEXT PRIMARY KEY,
                scope_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                importance REAL NOT NULL,
                updated_at TEXT NOT NULL,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_memory_scope
                ON memory_records(scope_id, kind);
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, MemoryStoreError> {
        self.conn
            .lock()
            .map_err(|e| MemoryStoreError::Storage(format!("connection lock poisoned: {e}")))
    }

    fn load_body(conn: &Connection, id: &str) -> Result<Option<MemoryRecord>, MemoryStoreError> {
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM memory_records WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn put_sync(&self, record: &MemoryRecord) -> Result<(), MemoryStoreError> {
        let conn = self.lock()?;
        if let Some(existing) = Self::load_body(&conn, &record.id)? {
            check_scope(&existing, record)?;
        }
        let body = serde_json::to_string(record)?;
        let kind = serde_json::to_string(&record.kind)?;
        conn.execute(
            "INSERT INTO memory_records (id, scope_id, kind, importance, updated_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                importance = excluded.importance,
                updated_at = excluded.updated_at,
                body = excluded.body",
            params![
                record.id,
                record.scope_id(),
                kind.trim_matches('"'),
                record.importance() as f64,
                record.updated_at,
                body
            ],
        )?;
        Ok(())
    }

    fn query_sync(
        &self,
        scope_id: &str,
        filter: &MemoryFilter,
    ) -> Result<Vec<MemoryRecord>, MemoryStoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT body FROM memory_records
             WHERE scope_id = ?1 AND importance >= ?2
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![scope_id, filter.min_importance as f64], |row| {
            row.get::<_, String>(0)
        })?;

        let now = Utc::now();
        let mut out = Vec::new();
        for body in rows {
            let record: MemoryRecord = serde_json::from_str(&body?)?;
            if filter.matches(&record, now) {
                out.push(record);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn put(&self, record: MemoryRecord) -> Result<(), MemoryStoreError> {
        self.put_sync(&record)
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, MemoryStoreError> {
        let conn = self.lock()?;
        Self::load_body(&conn, id)
    }

    async fn query(
        &self,
        scope_id: &str,
        filter: &MemoryFilter,
    ) -> Result<Vec<MemoryRecord>, MemoryStoreError> {
        self.query_sync(scope_id, filter)
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryStoreError> {
        let conn = self.lock()?;
        let n = conn.execute("DELETE FROM memory_records WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }
}
