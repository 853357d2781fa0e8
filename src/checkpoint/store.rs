//! 检查点持久化：save(job_id, blob) / load_latest(job_id)
//!
//! 旧检查点保留用于审计，恢复只读最新一条。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::RwLock;

use crate::checkpoint::{CheckpointError, CheckpointId};

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, job_id: &str, blob: &str) -> Result<CheckpointId, CheckpointError>;

    async fn load_latest(&self, job_id: &str) -> Result<Option<String>, CheckpointError>;
}

/// 内存实现：按作业保留全部历史
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    blobs: RwLock<BTreeMap<String, Vec<String>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self, job_id: &str) -> usize {
        self.blobs.read().await.get(job_id).map_or(0, Vec::len)
    }

    /// 按写入顺序返回某作业的全部检查点
    pub async fn history(&self, job_id: &str) -> Vec<String> {
        self.blobs.read().await.get(job_id).cloned().unwrap_or_default()
    }

    /// 测试用：直接写入任意内容
    pub async fn insert_raw(&self, job_id: &str, blob: impl Into<String>) {
        self.blobs
            .write()
            .await
            .entry(job_id.to_string())
            .or_default()
            .push(blob.into());
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, job_id: &str, blob: &str) -> Result<CheckpointId, CheckpointError> {
        let mut blobs = self.blobs.write().await;
        let history = blobs.entry(job_id.to_string()).or_default();
        history.push(blob.to_string());
        Ok(format!("{job_id}:{}", history.len()))
    }

    async fn load_latest(&self, job_id: &str) -> Result<Option<String>, CheckpointError> {
        Ok(self
            .blobs
            .read()
            .await
            .get(job_id)
            .and_then(|h| h.last().cloned()))
    }
}

/// JSON 文件实现：{dir}/{job_id}/{seq:020}.json
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn job_dir(&self, job_id: &str) -> PathBuf {
        let safe: String = job_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(safe)
    }

    async fn latest_seq(dir: &Path) -> Result<Option<u64>, CheckpointError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut latest = None;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let seq = name
                .to_str()
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<u64>().ok());
            if let Some(seq) = seq {
                latest = Some(latest.map_or(seq, |l: u64| l.max(seq)));
            }
        }
        Ok(latest)
    }
}

fn seq_file(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("{seq:020}.json"))
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, job_id: &str, blob: &str) -> Result<CheckpointId, CheckpointError> {
        let dir = self.job_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;
        let seq = Self::latest_seq(&dir).await?.map_or(1, |s| s + 1);
        let path = seq_file(&dir, seq);
        // 先写临时文件再改名，避免读到半截内容
        let tmp = dir.join(format!("{seq:020}.tmp"));
        tokio::fs::write(&tmp, blob).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(format!("{job_id}:{seq}"))
    }

    async fn load_latest(&self, job_id: &str) -> Result<Option<String>, CheckpointError> {
        let dir = self.job_dir(job_id);
        match Self::latest_seq(&dir).await? {
            Some(seq) => Ok(Some(tokio::fs::read_to_string(seq_file(&dir, seq)).await?)),
            None => Ok(None),
        }
    }
}

/// SQLite 实现
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
}

impl SqliteCheckpointStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, CheckpointError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, CheckpointError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                blob TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_checkpoints_job
                ON checkpoints(job_id, id);
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CheckpointError> {
        self.conn
            .lock()
            .map_err(|e| CheckpointError::Storage(format!("connection lock poisoned: {e}")))
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, job_id: &str, blob: &str) -> Result<CheckpointId, CheckpointError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO checkpoints (job_id, created_at, blob) VALUES (?1, ?2, ?3)",
            params![job_id, chrono::Utc::now(), blob],
        )?;
        Ok(format!("{job_id}:{}", conn.last_insert_rowid()))
    }

    async fn load_latest(&self, job_id: &str) -> Result<Option<String>, CheckpointError> {
        let conn = self.lock()?;
        let blob = conn
            .query_row(
                "SELECT blob FROM checkpoints WHERE job_id = ?1 ORDER BY id DESC LIMIT 1",
                params![job_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(blob)
    }
}
