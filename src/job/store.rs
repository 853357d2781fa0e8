//! 作业存储：记录作业与状态迁移

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::job::{Job, JobId, JobStatus};

#[derive(Error, Debug)]
pub enum JobStoreError {
    #[error("job store unavailable: {0}")]
    Unavailable(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job already exists: {0}")]
    Duplicate(String),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: Job) -> Result<(), JobStoreError>;

    async fn get(&self, id: &str) -> Result<Option<Job>, JobStoreError>;

    /// 写入新状态（合法性由编排层检查）
    async fn set_status(&self, id: &str, status: JobStatus) -> Result<(), JobStoreError>;

    async fn list(&self) -> Result<Vec<Job>, JobStoreError>;
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<BTreeMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::Duplicate(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, JobStoreError> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn set_status(&self, id: &str, status: JobStatus) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| JobStoreError::NotFound(id.to_string()))?;
        job.status = status;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Job>, JobStoreError> {
        Ok(self.jobs.read().await.values().cloned().collect())
    }
}
