use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::HarvestError;
use crate::model::{HarvestStatus, Job, JobStage};

/// Persistence for harvest jobs. Owned upstream; this side only reads and updates status.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Parsed jobs with status unset or Pending, newest (highest id) first.
    async fn pending_jobs(&self, limit: Option<i64>) -> Result<Vec<Job>>;
    /// Write a terminal status and, where the store keeps one, the reason.
    async fn set_status(&self, job_id: i64, status: HarvestStatus, reason: Option<&str>)
        -> Result<()>;
    /// Record in-flight progress. Stores without a stage column may no-op.
    async fn record_stage(&self, job_id: i64, stage: JobStage) -> Result<()>;
}

/// Reads pending jobs and writes terminal status back.
#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn JobStore>,
    limit: Option<i64>,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store, limit: None }
    }

    pub fn with_limit(mut self, limit: Option<i64>) -> Self {
        self.limit = limit;
        self
    }

    pub async fn fetch_pending_jobs(&self) -> Result<Vec<Job>, HarvestError> {
        let mut jobs = self
            .store
            .pending_jobs(self.limit)
            .await
            .map_err(|e| HarvestError::StoreQuery(format!("{e:#}")))?;
        // the store promises this order; the pipeline depends on it
        jobs.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(jobs)
    }

    pub async fn mark_completed(&self, job_id: i64) -> Result<(), HarvestError> {
        self.store
            .set_status(job_id, HarvestStatus::Completed, None)
            .await
            .map_err(|e| HarvestError::StatusUpdate(format!("{e:#}")))?;
        info!(job_id, "job marked Completed");
        Ok(())
    }

    pub async fn mark_failed(&self, job_id: i64, reason: &str) -> Result<(), HarvestError> {
        self.store
            .set_status(job_id, HarvestStatus::Failed, Some(reason))
            .await
            .map_err(|e| HarvestError::StatusUpdate(format!("{e:#}")))?;
        warn!(job_id, reason, "job marked Failed");
        Ok(())
    }

    /// Best effort; progress tracking never fails a job.
    pub async fn record_stage(&self, job_id: i64, stage: JobStage) {
        if let Err(e) = self.store.record_stage(job_id, stage).await {
            warn!(job_id, %stage, error = %e, "failed to record job stage");
        }
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct StoredJob {
        pub job: Job,
        pub parsed: bool,
        pub status: HarvestStatus,
        pub stage: Option<JobStage>,
        pub reason: Option<String>,
    }

    /// Job store double keyed by id.
    #[derive(Default)]
    pub struct MemoryJobs {
        pub jobs: Mutex<BTreeMap<i64, StoredJob>>,
        pub stage_log: Mutex<Vec<(i64, JobStage)>>,
        pub fail_reads: bool,
        pub fail_writes: bool,
    }

    impl MemoryJobs {
        pub fn with_jobs(jobs: Vec<Job>) -> Self {
            let store = Self::default();
            for job in jobs {
                store.insert(job, true, HarvestStatus::Pending);
            }
            store
        }

        pub fn insert(&self, job: Job, parsed: bool, status: HarvestStatus) {
            self.jobs.lock().unwrap().insert(
                job.id,
                StoredJob {
                    stage: job.last_stage,
                    job,
                    parsed,
                    status,
                    reason: None,
                },
            );
        }

        pub fn get(&self, id: i64) -> StoredJob {
            self.jobs.lock().unwrap()[&id].clone()
        }

        pub fn stages_for(&self, id: i64) -> Vec<JobStage> {
            self.stage_log
                .lock()
                .unwrap()
                .iter()
                .filter(|(j, _)| *j == id)
                .map(|(_, s)| *s)
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl JobStore for MemoryJobs {
        async fn pending_jobs(&self, limit: Option<i64>) -> Result<Vec<Job>> {
            if self.fail_reads {
                anyhow::bail!("connection refused");
            }
            let jobs = self.jobs.lock().unwrap();
            let mut out: Vec<Job> = jobs
                .values()
                .rev()
                .filter(|j| j.parsed && j.status.is_eligible())
                .map(|j| Job {
                    last_stage: j.stage,
                    ..j.job.clone()
                })
                .collect();
            if let Some(n) = limit {
                out.truncate(n as usize);
            }
            Ok(out)
        }

        async fn set_status(
            &self,
            job_id: i64,
            status: HarvestStatus,
            reason: Option<&str>,
        ) -> Result<()> {
            if self.fail_writes {
                anyhow::bail!("deadlock detected");
            }
            let mut jobs = self.jobs.lock().unwrap();
            let entry = jobs
                .get_mut(&job_id)
                .ok_or_else(|| anyhow::anyhow!("no job {job_id}"))?;
            entry.status = status;
            entry.reason = reason.map(str::to_string);
            Ok(())
        }

        async fn record_stage(&self, job_id: i64, stage: JobStage) -> Result<()> {
            self.stage_log.lock().unwrap().push((job_id, stage));
            if let Some(entry) = self.jobs.lock().unwrap().get_mut(&job_id) {
                entry.stage = Some(stage);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryJobs;
    use super::*;

    #[tokio::test]
    async fn pending_jobs_are_newest_first_and_filtered() {
        let store = MemoryJobs::default();
        store.insert(Job::new(3, 1, "https://x/3", "s"), true, HarvestStatus::Unset);
        store.insert(Job::new(9, 1, "https://x/9", "s"), true, HarvestStatus::Pending);
        store.insert(Job::new(5, 2, "https://x/5", "s"), true, HarvestStatus::Pending);
        store.insert(Job::new(7, 2, "https://x/7", "s"), false, HarvestStatus::Pending);
        store.insert(Job::new(8, 2, "https://x/8", "s"), true, HarvestStatus::Completed);
        let tracker = StatusTracker::new(Arc::new(store));
        let ids: Vec<i64> = tracker
            .fetch_pending_jobs()
            .await
            .unwrap()
            .iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![9, 5, 3]);
    }

    #[tokio::test]
    async fn read_failure_is_store_query_error() {
        let store = MemoryJobs {
            fail_reads: true,
            ..MemoryJobs::default()
        };
        let tracker = StatusTracker::new(Arc::new(store));
        let err = tracker.fetch_pending_jobs().await.unwrap_err();
        assert!(matches!(err, HarvestError::StoreQuery(_)));
    }

    #[tokio::test]
    async fn mark_completed_is_idempotent() {
        let store = Arc::new(MemoryJobs::with_jobs(vec![Job::new(1, 7, "https://x", "s")]));
        let tracker = StatusTracker::new(store.clone());
        tracker.mark_completed(1).await.unwrap();
        tracker.mark_completed(1).await.unwrap();
        assert_eq!(store.get(1).status, HarvestStatus::Completed);
        assert!(tracker.fetch_pending_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_failed_keeps_reason() {
        let store = Arc::new(MemoryJobs::with_jobs(vec![Job::new(2, 7, "", "s")]));
        let tracker = StatusTracker::new(store.clone());
        tracker.mark_failed(2, "Download Failed").await.unwrap();
        let stored = store.get(2);
        assert_eq!(stored.status, HarvestStatus::Failed);
        assert_eq!(stored.reason.as_deref(), Some("Download Failed"));
    }
}
