use std::io::Write;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::download::Downloader;
use crate::error::HarvestError;
use crate::model::{BrandOutcome, HarvestStatus, Job, JobOutcome, JobStage, RunReport};
use crate::normalization;
use crate::staging::StagingLoader;
use crate::status::StatusTracker;
use crate::transform::{StatementExecutor, TransformationService};

/// Drives each pending job through download, staging, transform and validation.
///
/// Jobs run strictly one after another. Every step commits on its own; a failure
/// marks the job Failed and the run moves on without undoing earlier steps.
pub struct Orchestrator {
    tracker: StatusTracker,
    loader: StagingLoader,
    downloader: Downloader,
    transformer: Arc<dyn TransformationService>,
    executor: Arc<dyn StatementExecutor>,
}

impl Orchestrator {
    pub fn new(
        tracker: StatusTracker,
        loader: StagingLoader,
        downloader: Downloader,
        transformer: Arc<dyn TransformationService>,
        executor: Arc<dyn StatementExecutor>,
    ) -> Self {
        Self {
            tracker,
            loader,
            downloader,
            transformer,
            executor,
        }
    }

    /// One pass over the pending snapshot.
    pub async fn run(&self) -> RunReport {
        let mut report = RunReport::default();
        let jobs = match self.tracker.fetch_pending_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                // surfaced separately so an outage never reads as an empty queue
                error!(target: "harvest::alert", error = %e, "job store unavailable; no jobs processed");
                report.store_error = Some(e.to_string());
                return report;
            }
        };
        report.selected = jobs.len();
        if jobs.is_empty() {
            info!("no pending jobs");
            return report;
        }
        info!(count = jobs.len(), "processing pending jobs");

        for job in &jobs {
            let (outcome, status_written) = self.process_job(job).await;
            if !status_written {
                report.status_update_failures += 1;
            }
            report.outcomes.push(outcome);
        }

        info!(
            selected = report.selected,
            completed = report.completed(),
            failed = report.failed(),
            status_update_failures = report.status_update_failures,
            "harvest run finished"
        );
        report
    }

    /// Process a single job to a terminal status. The flag is false when the
    /// terminal status could not be written back.
    #[instrument(skip(self, job), fields(job_id = job.id, brand_id = job.brand_id))]
    pub async fn process_job(&self, job: &Job) -> (JobOutcome, bool) {
        if job.was_interrupted() {
            warn!(last_stage = ?job.last_stage, "job was interrupted by an earlier run; reprocessing");
        }
        let mut stage = JobStage::Fetched;
        let mut staged_rows = 0usize;
        let result = self.pipeline(job, &mut stage, &mut staged_rows).await;

        match result {
            Ok(()) => {
                let written = match self.tracker.mark_completed(job.id).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!(error = %e, "could not mark job Completed");
                        false
                    }
                };
                self.tracker.record_stage(job.id, JobStage::Completed).await;
                if let Err(e) = self.loader.clear(job.brand_id).await {
                    warn!(error = %e, "post-success staging cleanup failed");
                }
                let outcome = JobOutcome {
                    job_id: job.id,
                    brand_id: job.brand_id,
                    status: HarvestStatus::Completed,
                    stage: JobStage::Completed,
                    reason: None,
                    staged_rows,
                };
                (outcome, written)
            }
            Err(err) => {
                let reason = err.failure_reason();
                warn!(%stage, error = %err, reason = %reason, "job failed");
                let written = match self.tracker.mark_failed(job.id, &reason).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!(error = %e, "could not mark job Failed");
                        false
                    }
                };
                self.tracker.record_stage(job.id, JobStage::Failed).await;
                let outcome = JobOutcome {
                    job_id: job.id,
                    brand_id: job.brand_id,
                    status: HarvestStatus::Failed,
                    stage,
                    reason: Some(reason),
                    staged_rows,
                };
                (outcome, written)
            }
        }
    }

    async fn enter(&self, job: &Job, stage: &mut JobStage, next: JobStage) {
        *stage = next;
        info!(job_id = job.id, %next, "entering stage");
        self.tracker.record_stage(job.id, next).await;
    }

    async fn pipeline(
        &self,
        job: &Job,
        stage: &mut JobStage,
        staged_rows: &mut usize,
    ) -> Result<(), HarvestError> {
        self.enter(job, stage, JobStage::Fetched).await;
        self.loader.clear(job.brand_id).await?;

        self.enter(job, stage, JobStage::Downloading).await;
        let url = job.result_url.as_deref().unwrap_or_default();
        let payload = self.downloader.fetch(url).await?;

        self.enter(job, stage, JobStage::Staging).await;
        let table = read_through_scratch(&payload)?;
        if table.is_empty() {
            return Err(HarvestError::EmptyResult);
        }
        let scan_url = job.scan_url.as_deref().unwrap_or_default();
        let batch = self.loader.stage(job.brand_id, table, scan_url).await?;
        *staged_rows = batch.rows.len();

        self.enter(job, stage, JobStage::Transforming).await;
        self.execute_transform(job.brand_id).await?;

        self.enter(job, stage, JobStage::Validating).await;
        self.execute_validation(job.brand_id).await?;
        Ok(())
    }

    async fn execute_transform(&self, brand_id: i64) -> Result<(), HarvestError> {
        let sql = self
            .transformer
            .transform_statement(brand_id)
            .map_err(|e| HarvestError::transformation(format!("{e:#}")))?;
        let affected = self
            .executor
            .execute(&sql)
            .await
            .map_err(|e| HarvestError::transformation(format!("{e:#}")))?;
        info!(brand_id, affected, "transform statement executed");
        Ok(())
    }

    async fn execute_validation(&self, brand_id: i64) -> Result<(), HarvestError> {
        let sql = self
            .transformer
            .validation_statement(brand_id)
            .map_err(|e| HarvestError::transformation(format!("{e:#}")))?;
        let affected = self
            .executor
            .execute(&sql)
            .await
            .map_err(|e| HarvestError::transformation(format!("{e:#}")))?;
        info!(brand_id, affected, "validation statement executed");
        Ok(())
    }

    /// Transform every brand that still has staged rows, then clear it.
    ///
    /// Brands that fail keep their rows for diagnosis.
    pub async fn run_staged_brands(&self) -> RunReport {
        let mut report = RunReport::default();
        let brands = match self.loader.staged_brands().await {
            Ok(brands) => brands,
            Err(e) => {
                error!(target: "harvest::alert", error = %e, "staging store unavailable; nothing swept");
                report.store_error = Some(e.to_string());
                return report;
            }
        };
        report.selected = brands.len();
        info!(count = brands.len(), "sweeping staged brands");

        for brand_id in brands {
            let result = async {
                self.execute_transform(brand_id).await?;
                self.execute_validation(brand_id).await?;
                self.loader.clear(brand_id).await?;
                Ok::<(), HarvestError>(())
            }
            .await;
            let outcome = match result {
                Ok(()) => {
                    info!(brand_id, "brand transformed");
                    BrandOutcome {
                        brand_id,
                        transformed: true,
                        reason: None,
                    }
                }
                Err(e) => {
                    warn!(brand_id, error = %e, "brand sweep failed; rows left staged");
                    BrandOutcome {
                        brand_id,
                        transformed: false,
                        reason: Some(e.failure_reason()),
                    }
                }
            };
            report.brand_outcomes.push(outcome);
        }
        report
    }
}

/// Hand the payload to the normalizer through a scratch file that is removed on drop.
fn read_through_scratch(payload: &str) -> Result<normalization::Table, HarvestError> {
    let mut scratch = tempfile::Builder::new()
        .prefix("harvest-")
        .suffix(".csv")
        .tempfile()
        .map_err(|e| HarvestError::staging(format!("scratch file: {e}")))?;
    scratch
        .write_all(payload.as_bytes())
        .and_then(|_| scratch.flush())
        .map_err(|e| HarvestError::staging(format!("scratch file: {e}")))?;
    normalization::parse_file(scratch.path())
}
