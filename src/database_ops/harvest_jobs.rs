use anyhow::{Context, Result};
use sqlx::Row;
use tracing::instrument;

use super::{quote_ident, Db};
use crate::config::StoreConfig;
use crate::model::{HarvestStatus, Job, JobStage};
use crate::status::JobStore;

/// Postgres-backed job table.
///
/// Expected columns: `id`, `brand_id`, `result_url`, `scan_url`, `harvest_status`,
/// `parsing_finished_at`, plus the optional stage and reason columns from config.
#[derive(Clone)]
pub struct PgJobStore {
    db: Db,
    table: String,
    stage_column: Option<String>,
    reason_column: Option<String>,
}

impl PgJobStore {
    pub fn new(db: Db, cfg: &StoreConfig) -> Self {
        Self {
            db,
            table: quote_ident(&cfg.jobs_table),
            stage_column: cfg.stage_column.as_deref().map(quote_ident),
            reason_column: cfg.reason_column.as_deref().map(quote_ident),
        }
    }

    fn pending_sql(&self, limited: bool) -> String {
        let stage = match &self.stage_column {
            Some(col) => format!(", {col} AS last_stage"),
            None => String::new(),
        };
        let mut sql = format!(
            "SELECT id, brand_id, result_url, scan_url{stage} FROM {} \
             WHERE parsing_finished_at IS NOT NULL \
               AND (harvest_status IS NULL \
                    OR btrim(harvest_status) = '' \
                    OR lower(btrim(harvest_status)) = 'pending') \
             ORDER BY id DESC",
            self.table
        );
        if limited {
            sql.push_str(" LIMIT $1");
        }
        sql
    }

    fn status_sql(&self) -> String {
        match &self.reason_column {
            Some(col) => format!(
                "UPDATE {} SET harvest_status = $2, {col} = $3 WHERE id = $1",
                self.table
            ),
            None => format!("UPDATE {} SET harvest_status = $2 WHERE id = $1", self.table),
        }
    }
}

#[async_trait::async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self))]
    async fn pending_jobs(&self, limit: Option<i64>) -> Result<Vec<Job>> {
        let mut conn = self.db.pool.acquire().await?;
        let sql = self.pending_sql(limit.is_some());
        let mut query = sqlx::query(&sql);
        if let Some(n) = limit {
            query = query.bind(n);
        }
        let rows = query
            .fetch_all(&mut *conn)
            .await
            .context("selecting pending harvest jobs")?;

        let has_stage = self.stage_column.is_some();
        rows.iter()
            .map(|row| -> Result<Job> {
                let last_stage = if has_stage {
                    row.try_get::<Option<String>, _>("last_stage")?
                        .as_deref()
                        .and_then(JobStage::parse)
                } else {
                    None
                };
                Ok(Job {
                    id: row.try_get("id")?,
                    brand_id: row.try_get("brand_id")?,
                    result_url: row.try_get("result_url")?,
                    scan_url: row.try_get("scan_url")?,
                    last_stage,
                })
            })
            .collect()
    }

    #[instrument(skip(self, reason))]
    async fn set_status(
        &self,
        job_id: i64,
        status: HarvestStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.db.pool.acquire().await?;
        let sql = self.status_sql();
        let mut query = sqlx::query(&sql).bind(job_id).bind(status.as_db());
        if self.reason_column.is_some() {
            query = query.bind(reason);
        }
        query
            .execute(&mut *conn)
            .await
            .with_context(|| format!("updating status of job {job_id}"))?;
        Ok(())
    }

    async fn record_stage(&self, job_id: i64, stage: JobStage) -> Result<()> {
        let Some(col) = &self.stage_column else {
            return Ok(());
        };
        let mut conn = self.db.pool.acquire().await?;
        let sql = format!("UPDATE {} SET {col} = $2 WHERE id = $1", self.table);
        sqlx::query(&sql)
            .bind(job_id)
            .bind(stage.as_str())
            .execute(&mut *conn)
            .await
            .with_context(|| format!("recording stage {stage} for job {job_id}"))?;
        Ok(())
    }
}
