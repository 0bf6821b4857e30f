use serde::Serialize;
use std::fmt;

/// Terminal or pending state stored in the job row's status column.
///
/// `Unset` maps to SQL `NULL`; only `Unset` and `Pending` jobs are eligible for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HarvestStatus {
    Unset,
    Pending,
    Completed,
    Failed,
}

impl HarvestStatus {
    pub fn as_db(&self) -> Option<&'static str> {
        match self {
            HarvestStatus::Unset => None,
            HarvestStatus::Pending => Some("Pending"),
            HarvestStatus::Completed => Some("Completed"),
            HarvestStatus::Failed => Some("Failed"),
        }
    }

    /// Labels compare trimmed and case-insensitively, as the pending-job query does.
    /// Unrecognized labels yield `None` and are never selected.
    pub fn from_db(raw: Option<&str>) -> Option<Self> {
        let status = match raw.map(str::trim) {
            None | Some("") => HarvestStatus::Unset,
            Some(s) if s.eq_ignore_ascii_case("pending") => HarvestStatus::Pending,
            Some(s) if s.eq_ignore_ascii_case("completed") => HarvestStatus::Completed,
            Some(s) if s.eq_ignore_ascii_case("failed") => HarvestStatus::Failed,
            Some(_) => return None,
        };
        Some(status)
    }

    pub fn is_eligible(&self) -> bool {
        matches!(self, HarvestStatus::Unset | HarvestStatus::Pending)
    }
}

/// Where a job currently is in the per-job pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStage {
    Fetched,
    Downloading,
    Staging,
    Transforming,
    Validating,
    Completed,
    Failed,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Fetched => "Fetched",
            JobStage::Downloading => "Downloading",
            JobStage::Staging => "Staging",
            JobStage::Transforming => "Transforming",
            JobStage::Validating => "Validating",
            JobStage::Completed => "Completed",
            JobStage::Failed => "Failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let stage = match raw.trim() {
            "Fetched" => JobStage::Fetched,
            "Downloading" => JobStage::Downloading,
            "Staging" => JobStage::Staging,
            "Transforming" => JobStage::Transforming,
            "Validating" => JobStage::Validating,
            "Completed" => JobStage::Completed,
            "Failed" => JobStage::Failed,
            _ => return None,
        };
        Some(stage)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Completed | JobStage::Failed)
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pending harvest task as selected from the job store.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: i64,
    pub brand_id: i64,
    pub result_url: Option<String>,
    pub scan_url: Option<String>,
    /// Stage recorded by a previous run that never reached a terminal status.
    pub last_stage: Option<JobStage>,
}

impl Job {
    pub fn new(id: i64, brand_id: i64, result_url: &str, scan_url: &str) -> Self {
        Self {
            id,
            brand_id,
            result_url: Some(result_url.to_string()),
            scan_url: Some(scan_url.to_string()),
            last_stage: None,
        }
    }

    /// A job whose previous run stopped mid-pipeline.
    pub fn was_interrupted(&self) -> bool {
        self.last_stage.is_some_and(|s| !s.is_terminal())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    pub job_id: i64,
    pub brand_id: i64,
    pub status: HarvestStatus,
    /// Last stage entered before the job terminated.
    pub stage: JobStage,
    pub reason: Option<String>,
    pub staged_rows: usize,
}

/// Result of transforming one brand during the staged-brands sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrandOutcome {
    pub brand_id: i64,
    pub transformed: bool,
    pub reason: Option<String>,
}

/// Summary of one pass over the pending queue (or the staged-brands sweep).
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunReport {
    pub selected: usize,
    pub outcomes: Vec<JobOutcome>,
    pub brand_outcomes: Vec<BrandOutcome>,
    /// Set when the job store could not be read; distinct from an empty queue.
    pub store_error: Option<String>,
    pub status_update_failures: usize,
}

impl RunReport {
    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == HarvestStatus::Completed)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == HarvestStatus::Failed)
            .count()
    }

    /// Single-line JSON for the end-of-run log record.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
