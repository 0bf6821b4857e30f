use thiserror::Error;

/// Failure taxonomy for the harvest pipeline.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("invalid source url: {0:?}")]
    InvalidUrl(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("export contained no rows")]
    EmptyResult,

    #[error("staging load failed: {0}")]
    StagingLoad(String),

    #[error("transformation failed: {0}")]
    Transformation(String),

    #[error("job store query failed: {0}")]
    StoreQuery(String),

    #[error("status update failed: {0}")]
    StatusUpdate(String),
}

impl HarvestError {
    /// Reason recorded against a failed job.
    pub fn failure_reason(&self) -> String {
        match self {
            HarvestError::InvalidUrl(_) | HarvestError::Download(_) => "Download Failed".into(),
            HarvestError::EmptyResult => "CSV Empty".into(),
            HarvestError::StagingLoad(detail) => format!("Staging Load Error: {detail}"),
            HarvestError::Transformation(detail) => format!("Transformation Error: {detail}"),
            HarvestError::StoreQuery(detail) => format!("Store Query Error: {detail}"),
            HarvestError::StatusUpdate(detail) => format!("Status Update Error: {detail}"),
        }
    }

    pub fn staging(err: impl std::fmt::Display) -> Self {
        HarvestError::StagingLoad(err.to_string())
    }

    pub fn transformation(err: impl std::fmt::Display) -> Self {
        HarvestError::Transformation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_match_stage() {
        assert_eq!(
            HarvestError::InvalidUrl(String::new()).failure_reason(),
            "Download Failed"
        );
        assert_eq!(
            HarvestError::Download("503".into()).failure_reason(),
            "Download Failed"
        );
        assert_eq!(HarvestError::EmptyResult.failure_reason(), "CSV Empty");
        assert_eq!(
            HarvestError::staging("ragged row").failure_reason(),
            "Staging Load Error: ragged row"
        );
        assert_eq!(
            HarvestError::transformation("syntax error").failure_reason(),
            "Transformation Error: syntax error"
        );
    }
}
