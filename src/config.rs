use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::util::env::{env_flag, env_opt, env_parse, env_parse_opt};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Which pass the binary runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Process the pending job queue.
    Jobs,
    /// Transform whatever is already staged, brand by brand.
    StagedBrands,
}

impl RunMode {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "jobs" | "" => Ok(RunMode::Jobs),
            "staged-brands" | "staged_brands" => Ok(RunMode::StagedBrands),
            other => bail!("unknown HARVEST_MODE {other:?} (expected jobs|staged-brands)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub user_agent: String,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_attempts: 5,
            backoff_base: Duration::from_millis(500),
            timeout: Duration::from_secs(60),
            // storage-bucket hostnames with dots fail wildcard name matching
            accept_invalid_certs: true,
        }
    }
}

impl DownloadConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            user_agent: env_opt("HARVEST_USER_AGENT").unwrap_or(d.user_agent),
            max_attempts: env_parse("HARVEST_MAX_ATTEMPTS", d.max_attempts).max(1),
            backoff_base: env_parse_opt::<u64>("HARVEST_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.backoff_base),
            timeout: env_parse_opt::<u64>("HARVEST_HTTP_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.timeout),
            accept_invalid_certs: env_flag("HARVEST_ACCEPT_INVALID_CERTS", d.accept_invalid_certs),
        }
    }
}

/// Table and column names for the job and staging stores.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub jobs_table: String,
    pub stage_column: Option<String>,
    pub reason_column: Option<String>,
    pub staging_table: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            jobs_table: "harvest_jobs".into(),
            stage_column: Some("harvest_stage".into()),
            reason_column: Some("harvest_reason".into()),
            staging_table: "retail_load_initial".into(),
            max_connections: 2,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let cfg = Self {
            jobs_table: env_opt("HARVEST_JOBS_TABLE").unwrap_or(d.jobs_table),
            stage_column: optional_column("HARVEST_STAGE_COLUMN", d.stage_column),
            reason_column: optional_column("HARVEST_REASON_COLUMN", d.reason_column),
            staging_table: env_opt("HARVEST_STAGING_TABLE").unwrap_or(d.staging_table),
            max_connections: env_parse("HARVEST_DB_MAX_CONNECTIONS", d.max_connections).max(1),
            acquire_timeout: env_parse_opt::<u64>("HARVEST_DB_ACQUIRE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.acquire_timeout),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = vec![self.jobs_table.as_str(), self.staging_table.as_str()];
        names.extend(self.stage_column.as_deref());
        names.extend(self.reason_column.as_deref());
        for name in names {
            if !is_identifier(name) {
                bail!("invalid SQL identifier in config: {name:?}");
            }
        }
        Ok(())
    }
}

/// Unset keeps the default; set-but-blank disables the column.
fn optional_column(key: &str, default: Option<String>) -> Option<String> {
    crate::util::env::init_env();
    match std::env::var(key) {
        Ok(v) if v.trim().is_empty() => None,
        Ok(v) => Some(v.trim().to_string()),
        Err(_) => default,
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, optionally schema-qualified with a single dot.
pub fn is_identifier(name: &str) -> bool {
    let part_ok = |p: &str| {
        let mut chars = p.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    match name.split_once('.') {
        Some((schema, table)) => part_ok(schema) && part_ok(table),
        None => part_ok(name),
    }
}

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub database_url: String,
    pub mode: RunMode,
    pub max_jobs: Option<i64>,
    pub transform_sql: PathBuf,
    pub validate_sql: PathBuf,
    pub download: DownloadConfig,
    pub store: StoreConfig,
}

impl HarvestConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: crate::util::env::db_url()?,
            mode: RunMode::parse(&env_opt("HARVEST_MODE").unwrap_or_default())?,
            max_jobs: env_parse_opt::<i64>("HARVEST_MAX_JOBS").filter(|n| *n > 0),
            transform_sql: env_opt("HARVEST_TRANSFORM_SQL")
                .unwrap_or_else(|| "sql/transform.sql".into())
                .into(),
            validate_sql: env_opt("HARVEST_VALIDATE_SQL")
                .unwrap_or_else(|| "sql/validate.sql".into())
                .into(),
            download: DownloadConfig::from_env(),
            store: StoreConfig::from_env()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_reject_injection() {
        assert!(is_identifier("harvest_jobs"));
        assert!(is_identifier("staging.retail_load_initial"));
        assert!(is_identifier("_tmp1"));
        assert!(!is_identifier("1jobs"));
        assert!(!is_identifier("jobs; DROP TABLE x"));
        assert!(!is_identifier("a.b.c"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(RunMode::parse("").unwrap(), RunMode::Jobs);
        assert_eq!(RunMode::parse("Staged-Brands").unwrap(), RunMode::StagedBrands);
        assert!(RunMode::parse("stream").is_err());
    }

    #[test]
    fn default_store_config_is_valid() {
        StoreConfig::default().validate().unwrap();
        let bad = StoreConfig {
            reason_column: Some("reason\"; --".into()),
            ..StoreConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn download_defaults_match_retry_policy() {
        let d = DownloadConfig::default();
        assert_eq!(d.max_attempts, 5);
        assert_eq!(d.backoff_base, Duration::from_millis(500));
    }
}
