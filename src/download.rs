use csv::{ByteRecord, QuoteStyle, ReaderBuilder, WriterBuilder};
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::DownloadConfig;
use crate::error::HarvestError;

/// Statuses worth another attempt; anything else non-2xx is terminal.
pub const RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    /// Sleep before retry number `retry` (1-based): `base * 2^(retry-1)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exp)
    }

    pub fn should_retry_status(status: StatusCode) -> bool {
        RETRY_STATUSES.contains(&status.as_u16())
    }
}

impl From<&DownloadConfig> for RetryPolicy {
    fn from(cfg: &DownloadConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            backoff_base: cfg.backoff_base,
        }
    }
}

/// Reject empty or non-network urls before any I/O happens.
pub fn validate_source_url(raw: &str) -> Result<Url, HarvestError> {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    if trimmed.is_empty() || !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return Err(HarvestError::InvalidUrl(raw.to_string()));
    }
    Url::parse(trimmed).map_err(|_| HarvestError::InvalidUrl(raw.to_string()))
}

/// Strip trailing blank lines and rewrite every field fully quoted.
///
/// Rows may be ragged here; width is enforced by the normalizer.
pub fn requote(raw: &str) -> Result<String, HarvestError> {
    let trimmed = raw.trim_end();
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(trimmed.as_bytes());
    let mut wtr = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .flexible(true)
        .from_writer(Vec::with_capacity(trimmed.len() + trimmed.len() / 4));

    let mut rec = ByteRecord::new();
    loop {
        match rdr.read_byte_record(&mut rec) {
            Ok(true) => wtr
                .write_byte_record(&rec)
                .map_err(|e| HarvestError::Download(format!("re-quote failed: {e}")))?,
            Ok(false) => break,
            Err(e) => return Err(HarvestError::Download(format!("re-quote failed: {e}"))),
        }
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| HarvestError::Download(format!("re-quote failed: {e}")))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Fetches vendor exports over HTTP with bounded retry.
#[derive(Clone)]
pub struct Downloader {
    http: Client,
    policy: RetryPolicy,
}

impl Downloader {
    pub fn new(cfg: &DownloadConfig) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("text/csv,text/plain,*/*"),
        );
        let http = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .danger_accept_invalid_certs(cfg.accept_invalid_certs)
            .timeout(cfg.timeout)
            .build()?;
        Ok(Self {
            http,
            policy: RetryPolicy::from(cfg),
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Download `url` and return the export re-quoted and trimmed.
    #[instrument(skip(self))]
    pub async fn fetch(&self, url: &str) -> Result<String, HarvestError> {
        let parsed = validate_source_url(url)?;
        let body = self.fetch_raw(parsed).await?;
        // permissive decode; a stray byte must not sink the whole batch
        let text = String::from_utf8_lossy(&body);
        requote(&text)
    }

    async fn fetch_raw(&self, url: Url) -> Result<Vec<u8>, HarvestError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let failure = match self.http.get(url.clone()).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        match resp.bytes().await {
                            Ok(body) => {
                                info!(%url, attempt, bytes = body.len(), "download ok");
                                return Ok(body.to_vec());
                            }
                            Err(e) => format!("body read error: {e}"),
                        }
                    } else if RetryPolicy::should_retry_status(status) {
                        format!("status {status}")
                    } else {
                        warn!(%url, %status, "terminal http status");
                        return Err(HarvestError::Download(format!(
                            "{url} returned {status}"
                        )));
                    }
                }
                // builder and redirect-limit errors are terminal; any other transport failure retries
                Err(e) if e.is_builder() || e.is_redirect() => {
                    return Err(HarvestError::Download(format!("{url}: {e}")))
                }
                Err(e) => format!("transport error: {e}"),
            };

            if attempt >= self.policy.max_attempts {
                warn!(%url, attempt, error = %failure, "download retries exhausted");
                return Err(HarvestError::Download(format!(
                    "{url}: gave up after {attempt} attempts ({failure})"
                )));
            }
            let wait = self.policy.delay_for(attempt);
            debug!(%url, attempt, error = %failure, wait_ms = wait.as_millis() as u64, "retrying download");
            tokio::time::sleep(wait).await;
        }
    }
}
