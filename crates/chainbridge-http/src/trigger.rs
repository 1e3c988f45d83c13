//! Job-trigger client: one POST per call to `<base>/v2/specs/<job>/runs`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use url::Url;

use chainbridge_core::error::TriggerError;
use chainbridge_core::trigger::JobTrigger;

pub const ACCESS_KEY_HEADER: &str = "X-Chainlink-EA-AccessKey";
pub const SECRET_HEADER: &str = "X-Chainlink-EA-Secret";

/// Longest response body kept in a [`TriggerError::Status`].
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// Job runner base URL, e.g. `http://localhost:6688`.
    pub base_url: String,
    pub access_key: String,
    pub secret: String,
    pub timeout: Duration,
}

/// Stateless job-trigger client. Exactly one attempt per call.
pub struct JobTriggerClient {
    base: Url,
    http: reqwest::Client,
    access_key: String,
    secret: String,
}

impl JobTriggerClient {
    pub fn new(config: &TriggerConfig) -> Result<Self, TriggerError> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| TriggerError::InvalidUrl(format!("{}: {e}", config.base_url)))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(TriggerError::InvalidUrl(config.base_url.clone()));
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TriggerError::Http(e.to_string()))?;

        Ok(Self {
            base,
            http,
            access_key: config.access_key.clone(),
            secret: config.secret.clone(),
        })
    }

    /// `<base>/v2/specs/<job_reference>/runs`; the base path is replaced.
    pub fn run_url(&self, job_reference: &str) -> Result<Url, TriggerError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| TriggerError::InvalidUrl(self.base.to_string()))?
            .clear()
            .extend(["v2", "specs", job_reference, "runs"]);
        Ok(url)
    }
}

#[async_trait]
impl JobTrigger for JobTriggerClient {
    async fn trigger_job(&self, job_reference: &str, payload: Bytes) -> Result<(), TriggerError> {
        let url = self.run_url(job_reference)?;
        tracing::debug!(job = %job_reference, url = %url, "sending job run trigger");

        // Both credential headers go out even when empty; the job runner
        // decides whether they are acceptable.
        let resp = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCESS_KEY_HEADER, self.access_key.as_str())
            .header(SECRET_HEADER, self.secret.as_str())
            .body(payload)
            .send()
            .await
            .map_err(|e| TriggerError::Http(e.to_string()))?;

        let status = resp.status().as_u16();
        if status >= 400 {
            let mut body = resp.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut end = MAX_ERROR_BODY;
                while !body.is_char_boundary(end) {
                    end -= 1;
                }
                body.truncate(end);
            }
            return Err(TriggerError::Status { status, body });
        }

        tracing::debug!(job = %job_reference, status, "job run triggered");
        Ok(())
    }
}
