use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TriggerError;

/// Starts one run of a remote job per call.
///
/// Implementations make exactly one attempt; retrying is the caller's
/// decision.
#[async_trait]
pub trait JobTrigger: Send + Sync + 'static {
    async fn trigger_job(&self, job_reference: &str, payload: Bytes) -> Result<(), TriggerError>;
}
