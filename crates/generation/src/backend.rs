use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::GenerationRequest;

/// Remote job identifier, assigned by the service at submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteJobId(pub String);

impl std::fmt::Display for RemoteJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote job state as reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteJobState {
    Queued,
    Processing,
    Done { result_url: String },
    Error { message: String },
}

impl RemoteJobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// Backend call failure, split by retryability. The client retries
/// `Transient` with bounded backoff and fails the request immediately on
/// `Permanent`.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("transient remote error: {0}")]
    Transient(String),

    #[error("permanent remote error: {0}")]
    Permanent(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Remote generation service seam. The exact wire schema depends on the
/// configured service; the client only relies on this contract.
#[async_trait::async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Backend name for logs and the status command.
    fn name(&self) -> &str;

    /// Check whether the service is reachable and configured.
    async fn is_available(&self) -> bool;

    /// Submit a generation request, returning the accepted job id.
    async fn submit(&self, request: &GenerationRequest) -> BackendResult<RemoteJobId>;

    /// Fetch the current state of a submitted job.
    async fn poll(&self, job: &RemoteJobId) -> BackendResult<RemoteJobState>;

    /// Best-effort cancellation; the job may still finish concurrently.
    async fn cancel(&self, job: &RemoteJobId) -> BackendResult<()>;
}
