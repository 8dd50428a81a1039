use std::fmt;

use kube::Error as KubeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes client not initialized")]
    Unavailable,

    #[error("not found: {0}")]
    NotFound(String),

    /// Resource already exists, or the `resourceVersion` carried on a
    /// replace is stale.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rejected by the cluster: {0}")]
    Rejected(String),

    #[error("Kubernetes API error: {0}")]
    Upstream(#[source] KubeError),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("{0}")]
    Aggregate(StepFailures),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("status store error: {0}")]
    Status(String),
}

impl From<KubeError> for Error {
    fn from(e: KubeError) -> Self {
        match &e {
            KubeError::Api(resp) if resp.code == 404 => Error::NotFound(resp.message.clone()),
            KubeError::Api(resp) if resp.code == 409 => Error::Conflict(resp.message.clone()),
            KubeError::Api(resp) if matches!(resp.code, 400 | 403 | 422) => {
                Error::Rejected(resp.message.clone())
            }
            _ => Error::Upstream(e),
        }
    }
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

/// One failed step of a best-effort multi-step operation.
#[derive(Debug)]
pub struct StepFailure {
    pub step: String,
    pub error: Error,
}

/// Collects failures from independent steps so every step gets attempted.
#[derive(Debug, Default)]
pub struct StepFailures(Vec<StepFailure>);

impl StepFailures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the failure of `step`, if any, and hands back the success value.
    pub fn record<T>(&mut self, step: impl Into<String>, result: Result<T, Error>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(error) => {
                self.0.push(StepFailure {
                    step: step.into(),
                    error,
                });
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn steps(&self) -> Vec<&str> {
        self.0.iter().map(|f| f.step.as_str()).collect()
    }

    pub fn into_result(self) -> Result<(), Error> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(Error::Aggregate(self))
        }
    }
}

impl fmt::Display for StepFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} step(s) failed: ", self.0.len())?;
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", failure.step, failure.error)?;
        }
        Ok(())
    }
}
