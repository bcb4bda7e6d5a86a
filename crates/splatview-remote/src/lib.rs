//! Client for the remote reconstruction service.
//!
//! The service takes a set of images on `POST /process`, answers with a job id, and
//! hands out the resulting point file on `GET /result/{jobId}`.

mod client;
mod config;

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub use client::{JobClient, SubmittedJob};
pub use config::{FetchPolicy, RemoteConfig};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },
    #[error("Result isn't ready yet")]
    NotReady,
    #[error("Result wasn't ready after {}", humantime::format_duration(*.0))]
    PollTimeout(Duration),
    #[error("Cancelled")]
    Cancelled,
    #[error("Invalid server url: {0}")]
    InvalidUrl(String),
    #[error("Unexpected response from server: {0}")]
    InvalidResponse(String),
}

/// Opaque job identifier handed out by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
    Other(String),
}

impl From<&str> for JobStatus {
    fn from(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "queued" | "pending" => Self::Queued,
            "running" | "processing" => Self::Running,
            "done" | "completed" | "finished" => Self::Done,
            "failed" | "error" => Self::Failed,
            _ => Self::Other(status.to_owned()),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => f.write_str("queued"),
            Self::Running => f.write_str("running"),
            Self::Done => f.write_str("done"),
            Self::Failed => f.write_str("failed"),
            Self::Other(status) => f.write_str(status),
        }
    }
}
