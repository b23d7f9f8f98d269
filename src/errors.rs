//! Error types shared by the ingestion pipeline
//!
//! Fetch, sync and reconciliation stages return these as explicit `Result`
//! values. None of them escape a single instrument's pipeline or a single job
//! run; the dispatcher and the scheduler record and log them instead.

use crate::database::DatabaseError;
use std::fmt;
use thiserror::Error;

/// Errors produced by one stage of the ingestion pipeline
///
/// # Error Categories
///
/// - **Transient**: `TransientNetwork`, retries already exhausted by the transport
/// - **Provider**: `ProviderLogical`, non-success status or unusable payload
/// - **Persistence**: `Persistence`, the write transaction was rolled back
/// - **Configuration**: `Configuration`, malformed snapshot input
/// - **Internal**: `Internal`, a worker task panicked or was cancelled
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Provider error: {0}")]
    ProviderLogical(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Short label used in structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::TransientNetwork(_) => "transient_network",
            PipelineError::ProviderLogical(_) => "provider_logical",
            PipelineError::Persistence(_) => "persistence",
            PipelineError::Configuration(_) => "configuration",
            PipelineError::Internal(_) => "internal",
        }
    }
}

/// Stage of the per-instrument pipeline: `Idle → Fetching → Syncing → Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Fetching,
    Syncing,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Fetching => write!(f, "fetch"),
            PipelineStage::Syncing => write!(f, "sync"),
        }
    }
}

/// A pipeline error tagged with the stage it was raised in
///
/// `Fetching` failures correspond to the `FetchError` state, `Syncing`
/// failures to `SyncError`.
#[derive(Debug, Error)]
#[error("{stage} failed: {error}")]
pub struct PipelineFailure {
    pub stage: PipelineStage,
    #[source]
    pub error: PipelineError,
}

impl PipelineFailure {
    pub fn fetch(error: PipelineError) -> Self {
        Self {
            stage: PipelineStage::Fetching,
            error,
        }
    }

    pub fn sync(error: PipelineError) -> Self {
        Self {
            stage: PipelineStage::Syncing,
            error,
        }
    }
}
