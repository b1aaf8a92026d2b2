//! Common types for the document remediation pipeline: the error taxonomy,
//! the job/chunk data model threaded between components, and the pipeline
//! configuration.

use remediate_path_codec::{CodecError, FolderToken};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline errors.
///
/// All variants except `AuditFailed` are fatal to the job that raised them:
/// the orchestrator routes the job to its `Failed` state with the first
/// fatal error attached. `AuditFailed` is recorded as a warning on an
/// otherwise-successful job.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("malformed key: {0}")]
    MalformedKey(String),

    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("transform failed on chunk {chunk_index}: {cause}")]
    TransformFailed { chunk_index: u32, cause: String },

    #[error("incomplete chunk set: {0}")]
    IncompleteChunkSet(String),

    #[error("audit failed: {0}")]
    AuditFailed(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("job cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl From<CodecError> for PipelineError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::MalformedKey(msg) => PipelineError::MalformedKey(msg),
        }
    }
}

impl PipelineError {
    /// Whether this error fails the job it occurred in
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::AuditFailed(_))
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// New-document event that triggers the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub source_key: String,
}

/// Reference to one chunk of a partitioned document.
///
/// The token is denormalized onto every chunk because downstream stages may
/// only receive the chunk-level record. Stages never mutate a reference in
/// place; each stage produces a new one with the updated key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    /// 1-based, contiguous within a job
    pub index: u32,
    pub bucket: String,
    pub key: String,
    pub token: FolderToken,
}

impl ChunkRef {
    /// The same chunk, advanced to a new storage key by a processing stage
    #[must_use]
    pub fn advanced(&self, key: String) -> Self {
        Self {
            key,
            ..self.clone()
        }
    }
}

/// Immutable job snapshot created by the splitter and owned by the
/// orchestrator for the job's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: String,
    pub source_bucket: String,
    pub source_key: String,
    pub token: FolderToken,
    pub basename: String,
    /// File extension including the dot, e.g. `.pdf`
    pub extension: String,
    pub chunks: Vec<ChunkRef>,
}

/// User-visible output of the finalizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeOutput {
    pub bucket: String,
    pub save_path: String,
}

/// Namespace roots and document shape for one pipeline deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Bucket all derived keys live in
    pub bucket: String,

    /// Root prefix for incoming documents (e.g. "pdf/")
    pub document_root: String,

    /// Root prefix for intermediate artifacts (e.g. "temp/")
    pub temp_root: String,

    /// Root prefix for finalized documents (e.g. "result/")
    pub result_root: String,

    /// Expected document suffix including the dot (e.g. ".pdf")
    pub suffix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bucket: "pdf-remediation".to_string(),
            document_root: "pdf/".to_string(),
            temp_root: "temp/".to_string(),
            result_root: "result/".to_string(),
            suffix: ".pdf".to_string(),
        }
    }
}
