//! Blob storage for the remediation pipeline.
//!
//! The pipeline treats its store as a flat key/value space with strong
//! read-after-write consistency for keys it created itself. Key derivation
//! is the concurrency control: each derived key is written by exactly one
//! logical stage invocation, so no locking is needed on top of the store.
//!
//! Two backends are provided: S3/MinIO for deployment and an in-memory map
//! for local runs and tests.

use thiserror::Error;

pub mod memory;
pub mod object_storage;

pub use memory::MemoryObjectStorage;
pub use object_storage::{ObjectStorage, S3Config, S3ObjectStorage};

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("S3 error: {0}")]
    S3Error(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("other error: {0}")]
    Other(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
