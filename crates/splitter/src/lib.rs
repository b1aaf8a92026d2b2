//! Chunk splitter: entry point of the pipeline.
//!
//! Validates the trigger event, derives the folder token from the source
//! key, partitions the document into an ordered chunk sequence, writes every
//! chunk under the namespaced temp area, and builds the job descriptor the
//! orchestrator owns from then on. If any chunk write fails the whole
//! invocation fails and no job is produced.

use remediate_common::{ChunkRef, JobDescriptor, PipelineConfig, PipelineError, Result, TriggerEvent};
use remediate_path_codec::{derive_key, extract_token};
use remediate_storage::ObjectStorage;
use tracing::{debug, info};

/// Opaque document partitioner.
///
/// The real partitioning algorithm (page-count based splitting of the
/// document format) is an external capability; the pipeline only relies on
/// the partition being deterministic and ordered.
pub trait Partitioner: Send + Sync {
    fn partition(&self, document: &[u8]) -> Vec<Vec<u8>>;
}

/// Default partitioner: fixed-size byte ranges, standing in for the external
/// page-based splitter. Always yields at least one chunk.
pub struct FixedSizePartitioner {
    pub chunk_size: usize,
}

impl FixedSizePartitioner {
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Default for FixedSizePartitioner {
    fn default() -> Self {
        // roughly one PDF page of content per chunk in local runs
        Self::new(64 * 1024)
    }
}

impl Partitioner for FixedSizePartitioner {
    fn partition(&self, document: &[u8]) -> Vec<Vec<u8>> {
        if document.is_empty() {
            return vec![Vec::new()];
        }
        document
            .chunks(self.chunk_size)
            .map(<[u8]>::to_vec)
            .collect()
    }
}

/// Split a source document into chunks and build the job descriptor.
///
/// Guarantees: chunk indices are contiguous starting at 1; the chunk count
/// equals the partition count exactly; on any failure no job is submitted.
pub async fn split_document(
    storage: &dyn ObjectStorage,
    config: &PipelineConfig,
    partitioner: &dyn Partitioner,
    event: &TriggerEvent,
) -> Result<JobDescriptor> {
    let source_key = &event.source_key;

    if !source_key.starts_with(&config.document_root) {
        return Err(PipelineError::UnsupportedInput(format!(
            "source key '{source_key}' is outside the document root '{}'",
            config.document_root
        )));
    }
    if !source_key.ends_with(&config.suffix) {
        return Err(PipelineError::UnsupportedInput(format!(
            "source key '{source_key}' does not end with '{}'",
            config.suffix
        )));
    }

    let (token, basename) = extract_token(source_key, &config.document_root)?;
    debug!(
        "splitting '{}' (token depth {}, basename '{}')",
        source_key,
        token.depth(),
        basename
    );

    let document = storage
        .retrieve_file(source_key)
        .await
        .map_err(|e| PipelineError::Storage(e.to_string()))?;

    let pieces = partitioner.partition(&document);
    let mut chunks = Vec::with_capacity(pieces.len());
    for (i, piece) in pieces.iter().enumerate() {
        let index = u32::try_from(i + 1)
            .map_err(|_| PipelineError::Other("chunk index overflow".to_string()))?;
        let file_name = format!("{basename}_chunk_{index}{}", config.suffix);
        let chunk_key = derive_key(&config.temp_root, &token, &[&basename, &file_name]);

        storage
            .store_file(&chunk_key, piece)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;

        chunks.push(ChunkRef {
            index,
            bucket: config.bucket.clone(),
            key: chunk_key,
            token: token.clone(),
        });
    }

    let job_id = format!("job-{}", uuid::Uuid::new_v4());
    info!(
        "job {} created: {} chunks for '{}'",
        job_id,
        chunks.len(),
        source_key
    );

    Ok(JobDescriptor {
        job_id,
        source_bucket: config.bucket.clone(),
        source_key: source_key.clone(),
        token,
        basename,
        extension: config.suffix.clone(),
        chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use remediate_storage::MemoryObjectStorage;

    fn event(key: &str) -> TriggerEvent {
        TriggerEvent {
            source_key: key.to_string(),
        }
    }

    async fn seeded(key: &str, data: &[u8]) -> MemoryObjectStorage {
        let storage = MemoryObjectStorage::new();
        storage.store_file(key, data).await.unwrap();
        storage
    }

    #[tokio::test]
    async fn test_flat_split_writes_contiguous_chunks() {
        let storage = seeded("pdf/myfile.pdf", b"AAABBBCC").await;
        let config = PipelineConfig::default();
        let partitioner = FixedSizePartitioner::new(3);

        let job = split_document(&storage, &config, &partitioner, &event("pdf/myfile.pdf"))
            .await
            .unwrap();

        assert!(job.token.is_empty());
        assert_eq!(job.basename, "myfile");
        let indices: Vec<u32> = job.chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(job.chunks[0].key, "temp/myfile/myfile_chunk_1.pdf");
        assert_eq!(job.chunks[2].key, "temp/myfile/myfile_chunk_3.pdf");
        assert_eq!(
            storage.retrieve_file("temp/myfile/myfile_chunk_3.pdf").await.unwrap(),
            b"CC"
        );
    }

    #[tokio::test]
    async fn test_nested_split_keeps_token_on_every_chunk() {
        let storage = seeded("pdf/a/b/myfile.pdf", b"XXYY").await;
        let config = PipelineConfig::default();
        let partitioner = FixedSizePartitioner::new(2);

        let job = split_document(&storage, &config, &partitioner, &event("pdf/a/b/myfile.pdf"))
            .await
            .unwrap();

        assert_eq!(job.token.as_prefix(), "a/b/");
        assert_eq!(job.chunks[0].key, "temp/a/b/myfile/myfile_chunk_1.pdf");
        for chunk in &job.chunks {
            assert_eq!(chunk.token, job.token);
        }
    }

    #[tokio::test]
    async fn test_wrong_root_is_unsupported() {
        let storage = seeded("uploads/myfile.pdf", b"data").await;
        let config = PipelineConfig::default();
        let err = split_document(
            &storage,
            &config,
            &FixedSizePartitioner::default(),
            &event("uploads/myfile.pdf"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedInput(_)));
    }

    #[tokio::test]
    async fn test_wrong_suffix_is_unsupported() {
        let storage = seeded("pdf/myfile.docx", b"data").await;
        let config = PipelineConfig::default();
        let err = split_document(
            &storage,
            &config,
            &FixedSizePartitioner::default(),
            &event("pdf/myfile.docx"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedInput(_)));
    }

    #[tokio::test]
    async fn test_chunk_write_failure_aborts_whole_invocation() {
        let storage = seeded("pdf/myfile.pdf", b"AAABBBCC").await;
        storage.fail_puts_containing("chunk_2").await;
        let config = PipelineConfig::default();

        let err = split_document(
            &storage,
            &config,
            &FixedSizePartitioner::new(3),
            &event("pdf/myfile.pdf"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
    }

    #[tokio::test]
    async fn test_empty_document_yields_one_chunk() {
        let storage = seeded("pdf/empty.pdf", b"").await;
        let config = PipelineConfig::default();
        let job = split_document(
            &storage,
            &config,
            &FixedSizePartitioner::new(4),
            &event("pdf/empty.pdf"),
        )
        .await
        .unwrap();
        assert_eq!(job.chunks.len(), 1);
        assert_eq!(job.chunks[0].index, 1);
    }
}
