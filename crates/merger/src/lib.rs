//! Fan-in merger.
//!
//! Invoked by the orchestrator only after every chunk of a job has finished
//! the full stage sequence. Merges chunk contents in index order and writes
//! the merged document under the job's namespace. The merge is a pure
//! function of the sorted contents, never of arrival order.

use remediate_common::{ChunkRef, PipelineConfig, PipelineError, Result};
use remediate_path_codec::{derive_key, FolderToken};
use remediate_storage::ObjectStorage;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Token recovery from a merged key counts two trailing segments: the
/// basename directory and the merged file name.
pub const MERGED_KEY_SUFFIX_SEGMENTS: usize = 2;

/// Outcome of a merge, also the finalizer's input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    pub bucket: String,
    pub merged_key: String,
    /// Document file name with extension, e.g. `myfile.pdf`
    pub merged_file_name: String,
}

const BUCKET_PREFIX: &str = "Bucket: ";
const KEY_PREFIX: &str = "Merged File Key: ";
const NAME_PREFIX: &str = "Merged File Name: ";

impl MergeSummary {
    /// Render the stable multi-line return contract consumed downstream by
    /// line-prefix parsing. This is an external boundary; the line prefixes
    /// must not change.
    #[must_use]
    pub fn to_return_string(&self) -> String {
        format!(
            "{BUCKET_PREFIX}{}\n{KEY_PREFIX}{}\n{NAME_PREFIX}{}",
            self.bucket, self.merged_key, self.merged_file_name
        )
    }

    /// Parse the return contract back into a summary
    pub fn parse(text: &str) -> Result<Self> {
        let field = |prefix: &str| -> Result<String> {
            text.lines()
                .find_map(|line| line.strip_prefix(prefix))
                .map(str::to_string)
                .ok_or_else(|| {
                    PipelineError::Other(format!("merge summary is missing a '{prefix}' line"))
                })
        };
        Ok(Self {
            bucket: field(BUCKET_PREFIX)?,
            merged_key: field(KEY_PREFIX)?,
            merged_file_name: field(NAME_PREFIX)?,
        })
    }
}

/// Verify the chunk set is exactly `1..=N` once sorted
fn verify_contiguous(sorted: &[ChunkRef]) -> Result<()> {
    for (i, chunk) in sorted.iter().enumerate() {
        let expected = u32::try_from(i + 1)
            .map_err(|_| PipelineError::Other("chunk index overflow".to_string()))?;
        if chunk.index != expected {
            return Err(PipelineError::IncompleteChunkSet(format!(
                "expected chunk index {expected} at position {i}, found {} ({} chunks total)",
                chunk.index,
                sorted.len()
            )));
        }
    }
    Ok(())
}

/// Merge a complete chunk set into one document.
///
/// Chunks may arrive in any order; they are sorted by index and must form a
/// contiguous `1..=N` set with no duplicates, otherwise the job fails with
/// `IncompleteChunkSet` and no partial merge is produced.
pub async fn merge_chunks(
    storage: &dyn ObjectStorage,
    config: &PipelineConfig,
    token: &FolderToken,
    basename: &str,
    chunks: &[ChunkRef],
) -> Result<MergeSummary> {
    if chunks.is_empty() {
        return Err(PipelineError::IncompleteChunkSet(
            "no chunks to merge".to_string(),
        ));
    }

    let mut sorted = chunks.to_vec();
    sorted.sort_by_key(|c| c.index);
    verify_contiguous(&sorted)?;

    let mut merged = Vec::new();
    for chunk in &sorted {
        let content = storage
            .retrieve_file(&chunk.key)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;
        merged.extend_from_slice(&content);
    }

    let merged_file_name = format!("{basename}{}", config.suffix);
    let merged_key = derive_key(
        &config.temp_root,
        token,
        &[basename, &format!("merged_{merged_file_name}")],
    );

    storage
        .store_file(&merged_key, &merged)
        .await
        .map_err(|e| PipelineError::Storage(e.to_string()))?;

    info!(
        "merged {} chunks into '{}' ({} bytes)",
        sorted.len(),
        merged_key,
        merged.len()
    );

    Ok(MergeSummary {
        bucket: config.bucket.clone(),
        merged_key,
        merged_file_name,
    })
}
