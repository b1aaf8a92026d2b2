//! Chunk processing stages.
//!
//! Each chunk passes through a fixed, ordered sequence of transform stages
//! (accessibility tagging, then image-description enrichment). A stage reads
//! the previous stage's output key, invokes its opaque transform capability,
//! and writes its own output key in the same namespace. Stages never retry
//! internally and write nothing on failure.

use std::sync::Arc;

use remediate_common::{ChunkRef, PipelineConfig, PipelineError, Result};
use remediate_path_codec::{derive_key, recover_token, split_item_key, FolderToken};
use remediate_storage::ObjectStorage;
use tracing::debug;

/// Opaque content transform capability.
///
/// The actual transformation (auto-tagging, generating image descriptions)
/// is delegated to an external service; the pipeline only sees bytes in,
/// bytes out, and a success/failure outcome.
#[async_trait::async_trait]
pub trait Transform: Send + Sync {
    async fn transform(&self, content: &[u8]) -> std::result::Result<Vec<u8>, String>;
}

/// Pass-through transform for local runs without the external capabilities
pub struct IdentityTransform;

#[async_trait::async_trait]
impl Transform for IdentityTransform {
    async fn transform(&self, content: &[u8]) -> std::result::Result<Vec<u8>, String> {
        Ok(content.to_vec())
    }
}

/// One step in the fixed per-chunk stage sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Auto-tag the chunk for accessibility
    Tagging,
    /// Generate descriptive text for embedded images
    Enrichment,
}

impl StageKind {
    /// The fixed stage order every chunk goes through
    pub const SEQUENCE: [StageKind; 2] = [StageKind::Tagging, StageKind::Enrichment];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tagging => "tagging",
            Self::Enrichment => "enrichment",
        }
    }

    /// Prefix of this stage's output file name
    #[must_use]
    pub fn output_prefix(&self) -> &'static str {
        match self {
            Self::Tagging => "tagged",
            Self::Enrichment => "enriched",
        }
    }
}

/// The transform capability bound to each stage of the sequence
#[derive(Clone)]
pub struct StageTransforms {
    pub tagging: Arc<dyn Transform>,
    pub enrichment: Arc<dyn Transform>,
}

impl StageTransforms {
    /// Local default: pass-through transforms for both stages
    #[must_use]
    pub fn identity() -> Self {
        Self {
            tagging: Arc::new(IdentityTransform),
            enrichment: Arc::new(IdentityTransform),
        }
    }

    #[must_use]
    pub fn for_stage(&self, stage: StageKind) -> &dyn Transform {
        match stage {
            StageKind::Tagging => self.tagging.as_ref(),
            StageKind::Enrichment => self.enrichment.as_ref(),
        }
    }
}

/// Read-only token configuration for stages running in environments that
/// cannot receive an explicit token field.
///
/// The value comes from a single optional environment string, empty by
/// default; stages must treat it identically to an explicitly-empty token.
/// Each stage invocation gets its own immutable copy; this is never a
/// process-wide singleton.
#[derive(Debug, Clone, Default)]
pub struct StageTokenConfig {
    token: FolderToken,
}

impl StageTokenConfig {
    pub const ENV_VAR: &'static str = "REMEDIATE_FOLDER_PREFIX";

    #[must_use]
    pub fn explicit(token: FolderToken) -> Self {
        Self { token }
    }

    /// Read the token from the environment; unset and empty are equivalent
    #[must_use]
    pub fn from_env() -> Self {
        let prefix = std::env::var(Self::ENV_VAR).unwrap_or_default();
        Self {
            token: FolderToken::from(prefix),
        }
    }

    #[must_use]
    pub fn token(&self) -> &FolderToken {
        &self.token
    }
}

/// Temp-area item keys always have two segments after root+token: the
/// basename directory and the file name.
pub const ITEM_KEY_SUFFIX_SEGMENTS: usize = 2;

/// Rebuild a chunk reference from a bare key using an injected token
/// configuration (the constrained environment-variable passing case).
pub fn chunk_ref_from_key(
    config: &PipelineConfig,
    bucket: &str,
    index: u32,
    key: &str,
    token_config: &StageTokenConfig,
) -> Result<ChunkRef> {
    // validates that the key actually carries the configured token
    split_item_key(key, &config.temp_root, token_config.token())?;
    Ok(ChunkRef {
        index,
        bucket: bucket.to_string(),
        key: key.to_string(),
        token: token_config.token().clone(),
    })
}

/// Rebuild a chunk reference from a bare key by positional token recovery.
///
/// Position-based and therefore fragile; valid only for temp-area item keys
/// where the suffix segment count is fixed at two.
pub fn chunk_ref_from_key_positional(
    config: &PipelineConfig,
    bucket: &str,
    index: u32,
    key: &str,
) -> Result<ChunkRef> {
    let token = recover_token(key, &config.temp_root, ITEM_KEY_SUFFIX_SEGMENTS)?;
    Ok(ChunkRef {
        index,
        bucket: bucket.to_string(),
        key: key.to_string(),
        token,
    })
}

/// Run one stage over one chunk: read the current key, transform, write the
/// stage output key, return the advanced chunk reference.
///
/// Exactly one store write on success; none on failure.
pub async fn run_stage(
    storage: &dyn ObjectStorage,
    config: &PipelineConfig,
    chunk: &ChunkRef,
    stage: StageKind,
    transform: &dyn Transform,
) -> Result<ChunkRef> {
    let (basename_dir, item_name) = split_item_key(&chunk.key, &config.temp_root, &chunk.token)?;
    debug!(
        "stage {} on chunk {} ('{}/{}')",
        stage.name(),
        chunk.index,
        basename_dir,
        item_name
    );

    let content = storage
        .retrieve_file(&chunk.key)
        .await
        .map_err(|e| PipelineError::Storage(e.to_string()))?;

    let output = transform
        .transform(&content)
        .await
        .map_err(|cause| PipelineError::TransformFailed {
            chunk_index: chunk.index,
            cause,
        })?;

    // Output name is anchored to the original chunk file name, not the
    // previous stage's output, so the name never accretes prefixes.
    let chunk_file_name = format!("{basename_dir}_chunk_{}{}", chunk.index, config.suffix);
    let output_name = format!("{}_{chunk_file_name}", stage.output_prefix());
    let output_key = derive_key(&config.temp_root, &chunk.token, &[&basename_dir, &output_name]);

    storage
        .store_file(&output_key, &output)
        .await
        .map_err(|e| PipelineError::Storage(e.to_string()))?;

    Ok(chunk.advanced(output_key))
}
