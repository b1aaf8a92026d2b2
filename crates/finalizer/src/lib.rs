//! Finalizer: relocates the merged document into the result namespace under
//! its user-visible `COMPLIANT_` name.
//!
//! The result key carries the folder token as its own path segments, so the
//! post-audit branch can recover the token from the key alone. When the
//! token is empty the result key is exactly
//! `{result_root}COMPLIANT_{basename}{ext}` with no extra separator.

use remediate_common::{FinalizeOutput, PipelineConfig, PipelineError, Result};
use remediate_merger::{MergeSummary, MERGED_KEY_SUFFIX_SEGMENTS};
use remediate_path_codec::{derive_key, recover_token, FolderToken};
use remediate_storage::ObjectStorage;
use tracing::info;

/// Marker prefixed onto the final document name in the result namespace
pub const COMPLIANT_MARKER: &str = "COMPLIANT_";

/// Copy the merged document to its result-namespace key.
///
/// The token is taken explicitly when the caller has it; otherwise it is
/// recovered positionally from the merged key (two trailing segments:
/// basename directory and merged file name).
pub async fn finalize(
    storage: &dyn ObjectStorage,
    config: &PipelineConfig,
    summary: &MergeSummary,
    token: Option<&FolderToken>,
) -> Result<FinalizeOutput> {
    let token = match token {
        Some(token) => token.clone(),
        None => recover_token(
            &summary.merged_key,
            &config.temp_root,
            MERGED_KEY_SUFFIX_SEGMENTS,
        )?,
    };

    let result_name = format!("{COMPLIANT_MARKER}{}", summary.merged_file_name);
    let save_path = derive_key(&config.result_root, &token, &[&result_name]);

    let document = storage
        .retrieve_file(&summary.merged_key)
        .await
        .map_err(|e| PipelineError::Storage(e.to_string()))?;
    storage
        .store_file(&save_path, &document)
        .await
        .map_err(|e| PipelineError::Storage(e.to_string()))?;

    info!("finalized '{}' -> '{}'", summary.merged_key, save_path);

    Ok(FinalizeOutput {
        bucket: summary.bucket.clone(),
        save_path,
    })
}

/// Finalize from the merger's multi-line return contract
pub async fn finalize_from_return_string(
    storage: &dyn ObjectStorage,
    config: &PipelineConfig,
    return_string: &str,
    token: Option<&FolderToken>,
) -> Result<FinalizeOutput> {
    let summary = MergeSummary::parse(return_string)?;
    finalize(storage, config, &summary, token).await
}
