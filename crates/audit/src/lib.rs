//! Accessibility audit coordination.
//!
//! Two independent audit passes bracket the remediation: a pre-audit of the
//! original source document and a post-audit of the finalized result. The
//! report generation itself is an opaque capability; this crate only places
//! the reports under the job's namespace. Audit failures never roll back
//! remediation; the orchestrator records them as warnings.

use remediate_common::{FinalizeOutput, JobDescriptor, PipelineConfig, PipelineError, Result};
use remediate_finalizer::COMPLIANT_MARKER;
use remediate_path_codec::{derive_key, recover_token_from_marker};
use remediate_storage::ObjectStorage;
use tracing::info;

/// Directory segment the reports are written under
pub const REPORT_DIR: &str = "accessibility-report";

/// Opaque audit capability: document bytes in, report bytes out.
#[async_trait::async_trait]
pub trait Audit: Send + Sync {
    async fn audit(&self, document: &[u8]) -> std::result::Result<Vec<u8>, String>;
}

/// Local stand-in for the external audit service: emits a small JSON
/// summary of the document.
pub struct BasicAudit;

#[async_trait::async_trait]
impl Audit for BasicAudit {
    async fn audit(&self, document: &[u8]) -> std::result::Result<Vec<u8>, String> {
        let report = serde_json::json!({
            "document_bytes": document.len(),
            "generated_at": chrono::Utc::now().to_rfc3339(),
        });
        serde_json::to_vec_pretty(&report).map_err(|e| e.to_string())
    }
}

fn report_key(config: &PipelineConfig, token: &remediate_path_codec::FolderToken, basename: &str, suffix: &str) -> String {
    derive_key(
        &config.temp_root,
        token,
        &[basename, REPORT_DIR, &format!("{basename}_report_{suffix}.json")],
    )
}

/// Audit the original source document.
///
/// Runs in parallel with the remediation branch, so the token and basename
/// come from the job's top-level fields, never from an intermediate key.
/// The whole branch is non-fatal: every failure surfaces as `AuditFailed`.
pub async fn pre_audit(
    storage: &dyn ObjectStorage,
    config: &PipelineConfig,
    job: &JobDescriptor,
    auditor: &dyn Audit,
) -> Result<String> {
    let document = storage
        .retrieve_file(&job.source_key)
        .await
        .map_err(|e| PipelineError::AuditFailed(format!("reading source document: {e}")))?;

    let report = auditor
        .audit(&document)
        .await
        .map_err(PipelineError::AuditFailed)?;

    let key = report_key(config, &job.token, &job.basename, "before");
    storage
        .store_file(&key, &report)
        .await
        .map_err(|e| PipelineError::AuditFailed(format!("writing report: {e}")))?;

    info!("pre-audit report written to '{}'", key);
    Ok(key)
}

/// Audit the finalized result document.
///
/// Only reachable after the finalizer succeeds. The token is recovered from
/// the result key by marker decomposition: everything between the result
/// root and the `COMPLIANT_` segment is the token.
pub async fn post_audit(
    storage: &dyn ObjectStorage,
    config: &PipelineConfig,
    result: &FinalizeOutput,
    auditor: &dyn Audit,
) -> Result<String> {
    let (token, file_name) =
        recover_token_from_marker(&result.save_path, &config.result_root, COMPLIANT_MARKER)
            .map_err(|e| PipelineError::AuditFailed(e.to_string()))?;
    let basename = file_name
        .rsplit_once('.')
        .map_or(file_name.as_str(), |(stem, _)| stem);

    let document = storage
        .retrieve_file(&result.save_path)
        .await
        .map_err(|e| PipelineError::AuditFailed(format!("reading result document: {e}")))?;

    let report = auditor
        .audit(&document)
        .await
        .map_err(PipelineError::AuditFailed)?;

    let key = report_key(config, &token, basename, "after");
    storage
        .store_file(&key, &report)
        .await
        .map_err(|e| PipelineError::AuditFailed(format!("writing report: {e}")))?;

    info!("post-audit report written to '{}'", key);
    Ok(key)
}
