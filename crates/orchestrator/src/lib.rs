//! Job orchestrator: drives a document job through the remediation graph.
//!
//! One job runs the splitter, fans out a task per chunk, holds a barrier
//! until every chunk task settles, then merges, finalizes, and post-audits.
//! The pre-audit branch runs in parallel with the chunk work and only ever
//! contributes warnings. A shared registry tracks every job's live state
//! and a per-job cancellation flag is checked at each stage boundary.

use std::collections::HashMap;
use std::sync::Arc;

use remediate_audit::{post_audit, pre_audit, Audit};
use remediate_common::{
    ChunkRef, FinalizeOutput, JobDescriptor, PipelineConfig, PipelineError, Result, TriggerEvent,
};
use remediate_finalizer::finalize;
use remediate_merger::merge_chunks;
use remediate_path_codec::derive_key;
use remediate_splitter::{split_document, Partitioner};
use remediate_stages::{run_stage, StageKind, StageTransforms};
use remediate_storage::ObjectStorage;
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

/// States a job moves through.
///
/// `ChunkFanOut` covers spawning the per-chunk tasks; `ChunkBarrier` is the
/// wait for all of them to settle. The pre-audit branch is not a state of
/// its own because it runs concurrently with the chunk states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Submitted,
    ChunkFanOut,
    ChunkBarrier,
    Merge,
    Finalize,
    PostAudit,
    Completed,
    Failed,
}

impl JobState {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::ChunkFanOut => "chunk-fan-out",
            Self::ChunkBarrier => "chunk-barrier",
            Self::Merge => "merge",
            Self::Finalize => "finalize",
            Self::PostAudit => "post-audit",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Terminal states never transition again
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Live view of one job in the registry
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job_id: String,
    pub source_key: String,
    pub state: JobState,
    pub chunks_total: usize,
    pub chunks_settled: usize,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub result: Option<FinalizeOutput>,
}

impl JobStatus {
    fn new(job: &JobDescriptor) -> Self {
        Self {
            job_id: job.job_id.clone(),
            source_key: job.source_key.clone(),
            state: JobState::Submitted,
            chunks_total: job.chunks.len(),
            chunks_settled: 0,
            warnings: Vec::new(),
            error: None,
            result: None,
        }
    }
}

/// Final report returned to the caller when a job settles
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub state: JobState,
    pub result: Option<FinalizeOutput>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

/// Per-state retry budget. Retries re-run the failed unit of work from its
/// own input, never from the beginning of the job.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_state_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_state_retries: 0,
        }
    }
}

/// Drives jobs through the remediation graph over a shared storage backend.
pub struct Orchestrator {
    storage: Arc<dyn ObjectStorage>,
    config: PipelineConfig,
    transforms: StageTransforms,
    auditor: Arc<dyn Audit>,
    policy: RetryPolicy,
    jobs: Arc<RwLock<HashMap<String, JobStatus>>>,
    cancels: Arc<RwLock<HashMap<String, watch::Sender<bool>>>>,
}

impl Orchestrator {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        config: PipelineConfig,
        transforms: StageTransforms,
        auditor: Arc<dyn Audit>,
    ) -> Self {
        Self {
            storage,
            config,
            transforms,
            auditor,
            policy: RetryPolicy::default(),
            jobs: Arc::new(RwLock::new(HashMap::new())),
            cancels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Split the triggering document and run the resulting job to a
    /// terminal state. Splitter errors abort before a job exists.
    pub async fn submit_event(
        &self,
        event: &TriggerEvent,
        partitioner: &dyn Partitioner,
    ) -> Result<JobReport> {
        let job = split_document(self.storage.as_ref(), &self.config, partitioner, event).await?;
        Ok(self.run_job(job).await)
    }

    /// Run an already-split job to a terminal state
    pub async fn run_job(&self, job: JobDescriptor) -> JobReport {
        let job_id = job.job_id.clone();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancels.write().await.insert(job_id.clone(), cancel_tx);
        self.jobs
            .write()
            .await
            .insert(job_id.clone(), JobStatus::new(&job));

        info!(
            "job {} started for '{}' ({} chunks)",
            job_id,
            job.source_key,
            job.chunks.len()
        );
        let report = self.drive(job, cancel_rx).await;

        match report.state {
            JobState::Completed => info!("job {} completed", report.job_id),
            _ => error!(
                "job {} failed: {}",
                report.job_id,
                report.error.as_deref().unwrap_or("unknown")
            ),
        }

        {
            let mut jobs = self.jobs.write().await;
            if let Some(status) = jobs.get_mut(&report.job_id) {
                status.state = report.state;
                status.warnings = report.warnings.clone();
                status.error = report.error.clone();
                status.result = report.result.clone();
            }
        }
        self.cancels.write().await.remove(&report.job_id);
        report
    }

    /// Request cancellation of a running job. Returns false when the job is
    /// unknown or already settled.
    pub async fn cancel(&self, job_id: &str) -> bool {
        match self.cancels.read().await.get(job_id) {
            Some(tx) => tx.send(true).is_ok(),
            None => false,
        }
    }

    pub async fn job_status(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs.read().await.get(job_id).cloned()
    }

    async fn set_state(&self, job_id: &str, state: JobState) {
        debug!("job {} -> {}", job_id, state.name());
        if let Some(status) = self.jobs.write().await.get_mut(job_id) {
            status.state = state;
        }
    }

    async fn bump_settled(&self, job_id: &str) {
        if let Some(status) = self.jobs.write().await.get_mut(job_id) {
            status.chunks_settled += 1;
        }
    }

    async fn drive(&self, job: JobDescriptor, cancel: watch::Receiver<bool>) -> JobReport {
        let mut warnings = Vec::new();

        // Pre-audit branch, concurrent with the chunk work. Its outcome is
        // collected late and can only add warnings.
        let pre_handle = {
            let storage = self.storage.clone();
            let config = self.config.clone();
            let auditor = self.auditor.clone();
            let job = job.clone();
            let mut cancel = cancel.clone();
            tokio::spawn(async move {
                if *cancel.borrow() {
                    return Err(PipelineError::AuditFailed("job cancelled".to_string()));
                }
                tokio::select! {
                    outcome = pre_audit(storage.as_ref(), &config, &job, auditor.as_ref()) => outcome,
                    _ = cancel.changed() => {
                        Err(PipelineError::AuditFailed("job cancelled".to_string()))
                    }
                }
            })
        };
        let outcome = self.drive_remediation(&job, &cancel, &mut warnings).await;

        match pre_handle.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warnings.push(format!("pre-audit: {e}")),
            Err(e) => warnings.push(format!("pre-audit task panicked: {e}")),
        }

        self.finish(&job.job_id, warnings, outcome)
    }

    /// The remediation branch of the job graph: fan-out, barrier, merge,
    /// finalize, post-audit. Returns the first fatal error encountered.
    async fn drive_remediation(
        &self,
        job: &JobDescriptor,
        cancel: &watch::Receiver<bool>,
        warnings: &mut Vec<String>,
    ) -> Result<FinalizeOutput> {
        self.set_state(&job.job_id, JobState::ChunkFanOut).await;
        let mut handles = Vec::with_capacity(job.chunks.len());
        for chunk in &job.chunks {
            let storage = self.storage.clone();
            let config = self.config.clone();
            let transforms = self.transforms.clone();
            let chunk = chunk.clone();
            let cancel = cancel.clone();
            let retries = self.policy.max_state_retries;
            handles.push(tokio::spawn(async move {
                run_chunk_pipeline(storage, config, transforms, chunk, cancel, retries).await
            }));
        }

        // Barrier: every chunk task settles before anything downstream runs,
        // even when one of them has already failed.
        self.set_state(&job.job_id, JobState::ChunkBarrier).await;
        let mut finished: Vec<ChunkRef> = Vec::with_capacity(handles.len());
        let mut first_error: Option<PipelineError> = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(chunk)) => finished.push(chunk),
                Ok(Err(e)) => {
                    warn!("job {}: chunk task failed: {e}", job.job_id);
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    warn!("job {}: chunk task panicked: {e}", job.job_id);
                    first_error.get_or_insert(PipelineError::Other(format!(
                        "chunk task panicked: {e}"
                    )));
                }
            }
            self.bump_settled(&job.job_id).await;
        }
        if *cancel.borrow() {
            first_error = Some(PipelineError::Cancelled);
        }
        if let Some(error) = first_error {
            if matches!(error, PipelineError::Cancelled) {
                self.cleanup_temp(job).await;
            }
            return Err(error);
        }

        self.set_state(&job.job_id, JobState::Merge).await;
        let mut attempt = 0;
        let summary = loop {
            if *cancel.borrow() {
                self.cleanup_temp(job).await;
                return Err(PipelineError::Cancelled);
            }
            match merge_chunks(
                self.storage.as_ref(),
                &self.config,
                &job.token,
                &job.basename,
                &finished,
            )
            .await
            {
                Ok(summary) => break summary,
                Err(e) if attempt < self.policy.max_state_retries => {
                    attempt += 1;
                    warn!("job {}: merge attempt {attempt} failed: {e}", job.job_id);
                }
                Err(e) => return Err(e),
            }
        };

        self.set_state(&job.job_id, JobState::Finalize).await;
        let mut attempt = 0;
        let output = loop {
            if *cancel.borrow() {
                self.cleanup_temp(job).await;
                return Err(PipelineError::Cancelled);
            }
            match finalize(self.storage.as_ref(), &self.config, &summary, Some(&job.token)).await {
                Ok(output) => break output,
                Err(e) if attempt < self.policy.max_state_retries => {
                    attempt += 1;
                    warn!("job {}: finalize attempt {attempt} failed: {e}", job.job_id);
                }
                Err(e) => return Err(e),
            }
        };

        self.set_state(&job.job_id, JobState::PostAudit).await;
        if *cancel.borrow() {
            // the result already exists, so cancellation here only skips the
            // post-audit and keeps the finalized document
            warnings.push("post-audit skipped: job cancelled".to_string());
        } else if let Err(e) =
            post_audit(self.storage.as_ref(), &self.config, &output, self.auditor.as_ref()).await
        {
            warnings.push(format!("post-audit: {e}"));
        }

        Ok(output)
    }

    fn finish(
        &self,
        job_id: &str,
        warnings: Vec<String>,
        outcome: Result<FinalizeOutput>,
    ) -> JobReport {
        let (state, result, error) = match outcome {
            Ok(output) => (JobState::Completed, Some(output), None),
            Err(e) => (JobState::Failed, None, Some(e.to_string())),
        };
        JobReport {
            job_id: job_id.to_string(),
            state,
            result,
            warnings,
            error,
            finished_at: chrono::Utc::now(),
        }
    }

    /// Best-effort removal of the job's temp-area artifacts after a
    /// cancellation. Failures are logged and ignored.
    async fn cleanup_temp(&self, job: &JobDescriptor) {
        let prefix = derive_key(&self.config.temp_root, &job.token, &[&job.basename]);
        let prefix = format!("{prefix}/");
        match self.storage.list_files(&prefix).await {
            Ok(keys) => {
                for key in keys {
                    if let Err(e) = self.storage.delete_file(&key).await {
                        warn!("job {}: cleanup of '{}' failed: {e}", job.job_id, key);
                    }
                }
            }
            Err(e) => warn!("job {}: cleanup listing failed: {e}", job.job_id),
        }
    }
}

async fn run_chunk_pipeline(
    storage: Arc<dyn ObjectStorage>,
    config: PipelineConfig,
    transforms: StageTransforms,
    chunk: ChunkRef,
    cancel: watch::Receiver<bool>,
    retries: u32,
) -> Result<ChunkRef> {
    let mut attempt = 0;
    loop {
        match run_chunk_once(storage.as_ref(), &config, &transforms, &chunk, &cancel).await {
            Ok(done) => return Ok(done),
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!("chunk {} attempt {attempt} failed: {e}", chunk.index);
            }
            Err(e) => return Err(e),
        }
    }
}

/// One pass of the stage sequence with a cancellation check before each
/// stage. A retry restarts from the original chunk key, which is safe
/// because stage outputs are keyed deterministically and overwritten.
async fn run_chunk_once(
    storage: &dyn ObjectStorage,
    config: &PipelineConfig,
    transforms: &StageTransforms,
    chunk: &ChunkRef,
    cancel: &watch::Receiver<bool>,
) -> Result<ChunkRef> {
    let mut current = chunk.clone();
    for stage in StageKind::SEQUENCE {
        if *cancel.borrow() {
            return Err(PipelineError::Cancelled);
        }
        current = run_stage(storage, config, &current, stage, transforms.for_stage(stage)).await?;
    }
    Ok(current)
}
