//! End-to-end runs of the full remediation graph over in-memory storage.

use std::sync::Arc;

use remediate_audit::{Audit, BasicAudit};
use remediate_common::{ChunkRef, JobDescriptor, PipelineConfig, TriggerEvent};
use remediate_orchestrator::{JobState, Orchestrator, RetryPolicy};
use remediate_path_codec::FolderToken;
use remediate_splitter::FixedSizePartitioner;
use remediate_stages::{StageTransforms, Transform};
use remediate_storage::{MemoryObjectStorage, ObjectStorage};
use tokio::sync::Notify;

struct FailOnContent(&'static str);

#[async_trait::async_trait]
impl Transform for FailOnContent {
    async fn transform(&self, content: &[u8]) -> Result<Vec<u8>, String> {
        if content
            .windows(self.0.len())
            .any(|w| w == self.0.as_bytes())
        {
            Err(format!("poisoned content '{}'", self.0))
        } else {
            Ok(content.to_vec())
        }
    }
}

struct FlakyOnce {
    failed: std::sync::atomic::AtomicBool,
}

#[async_trait::async_trait]
impl Transform for FlakyOnce {
    async fn transform(&self, content: &[u8]) -> Result<Vec<u8>, String> {
        if self
            .failed
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::SeqCst,
                std::sync::atomic::Ordering::SeqCst,
            )
            .is_ok()
        {
            Err("transient capability error".to_string())
        } else {
            Ok(content.to_vec())
        }
    }
}

struct Blocking {
    started: Notify,
    release: Notify,
}

#[async_trait::async_trait]
impl Transform for Blocking {
    async fn transform(&self, content: &[u8]) -> Result<Vec<u8>, String> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(content.to_vec())
    }
}

struct BrokenAudit;

#[async_trait::async_trait]
impl Audit for BrokenAudit {
    async fn audit(&self, _document: &[u8]) -> Result<Vec<u8>, String> {
        Err("audit service down".to_string())
    }
}

fn chunk(key: &str, index: u32, prefix: &str) -> ChunkRef {
    ChunkRef {
        index,
        bucket: "b".to_string(),
        key: key.to_string(),
        token: FolderToken::from(prefix),
    }
}

fn job(id: &str, prefix: &str, basename: &str, chunks: Vec<ChunkRef>) -> JobDescriptor {
    JobDescriptor {
        job_id: id.to_string(),
        source_bucket: "b".to_string(),
        source_key: format!("pdf/{prefix}{basename}.pdf"),
        token: FolderToken::from(prefix),
        basename: basename.to_string(),
        extension: ".pdf".to_string(),
        chunks,
    }
}

#[tokio::test]
async fn test_flat_document_end_to_end() {
    let storage = MemoryObjectStorage::new();
    storage
        .store_file("pdf/myfile.pdf", b"page1page2page3")
        .await
        .unwrap();

    let orchestrator = Orchestrator::new(
        Arc::new(storage.clone()),
        PipelineConfig::default(),
        StageTransforms::identity(),
        Arc::new(BasicAudit),
    );

    let event = TriggerEvent {
        source_key: "pdf/myfile.pdf".to_string(),
    };
    let report = orchestrator
        .submit_event(&event, &FixedSizePartitioner::new(5))
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Completed);
    assert!(report.warnings.is_empty());
    assert_eq!(
        report.result.as_ref().map(|r| r.save_path.as_str()),
        Some("result/COMPLIANT_myfile.pdf")
    );

    // identity transforms plus in-order concatenation reproduce the source
    assert_eq!(
        storage
            .retrieve_file("result/COMPLIANT_myfile.pdf")
            .await
            .unwrap(),
        b"page1page2page3"
    );
    // the intermediate chain used the expected keys
    for key in [
        "temp/myfile/myfile_chunk_1.pdf",
        "temp/myfile/tagged_myfile_chunk_1.pdf",
        "temp/myfile/enriched_myfile_chunk_1.pdf",
        "temp/myfile/merged_myfile.pdf",
        "temp/myfile/accessibility-report/myfile_report_before.json",
        "temp/myfile/accessibility-report/myfile_report_after.json",
    ] {
        assert!(storage.file_exists(key).await.unwrap(), "missing {key}");
    }
}

#[tokio::test]
async fn test_nested_document_keeps_folder_namespace() {
    let storage = MemoryObjectStorage::new();
    storage
        .store_file("pdf/a/b/report.pdf", b"0123456789")
        .await
        .unwrap();

    let orchestrator = Orchestrator::new(
        Arc::new(storage.clone()),
        PipelineConfig::default(),
        StageTransforms::identity(),
        Arc::new(BasicAudit),
    );

    let event = TriggerEvent {
        source_key: "pdf/a/b/report.pdf".to_string(),
    };
    let report = orchestrator
        .submit_event(&event, &FixedSizePartitioner::new(4))
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Completed);
    assert_eq!(
        report.result.as_ref().map(|r| r.save_path.as_str()),
        Some("result/a/b/COMPLIANT_report.pdf")
    );
    assert_eq!(
        storage
            .retrieve_file("result/a/b/COMPLIANT_report.pdf")
            .await
            .unwrap(),
        b"0123456789"
    );
    assert!(storage
        .file_exists("temp/a/b/report/accessibility-report/report_report_after.json")
        .await
        .unwrap());
    // nothing leaked outside the a/b/ namespace
    assert!(storage.list_files("temp/report").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_one_bad_chunk_fails_job_without_merge() {
    let storage = MemoryObjectStorage::new();
    storage.store_file("pdf/myfile.pdf", b"doc").await.unwrap();
    for (i, content) in [(1u32, "good-1"), (2, "BAD"), (3, "good-3")] {
        storage
            .store_file(
                &format!("temp/myfile/myfile_chunk_{i}.pdf"),
                content.as_bytes(),
            )
            .await
            .unwrap();
    }

    let transforms = StageTransforms {
        tagging: Arc::new(FailOnContent("BAD")),
        enrichment: Arc::new(FailOnContent("BAD")),
    };
    let orchestrator = Orchestrator::new(
        Arc::new(storage.clone()),
        PipelineConfig::default(),
        transforms,
        Arc::new(BasicAudit),
    );

    let chunks = (1..=3)
        .map(|i| chunk(&format!("temp/myfile/myfile_chunk_{i}.pdf"), i, ""))
        .collect();
    let report = orchestrator.run_job(job("job-e2e-1", "", "myfile", chunks)).await;

    assert_eq!(report.state, JobState::Failed);
    assert!(report.result.is_none());
    assert!(report.error.as_deref().unwrap().contains("chunk 2"));

    // the barrier stopped the job before merge and finalize
    assert!(!storage
        .file_exists("temp/myfile/merged_myfile.pdf")
        .await
        .unwrap());
    assert!(storage.list_files("result/").await.unwrap().is_empty());

    // successful siblings were not rolled back
    assert!(storage
        .file_exists("temp/myfile/enriched_myfile_chunk_1.pdf")
        .await
        .unwrap());
    assert!(storage
        .file_exists("temp/myfile/enriched_myfile_chunk_3.pdf")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_audit_failures_do_not_block_remediation() {
    let storage = MemoryObjectStorage::new();
    storage.store_file("pdf/myfile.pdf", b"doc").await.unwrap();
    storage
        .store_file("temp/myfile/myfile_chunk_1.pdf", b"doc")
        .await
        .unwrap();

    let orchestrator = Orchestrator::new(
        Arc::new(storage.clone()),
        PipelineConfig::default(),
        StageTransforms::identity(),
        Arc::new(BrokenAudit),
    );

    let report = orchestrator
        .run_job(job(
            "job-e2e-2",
            "",
            "myfile",
            vec![chunk("temp/myfile/myfile_chunk_1.pdf", 1, "")],
        ))
        .await;

    assert_eq!(report.state, JobState::Completed);
    assert!(storage
        .file_exists("result/COMPLIANT_myfile.pdf")
        .await
        .unwrap());
    assert!(report.warnings.iter().any(|w| w.starts_with("pre-audit")));
    assert!(report.warnings.iter().any(|w| w.starts_with("post-audit")));
    // no report was produced by the failing capability
    assert!(storage
        .list_files("temp/myfile/accessibility-report/")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_cancellation_cleans_up_temp_artifacts() {
    let storage = MemoryObjectStorage::new();
    storage.store_file("pdf/myfile.pdf", b"doc").await.unwrap();
    storage
        .store_file("temp/myfile/myfile_chunk_1.pdf", b"doc")
        .await
        .unwrap();

    let blocking = Arc::new(Blocking {
        started: Notify::new(),
        release: Notify::new(),
    });
    let transforms = StageTransforms {
        tagging: blocking.clone(),
        enrichment: Arc::new(remediate_stages::IdentityTransform),
    };
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(storage.clone()),
        PipelineConfig::default(),
        transforms,
        Arc::new(BrokenAudit),
    ));

    let runner = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .run_job(job(
                    "job-e2e-3",
                    "",
                    "myfile",
                    vec![chunk("temp/myfile/myfile_chunk_1.pdf", 1, "")],
                ))
                .await
        })
    };

    blocking.started.notified().await;
    assert!(orchestrator.cancel("job-e2e-3").await);
    blocking.release.notify_one();

    let report = runner.await.unwrap();
    assert_eq!(report.state, JobState::Failed);
    assert_eq!(report.error.as_deref(), Some("job cancelled"));

    // advisory cleanup removed the job's temp artifacts, result untouched
    assert!(storage.list_files("temp/myfile/").await.unwrap().is_empty());
    assert!(storage.list_files("result/").await.unwrap().is_empty());
    assert!(storage.file_exists("pdf/myfile.pdf").await.unwrap());
}

#[tokio::test]
async fn test_retry_policy_recovers_transient_stage_failure() {
    let storage = MemoryObjectStorage::new();
    storage.store_file("pdf/myfile.pdf", b"doc").await.unwrap();
    storage
        .store_file("temp/myfile/myfile_chunk_1.pdf", b"doc")
        .await
        .unwrap();

    let transforms = StageTransforms {
        tagging: Arc::new(FlakyOnce {
            failed: std::sync::atomic::AtomicBool::new(false),
        }),
        enrichment: Arc::new(remediate_stages::IdentityTransform),
    };
    let orchestrator = Orchestrator::new(
        Arc::new(storage.clone()),
        PipelineConfig::default(),
        transforms,
        Arc::new(BasicAudit),
    )
    .with_policy(RetryPolicy {
        max_state_retries: 1,
    });

    let report = orchestrator
        .run_job(job(
            "job-e2e-4",
            "",
            "myfile",
            vec![chunk("temp/myfile/myfile_chunk_1.pdf", 1, "")],
        ))
        .await;

    assert_eq!(report.state, JobState::Completed);
    assert!(storage
        .file_exists("result/COMPLIANT_myfile.pdf")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_splitter_rejects_foreign_key_before_any_job_exists() {
    let storage = MemoryObjectStorage::new();
    storage.store_file("upload/myfile.pdf", b"doc").await.unwrap();

    let orchestrator = Orchestrator::new(
        Arc::new(storage.clone()),
        PipelineConfig::default(),
        StageTransforms::identity(),
        Arc::new(BasicAudit),
    );

    let event = TriggerEvent {
        source_key: "upload/myfile.pdf".to_string(),
    };
    let err = orchestrator
        .submit_event(&event, &FixedSizePartitioner::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        remediate_common::PipelineError::UnsupportedInput(_)
    ));
    assert!(storage.list_files("temp/").await.unwrap().is_empty());
}
