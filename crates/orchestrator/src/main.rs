//! Local entry point for the remediation pipeline.
//!
//! Seeds a storage backend with one document and runs it through the full
//! job graph. Uses in-memory storage by default; set `REMEDIATE_USE_S3=1`
//! to run against a real bucket (or MinIO via `AWS_ENDPOINT_URL`).

use std::sync::Arc;

use remediate_audit::BasicAudit;
use remediate_common::{PipelineConfig, TriggerEvent};
use remediate_orchestrator::{JobState, Orchestrator};
use remediate_splitter::FixedSizePartitioner;
use remediate_stages::StageTransforms;
use remediate_storage::{MemoryObjectStorage, ObjectStorage, S3Config, S3ObjectStorage};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <path-to-document> [source-key]", args[0]);
        eprintln!("  source-key defaults to pdf/<file-stem>.pdf");
        std::process::exit(1);
    }

    let path = std::path::PathBuf::from(&args[1]);
    let config = PipelineConfig::default();

    let source_key = match args.get(2) {
        Some(key) => key.clone(),
        None => {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("document");
            format!("{}{stem}{}", config.document_root, config.suffix)
        }
    };

    let document = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("failed to read '{}': {e}", path.display());
            std::process::exit(1);
        }
    };

    let storage: Arc<dyn ObjectStorage> = if std::env::var("REMEDIATE_USE_S3").is_ok() {
        let s3_config = S3Config {
            endpoint: std::env::var("AWS_ENDPOINT_URL").ok(),
            ..S3Config::default()
        };
        match S3ObjectStorage::new(s3_config).await {
            Ok(s3) => Arc::new(s3),
            Err(e) => {
                error!("failed to initialize S3 storage: {e}");
                std::process::exit(1);
            }
        }
    } else {
        Arc::new(MemoryObjectStorage::new())
    };

    if let Err(e) = storage.store_file(&source_key, &document).await {
        error!("failed to upload '{}': {e}", source_key);
        std::process::exit(1);
    }
    info!("uploaded {} bytes to '{}'", document.len(), source_key);

    let orchestrator = Orchestrator::new(
        storage,
        config,
        StageTransforms::identity(),
        Arc::new(BasicAudit),
    );
    let event = TriggerEvent { source_key };
    let partitioner = FixedSizePartitioner::default();

    match orchestrator.submit_event(&event, &partitioner).await {
        Ok(report) => {
            println!("\n=== Remediation Report ===");
            println!("Job:      {}", report.job_id);
            println!("State:    {}", report.state.name());
            if let Some(result) = &report.result {
                println!("Result:   s3://{}/{}", result.bucket, result.save_path);
            }
            for warning in &report.warnings {
                println!("Warning:  {warning}");
            }
            if let Some(err) = &report.error {
                println!("Error:    {err}");
            }
            println!("Finished: {}", report.finished_at.to_rfc3339());
            if report.state != JobState::Completed {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("job submission failed: {e}");
            std::process::exit(1);
        }
    }
}
