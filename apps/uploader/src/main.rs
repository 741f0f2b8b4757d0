//! Uploads one file to a SliceDrop server, resuming if possible.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use slicedrop_protocol::constants::DEFAULT_CHUNK_SIZE;
use slicedrop_upload_client::{HttpTransport, UploadConfig, UploadCoordinator, UploadEvent};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "slicedrop-upload")]
#[command(about = "Upload a file to a SliceDrop server in resumable chunks")]
struct Args {
    /// File to upload
    file: PathBuf,

    /// Server base URL
    #[arg(long, default_value = "http://localhost:3000")]
    server: String,

    /// Chunk size in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,

    /// Maximum concurrent chunk uploads
    #[arg(long, default_value_t = 4)]
    concurrency: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = UploadConfig {
        chunk_size: args.chunk_size,
        max_concurrent_uploads: args.concurrency,
    };

    let mut coordinator = UploadCoordinator::new(HttpTransport::new(&args.server), config);
    let mut events = coordinator
        .take_events()
        .context("event receiver already taken")?;

    let progress = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    let result = coordinator.upload_path(&args.file).await;
    // Closing the coordinator closes the event channel.
    drop(coordinator);
    let _ = progress.await;

    let report = result.with_context(|| format!("uploading {}", args.file.display()))?;
    if report.skipped {
        println!("{} already on server as {}", report.filename, report.content_hash);
    } else {
        println!(
            "{} uploaded as {} ({} of {} chunks sent, {} bytes)",
            report.filename,
            report.content_hash,
            report.uploaded_chunks,
            report.total_chunks,
            report.uploaded_bytes
        );
    }
    Ok(())
}

fn log_event(event: &UploadEvent) {
    match event {
        UploadEvent::Hashing { percentage } => {
            tracing::debug!("hashing {percentage:.1}%");
        }
        UploadEvent::Verified {
            content_hash,
            total,
            already_uploaded,
        } => {
            tracing::info!(%content_hash, total, already_uploaded, "verified");
        }
        UploadEvent::ChunkUploaded {
            chunk_id,
            outcome,
            done,
            total,
        } => {
            tracing::info!(%chunk_id, %outcome, "chunk {done}/{total}");
        }
        UploadEvent::Merging { content_hash } => tracing::info!(%content_hash, "merging"),
        UploadEvent::Completed { content_hash } => tracing::info!(%content_hash, "completed"),
        UploadEvent::Skipped { content_hash } => tracing::info!(%content_hash, "skipped"),
        UploadEvent::Failed { error } => tracing::error!(%error, "failed"),
    }
}
