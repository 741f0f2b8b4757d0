use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Context;
use slicedrop_chunk_store::ChunkStore;
use slicedrop_upload_server::{ServerConfig, UploadServer};

use crate::config::Config;

/// Runs the server until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let host: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("invalid host address: {}", config.host))?;

    let store = ChunkStore::open(&config.storage_dir, config.merge_policy)
        .await
        .with_context(|| format!("opening storage at {}", config.storage_dir.display()))?;

    let server = UploadServer::new(
        ServerConfig {
            host,
            port: config.port,
            max_chunk_bytes: config.max_chunk_bytes,
        },
        Arc::new(store),
    );

    let runner = Arc::clone(&server);
    let mut handle = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        result = &mut handle => {
            // The server stopped on its own, which only happens on error.
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    server.shutdown();
    handle.await??;
    Ok(())
}
