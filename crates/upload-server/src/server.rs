//! Upload server lifecycle.
//!
//! Binds a TCP listener, serves the [`router`](crate::router) until
//! [`UploadServer::shutdown`] is called, then drains in-flight requests.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use slicedrop_chunk_store::ChunkStore;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{DEFAULT_MAX_CHUNK_BYTES, ServerError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind.
    pub host: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Largest accepted request body.
    pub max_chunk_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
        }
    }
}

/// The upload HTTP server.
pub struct UploadServer {
    config: ServerConfig,
    store: Arc<ChunkStore>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    running: AtomicBool,
}

impl UploadServer {
    pub fn new(config: ServerConfig, store: Arc<ChunkStore>) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Stops accepting connections; [`run`](Self::run) returns once
    /// in-flight requests have completed.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = SocketAddr::new(self.config.host, self.config.port);
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!(
            %local_addr,
            max_chunk_bytes = self.config.max_chunk_bytes,
            "upload server listening"
        );

        let app = crate::router(Arc::clone(&self.store), self.config.max_chunk_bytes);
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.clone().cancelled_owned())
            .await;

        tracing::info!("upload server stopped");
        *self.local_addr.lock().await = None;
        self.running.store(false, Ordering::SeqCst);
        result.map_err(ServerError::from)
    }
}
