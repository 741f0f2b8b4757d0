//! Client side of the SliceDrop protocol.
//!
//! [`UploadCoordinator`] drives one upload end to end: verify what the
//! server already holds, send the missing chunks with bounded concurrency,
//! then ask for the merge. The network sits behind [`UploadTransport`] so
//! the flow can be exercised without a server.

mod coordinator;
mod error;
mod http;
mod transport;
mod types;

pub use coordinator::UploadCoordinator;
pub use error::UploadError;
pub use http::HttpTransport;
pub use transport::{ChunkUpload, TransportFuture, UploadTransport};
pub use types::{UploadConfig, UploadEvent, UploadReport};
