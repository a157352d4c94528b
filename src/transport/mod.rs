mod errors;
mod progress_stream;
mod tus;
mod types;
mod upload_metadata;

pub use errors::{Result, TransportError};
pub use progress_stream::ProgressStream;
pub use tus::{TusConfig, TusTransport, TUS_RESUMABLE};
pub use types::{ProgressReporter, TransferProgress, Transport, UploadBody};
pub use upload_metadata::UploadMetadata;
