mod errors;
mod manager;
mod processor;
mod snapshot;
mod store;
mod types;

pub use errors::{QueueError, Result};
pub use manager::{UploadQueue, UploadQueueBuilder, UploadQueueHandle};
pub use snapshot::{load_snapshot, save_snapshot};
pub use store::QueueStore;
pub use types::{
    Destination,
    ItemSnapshot,
    NewUpload,
    Owner,
    QueueSnapshot,
    StatusKind,
    UploadId,
    UploadRecord,
    UploadStatus,
};
