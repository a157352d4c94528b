pub mod aggregator;
pub mod config;
pub mod metadata;
pub mod photo;
pub mod queue;
pub mod transport;

// 重新导出常用类型
pub use aggregator::{
    aggregate,
    AggregatedProgress,
    AggregateWatcher,
    QueueView,
    EMPTY_QUEUE_PROGRESS,
};

pub use config::{CompletionPolicy, Config, QueueConfig};

pub use metadata::{CompletedUpload, JsonLinesRecorder, MetadataRecorder};

pub use photo::{PhotoCategory, PhotoDestination, PhotoFile, PhotoQueue, PhotoQueueStore, PhotoStep};

pub use queue::{
    Destination,
    Owner,
    QueueError,
    QueueStore,
    Result,
    StatusKind,
    UploadId,
    UploadQueue,
    UploadQueueHandle,
    UploadRecord,
    UploadStatus,
};

pub use transport::{ProgressReporter, TransferProgress, Transport, TransportError, TusConfig, TusTransport};

#[cfg(test)]
mod tests;
