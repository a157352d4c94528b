use thiserror::Error;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum QueueError {
    /// 入队时缺少必要的上下文，队列不会有任何变化
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 上传成功后的元数据记录写入失败
    #[error("Metadata persist error: {0}")]
    MetadataPersist(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Queue shut down")]
    Shutdown,
}

impl QueueError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn metadata_persist(message: impl Into<String>) -> Self {
        Self::MetadataPersist(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Error alias
pub type Result<T, E = QueueError> = std::result::Result<T, E>;
