use std::fmt;
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use super::errors::Result;

/// 传输层上报的字节级进度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

impl TransferProgress {
    pub fn new(bytes_transferred: u64, total_bytes: u64) -> Self {
        Self {
            bytes_transferred,
            total_bytes,
        }
    }

    /// 百分比，四舍五入并限制在 0..=100
    ///
    /// An empty transfer counts as done.
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }

        let transferred = self.bytes_transferred.min(self.total_bytes) as u128;
        let total = self.total_bytes as u128;
        ((transferred * 100 + total / 2) / total) as u8
    }
}

/// 进度回调
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Arc<dyn Fn(TransferProgress) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(TransferProgress) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, bytes_transferred: u64, total_bytes: u64) {
        (self.callback)(TransferProgress::new(bytes_transferred, total_bytes));
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter").finish_non_exhaustive()
    }
}

/// 可以作为上传内容的数据
pub trait UploadBody: Send + 'static {
    fn file_name(&self) -> Option<&str> {
        None
    }

    fn content_type(&self) -> Option<&str> {
        None
    }

    fn into_bytes(self) -> Bytes;
}

impl UploadBody for Bytes {
    fn into_bytes(self) -> Bytes {
        self
    }
}

impl UploadBody for Vec<u8> {
    fn into_bytes(self) -> Bytes {
        Bytes::from(self)
    }
}

/// 上传传输层
///
/// Reports any number of progress events through `progress`, then resolves
/// exactly once: the durable URL or an error. The queue never cancels a
/// started upload; it only stops listening.
#[async_trait]
pub trait Transport<P, D>: Send + Sync {
    async fn upload(&self, payload: P, destination: &D, progress: ProgressReporter) -> Result<String>;
}
