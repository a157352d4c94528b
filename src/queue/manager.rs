use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use crate::aggregator::QueueView;
use crate::config::QueueConfig;
use crate::metadata::MetadataRecorder;
use crate::transport::Transport;
use super::errors::{QueueError, Result};
use super::processor::QueueProcessor;
use super::store::QueueStore;
use super::types::{Destination, NewUpload, Owner, QueueSnapshot, UploadId, UploadRecord};

/// 上传队列实例：存储 + 后台处理器
///
/// Cloning yields another handle to the same queue. Separate instances share
/// nothing and run independently.
pub struct UploadQueue<P, D> {
    store: QueueStore<P, D>,
    processor: QueueProcessor<P, D>,
}

impl<P, D> Clone for UploadQueue<P, D> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            processor: self.processor.clone(),
        }
    }
}

/// 队列句柄 - 包含队列和后台任务
///
/// The handle owns the worker: dropping it stops the worker just like
/// [`UploadQueueHandle::shutdown`], without waiting for it to exit. Clones
/// of `queue` kept past that point still read the store, but `process_now`
/// reports [`QueueError::Shutdown`].
pub struct UploadQueueHandle<P, D> {
    pub queue: UploadQueue<P, D>,
    worker_handle: JoinHandle<()>,
    drop_guard: DropGuard,
}

impl<P, D> UploadQueueHandle<P, D> {
    /// 停止后台任务并等待其退出
    ///
    /// An in-flight transport future is dropped; its item stays `Uploading`.
    pub async fn shutdown(self) -> Result<()> {
        let UploadQueueHandle { worker_handle, drop_guard, .. } = self;
        drop(drop_guard);

        worker_handle
            .await
            .map_err(|err| QueueError::internal(format!("Worker panic: {}", err)))
    }
}

pub struct UploadQueueBuilder<P, D> {
    transport: Arc<dyn Transport<P, D>>,
    recorder: Option<Arc<dyn MetadataRecorder<D>>>,
    config: QueueConfig,
}

impl<P, D> UploadQueueBuilder<P, D>
where
    P: Send + 'static,
    D: Destination,
{
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// 上传成功后的元数据记录器
    pub fn recorder(mut self, recorder: Arc<dyn MetadataRecorder<D>>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// 启动后台处理器，必须在 tokio runtime 中调用
    pub fn spawn(self) -> UploadQueueHandle<P, D> {
        let store = QueueStore::new();
        let cancellation_token = CancellationToken::new();

        let processor = QueueProcessor::new(
            store.clone(),
            self.transport,
            self.recorder,
            self.config,
            cancellation_token.clone(),
        );

        let worker_handle = tokio::spawn(processor.clone().run());

        UploadQueueHandle {
            queue: UploadQueue { store, processor },
            worker_handle,
            drop_guard: cancellation_token.drop_guard(),
        }
    }
}

impl<P, D> UploadQueue<P, D>
where
    P: Send + 'static,
    D: Destination,
{
    pub fn builder(transport: Arc<dyn Transport<P, D>>) -> UploadQueueBuilder<P, D> {
        UploadQueueBuilder {
            transport,
            recorder: None,
            config: QueueConfig::default(),
        }
    }

    pub fn new(transport: Arc<dyn Transport<P, D>>, config: QueueConfig) -> UploadQueueHandle<P, D> {
        Self::builder(transport).config(config).spawn()
    }

    pub fn enqueue(&self, files: Vec<P>, destination: D, owner: Option<Owner>) -> Result<Vec<UploadId>> {
        self.store.enqueue(files, destination, owner)
    }

    pub fn enqueue_batch(&self, uploads: Vec<NewUpload<P, D>>) -> Result<Vec<UploadId>> {
        self.store.enqueue_batch(uploads)
    }

    pub fn get(&self, id: UploadId) -> Option<UploadRecord<D>> {
        self.store.get(id)
    }

    pub fn records(&self) -> Vec<UploadRecord<D>> {
        self.store.records()
    }

    pub fn remove(&self, id: UploadId) -> bool {
        self.store.remove(id)
    }

    pub fn clear_completed(&self) -> usize {
        self.store.clear_completed()
    }

    pub fn clear_failed(&self) -> usize {
        self.store.clear_failed()
    }

    pub fn pending_count(&self) -> usize {
        self.store.pending_count()
    }

    pub fn store(&self) -> &QueueStore<P, D> {
        &self.store
    }

    /// 立即处理一轮，不等待合并窗口
    ///
    /// Returns `Ok(false)` when a pass is already running on this queue.
    pub async fn process_now(&self) -> Result<bool> {
        if self.processor.is_cancelled() {
            return Err(QueueError::Shutdown);
        }

        Ok(self.processor.process_pending().await)
    }
}

impl<P, D> QueueView for UploadQueue<P, D>
where
    P: Send + 'static,
    D: Destination,
{
    fn snapshot(&self) -> QueueSnapshot {
        self.store.snapshot()
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.store.subscribe()
    }
}
