use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use crate::config::{CompletionPolicy, QueueConfig};
use crate::metadata::{CompletedUpload, MetadataRecorder};
use crate::transport::{ProgressReporter, TransferProgress, Transport};
use super::snapshot;
use super::store::{Claim, QueueStore};
use super::types::{Destination, Owner, UploadId};

/// Tracing target for the background processor.
const TRACING_TARGET: &str = "photo_queue::processor";

/// 单次处理的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Failed,
    /// 项已被移除、不再等待，或处理器正在关闭
    Skipped,
}

/// 保证同一队列同时只有一轮处理
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 后台处理器：逐个上传等待中的项
pub(crate) struct QueueProcessor<P, D> {
    store: QueueStore<P, D>,
    transport: Arc<dyn Transport<P, D>>,
    recorder: Option<Arc<dyn MetadataRecorder<D>>>,
    config: QueueConfig,
    running: Arc<AtomicBool>,
    cancellation_token: CancellationToken,
}

impl<P, D> Clone for QueueProcessor<P, D> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            transport: self.transport.clone(),
            recorder: self.recorder.clone(),
            config: self.config.clone(),
            running: self.running.clone(),
            cancellation_token: self.cancellation_token.clone(),
        }
    }
}

impl<P, D> QueueProcessor<P, D>
where
    P: Send + 'static,
    D: Destination,
{
    pub(crate) fn new(
        store: QueueStore<P, D>,
        transport: Arc<dyn Transport<P, D>>,
        recorder: Option<Arc<dyn MetadataRecorder<D>>>,
        config: QueueConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            store,
            transport,
            recorder,
            config,
            running: Arc::new(AtomicBool::new(false)),
            cancellation_token,
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// 主循环：等待变更通知，合并窗口后处理一轮
    pub(crate) async fn run(self) {
        let mut changes = self.store.subscribe();

        self.restore_snapshot().await;

        tracing::info!(
            target: TRACING_TARGET,
            debounce_ms = self.config.debounce.as_millis() as u64,
            "Starting upload processor"
        );

        // 启动前已入队的项
        self.process_pending().await;

        loop {
            tokio::select! {
                biased;

                () = self.cancellation_token.cancelled() => break,

                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            tokio::select! {
                biased;

                () = self.cancellation_token.cancelled() => break,

                () = tokio::time::sleep(self.config.debounce) => {}
            }

            changes.borrow_and_update();
            self.process_pending().await;
        }

        tracing::info!(target: TRACING_TARGET, "Upload processor stopped");
    }

    /// 处理一轮等待中的项
    ///
    /// Returns `false` without doing anything when another pass is already
    /// running on this queue. Items enqueued during the pass wait for the next
    /// one: once the guard is released, leftover pending items are announced
    /// again so the worker cannot miss them.
    pub(crate) async fn process_pending(&self) -> bool {
        let Some(guard) = PassGuard::acquire(&self.running) else {
            tracing::trace!(target: TRACING_TARGET, "Pass already running");
            return false;
        };

        self.run_pass().await;
        drop(guard);

        if !self.cancellation_token.is_cancelled() && self.store.renotify_if_pending() {
            tracing::trace!(target: TRACING_TARGET, "Pending uploads left for the next pass");
        }

        true
    }

    async fn run_pass(&self) {
        let pending = self.store.pending_ids();
        if !pending.is_empty() {
            tracing::info!(target: TRACING_TARGET, count = pending.len(), "Processing pending uploads");

            let mut completed = 0usize;
            let mut failed = 0usize;
            for id in pending {
                if self.cancellation_token.is_cancelled() {
                    break;
                }

                match self.upload_one(id).await {
                    Outcome::Completed => completed += 1,
                    Outcome::Failed => failed += 1,
                    Outcome::Skipped => {}
                }
            }

            tracing::info!(target: TRACING_TARGET, completed, failed, "Upload pass finished");
        }

        self.save_snapshot().await;
    }

    async fn upload_one(&self, id: UploadId) -> Outcome {
        let Some(Claim { payload, destination, owner }) = self.store.begin_upload(id) else {
            return Outcome::Skipped;
        };

        tracing::debug!(target: TRACING_TARGET, upload_id = %id, "Upload started");

        let reporter = {
            let store = self.store.clone();
            ProgressReporter::new(move |progress: TransferProgress| {
                let percent = progress.percent();
                if !store.update_progress(id, percent) {
                    tracing::trace!(target: TRACING_TARGET, upload_id = %id, percent, "Ignored progress event");
                }
            })
        };

        let result = tokio::select! {
            result = self.transport.upload(payload, &destination, reporter) => result,

            () = self.cancellation_token.cancelled() => {
                tracing::debug!(target: TRACING_TARGET, upload_id = %id, "Stopped observing in-flight upload");
                return Outcome::Skipped;
            }
        };

        match result {
            Ok(url) => {
                if self.store.mark_success(id, url.as_str()) {
                    tracing::info!(target: TRACING_TARGET, upload_id = %id, %url, "Upload completed");
                    self.schedule_sweep(id);
                } else {
                    tracing::trace!(target: TRACING_TARGET, upload_id = %id, "Item removed before completion");
                }

                self.record_metadata(url, destination, &owner).await;
                Outcome::Completed
            }
            Err(err) => {
                tracing::error!(target: TRACING_TARGET, upload_id = %id, error = %err, "Upload failed");
                self.store.mark_error(id, err.to_string());
                Outcome::Failed
            }
        }
    }

    async fn record_metadata(&self, url: String, destination: D, owner: &Owner) {
        let Some(recorder) = &self.recorder else {
            return;
        };

        let record = CompletedUpload::new(url, destination, owner);
        if let Err(err) = recorder.record(&record).await {
            tracing::warn!(
                target: TRACING_TARGET,
                url = %record.url,
                error = %err,
                "Failed to persist upload metadata"
            );
        }
    }

    fn schedule_sweep(&self, id: UploadId) {
        let CompletionPolicy::Sweep { grace } = self.config.completion else {
            return;
        };

        let store = self.store.clone();
        let cancellation_token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancellation_token.cancelled() => {}
                () = tokio::time::sleep(grace) => {
                    if store.remove_completed(id) {
                        tracing::debug!(target: TRACING_TARGET, upload_id = %id, "Swept completed upload");
                    }
                }
            }
        });
    }

    async fn save_snapshot(&self) {
        let Some(path) = &self.config.snapshot_file else {
            return;
        };

        if let Err(err) = snapshot::save_snapshot(path, &self.store.records()).await {
            tracing::warn!(target: TRACING_TARGET, path = %path.display(), error = %err, "Failed to save queue snapshot");
        }
    }

    async fn restore_snapshot(&self) {
        let Some(path) = &self.config.snapshot_file else {
            return;
        };

        match snapshot::load_snapshot::<D>(path).await {
            Ok(records) if records.is_empty() => {}
            Ok(records) => {
                let restored = self.store.restore(records);
                tracing::info!(target: TRACING_TARGET, restored, "Restored queue snapshot");
            }
            Err(err) => {
                tracing::warn!(target: TRACING_TARGET, path = %path.display(), error = %err, "Failed to restore queue snapshot");
            }
        }
    }
}
