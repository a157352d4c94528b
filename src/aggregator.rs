use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use crate::queue::{Destination, QueueSnapshot, QueueStore, StatusKind};

/// Tracing target for the aggregate watcher.
const TRACING_TARGET: &str = "photo_queue::aggregator";

/// 没有任何上传项时的总进度：表示“没有待完成的内容”
pub const EMPTY_QUEUE_PROGRESS: u8 = 100;

/// 多个队列合并后的进度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatedProgress {
    pub total_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub pending_count: usize,
    pub uploading_count: usize,
    pub is_uploading: bool,
    /// 所有项进度的平均值（四舍五入）
    pub combined_progress: u8,
}

impl AggregatedProgress {
    /// 全部成功且至少有一项
    pub fn all_complete(&self) -> bool {
        self.total_count > 0 && self.completed_count == self.total_count
    }

    /// 是否还有等待或上传中的项
    pub fn has_outstanding(&self) -> bool {
        self.pending_count + self.uploading_count > 0
    }
}

impl Default for AggregatedProgress {
    fn default() -> Self {
        aggregate(&[])
    }
}

/// 合并多个队列快照
pub fn aggregate(snapshots: &[QueueSnapshot]) -> AggregatedProgress {
    let mut total_count = 0usize;
    let mut completed_count = 0usize;
    let mut failed_count = 0usize;
    let mut pending_count = 0usize;
    let mut uploading_count = 0usize;
    let mut progress_sum = 0u64;

    for item in snapshots.iter().flat_map(|snapshot| snapshot.items.iter()) {
        total_count += 1;
        progress_sum += u64::from(item.progress.min(100));

        match item.status {
            StatusKind::Pending => pending_count += 1,
            StatusKind::Uploading => uploading_count += 1,
            StatusKind::Completed => completed_count += 1,
            StatusKind::Failed => failed_count += 1,
        }
    }

    let combined_progress = if total_count == 0 {
        EMPTY_QUEUE_PROGRESS
    } else {
        let total = total_count as u64;
        ((progress_sum + total / 2) / total).min(100) as u8
    };

    AggregatedProgress {
        total_count,
        completed_count,
        failed_count,
        pending_count,
        uploading_count,
        is_uploading: uploading_count > 0,
        combined_progress,
    }
}

/// 可被聚合的队列
///
/// Object safe, so queues with different payload and destination types can
/// be aggregated together.
pub trait QueueView: Send + Sync {
    fn snapshot(&self) -> QueueSnapshot;

    fn subscribe(&self) -> watch::Receiver<u64>;
}

impl<P, D> QueueView for QueueStore<P, D>
where
    P: Send + 'static,
    D: Destination,
{
    fn snapshot(&self) -> QueueSnapshot {
        QueueStore::snapshot(self)
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        QueueStore::subscribe(self)
    }
}

pub fn aggregate_views(views: &[Arc<dyn QueueView>]) -> AggregatedProgress {
    let snapshots: Vec<QueueSnapshot> = views.iter().map(|view| view.snapshot()).collect();
    aggregate(&snapshots)
}

/// 监听多个队列并发布合并后的进度
///
/// Stops on [`AggregateWatcher::shutdown`] or when the watcher is dropped,
/// releasing its references to the views.
pub struct AggregateWatcher {
    progress_rx: watch::Receiver<AggregatedProgress>,
    drop_guard: DropGuard,
    handle: JoinHandle<()>,
}

impl AggregateWatcher {
    /// 必须在 tokio runtime 中调用
    pub fn spawn(views: Vec<Arc<dyn QueueView>>) -> Self {
        let cancellation_token = CancellationToken::new();
        let (progress_tx, progress_rx) = watch::channel(aggregate_views(&views));
        // 容量 1：已有待处理的通知时丢弃新的
        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(1);

        for view in &views {
            let mut changes = view.subscribe();
            let notify_tx = notify_tx.clone();
            let cancellation_token = cancellation_token.clone();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = cancellation_token.cancelled() => break,

                        changed = changes.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let _ = notify_tx.try_send(());
                        }
                    }
                }
            });
        }
        drop(notify_tx);

        let handle = tokio::spawn({
            let cancellation_token = cancellation_token.clone();

            async move {
                tracing::debug!(target: TRACING_TARGET, queues = views.len(), "Aggregate watcher started");

                loop {
                    tokio::select! {
                        () = cancellation_token.cancelled() => break,

                        notified = notify_rx.recv() => {
                            if notified.is_none() {
                                break;
                            }

                            let progress = aggregate_views(&views);
                            progress_tx.send_if_modified(|current| {
                                if *current == progress {
                                    return false;
                                }
                                *current = progress;
                                true
                            });
                        }
                    }
                }

                tracing::debug!(target: TRACING_TARGET, "Aggregate watcher stopped");
            }
        });

        Self {
            progress_rx,
            drop_guard: cancellation_token.drop_guard(),
            handle,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AggregatedProgress> {
        self.progress_rx.clone()
    }

    pub fn current(&self) -> AggregatedProgress {
        *self.progress_rx.borrow()
    }

    pub async fn shutdown(self) {
        let AggregateWatcher { drop_guard, handle, .. } = self;
        drop(drop_guard);
        let _ = handle.await;
    }
}
