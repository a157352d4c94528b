use std::collections::HashMap;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use super::errors::{QueueError, Result};
use super::types::{
    Destination,
    ItemSnapshot,
    NewUpload,
    Owner,
    QueueSnapshot,
    UploadId,
    UploadRecord,
    UploadStatus,
};

/// Tracing target for the queue store.
const TRACING_TARGET: &str = "photo_queue::store";

/// 重启后恢复的项没有数据可上传
pub(crate) const RESTORED_WITHOUT_PAYLOAD: &str = "payload unavailable after restart";

struct Entry<P, D> {
    id: UploadId,
    payload: Option<P>,
    destination: D,
    owner: Owner,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct ItemProgress {
    status: UploadStatus,
    progress: u8,
}

struct StoreState<P, D> {
    /// 按入队顺序排列
    entries: Vec<Entry<P, D>>,
    progress: HashMap<UploadId, ItemProgress>,
}

impl<P, D> Default for StoreState<P, D> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            progress: HashMap::new(),
        }
    }
}

impl<P, D: Clone> StoreState<P, D> {
    fn record(&self, entry: &Entry<P, D>) -> Option<UploadRecord<D>> {
        let item = self.progress.get(&entry.id)?;

        Some(UploadRecord {
            id: entry.id,
            destination: entry.destination.clone(),
            owner: entry.owner.clone(),
            status: item.status.clone(),
            progress: item.progress,
            created_at: entry.created_at,
        })
    }

    fn remove_where(&mut self, predicate: impl Fn(&UploadStatus) -> bool) -> usize {
        let doomed: Vec<UploadId> = self.progress
            .iter()
            .filter(|(_, item)| predicate(&item.status))
            .map(|(id, _)| *id)
            .collect();

        for id in &doomed {
            self.progress.remove(id);
        }
        self.entries.retain(|entry| self.progress.contains_key(&entry.id));

        doomed.len()
    }
}

/// 处理器领取到的待上传项
pub(crate) struct Claim<P, D> {
    pub(crate) payload: P,
    pub(crate) destination: D,
    pub(crate) owner: Owner,
}

struct Inner<P, D> {
    state: Mutex<StoreState<P, D>>,
    changes: watch::Sender<u64>,
}

/// 上传队列的唯一可变状态
///
/// Every operation is one read-modify-write under the store lock, so
/// mutations for different ids never overwrite each other. Each effective
/// mutation bumps a version counter observable through [`QueueStore::subscribe`].
/// Cloning yields another handle to the same store.
pub struct QueueStore<P, D> {
    inner: Arc<Inner<P, D>>,
}

impl<P, D> Clone for QueueStore<P, D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P, D> Default for QueueStore<P, D>
where
    P: Send + 'static,
    D: Destination,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P, D> QueueStore<P, D>
where
    P: Send + 'static,
    D: Destination,
{
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StoreState::default()),
                changes,
            }),
        }
    }

    /// Runs `f` under the lock; notifies subscribers when it reports a change.
    fn mutate<R>(&self, f: impl FnOnce(&mut StoreState<P, D>) -> (R, bool)) -> R {
        let (result, changed) = {
            let mut state = self.inner.state.lock();
            f(&mut state)
        };

        if changed {
            self.inner.changes.send_modify(|version| *version = version.wrapping_add(1));
        }

        result
    }

    /// 批量入队
    ///
    /// 任意一项校验失败时整批拒绝，不分配任何 id。
    pub fn enqueue_batch(&self, uploads: Vec<NewUpload<P, D>>) -> Result<Vec<UploadId>> {
        let mut validated = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let owner = validate_owner(upload.owner)?;
            validated.push((upload.payload, upload.destination, owner));
        }

        if validated.is_empty() {
            return Ok(Vec::new());
        }

        let ids = self.mutate(|state| {
            let created_at = Utc::now();
            let ids: Vec<UploadId> = validated
                .into_iter()
                .map(|(payload, destination, owner)| {
                    let id = UploadId::new();
                    state.entries.push(Entry {
                        id,
                        payload: Some(payload),
                        destination,
                        owner,
                        created_at,
                    });
                    state.progress.insert(id, ItemProgress {
                        status: UploadStatus::Pending,
                        progress: 0,
                    });
                    id
                })
                .collect();

            (ids, true)
        });

        tracing::debug!(target: TRACING_TARGET, count = ids.len(), "Enqueued uploads");

        Ok(ids)
    }

    /// 将多个文件以同一目标和上传者入队
    pub fn enqueue(&self, files: Vec<P>, destination: D, owner: Option<Owner>) -> Result<Vec<UploadId>> {
        let owner = validate_owner(owner)?;

        let uploads = files
            .into_iter()
            .map(|payload| NewUpload::new(payload, destination.clone(), owner.clone()))
            .collect();

        self.enqueue_batch(uploads)
    }

    /// 更新进度并进入上传中状态
    ///
    /// Progress is clamped to 100 and never moves backwards. Returns `false`
    /// when the id is unknown, already terminal, or nothing changed.
    pub fn update_progress(&self, id: UploadId, progress: u8) -> bool {
        let progress = progress.min(100);

        self.mutate(|state| {
            let Some(item) = state.progress.get_mut(&id) else {
                return (false, false);
            };

            match item.status {
                UploadStatus::Pending => {
                    item.status = UploadStatus::Uploading;
                    item.progress = progress;
                }
                UploadStatus::Uploading => {
                    if progress <= item.progress {
                        return (false, false);
                    }
                    item.progress = progress;
                }
                UploadStatus::Completed { .. } | UploadStatus::Failed { .. } => {
                    return (false, false);
                }
            }

            (true, true)
        })
    }

    /// 标记成功，仅对上传中的项生效
    pub fn mark_success(&self, id: UploadId, url: impl Into<String>) -> bool {
        let url = url.into();

        self.mutate(|state| match state.progress.get_mut(&id) {
            Some(item) if item.status == UploadStatus::Uploading => {
                item.status = UploadStatus::Completed { url };
                item.progress = 100;
                (true, true)
            }
            _ => (false, false),
        })
    }

    /// 标记失败，仅对上传中的项生效，进度保持不变
    pub fn mark_error(&self, id: UploadId, message: impl Into<String>) -> bool {
        let error = message.into();

        self.mutate(|state| match state.progress.get_mut(&id) {
            Some(item) if item.status == UploadStatus::Uploading => {
                item.status = UploadStatus::Failed { error };
                (true, true)
            }
            _ => (false, false),
        })
    }

    pub fn remove(&self, id: UploadId) -> bool {
        self.mutate(|state| {
            let existed = state.progress.remove(&id).is_some();
            state.entries.retain(|entry| entry.id != id);
            (existed, existed)
        })
    }

    pub fn clear_completed(&self) -> usize {
        self.mutate(|state| {
            let removed = state.remove_where(|status| matches!(status, UploadStatus::Completed { .. }));
            (removed, removed > 0)
        })
    }

    pub fn clear_failed(&self) -> usize {
        self.mutate(|state| {
            let removed = state.remove_where(|status| matches!(status, UploadStatus::Failed { .. }));
            (removed, removed > 0)
        })
    }

    /// 仅当项仍处于完成状态时移除
    pub(crate) fn remove_completed(&self, id: UploadId) -> bool {
        self.mutate(|state| {
            let completed = matches!(
                state.progress.get(&id),
                Some(ItemProgress { status: UploadStatus::Completed { .. }, .. })
            );
            if completed {
                state.progress.remove(&id);
                state.entries.retain(|entry| entry.id != id);
            }
            (completed, completed)
        })
    }

    /// 领取一个等待中的项：取走数据并进入上传中（进度 0）
    ///
    /// Returns `None` when the id is gone or no longer pending.
    pub(crate) fn begin_upload(&self, id: UploadId) -> Option<Claim<P, D>> {
        self.mutate(|state| {
            let is_pending = matches!(
                state.progress.get(&id),
                Some(ItemProgress { status: UploadStatus::Pending, .. })
            );
            if !is_pending {
                return (None, false);
            }

            // 等待中的项总是带着数据（恢复的项不会是等待状态）
            let Some((payload, destination, owner)) = state.entries
                .iter_mut()
                .find(|entry| entry.id == id)
                .and_then(|entry| {
                    let payload = entry.payload.take()?;
                    Some((payload, entry.destination.clone(), entry.owner.clone()))
                })
            else {
                return (None, false);
            };

            if let Some(item) = state.progress.get_mut(&id) {
                item.status = UploadStatus::Uploading;
                item.progress = 0;
            }

            (Some(Claim { payload, destination, owner }), true)
        })
    }

    /// 恢复持久化的记录
    ///
    /// Restored items carry no payload, so anything that was still waiting
    /// or uploading is surfaced as failed. Ids already present are skipped.
    /// Restored items go before anything enqueued since start, ordered by
    /// creation time.
    pub(crate) fn restore(&self, records: Vec<UploadRecord<D>>) -> usize {
        self.mutate(|state| {
            let mut restored = Vec::new();
            for record in records {
                if state.progress.contains_key(&record.id) {
                    continue;
                }

                let status = match record.status {
                    UploadStatus::Pending | UploadStatus::Uploading => UploadStatus::Failed {
                        error: RESTORED_WITHOUT_PAYLOAD.to_string(),
                    },
                    status => status,
                };
                let progress = match status {
                    UploadStatus::Completed { .. } => 100,
                    _ => record.progress.min(100),
                };

                state.progress.insert(record.id, ItemProgress { status, progress });
                restored.push(Entry {
                    id: record.id,
                    payload: None,
                    destination: record.destination,
                    owner: record.owner,
                    created_at: record.created_at,
                });
            }

            restored.sort_by_key(|entry| entry.created_at);
            let count = restored.len();
            state.entries.splice(0..0, restored);

            (count, count > 0)
        })
    }

    pub fn get(&self, id: UploadId) -> Option<UploadRecord<D>> {
        let state = self.inner.state.lock();
        let entry = state.entries.iter().find(|entry| entry.id == id)?;
        state.record(entry)
    }

    /// 按入队顺序返回所有项
    pub fn records(&self) -> Vec<UploadRecord<D>> {
        let state = self.inner.state.lock();
        state.entries
            .iter()
            .filter_map(|entry| state.record(entry))
            .collect()
    }

    /// 按入队顺序返回等待中的 id
    pub fn pending_ids(&self) -> Vec<UploadId> {
        let state = self.inner.state.lock();
        state.entries
            .iter()
            .filter(|entry| matches!(
                state.progress.get(&entry.id),
                Some(ItemProgress { status: UploadStatus::Pending, .. })
            ))
            .map(|entry| entry.id)
            .collect()
    }

    /// 尚未结束的项（等待中 + 上传中）
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock()
            .progress
            .values()
            .filter(|item| !item.status.is_terminal())
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.inner.state.lock();
        let items = state.entries
            .iter()
            .filter_map(|entry| {
                state.progress.get(&entry.id).map(|item| ItemSnapshot {
                    id: entry.id,
                    status: item.status.kind(),
                    progress: item.progress,
                })
            })
            .collect();

        QueueSnapshot { items }
    }

    /// 仍有等待中的项时再次通知订阅者
    pub(crate) fn renotify_if_pending(&self) -> bool {
        if self.pending_ids().is_empty() {
            return false;
        }

        self.inner.changes.send_modify(|version| *version = version.wrapping_add(1));
        true
    }

    /// 订阅变更通知（版本号）
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }
}

fn validate_owner(owner: Option<Owner>) -> Result<Owner> {
    let owner = owner.ok_or_else(|| {
        QueueError::validation("An authenticated owner is required to enqueue uploads")
    })?;

    if owner.user_id.trim().is_empty() {
        return Err(QueueError::validation("Owner user id must not be empty"));
    }

    Ok(owner)
}
