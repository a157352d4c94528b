use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use crate::config::{CompletionPolicy, QueueConfig};
use crate::metadata::{CompletedUpload, MetadataRecorder};
use crate::photo::{PhotoDestination, PhotoFile, PhotoQueue, PhotoQueueStore, PhotoStep};
use crate::queue::{Owner, QueueError, StatusKind, UploadQueueHandle};
use crate::transport::{self, ProgressReporter, Transport, TransportError};

// 单个文件的上传脚本
#[derive(Default)]
struct Script {
    /// 依次上报的百分比（总量 100）
    steps: Vec<u64>,
    failure: Option<String>,
    gate: Option<Arc<Notify>>,
}

/// 按文件名执行脚本的模拟传输层
#[derive(Default)]
struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Script>>,
    store: OnceLock<PhotoQueueStore>,
    /// 每次上报后队列中可见的 (文件名, 状态, 进度)
    observed: Mutex<Vec<(String, StatusKind, u8)>>,
    started: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn script(&self, name: &str, script: Script) {
        self.scripts.lock().insert(name.to_string(), script);
    }

    fn attach(&self, store: PhotoQueueStore) {
        let _ = self.store.set(store);
    }

    fn observe(&self, name: &str) {
        let Some(store) = self.store.get() else {
            return;
        };

        // 串行处理：同一时刻最多一个上传中的项
        if let Some(record) = store.records().into_iter().find(|r| r.kind() == StatusKind::Uploading) {
            self.observed.lock().push((name.to_string(), record.kind(), record.progress));
        }
    }

    fn observed_for(&self, name: &str) -> Vec<u8> {
        self.observed
            .lock()
            .iter()
            .filter(|(file, _, _)| file == name)
            .map(|(_, _, progress)| *progress)
            .collect()
    }

    fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }
}

#[async_trait]
impl Transport<PhotoFile, PhotoDestination> for ScriptedTransport {
    async fn upload(
        &self,
        payload: PhotoFile,
        _destination: &PhotoDestination,
        progress: ProgressReporter,
    ) -> transport::Result<String> {
        self.started.lock().push(payload.name.clone());
        let script = self.scripts.lock().remove(&payload.name).unwrap_or_default();

        if let Some(gate) = script.gate {
            gate.notified().await;
        }

        for step in script.steps {
            progress.report(step, 100);
            self.observe(&payload.name);
            tokio::task::yield_now().await;
        }

        match script.failure {
            Some(message) => Err(TransportError::other(message)),
            None => Ok(format!("https://storage.example.com/{}", payload.name)),
        }
    }
}

#[derive(Default)]
struct CollectingRecorder {
    records: Mutex<Vec<CompletedUpload<PhotoDestination>>>,
}

#[async_trait]
impl MetadataRecorder<PhotoDestination> for CollectingRecorder {
    async fn record(&self, record: &CompletedUpload<PhotoDestination>) -> crate::queue::Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

struct FailingRecorder;

#[async_trait]
impl MetadataRecorder<PhotoDestination> for FailingRecorder {
    async fn record(&self, _record: &CompletedUpload<PhotoDestination>) -> crate::queue::Result<()> {
        Err(QueueError::metadata_persist("document store unavailable"))
    }
}

// 每次记录耗时较长，让一轮处理在最后一次状态变更后仍持续一段时间
struct SlowRecorder(Duration);

#[async_trait]
impl MetadataRecorder<PhotoDestination> for SlowRecorder {
    async fn record(&self, _record: &CompletedUpload<PhotoDestination>) -> crate::queue::Result<()> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

fn fast_config() -> QueueConfig {
    QueueConfig {
        debounce: Duration::from_millis(20),
        ..QueueConfig::default()
    }
}

fn destination() -> PhotoDestination {
    PhotoDestination::new("job-42", "room-1", "Kitchen", PhotoStep::Demo)
}

fn owner() -> Option<Owner> {
    Some(Owner::new("tech-7", "Sam"))
}

fn photos(names: &[&str]) -> Vec<PhotoFile> {
    names
        .iter()
        .map(|name| PhotoFile::jpeg(*name, vec![0xFF, 0xD8, 0xFF]))
        .collect()
}

fn spawn_queue(transport: &Arc<ScriptedTransport>, config: QueueConfig) -> UploadQueueHandle<PhotoFile, PhotoDestination> {
    let handle = PhotoQueue::builder(transport.clone()).config(config).spawn();
    transport.attach(handle.queue.store().clone());
    handle
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

#[tokio::test]
async fn test_progress_is_observed_in_order() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.script("1.jpg", Script {
        steps: vec![0, 30, 70, 100],
        ..Script::default()
    });
    let handle = spawn_queue(&transport, fast_config());

    let ids = handle.queue.enqueue(photos(&["1.jpg", "2.jpg", "3.jpg"]), destination(), owner()).unwrap();
    assert_eq!(ids.len(), 3);

    let queue = handle.queue.clone();
    wait_until(|| queue.pending_count() == 0).await;

    assert_eq!(transport.observed_for("1.jpg"), vec![0, 30, 70, 100]);

    let first = handle.queue.get(ids[0]).unwrap();
    assert_eq!(first.kind(), StatusKind::Completed);
    assert_eq!(first.progress, 100);
    assert_eq!(first.result(), Some("https://storage.example.com/1.jpg"));

    // 按入队顺序逐个上传
    assert_eq!(transport.started(), vec!["1.jpg", "2.jpg", "3.jpg"]);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failure_does_not_stop_the_pass() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.script("2.jpg", Script {
        steps: vec![25],
        failure: Some("network timeout".to_string()),
        ..Script::default()
    });
    let handle = spawn_queue(&transport, fast_config());

    let ids = handle.queue.enqueue(photos(&["1.jpg", "2.jpg", "3.jpg"]), destination(), owner()).unwrap();

    let queue = handle.queue.clone();
    wait_until(|| queue.pending_count() == 0).await;

    let failed = handle.queue.get(ids[1]).unwrap();
    assert_eq!(failed.kind(), StatusKind::Failed);
    assert_eq!(failed.error(), Some("network timeout"));
    assert_eq!(failed.result(), None);
    assert_eq!(failed.progress, 25);

    assert_eq!(handle.queue.get(ids[0]).unwrap().kind(), StatusKind::Completed);
    assert_eq!(handle.queue.get(ids[2]).unwrap().kind(), StatusKind::Completed);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_resubmitting_failed_photo_gets_new_id() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.script("wall.jpg", Script {
        failure: Some("network timeout".to_string()),
        ..Script::default()
    });
    let handle = spawn_queue(&transport, fast_config());

    let first = handle.queue.enqueue(photos(&["wall.jpg"]), destination(), owner()).unwrap()[0];
    let queue = handle.queue.clone();
    wait_until(|| queue.get(first).is_some_and(|r| r.kind() == StatusKind::Failed)).await;

    // 没有自动重试，需要重新入队
    let second = handle.queue.enqueue(photos(&["wall.jpg"]), destination(), owner()).unwrap()[0];
    assert_ne!(first, second);

    wait_until(|| queue.get(second).is_some_and(|r| r.kind() == StatusKind::Completed)).await;
    assert_eq!(handle.queue.get(first).unwrap().kind(), StatusKind::Failed);
    assert_eq!(handle.queue.records().len(), 2);

    assert_eq!(handle.queue.clear_failed(), 1);
    assert!(handle.queue.get(first).is_none());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_items_enqueued_mid_pass_wait_for_next_pass() {
    let gate = Arc::new(Notify::new());
    let transport = Arc::new(ScriptedTransport::default());
    transport.script("1.jpg", Script {
        gate: Some(gate.clone()),
        ..Script::default()
    });
    let handle = spawn_queue(&transport, fast_config());

    let first = handle.queue.enqueue(photos(&["1.jpg"]), destination(), owner()).unwrap()[0];
    let queue = handle.queue.clone();
    wait_until(|| queue.get(first).is_some_and(|r| r.kind() == StatusKind::Uploading)).await;

    let later = handle.queue.enqueue(photos(&["2.jpg", "3.jpg"]), destination(), owner()).unwrap();
    assert!(later.iter().all(|id| queue.get(*id).unwrap().kind() == StatusKind::Pending));

    gate.notify_one();
    wait_until(|| queue.pending_count() == 0).await;

    assert_eq!(transport.started(), vec!["1.jpg", "2.jpg", "3.jpg"]);
    assert!(queue.records().iter().all(|r| r.kind() == StatusKind::Completed));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_process_now_skips_while_pass_running() {
    let gate = Arc::new(Notify::new());
    let transport = Arc::new(ScriptedTransport::default());
    transport.script("1.jpg", Script {
        gate: Some(gate.clone()),
        ..Script::default()
    });
    let handle = spawn_queue(&transport, fast_config());

    let id = handle.queue.enqueue(photos(&["1.jpg"]), destination(), owner()).unwrap()[0];
    let queue = handle.queue.clone();
    wait_until(|| queue.get(id).is_some_and(|r| r.kind() == StatusKind::Uploading)).await;

    assert!(!handle.queue.process_now().await.unwrap());

    gate.notify_one();
    wait_until(|| queue.pending_count() == 0).await;
    assert_eq!(transport.started(), vec!["1.jpg"]);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_process_now_runs_without_waiting_for_debounce() {
    let transport = Arc::new(ScriptedTransport::default());
    let config = QueueConfig {
        debounce: Duration::from_secs(60),
        ..QueueConfig::default()
    };
    let handle = spawn_queue(&transport, config);

    // 让后台任务先完成启动时的空处理
    tokio::time::sleep(Duration::from_millis(20)).await;

    let id = handle.queue.enqueue(photos(&["1.jpg"]), destination(), owner()).unwrap()[0];
    assert!(handle.queue.process_now().await.unwrap());
    assert_eq!(handle.queue.get(id).unwrap().kind(), StatusKind::Completed);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_process_now_after_shutdown_is_error() {
    let transport = Arc::new(ScriptedTransport::default());
    let handle = spawn_queue(&transport, fast_config());
    let queue = handle.queue.clone();

    handle.shutdown().await.unwrap();

    assert!(matches!(queue.process_now().await, Err(QueueError::Shutdown)));
}

#[tokio::test]
async fn test_enqueue_without_owner_is_rejected() {
    let transport = Arc::new(ScriptedTransport::default());
    let handle = spawn_queue(&transport, fast_config());

    let result = handle.queue.enqueue(photos(&["1.jpg"]), destination(), None);
    assert!(matches!(result, Err(QueueError::Validation(_))));
    assert!(handle.queue.records().is_empty());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sweep_policy_removes_completed_after_grace() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.script("2.jpg", Script {
        failure: Some("rejected".to_string()),
        ..Script::default()
    });
    let config = QueueConfig {
        completion: CompletionPolicy::Sweep { grace: Duration::from_millis(50) },
        ..fast_config()
    };
    let handle = spawn_queue(&transport, config);

    let ids = handle.queue.enqueue(photos(&["1.jpg", "2.jpg"]), destination(), owner()).unwrap();
    let queue = handle.queue.clone();
    wait_until(|| queue.get(ids[0]).is_none()).await;

    // 失败项不会被清除
    assert_eq!(handle.queue.get(ids[1]).unwrap().kind(), StatusKind::Failed);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_keep_policy_retains_completed() {
    let transport = Arc::new(ScriptedTransport::default());
    let handle = spawn_queue(&transport, fast_config());

    let id = handle.queue.enqueue(photos(&["1.jpg"]), destination(), owner()).unwrap()[0];
    let queue = handle.queue.clone();
    wait_until(|| queue.get(id).is_some_and(|r| r.kind() == StatusKind::Completed)).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(handle.queue.get(id).is_some());
    assert_eq!(handle.queue.clear_completed(), 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_completed_upload_is_recorded() {
    let transport = Arc::new(ScriptedTransport::default());
    let recorder = Arc::new(CollectingRecorder::default());
    let handle = PhotoQueue::builder(transport.clone())
        .config(fast_config())
        .recorder(recorder.clone())
        .spawn();

    let id = handle.queue
        .enqueue(photos(&["1.jpg"]), destination(), Some(Owner::new("tech-7", "")))
        .unwrap()[0];
    let records = recorder.clone();
    wait_until(|| !records.records.lock().is_empty()).await;

    let recorded = recorder.records.lock()[0].clone();
    assert_eq!(recorded.url, "https://storage.example.com/1.jpg");
    assert_eq!(recorded.category, "demo");
    assert_eq!(recorded.uploaded_by, "tech-7");
    assert_eq!(recorded.uploaded_by_name, Owner::UNKNOWN_NAME);
    assert_eq!(recorded.destination, destination());
    assert_eq!(handle.queue.get(id).unwrap().kind(), StatusKind::Completed);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_metadata_failure_keeps_upload_completed() {
    let transport = Arc::new(ScriptedTransport::default());
    let handle = PhotoQueue::builder(transport.clone())
        .config(fast_config())
        .recorder(Arc::new(FailingRecorder))
        .spawn();

    let ids = handle.queue.enqueue(photos(&["1.jpg", "2.jpg"]), destination(), owner()).unwrap();
    let queue = handle.queue.clone();
    wait_until(|| queue.pending_count() == 0).await;

    for id in ids {
        let record = handle.queue.get(id).unwrap();
        assert_eq!(record.kind(), StatusKind::Completed);
        assert_eq!(record.error(), None);
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_removed_item_is_not_uploaded() {
    let gate = Arc::new(Notify::new());
    let transport = Arc::new(ScriptedTransport::default());
    transport.script("1.jpg", Script {
        gate: Some(gate.clone()),
        ..Script::default()
    });
    let handle = spawn_queue(&transport, fast_config());

    let ids = handle.queue.enqueue(photos(&["1.jpg", "2.jpg"]), destination(), owner()).unwrap();
    let queue = handle.queue.clone();
    wait_until(|| queue.get(ids[0]).is_some_and(|r| r.kind() == StatusKind::Uploading)).await;

    // 上传中被移除：之后的回调不会让它重新出现
    assert!(handle.queue.remove(ids[0]));
    assert!(handle.queue.remove(ids[1]));
    gate.notify_one();

    wait_until(|| transport.started().len() == 1 && queue.records().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handle.queue.records().is_empty());
    assert_eq!(transport.started(), vec!["1.jpg"]);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_item_enqueued_during_manual_pass_is_picked_up() {
    let gate = Arc::new(Notify::new());
    let transport = Arc::new(ScriptedTransport::default());
    transport.script("1.jpg", Script {
        gate: Some(gate.clone()),
        ..Script::default()
    });
    let handle = PhotoQueue::builder(transport.clone())
        .config(fast_config())
        .recorder(Arc::new(SlowRecorder(Duration::from_millis(300))))
        .spawn();
    transport.attach(handle.queue.store().clone());

    // 让后台任务先完成启动时的空处理
    tokio::time::sleep(Duration::from_millis(20)).await;

    // 手动处理抢在合并窗口结束前拿到本轮
    let first = handle.queue.enqueue(photos(&["1.jpg"]), destination(), owner()).unwrap()[0];
    let manual = tokio::spawn({
        let queue = handle.queue.clone();
        async move { queue.process_now().await }
    });

    let queue = handle.queue.clone();
    wait_until(|| queue.get(first).is_some_and(|r| r.kind() == StatusKind::Uploading)).await;

    // 后台任务在这期间被拒绝
    let second = handle.queue.enqueue(photos(&["2.jpg"]), destination(), owner()).unwrap()[0];
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(queue.get(second).unwrap().kind(), StatusKind::Pending);

    gate.notify_one();
    assert!(manual.await.unwrap().unwrap());

    wait_until(|| queue.get(second).is_some_and(|r| r.kind() == StatusKind::Completed)).await;
    assert_eq!(transport.started(), vec!["1.jpg", "2.jpg"]);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_dropping_handle_stops_worker() {
    let transport = Arc::new(ScriptedTransport::default());
    let handle = spawn_queue(&transport, fast_config());
    let queue = handle.queue.clone();

    let id = queue.enqueue(photos(&["1.jpg"]), destination(), owner()).unwrap()[0];
    wait_until(|| queue.get(id).is_some_and(|r| r.kind() == StatusKind::Completed)).await;

    drop(handle);
    assert!(matches!(queue.process_now().await, Err(QueueError::Shutdown)));
    // 记录仍可读取
    assert_eq!(queue.records().len(), 1);

    drop(queue);
    wait_until(|| Arc::strong_count(&transport) == 1).await;
}
