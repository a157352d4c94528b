use std::path::{Path, PathBuf};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use crate::queue::{Destination, Owner, QueueError, Result};

/// 上传成功后写入文档库的描述性记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedUpload<D> {
    pub url: String,
    pub destination: D,
    pub category: String,
    pub timestamp: DateTime<Utc>,
    pub uploaded_by: String,
    pub uploaded_by_name: String,
}

impl<D: Destination> CompletedUpload<D> {
    pub fn new(url: impl Into<String>, destination: D, owner: &Owner) -> Self {
        let category = destination.category().to_string();

        Self {
            url: url.into(),
            destination,
            category,
            timestamp: Utc::now(),
            uploaded_by: owner.user_id.clone(),
            uploaded_by_name: owner.display_name.clone(),
        }
    }
}

/// 元数据记录器
///
/// Best effort: the queue logs and ignores failures, the upload stays completed.
#[async_trait]
pub trait MetadataRecorder<D>: Send + Sync {
    async fn record(&self, record: &CompletedUpload<D>) -> Result<()>;
}

/// 以 JSON lines 形式追加到本地文件
#[derive(Debug)]
pub struct JsonLinesRecorder {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl<D: Destination> MetadataRecorder<D> for JsonLinesRecorder {
    async fn record(&self, record: &CompletedUpload<D>) -> Result<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|err| QueueError::metadata_persist(err.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|err| QueueError::metadata_persist(format!("{}: {}", self.path.display(), err)))?;

        file.write_all(line.as_bytes())
            .await
            .map_err(|err| QueueError::metadata_persist(format!("{}: {}", self.path.display(), err)))?;
        file.flush()
            .await
            .map_err(|err| QueueError::metadata_persist(err.to_string()))?;

        Ok(())
    }
}
