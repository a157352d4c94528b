use std::fmt;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 上传项唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UploadId(Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 上传状态
///
/// 结果 URL 和错误信息分别只存在于对应的终态中。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UploadStatus {
    /// 等待中（在队列中）
    Pending,
    /// 上传中
    Uploading,
    /// 已完成
    Completed { url: String },
    /// 失败
    Failed { error: String },
}

impl UploadStatus {
    pub fn kind(&self) -> StatusKind {
        match self {
            UploadStatus::Pending => StatusKind::Pending,
            UploadStatus::Uploading => StatusKind::Uploading,
            UploadStatus::Completed { .. } => StatusKind::Completed,
            UploadStatus::Failed { .. } => StatusKind::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Completed { .. } | UploadStatus::Failed { .. })
    }

    /// Durable URL, only set once completed
    pub fn result(&self) -> Option<&str> {
        match self {
            UploadStatus::Completed { url } => Some(url),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            UploadStatus::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// 不带数据的状态标签，用于快照和聚合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Pending,
    Uploading,
    Completed,
    Failed,
}

/// 上传者
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Owner {
    pub user_id: String,
    pub display_name: String,
}

impl Owner {
    pub const UNKNOWN_NAME: &'static str = "Unknown User";

    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        let display_name = if display_name.trim().is_empty() {
            Self::UNKNOWN_NAME.to_string()
        } else {
            display_name
        };

        Self {
            user_id: user_id.into(),
            display_name,
        }
    }
}

/// 上传结果归属的位置
pub trait Destination: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// 元数据记录使用的分类
    fn category(&self) -> &str;

    /// 对象存储中的 key
    fn object_key(&self, timestamp: DateTime<Utc>) -> String;
}

/// 待入队的上传
#[derive(Debug, Clone)]
pub struct NewUpload<P, D> {
    pub payload: P,
    pub destination: D,
    pub owner: Option<Owner>,
}

impl<P, D> NewUpload<P, D> {
    pub fn new(payload: P, destination: D, owner: Owner) -> Self {
        Self {
            payload,
            destination,
            owner: Some(owner),
        }
    }
}

/// 上传项的描述性视图（不含数据本身）
///
/// Also the unit of the persisted snapshot.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord<D> {
    pub id: UploadId,
    pub destination: D,
    pub owner: Owner,
    #[serde(flatten)]
    pub status: UploadStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
}

impl<D> UploadRecord<D> {
    pub fn kind(&self) -> StatusKind {
        self.status.kind()
    }

    pub fn result(&self) -> Option<&str> {
        self.status.result()
    }

    pub fn error(&self) -> Option<&str> {
        self.status.error()
    }
}

/// 单个上传项在某一时刻的可见状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemSnapshot {
    pub id: UploadId,
    pub status: StatusKind,
    pub progress: u8,
}

/// 一个队列实例在某一时刻的可见状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub items: Vec<ItemSnapshot>,
}

impl QueueSnapshot {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
