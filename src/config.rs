use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::photo::{PhotoDestination, PhotoStep};
use crate::queue::{Owner, Result};
use crate::transport::TusConfig;

// 用于以毫秒序列化 Duration
mod duration_ms {
    use std::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// 上传成功后的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// 保留，直到调用方显式清除
    #[default]
    Keep,
    /// 宽限期后自动移除
    Sweep {
        #[serde(rename = "grace_ms", with = "duration_ms")]
        grace: Duration,
    },
}

impl CompletionPolicy {
    pub fn sweep() -> Self {
        Self::Sweep { grace: DEFAULT_GRACE_PERIOD }
    }
}

/// 队列实例配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 合并连续入队的窗口
    #[serde(rename = "debounce_ms", with = "duration_ms")]
    pub debounce: Duration,
    pub completion: CompletionPolicy,
    /// 快照文件（不含照片数据）
    pub snapshot_file: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            completion: CompletionPolicy::Keep,
            snapshot_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    pub endpoint: String,
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_chunk_size() -> usize {
    256 * 1024
}

impl TransportConfig {
    pub fn to_tus_config(&self) -> TusConfig {
        TusConfig {
            endpoint: self.endpoint.clone(),
            token: self.token.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            chunk_size: self.chunk_size,
        }
    }
}

/// 命令行一次上传的内容
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub job_id: String,
    pub room_id: String,
    pub room_name: String,
    pub step: PhotoStep,
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// 元数据记录文件（JSON lines）
    pub records_file: Option<PathBuf>,
}

impl UploadConfig {
    pub fn destination(&self) -> PhotoDestination {
        PhotoDestination::new(&self.job_id, &self.room_id, &self.room_name, self.step)
    }

    pub fn owner(&self) -> Option<Owner> {
        self.user_id
            .as_ref()
            .map(|user_id| Owner::new(user_id, &self.user_name))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub transport: TransportConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    pub upload: UploadConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let config_str = fs::read_to_string(path)?;
        Self::from_toml_str(&config_str)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Config> {
        Ok(toml::from_str(config_str)?)
    }
}
