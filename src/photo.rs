//! Photo-specific payload and destination types.

use std::fmt;
use std::path::Path;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::queue::{Destination, QueueStore, UploadQueue};
use crate::transport::UploadBody;

/// 拍摄所处的作业步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhotoStep {
    Arrival,
    Assessment,
    Preexisting,
    PreDemo,
    Demo,
    PostDemo,
    DailyCheck,
    Final,
    Overall,
    Thermal,
    Containment,
    ExposedMaterial,
    CheckService,
}

impl PhotoStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoStep::Arrival => "arrival",
            PhotoStep::Assessment => "assessment",
            PhotoStep::Preexisting => "preexisting",
            PhotoStep::PreDemo => "pre-demo",
            PhotoStep::Demo => "demo",
            PhotoStep::PostDemo => "post-demo",
            PhotoStep::DailyCheck => "daily-check",
            PhotoStep::Final => "final",
            PhotoStep::Overall => "overall",
            PhotoStep::Thermal => "thermal",
            PhotoStep::Containment => "containment",
            PhotoStep::ExposedMaterial => "exposed-material",
            PhotoStep::CheckService => "check-service",
        }
    }

    pub fn category(&self) -> PhotoCategory {
        match self {
            PhotoStep::Arrival
            | PhotoStep::Assessment
            | PhotoStep::Preexisting
            | PhotoStep::PreDemo
            | PhotoStep::Overall
            | PhotoStep::Thermal => PhotoCategory::Before,
            PhotoStep::Demo | PhotoStep::ExposedMaterial => PhotoCategory::Demo,
            PhotoStep::PostDemo
            | PhotoStep::DailyCheck
            | PhotoStep::Containment
            | PhotoStep::CheckService => PhotoCategory::Progress,
            PhotoStep::Final => PhotoCategory::After,
        }
    }
}

impl fmt::Display for PhotoStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 报告中使用的照片分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoCategory {
    Before,
    Demo,
    Progress,
    After,
}

impl PhotoCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoCategory::Before => "before",
            PhotoCategory::Demo => "demo",
            PhotoCategory::Progress => "progress",
            PhotoCategory::After => "after",
        }
    }
}

/// 照片归属：作业、房间、步骤
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoDestination {
    pub job_id: String,
    pub room_id: String,
    pub room_name: String,
    pub step: PhotoStep,
}

impl PhotoDestination {
    pub fn new(
        job_id: impl Into<String>,
        room_id: impl Into<String>,
        room_name: impl Into<String>,
        step: PhotoStep,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            room_id: room_id.into(),
            room_name: room_name.into(),
            step,
        }
    }
}

impl Destination for PhotoDestination {
    fn category(&self) -> &str {
        self.step.category().as_str()
    }

    fn object_key(&self, timestamp: DateTime<Utc>) -> String {
        format!(
            "photos/{}/{}/{}_{}.jpg",
            self.job_id,
            self.room_id,
            self.step,
            timestamp.timestamp_millis(),
        )
    }
}

/// 本地拍摄的照片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoFile {
    pub name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl PhotoFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    pub fn jpeg(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::new(name, "image/jpeg", data)
    }

    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("photo.jpg")
            .to_string();

        Ok(Self::new(name, content_type_for(path), data))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl UploadBody for PhotoFile {
    fn file_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn content_type(&self) -> Option<&str> {
        Some(&self.content_type)
    }

    fn into_bytes(self) -> Bytes {
        self.data
    }
}

fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("heic") => "image/heic",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

pub type PhotoQueueStore = QueueStore<PhotoFile, PhotoDestination>;

pub type PhotoQueue = UploadQueue<PhotoFile, PhotoDestination>;
