use std::collections::BTreeMap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// tus `Upload-Metadata` 头部内容
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub filename: Option<String>,
    pub filetype: Option<String>,
    pub custom: BTreeMap<String, String>,
}

impl UploadMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_filetype(mut self, filetype: impl Into<String>) -> Self {
        self.filetype = Some(filetype.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }

    pub fn to_header(&self) -> String {
        let mut parts = Vec::new();

        if let Some(filename) = &self.filename {
            parts.push(format!("filename {}", STANDARD.encode(filename)));
        }

        if let Some(filetype) = &self.filetype {
            parts.push(format!("filetype {}", STANDARD.encode(filetype)));
        }

        for (key, value) in &self.custom {
            parts.push(format!("{} {}", key, STANDARD.encode(value)));
        }

        parts.join(",")
    }
}
