use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use url::Url;
use crate::queue::Destination;
use super::errors::{Result, TransportError};
use super::progress_stream::{split_chunks, ProgressStream};
use super::types::{ProgressReporter, Transport, UploadBody};
use super::upload_metadata::UploadMetadata;

/// Tracing target for the tus transport.
const TRACING_TARGET: &str = "photo_queue::transport::tus";

pub const TUS_RESUMABLE: &str = "1.0.0";

const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct TusConfig {
    /// tus 创建端点
    pub endpoint: String,
    /// Bearer token
    pub token: Option<String>,
    /// 单个请求超时
    pub timeout: Duration,
    /// 请求体分块大小
    pub chunk_size: usize,
}

impl Default for TusConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// tus 可续传上传
#[derive(Debug, Clone)]
pub struct TusTransport {
    client: Client,
    config: TusConfig,
}

impl TusTransport {
    pub fn new(config: TusConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    fn create_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("Tus-Resumable", HeaderValue::from_static(TUS_RESUMABLE));

        if let Some(token) = &self.config.token {
            headers.insert("Authorization", HeaderValue::from_str(&format!("Bearer {}", token))?);
        }

        Ok(headers)
    }

    pub(crate) fn parse_offset_header(status: u16, headers: &HeaderMap) -> Result<u64> {
        match headers.get("Upload-Offset") {
            Some(value) => value
                .to_str()
                .map_err(|err| TransportError::header_parse("Upload-Offset", err.to_string()))?
                .parse::<u64>()
                .map_err(|err| TransportError::header_parse("Upload-Offset", err.to_string())),
            None => Err(TransportError::server_error(status, "No 'upload-offset' header in response")),
        }
    }

    /// 服务器可能返回相对路径
    pub(crate) fn resolve_location(endpoint: &str, location: &str) -> Result<String> {
        if location.starts_with("http://") || location.starts_with("https://") {
            return Ok(location.to_string());
        }

        let base = Url::parse(endpoint)?;
        Ok(base.join(location)?.to_string())
    }

    pub async fn create_upload(&self, upload_length: u64, metadata: &UploadMetadata) -> Result<String> {
        let mut headers = self.create_headers()?;
        headers.insert("Upload-Length", HeaderValue::from_str(&upload_length.to_string())?);

        let metadata_header = metadata.to_header();
        if !metadata_header.is_empty() {
            headers.insert("Upload-Metadata", HeaderValue::from_str(&metadata_header)?);
        }

        let response = self
            .client
            .post(&self.config.endpoint)
            .headers(headers)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            return Err(TransportError::server_error(status.as_u16(), "Failed to create upload"));
        }

        let location = response
            .headers()
            .get("Location")
            .ok_or_else(|| TransportError::server_error(status.as_u16(), "No 'location' header in response"))?
            .to_str()
            .map_err(|err| TransportError::header_parse("Location", err.to_string()))?;

        Self::resolve_location(&self.config.endpoint, location)
    }

    pub async fn get_upload_offset(&self, upload_url: &str) -> Result<u64> {
        let headers = self.create_headers()?;
        let response = self.client.head(upload_url).headers(headers).send().await?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::NO_CONTENT {
            return Err(TransportError::server_error(status.as_u16(), "Failed to get upload offset"));
        }

        Self::parse_offset_header(status.as_u16(), response.headers())
    }

    /// 从 offset 开始以流的方式发送剩余数据
    async fn patch_from(&self, upload_url: &str, data: Bytes, offset: u64, progress: &ProgressReporter) -> Result<()> {
        let total_bytes = data.len() as u64;
        let remaining = data.slice(offset as usize..);
        let remaining_size = remaining.len() as u64;

        let chunks = split_chunks(remaining, self.config.chunk_size)
            .into_iter()
            .map(Ok::<Bytes, std::io::Error>);
        let body_stream = ProgressStream::new(
            futures_util::stream::iter(chunks),
            progress.clone(),
            offset,
            total_bytes,
        );

        let mut headers = self.create_headers()?;
        headers.insert("Content-Type", HeaderValue::from_static("application/offset+octet-stream"));
        headers.insert("Upload-Offset", HeaderValue::from_str(&offset.to_string())?);
        headers.insert("Content-Length", HeaderValue::from_str(&remaining_size.to_string())?);

        let response = self.client
            .patch(upload_url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body_stream))
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::NO_CONTENT {
            return Err(TransportError::server_error(
                status.as_u16(),
                format!("Upload failed with status {}", status),
            ));
        }

        let final_offset = Self::parse_offset_header(status.as_u16(), response.headers())?;
        if final_offset != total_bytes {
            return Err(TransportError::UploadIncomplete {
                expected: total_bytes,
                actual: final_offset,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl<P, D> Transport<P, D> for TusTransport
where
    P: UploadBody,
    D: Destination,
{
    async fn upload(&self, payload: P, destination: &D, progress: ProgressReporter) -> Result<String> {
        let object_key = destination.object_key(Utc::now());

        let mut metadata = UploadMetadata::new()
            .with_filename(payload.file_name().unwrap_or(object_key.as_str()))
            .with("objectKey", object_key.clone())
            .with("category", destination.category());
        if let Some(content_type) = payload.content_type() {
            metadata = metadata.with_filetype(content_type);
        }

        let data = payload.into_bytes();
        let total_bytes = data.len() as u64;

        let upload_url = self.create_upload(total_bytes, &metadata).await?;
        tracing::debug!(target: TRACING_TARGET, %upload_url, %object_key, total_bytes, "Created tus upload");

        let offset = self.get_upload_offset(&upload_url).await?.min(total_bytes);
        progress.report(offset, total_bytes);

        if offset < total_bytes {
            self.patch_from(&upload_url, data, offset, &progress).await?;
        }

        progress.report(total_bytes, total_bytes);

        Ok(upload_url)
    }
}
