use anyhow::{Context, Result};
use reqwest::Url;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::Path;
use tokio_util::io::ReaderStream;

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid server URL")?;
        if !matches!(base_url.scheme(), "http" | "https") {
            anyhow::bail!("server URL must start with http:// or https://");
        }
        if base_url.cannot_be_a_base() {
            anyhow::bail!("server URL cannot be used as a base: {base_url}");
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    /// Append path segments to the server URL, keeping any path prefix.
    /// Each segment is percent-encoded, so `/` or `?` inside one stays literal.
    pub fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("server URL cannot be used as a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("API error ({}): {}", status, error_detail(&body));
        }
        serde_json::from_str(&body).context("failed to decode API response")
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.url(&["health"])?;
        self.send_json(self.http.get(url)).await
    }

    /// Upload a file as the `file` field, streaming it from disk.
    pub async fn upload_file(&self, path: &Path, filename: &str) -> Result<UploadResponse> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        let len = file.metadata().await?.len();

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, len)
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")?;
        let form = Form::new().part("file", part);

        let url = self.url(&["upload"])?;
        self.send_json(self.http.post(url).multipart(form)).await
    }

    pub async fn get_chunks(&self, file_id: &str) -> Result<UploadResponse> {
        let url = self.url(&["chunks", file_id])?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn process(&self, payload: &serde_json::Value) -> Result<ProcessResponse> {
        let url = self.url(&["process"])?;
        self.send_json(self.http.post(url).json(payload)).await
    }
}

/// Pull `detail` out of an error body, falling back to the raw text.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.detail)
        .unwrap_or_else(|_| body.to_string())
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub chunk_number: u64,
    pub chunk_filename: String,
    pub chunk_path: String,
    pub chunk_size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub file_id: String,
    pub original_filename: String,
    pub original_size: u64,
    pub chunked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_chunks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<ChunkInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessResponse {
    pub response: String,
}
