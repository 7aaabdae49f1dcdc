//! Google Drive fetch adapter.
//!
//! Resolves a shared Drive link to its file id and downloads the file into a
//! temporary location so it can be uploaded like a local file.

use futures::StreamExt;
use reqwest::Url;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Public Drive download host.
pub const DEFAULT_DRIVE_BASE_URL: &str = "https://drive.google.com";

const DRIVE_HOSTS: &[&str] = &["drive.google.com", "docs.google.com"];

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("could not extract a Drive file id from URL: {0}")]
    InvalidSourceUrl(String),

    #[error("download failed with status {status}: {url}")]
    UpstreamFetch { status: u16, url: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether `source` looks like a Drive link rather than a local path.
pub fn is_drive_url(source: &str) -> bool {
    Url::parse(source)
        .ok()
        .and_then(|url| url.host_str().map(|host| DRIVE_HOSTS.contains(&host)))
        .unwrap_or(false)
}

/// Extract the file id from one of the known Drive link shapes:
/// `/file/d/{id}/...`, `/open?id={id}` and `/uc?id={id}`.
pub fn extract_file_id(source: &str) -> Result<String, DriveError> {
    let invalid = || DriveError::InvalidSourceUrl(source.to_string());
    let url = Url::parse(source).map_err(|_| invalid())?;
    if !url
        .host_str()
        .is_some_and(|host| DRIVE_HOSTS.contains(&host))
    {
        return Err(invalid());
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let id = match segments.as_slice() {
        ["file", "d", id, ..] => Some(id.to_string()),
        ["open"] | ["uc"] => url
            .query_pairs()
            .find(|(key, _)| key == "id")
            .map(|(_, value)| value.into_owned()),
        _ => None,
    };

    id.filter(|id| !id.is_empty()).ok_or_else(invalid)
}

/// A downloaded Drive file; the temporary copy is removed on drop.
pub struct DownloadedFile {
    pub file: NamedTempFile,
    pub filename: String,
    pub size: u64,
}

impl DownloadedFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

pub struct DriveClient {
    http: reqwest::Client,
    base_url: String,
}

impl DriveClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Download URL for a file id.
    pub fn download_url(&self, file_id: &str) -> String {
        format!("{}/uc?id={file_id}&export=download", self.base_url)
    }

    /// Stream a file into a temporary file.
    pub async fn download(&self, file_id: &str) -> Result<DownloadedFile, DriveError> {
        let url = self.download_url(file_id);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(DriveError::UpstreamFetch {
                status: response.status().as_u16(),
                url,
            });
        }

        let filename = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(disposition_filename)
            .unwrap_or_else(|| format!("{file_id}.mp3"));

        let temp = tempfile::Builder::new().prefix("chunkctl-").tempfile()?;
        let mut out = tokio::fs::File::create(temp.path()).await?;
        let mut body = response.bytes_stream();
        let mut size: u64 = 0;
        while let Some(block) = body.next().await {
            let block = block?;
            size += block.len() as u64;
            out.write_all(&block).await?;
        }
        out.flush().await?;
        tracing::debug!(file_id, size, path = %temp.path().display(), "Downloaded Drive file");

        Ok(DownloadedFile {
            file: temp,
            filename,
            size,
        })
    }
}

/// `filename="..."` from a Content-Disposition header value.
fn disposition_filename(value: &str) -> Option<String> {
    value
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_id_from_file_link() {
        assert_eq!(
            extract_file_id("https://drive.google.com/file/d/1AbC-xyz_9/view?usp=sharing").unwrap(),
            "1AbC-xyz_9"
        );
    }

    #[test]
    fn extracts_id_from_open_and_uc_links() {
        assert_eq!(
            extract_file_id("https://drive.google.com/open?id=abc123").unwrap(),
            "abc123"
        );
        assert_eq!(
            extract_file_id("https://docs.google.com/uc?id=abc123&export=download").unwrap(),
            "abc123"
        );
    }

    #[test]
    fn rejects_unknown_shapes() {
        for url in [
            "https://drive.google.com/drive/folders/abc",
            "https://drive.google.com/open",
            "https://example.com/file/d/abc/view",
            "not a url",
        ] {
            assert!(
                matches!(extract_file_id(url), Err(DriveError::InvalidSourceUrl(_))),
                "{url}"
            );
        }
    }

    #[test]
    fn detects_drive_urls() {
        assert!(is_drive_url("https://drive.google.com/file/d/x/view"));
        assert!(!is_drive_url("/tmp/lecture.mp3"));
        assert!(!is_drive_url("https://example.com/a.mp3"));
    }

    #[test]
    fn download_url_uses_base() {
        let client = DriveClient::new("http://127.0.0.1:9000/");
        assert_eq!(
            client.download_url("abc"),
            "http://127.0.0.1:9000/uc?id=abc&export=download"
        );
    }

    #[test]
    fn parses_disposition_filename() {
        assert_eq!(
            disposition_filename("attachment; filename=\"talk.mp3\"").as_deref(),
            Some("talk.mp3")
        );
        assert_eq!(disposition_filename("inline"), None);
    }
}
