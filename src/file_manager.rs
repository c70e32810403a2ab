// src/file_manager.rs - Download collaborator for job inputs
use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use url::Url;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid url '{0}'")]
    InvalidUrl(String),
    #[error("unsupported url scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server responded with {0}")]
    Status(u16),
    #[error("'{0}' is outside the local source directory")]
    OutsideRoot(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fetches a remote file into a local directory.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Save `url` under `dest_dir` and return the local path.
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, DownloadError>;
}

/// Downloads over HTTP(S). `file://` URLs are refused unless a local source
/// directory is configured, and then only resolve inside it.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
    local_root: Option<PathBuf>,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, local_root: None })
    }

    pub fn with_local_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.local_root = Some(root.into());
        self
    }

    /// Resolve a `file://` URL, following links, and require the result to
    /// sit under the local source directory.
    async fn local_source(&self, url: &Url) -> Result<PathBuf, DownloadError> {
        let Some(root) = &self.local_root else {
            return Err(DownloadError::UnsupportedScheme(url.scheme().to_string()));
        };
        let source = url
            .to_file_path()
            .map_err(|_| DownloadError::InvalidUrl(url.to_string()))?;
        let root = fs::canonicalize(root).await?;
        let source = fs::canonicalize(&source).await?;
        if !source.starts_with(&root) || !fs::metadata(&source).await?.is_file() {
            return Err(DownloadError::OutsideRoot(source.display().to_string()));
        }
        Ok(source)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, DownloadError> {
        let parsed = Url::parse(url).map_err(|_| DownloadError::InvalidUrl(url.to_string()))?;
        let local = match parsed.scheme() {
            "http" | "https" => None,
            "file" => Some(self.local_source(&parsed).await?),
            other => return Err(DownloadError::UnsupportedScheme(other.to_string())),
        };
        fs::create_dir_all(dest_dir).await?;
        let dest = dest_dir.join(file_name_for(&parsed));

        match local {
            None => {
                tracing::info!("Downloading {} -> {}", parsed, dest.display());
                let response = self.client.get(parsed.clone()).send().await?;
                if !response.status().is_success() {
                    return Err(DownloadError::Status(response.status().as_u16()));
                }
                let mut file = fs::File::create(&dest).await?;
                let mut body = response.bytes_stream();
                while let Some(chunk) = body.next().await {
                    file.write_all(&chunk?).await?;
                }
                file.flush().await?;
            }
            Some(source) => {
                tracing::info!("Copying {} -> {}", source.display(), dest.display());
                fs::copy(&source, &dest).await?;
            }
        }
        Ok(dest)
    }
}

/// Last path segment of the URL with anything outside `[A-Za-z0-9._-]`
/// replaced, or `download` when there is none.
pub fn file_name_for(url: &Url) -> String {
    let last = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    let decoded = percent_encoding::percent_decode_str(last).decode_utf8_lossy();
    let name: String = decoded
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    if name.is_empty() || name.chars().all(|c| c == '.') {
        "download".to_string()
    } else {
        name
    }
}
