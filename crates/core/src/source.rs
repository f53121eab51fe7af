//! Where PDF bytes come from: a local folder or an HTTP object store.

use crate::error::RagError;
use crate::models::Document;
use async_trait::async_trait;
use reqwest::Client;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;
use walkdir::WalkDir;

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Loads the document stored at `location`. The document's source is
    /// [`DocumentSource::key_for`] of the location, so spellings of the same
    /// location share one document id.
    async fn fetch(&self, location: &str) -> Result<Document, RagError>;

    /// Canonical key of `location`.
    fn key_for(&self, location: &str) -> String {
        location.trim_start_matches('/').to_string()
    }
}

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Reads documents below a root directory. Documents are keyed by their
/// `/`-separated path relative to the root.
#[derive(Debug, Clone)]
pub struct LocalDocumentSource {
    root: PathBuf,
}

impl LocalDocumentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root-relative key of `location`. Absolute locations must lie under the root.
    fn relative_key(&self, location: &str) -> Result<String, RagError> {
        let path = Path::new(location);
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root).map_err(|_| {
                RagError::Source(format!("{location} is outside {}", self.root.display()))
            })?
        } else {
            path
        };

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => {
                    return Err(RagError::Source(format!(
                        "{location} escapes the document root"
                    )))
                }
            }
        }
        if parts.is_empty() {
            return Err(RagError::Source(format!("{location} names no file")));
        }
        Ok(parts.join("/"))
    }
}

#[async_trait]
impl DocumentSource for LocalDocumentSource {
    async fn fetch(&self, location: &str) -> Result<Document, RagError> {
        let key = self.relative_key(location)?;
        let path = self.root.join(&key);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|error| RagError::Source(format!("cannot read {}: {error}", path.display())))?;
        debug!(path = %path.display(), bytes = bytes.len(), "read local document");
        Ok(Document::from_bytes(key, bytes))
    }

    fn key_for(&self, location: &str) -> String {
        self.relative_key(location).unwrap_or_else(|_| location.to_string())
    }
}

/// Downloads documents from `{base_url}/{location}`, for example an object
/// store bucket exposed over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDocumentSource {
    client: Client,
    base_url: Url,
}

impl HttpDocumentSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RagError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|error| RagError::Configuration(format!("invalid source url {base_url}: {error}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| RagError::Configuration(format!("http client setup failed: {error}")))?;
        Ok(Self { client, base_url })
    }

    fn url_for(&self, location: &str) -> Result<Url, RagError> {
        self.base_url
            .join(location.trim_start_matches('/'))
            .map_err(|error| RagError::Source(format!("invalid location {location}: {error}")))
    }
}

#[async_trait]
impl DocumentSource for HttpDocumentSource {
    async fn fetch(&self, location: &str) -> Result<Document, RagError> {
        let url = self.url_for(location)?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|error| RagError::Source(format!("GET {url} failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RagError::Source(format!("GET {url} returned {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|error| RagError::Source(format!("reading {url} failed: {error}")))?;
        debug!(%url, bytes = bytes.len(), "downloaded document");
        Ok(Document::from_bytes(self.key_for(location), bytes.to_vec()))
    }
}
