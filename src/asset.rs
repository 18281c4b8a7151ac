//! Resolves remote file references to locally cached, site-relative paths.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::cache::DiskCache;
use crate::notion::model::FileRef;

/// Where a file reference points, which decides how its cache key is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Arbitrary URL; the query string is part of its identity.
    External,
    /// Notion-hosted object; the query string is a rotating signature.
    Hosted,
}

impl Origin {
    pub fn namespace(&self) -> &'static str {
        match self {
            Origin::External => "external",
            Origin::Hosted => "notion",
        }
    }
}

/// Network side of asset resolution.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Content type reported for `url` by a HEAD request, if any.
    async fn content_type(&self, url: &Url) -> Result<Option<String>>;

    /// GET `url` and stream the body into a new file at `dest`.
    async fn download(&self, url: &Url, dest: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("notion-blog/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn content_type(&self, url: &Url) -> Result<Option<String>> {
        let res = self
            .http
            .head(url.clone())
            .send()
            .await
            .with_context(|| format!("HEAD {url} failed"))?;
        if !res.status().is_success() {
            warn!(%url, status=%res.status(), "HEAD request rejected; caching without extension");
            return Ok(None);
        }
        Ok(res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string))
    }

    async fn download(&self, url: &Url, dest: &Path) -> Result<()> {
        let start = std::time::Instant::now();
        let mut res = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;
        if !res.status().is_success() {
            return Err(anyhow!("download error {} for {}", res.status(), url));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("failed to create {}", dest.display()))?;
        let mut written = 0usize;
        while let Some(chunk) = res
            .chunk()
            .await
            .with_context(|| format!("failed reading body of {url}"))?
        {
            written += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        info!(%url, bytes = written, elapsed_ms = start.elapsed().as_millis() as u64, "downloaded asset");
        Ok(())
    }
}

#[derive(Clone)]
pub struct AssetResolver {
    cache: DiskCache,
    fetcher: Arc<dyn Fetcher>,
}

impl AssetResolver {
    pub fn new(cache: DiskCache, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { cache, fetcher }
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    /// Cache the referenced file and return its site-relative path. Returns
    /// `None` for reference kinds that carry no downloadable URL.
    pub async fn resolve(&self, file: &FileRef) -> Result<Option<String>> {
        match file {
            FileRef::External { external } => {
                self.resolve_url(&external.url, Origin::External).await.map(Some)
            }
            FileRef::File { file } => self.resolve_url(&file.url, Origin::Hosted).await.map(Some),
            FileRef::Unsupported => Ok(None),
        }
    }

    #[instrument(skip(self))]
    pub async fn resolve_url(&self, raw: &str, origin: Origin) -> Result<String> {
        let url = Url::parse(raw).with_context(|| format!("invalid asset URL {raw}"))?;
        let extension = match origin {
            Origin::Hosted => extension_from_path(&url),
            Origin::External => {
                let content_type = self.fetcher.content_type(&url).await?;
                content_type
                    .as_deref()
                    .map(extension_for_content_type)
                    .unwrap_or_default()
                    .to_string()
            }
        };
        let key = cache_key(&url, origin, &extension)?;
        debug!(%key, "resolved asset cache key");

        let fetcher = Arc::clone(&self.fetcher);
        self.cache
            .file(&key, move |dest| async move { fetcher.download(&url, &dest).await })
            .await
    }
}

/// `{namespace}/{host}/{sha256(identity)}{extension}`
pub fn cache_key(url: &Url, origin: Origin, extension: &str) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("asset URL {url} has no host"))?;
    Ok(format!(
        "{}/{}/{}{}",
        origin.namespace(),
        host,
        sha256_hex(&identity(url, origin)),
        extension
    ))
}

/// The part of the URL that identifies the asset.
fn identity(url: &Url, origin: Origin) -> String {
    match (origin, url.query()) {
        (Origin::External, Some(query)) => format!("{}?{}", url.path(), query),
        _ => url.path().to_string(),
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Extension (with leading dot) of the last URL path segment, or empty.
pub fn extension_from_path(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

pub fn extension_for_content_type(content_type: &str) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/avif" => ".avif",
        "image/svg+xml" => ".svg",
        "image/x-icon" | "image/vnd.microsoft.icon" => ".ico",
        "video/mp4" => ".mp4",
        "video/quicktime" => ".mov",
        "video/webm" => ".webm",
        "video/x-msvideo" => ".avi",
        "audio/mpeg" => ".mp3",
        "audio/ogg" => ".ogg",
        "application/pdf" => ".pdf",
        "application/zip" => ".zip",
        "text/plain" => ".txt",
        _ => "",
    }
}
