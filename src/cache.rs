//! Key-addressed on-disk caches.
//!
//! `fileCache/` holds downloaded binary assets that are created once and never
//! invalidated. `jsonCache/` holds computed values that are recomputed when an
//! invalidation predicate says the stored copy is stale.
//!
//! Entries are written to a sibling temporary file and renamed into place only
//! after the producer succeeded, so a failed download or render never leaves a
//! half-written entry behind. Two concurrent producers for the same key are not
//! deduplicated: both run and the last rename wins.

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs;
use tracing::{debug, warn};

const FILE_CACHE_DIR: &str = "fileCache";
const JSON_CACHE_DIR: &str = "jsonCache";

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
    /// `root` expressed relative to the site root, used for served paths.
    served_root: PathBuf,
}

impl DiskCache {
    /// `root` is the cache directory; `site_root` is the directory the site
    /// generator serves from. The cache must live below the site root.
    pub fn new(root: impl Into<PathBuf>, site_root: impl AsRef<Path>) -> Result<Self> {
        let root = root.into();
        let abs_root = absolutize(&root)?;
        let abs_site = absolutize(site_root.as_ref())?;
        let served_root = abs_root
            .strip_prefix(&abs_site)
            .map(Path::to_path_buf)
            .map_err(|_| {
                anyhow!(
                    "cache dir {} is not inside site root {}",
                    abs_root.display(),
                    abs_site.display()
                )
            })?;
        Ok(Self { root, served_root })
    }

    pub fn file_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(FILE_CACHE_DIR).join(checked_key(key)?))
    }

    pub fn json_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(JSON_CACHE_DIR).join(checked_key(key)?))
    }

    /// Site-relative URL path (always `/`-separated, leading `/`) of a file
    /// cache entry.
    pub fn served_path(&self, key: &str) -> Result<String> {
        let rel = self.served_root.join(FILE_CACHE_DIR).join(checked_key(key)?);
        let parts: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        Ok(format!("/{}", parts.join("/")))
    }

    /// Return the served path for `key`, running `factory` first if no file
    /// exists yet. The factory receives the path it must create; the entry
    /// only appears under `key` once the factory returned `Ok`.
    pub async fn file<F, Fut>(&self, key: &str, factory: F) -> Result<String>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let path = self.file_path(key)?;
        if !exists(&path).await {
            ensure_parent(&path).await?;
            let tmp = temp_path(&path);
            debug!(key, "file cache miss");
            if let Err(err) = factory(tmp.clone()).await {
                let _ = fs::remove_file(&tmp).await;
                return Err(err.context(format!("failed to populate file cache entry {key}")));
            }
            if !exists(&tmp).await {
                bail!("file cache producer for {key} did not create a file");
            }
            fs::rename(&tmp, &path)
                .await
                .with_context(|| format!("failed to move cache entry into {}", path.display()))?;
        }
        self.served_path(key)
    }

    /// Return the cached value for `key`, computing it with `factory` when it
    /// is absent, unreadable, or `invalidate` returns true for the stored one.
    pub async fn json<T, P, F, Fut>(&self, key: &str, invalidate: P, factory: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        P: FnOnce(&T) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let path = self.json_path(key)?;
        if exists(&path).await {
            let raw = fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            match serde_json::from_str::<T>(&raw) {
                Ok(stored) => {
                    if !invalidate(&stored) {
                        debug!(key, "json cache hit");
                        return Ok(stored);
                    }
                    debug!(key, "json cache entry invalidated");
                }
                Err(err) => warn!(key, %err, "discarding unreadable json cache entry"),
            }
        }

        let value = factory().await?;
        ensure_parent(&path).await?;
        let serialized = serde_json::to_string(&value)
            .with_context(|| format!("failed to serialize json cache entry {key}"))?;
        let tmp = temp_path(&path);
        fs::write(&tmp, serialized)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to move cache entry into {}", path.display()))?;
        Ok(value)
    }
}

async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{}.{}.{}.part", name, std::process::id(), n))
}

/// Keys are relative `/`-separated paths that must stay inside the cache.
fn checked_key(key: &str) -> Result<&Path> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !valid {
        bail!("invalid cache key {key:?}");
    }
    Ok(path)
}

/// Lexically absolute version of `path` (no symlink resolution, no fs access).
fn absolutize(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("failed to read current directory")?
            .join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}
