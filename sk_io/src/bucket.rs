//! Bucket snapshots: revision feed, snapshot download and directory swap.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use sk_core::{Bucket, Error, ManifestSource};
use tracing::{debug, info, warn};

use crate::extract::{ArchiveKind, ExtractOptions, extract_archive_as, regularize};
use crate::layout::Layout;
use crate::traits::HttpClient;

const REVISION_FILE: &str = ".revision";

static ENTRY_ID: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<entry\b[^>]*>.*?<id>\s*([^<]*?)\s*</id>").ok());

/// Revision id of the newest commit: the first feed entry's `<id>`, after
/// its last `/`.
pub fn parse_feed_id(feed: &str) -> Result<String, Error> {
    let entry_id = ENTRY_ID
        .as_ref()
        .ok_or_else(|| Error::format("feed entry pattern failed to compile"))?;
    let id = entry_id
        .captures(feed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| Error::format("revision feed has no entry id"))?;

    match id.rsplit_once('/') {
        Some((_, rev)) if !rev.is_empty() => Ok(rev.to_string()),
        _ => Err(Error::format(format!("invalid bucket revision id: '{id}'"))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Updated { revision: String },
    UpToDate { revision: String },
}

/// Removes a file or directory on drop unless disarmed.
pub(crate) struct PathGuard {
    path: PathBuf,
    armed: bool,
}

impl PathGuard {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let result = if self.path.is_dir() {
            fs::remove_dir_all(&self.path)
        } else {
            fs::remove_file(&self.path)
        };
        if let Err(e) = result
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "failed to clean up");
        }
    }
}

pub struct BucketSync {
    layout: Layout,
    http: Arc<dyn HttpClient>,
}

impl BucketSync {
    pub fn new(layout: Layout, http: Arc<dyn HttpClient>) -> Self {
        Self { layout, http }
    }

    pub fn feed_url(bucket: &Bucket) -> String {
        format!("{}/commits/master.atom", bucket.url.trim_end_matches('/'))
    }

    pub fn snapshot_url(bucket: &Bucket, id: &str) -> String {
        format!("{}/archive/{id}.zip", bucket.url.trim_end_matches('/'))
    }

    pub async fn fetch_newest(&self, bucket: &Bucket) -> Result<String, Error> {
        let url = Self::feed_url(bucket);
        debug!(bucket = %bucket.name, url = %url, "fetching revision feed");
        let body = self.http.get(&url).await?;
        parse_feed_id(&String::from_utf8_lossy(&body))
    }

    /// Revision of the local snapshot, if it was synced by us.
    pub fn local_revision(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.layout.bucket_dir(name).join(REVISION_FILE))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Replace the local snapshot of `bucket` with revision `id`.
    ///
    /// The previous snapshot is only removed once the new one is fully
    /// extracted; the downloaded archive is always removed.
    pub async fn update(&self, bucket: &Bucket, id: &str) -> Result<(), Error> {
        Bucket::validate_name(&bucket.name)?;
        let temp_dir = self.layout.bucket_temp_dir();
        fs::create_dir_all(&temp_dir)
            .map_err(|e| Error::io(&format!("failed to create {}", temp_dir.display()), e))?;

        let url = Self::snapshot_url(bucket, id);
        let archive = self.http.download(&url, &temp_dir, true, None).await?;
        let _archive_guard = PathGuard::new(archive.clone());

        let staged = temp_dir.join(&bucket.name);
        if staged.exists() {
            fs::remove_dir_all(&staged)
                .map_err(|e| Error::io("failed to clear stale staging directory", e))?;
        }
        let mut staged_guard = PathGuard::new(staged.clone());

        let extract_from = archive.clone();
        let extract_to = staged.clone();
        tokio::task::spawn_blocking(move || {
            extract_archive_as(
                &extract_from,
                ArchiveKind::Zip,
                &extract_to,
                &ExtractOptions::default(),
            )?;
            regularize(&extract_to)
        })
        .await
        .map_err(|e| Error::Io {
            message: format!("extraction task failed: {e}"),
        })??;

        fs::write(staged.join(REVISION_FILE), id)
            .map_err(|e| Error::io("failed to record bucket revision", e))?;

        let target = self.layout.bucket_dir(&bucket.name);
        swap_dir(&staged, &target)?;
        staged_guard.disarm();

        info!(bucket = %bucket.name, revision = id, "bucket updated");
        Ok(())
    }

    /// Fetch the newest revision and update if it differs from the local
    /// snapshot (or always, when `force`).
    pub async fn sync(&self, bucket: &Bucket, force: bool) -> Result<SyncOutcome, Error> {
        Bucket::validate_name(&bucket.name)?;
        let revision = self.fetch_newest(bucket).await?;
        if !force && self.local_revision(&bucket.name).as_deref() == Some(revision.as_str()) {
            debug!(bucket = %bucket.name, revision = %revision, "bucket up to date");
            return Ok(SyncOutcome::UpToDate { revision });
        }
        self.update(bucket, &revision).await?;
        Ok(SyncOutcome::Updated { revision })
    }
}

fn swap_dir(staged: &Path, target: &Path) -> Result<(), Error> {
    if target.exists() {
        fs::remove_dir_all(target)
            .map_err(|e| Error::io(&format!("failed to remove {}", target.display()), e))?;
    }
    fs::rename(staged, target)
        .map_err(|e| Error::io(&format!("failed to move snapshot into {}", target.display()), e))
}

/// Manifests stored as `<root>/buckets/<bucket>/<name>.json`.
#[derive(Debug, Clone)]
pub struct BucketDirSource {
    layout: Layout,
}

impl BucketDirSource {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Package names carried by a bucket, for search.
    pub fn package_names(&self, bucket: &Bucket) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.layout.bucket_dir(&bucket.name)) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.file_name()
                    .to_str()
                    .and_then(|n| n.strip_suffix(".json"))
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        names
    }
}

impl ManifestSource for BucketDirSource {
    fn load(&self, bucket: &Bucket, name: &str) -> Result<Option<String>, Error> {
        let path = self.layout.bucket_dir(&bucket.name).join(format!("{name}.json"));
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(&format!("failed to read {}", path.display()), e)),
        }
    }
}
