//! Download, verification, staging and the swap into place.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use sk_core::{Error, Package};
use tracing::{debug, warn};

use crate::bucket::PathGuard;
use crate::extract::{
    ArchiveKind, ExtractOptions, copy_payload, extract_archive_as, regularize,
};
use crate::progress::Progress;
use crate::verify::verify_file;

use super::Installer;

impl Installer {
    /// Fetch, stage and swap `package` into its directory, then link it.
    pub(super) async fn deploy(
        &self,
        package: &Package,
        progress: Option<Arc<Progress>>,
    ) -> Result<(), Error> {
        self.layout.ensure()?;
        let _guard = self.lock_package(&package.name)?;

        let archive = self.fetch(package, progress.clone()).await?;

        let staging = self
            .layout
            .packages_dir()
            .join(format!(".{}.tmp", package.name));
        if staging.exists() {
            fs::remove_dir_all(&staging)
                .map_err(|e| Error::io("failed to clear stale staging directory", e))?;
        }
        let mut staging_guard = PathGuard::new(staging.clone());

        if let Some(progress) = &progress {
            progress.reset();
        }

        let extension = package.extension.clone();
        let stage_from = archive.clone();
        let stage_to = staging.clone();
        tokio::task::spawn_blocking(move || {
            stage(&stage_from, &stage_to, &extension, progress.as_deref())
        })
        .await
        .map_err(|e| Error::Io {
            message: format!("staging task failed: {e}"),
        })??;

        self.activate(&staging, package)?;
        staging_guard.disarm();
        Ok(())
    }

    /// Swap `staging` in as the package directory, then move the links
    /// over. Links are only touched once the swap has succeeded.
    pub(super) fn activate(&self, staging: &Path, package: &Package) -> Result<(), Error> {
        let target = self.layout.package_dir(&package.name);
        swap_into_place(staging, &target)?;

        self.linker.unlink(&target)?;
        self.linker.link(&target, &package.links)?;
        self.linker.link(&target, &package.launchers)?;
        Ok(())
    }

    /// Path of a verified download of `package`, reusing the cache when the
    /// cached file still matches the manifest checksum.
    ///
    /// Each URL gets its own cache slot, so the file keeps whatever name the
    /// server gave it and is still found on the next run.
    async fn fetch(
        &self,
        package: &Package,
        progress: Option<Arc<Progress>>,
    ) -> Result<PathBuf, Error> {
        let slot = cache_slot(&self.layout.cache_dir(), &package.url);

        if let Some(checksum) = &package.checksum
            && let Some(cached) = cached_file(&slot)
        {
            if verify_file(&cached, checksum).is_ok() {
                debug!(package = %package.name, path = %cached.display(), "using cached download");
                return Ok(cached);
            }
            debug!(path = %cached.display(), "cached download is stale");
        }

        if slot.exists() {
            fs::remove_dir_all(&slot)
                .map_err(|e| Error::io(&format!("failed to clear {}", slot.display()), e))?;
        }
        fs::create_dir_all(&slot)
            .map_err(|e| Error::io(&format!("failed to create {}", slot.display()), e))?;

        let path = self
            .http
            .download(&package.url, &slot, true, progress)
            .await?;

        if let Some(checksum) = &package.checksum
            && let Err(e) = verify_file(&path, checksum)
        {
            let _ = fs::remove_file(&path);
            return Err(e);
        }
        Ok(path)
    }
}

/// Cache directory for downloads of `url`.
fn cache_slot(cache: &Path, url: &str) -> PathBuf {
    let digest = Sha256::digest(url.as_bytes());
    let key: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    cache.join(key)
}

/// The completed download in `slot`, if there is one.
fn cached_file(slot: &Path) -> Option<PathBuf> {
    fs::read_dir(slot)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.is_file() && p.extension().is_none_or(|ext| ext != "part"))
}

/// Unpack `archive` into `staging`. Anything that is not a known archive
/// format is copied in as a single executable.
fn stage(
    archive: &Path,
    staging: &Path,
    extension: &str,
    progress: Option<&Progress>,
) -> Result<(), Error> {
    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::format(format!("bad download path {}", archive.display())))?;

    let kind = if extension.is_empty() {
        ArchiveKind::detect(&file_name)
    } else {
        ArchiveKind::detect(extension)
    };

    match kind {
        Some(kind) => {
            let options = ExtractOptions {
                progress,
                ..Default::default()
            };
            extract_archive_as(archive, kind, staging, &options)?;
            regularize(staging)
        }
        None => {
            fs::create_dir_all(staging)
                .map_err(|e| Error::io(&format!("failed to create {}", staging.display()), e))?;
            copy_payload(archive, staging, &file_name).map(|_| ())
        }
    }
}

/// Rename `staging` onto `target`. A previous `target` is kept aside as
/// `.<name>.old` and put back if the final rename fails.
pub fn swap_into_place(staging: &Path, target: &Path) -> Result<(), Error> {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::format(format!("bad package path {}", target.display())))?;
    let old = target.with_file_name(format!(".{name}.old"));

    if old.exists() {
        fs::remove_dir_all(&old)
            .map_err(|e| Error::io(&format!("failed to remove {}", old.display()), e))?;
    }

    let had_previous = target.exists();
    if had_previous {
        fs::rename(target, &old)
            .map_err(|e| Error::io("failed to move previous version aside", e))?;
    }

    if let Err(e) = fs::rename(staging, target) {
        if had_previous && let Err(restore) = fs::rename(&old, target) {
            warn!(
                package = %name,
                error = %restore,
                "failed to restore previous version"
            );
        }
        return Err(Error::io(
            &format!("failed to move {} into place", target.display()),
            e,
        ));
    }

    if had_previous && let Err(e) = fs::remove_dir_all(&old) {
        warn!(path = %old.display(), error = %e, "failed to remove previous version");
    }
    Ok(())
}
