//! Installer for skep packages
//!
//! - `executor` - download, verification, staging and the directory swap
//! - `upgrade` - outdated detection and bulk upgrade

mod executor;
mod upgrade;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use sk_core::{Arch, Error, InstalledLock, Outcome, Resolver};
use tracing::info;
use walkdir::WalkDir;

use crate::bucket::BucketDirSource;
use crate::layout::Layout;
use crate::link::Linker;
use crate::lock::LockStore;
use crate::profile::ProfileStore;
use crate::progress::Progress;
use crate::traits::HttpClient;

pub use executor::swap_into_place;
pub use upgrade::{Outdated, UpgradeReport};

/// What `install` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed {
        name: String,
        version: String,
        bucket: String,
    },
    Upgraded {
        name: String,
        from: String,
        to: String,
        bucket: String,
    },
    UpToDate {
        name: String,
        version: String,
    },
}

/// Result of a cache cleanup
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupResult {
    pub files_removed: usize,
    pub bytes_freed: u64,
}

pub struct Installer {
    layout: Layout,
    http: Arc<dyn HttpClient>,
    profiles: ProfileStore,
    locks: LockStore,
    linker: Linker,
    arch: Arch,
}

impl Installer {
    pub fn new(layout: Layout, http: Arc<dyn HttpClient>, profiles: ProfileStore) -> Self {
        Self {
            locks: LockStore::new(&layout),
            linker: Linker::new(layout.links_dir()),
            layout,
            http,
            profiles,
            arch: Arch::host(),
        }
    }

    pub fn with_arch(mut self, arch: Arch) -> Self {
        self.arch = arch;
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    /// Install `name`, or upgrade it when a better candidate exists.
    ///
    /// With `force` an up-to-date package is reinstalled and a frozen one
    /// is upgraded anyway.
    pub async fn install(
        &self,
        name: &str,
        force: bool,
        progress: Option<Arc<Progress>>,
    ) -> Result<InstallOutcome, Error> {
        let profile = self.profiles.load()?;
        let source = BucketDirSource::new(self.layout.clone());
        let resolver = Resolver::new(&profile.buckets, &source, self.arch);

        let installed = self.locks.read(name)?;
        let package = match &installed {
            None => resolver.resolve(name).into_package(name)?,
            Some(lock) => match resolver.check_upgrade(name, lock).outcome {
                Outcome::Found(_) if profile.is_frozen(name) && !force => {
                    info!(package = name, version = %lock.version, "frozen, not upgrading");
                    return Err(Error::Frozen {
                        name: name.to_string(),
                    });
                }
                Outcome::Found(pkg) => pkg,
                _ if force => resolver.resolve(name).into_package(name)?,
                _ => {
                    return Ok(InstallOutcome::UpToDate {
                        name: name.to_string(),
                        version: lock.version.clone(),
                    });
                }
            },
        };

        self.deploy(&package, progress).await?;
        let lock = package.lock();
        self.locks.write(name, &lock)?;

        info!(package = name, version = %lock.version, bucket = %lock.bucket, "installed");
        Ok(match installed {
            Some(previous) if previous.version != lock.version => InstallOutcome::Upgraded {
                name: name.to_string(),
                from: previous.version,
                to: lock.version,
                bucket: lock.bucket,
            },
            _ => InstallOutcome::Installed {
                name: name.to_string(),
                version: lock.version,
                bucket: lock.bucket,
            },
        })
    }

    /// Remove links, package directory and lock. Returns the removed lock.
    ///
    /// With `force_delete` a package directory left behind without a lock
    /// is removed too.
    pub fn uninstall(&self, name: &str, force_delete: bool) -> Result<Option<InstalledLock>, Error> {
        let lock = self.locks.read(name)?;
        let package_dir = self.layout.package_dir(name);
        if lock.is_none() && !(force_delete && package_dir.exists()) {
            return Err(Error::NotInstalled {
                name: name.to_string(),
            });
        }

        let guard = self.lock_package(name)?;
        let unlinked = self.linker.unlink(&package_dir)?;
        if package_dir.exists() {
            fs::remove_dir_all(&package_dir).map_err(|e| {
                Error::io(&format!("failed to remove {}", package_dir.display()), e)
            })?;
        }
        self.locks.remove(name)?;
        drop(guard);
        let _ = fs::remove_file(self.package_lock_path(name));

        match &lock {
            Some(lock) => {
                info!(package = name, version = %lock.version, links = unlinked, "uninstalled")
            }
            None => info!(package = name, links = unlinked, "removed unlocked package directory"),
        }
        Ok(lock)
    }

    /// Installed packages, sorted by name
    pub fn list(&self) -> Result<Vec<(String, InstalledLock)>, Error> {
        self.locks.list()
    }

    /// Remove every downloaded file from the package cache.
    pub fn clean_cache(&self) -> Result<CleanupResult, Error> {
        let cache = self.layout.cache_dir();
        if !cache.exists() {
            return Ok(CleanupResult::default());
        }

        let mut result = CleanupResult::default();
        for entry in WalkDir::new(&cache).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() {
                result.files_removed += 1;
                result.bytes_freed += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }

        fs::remove_dir_all(&cache)
            .map_err(|e| Error::io(&format!("failed to remove {}", cache.display()), e))?;
        fs::create_dir_all(&cache)
            .map_err(|e| Error::io(&format!("failed to create {}", cache.display()), e))?;
        Ok(result)
    }

    fn package_lock_path(&self, name: &str) -> std::path::PathBuf {
        self.layout.packages_dir().join(format!(".{name}.lock"))
    }

    /// Exclusive per-package lock, released when the file is dropped.
    fn lock_package(&self, name: &str) -> Result<fs::File, Error> {
        use fs4::fs_std::FileExt;

        let path = self.package_lock_path(name);
        ensure_parent(&path)?;
        let file = fs::File::create(&path)
            .map_err(|e| Error::io("failed to create package lock", e))?;
        file.lock_exclusive()
            .map_err(|e| Error::io("failed to acquire package lock", e))?;
        Ok(file)
    }
}

fn ensure_parent(path: &Path) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::io(&format!("failed to create {}", parent.display()), e))?;
    }
    Ok(())
}
