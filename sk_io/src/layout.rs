use std::fs;
use std::path::{Path, PathBuf};

use sk_core::Error;

/// Directory layout under the installation root.
///
/// ```text
/// <root>/buckets/<bucket>/          bucket snapshots
/// <root>/buckets/temp/              sync staging
/// <root>/bin/pkgs/<name>/           installed packages
/// <root>/bin/pkgs/.cache/           downloaded archives
/// <root>/bin/locks/<name>.json      installed locks
/// <root>/bin/links/                 command links
/// <root>/config/skep.json           profile
/// ```
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn buckets_dir(&self) -> PathBuf {
        self.root.join("buckets")
    }

    pub fn bucket_dir(&self, name: &str) -> PathBuf {
        self.buckets_dir().join(name)
    }

    pub fn bucket_temp_dir(&self) -> PathBuf {
        self.buckets_dir().join("temp")
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.root.join("bin").join("pkgs")
    }

    pub fn package_dir(&self, name: &str) -> PathBuf {
        self.packages_dir().join(name)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.packages_dir().join(".cache")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("bin").join("locks")
    }

    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.locks_dir().join(format!("{name}.json"))
    }

    pub fn links_dir(&self) -> PathBuf {
        self.root.join("bin").join("links")
    }

    pub fn default_profile(&self) -> PathBuf {
        self.root.join("config").join("skep.json")
    }

    /// Create every directory of the layout.
    pub fn ensure(&self) -> Result<(), Error> {
        for dir in [
            self.buckets_dir(),
            self.packages_dir(),
            self.cache_dir(),
            self.locks_dir(),
            self.links_dir(),
        ] {
            fs::create_dir_all(&dir)
                .map_err(|e| Error::io(&format!("failed to create {}", dir.display()), e))?;
        }
        Ok(())
    }
}
