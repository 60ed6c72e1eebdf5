use std::fs;
use std::path::{Path, PathBuf};

use sk_core::Error;
use tracing::{debug, warn};

use crate::archive::join_sanitize_path;

/// A command link: `relative/path` or `relative/path@alias`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpec {
    pub path: String,
    pub alias: String,
}

impl LinkSpec {
    pub fn parse(spec: &str) -> Result<Self, Error> {
        let (path, alias) = match spec.rsplit_once('@') {
            Some((path, alias)) if !alias.trim().is_empty() => (path.trim(), alias.trim()),
            _ => {
                let path = spec.trim().trim_end_matches('@');
                let file = path.rsplit(['/', '\\']).next().unwrap_or(path);
                (path, file)
            }
        };

        if path.is_empty() || alias.is_empty() || alias.contains(['/', '\\']) || alias == ".." {
            return Err(Error::format(format!("invalid link '{spec}'")));
        }
        Ok(Self {
            path: path.to_string(),
            alias: alias.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Linker {
    links_dir: PathBuf,
}

impl Linker {
    pub fn new(links_dir: impl Into<PathBuf>) -> Self {
        Self {
            links_dir: links_dir.into(),
        }
    }

    pub fn links_dir(&self) -> &Path {
        &self.links_dir
    }

    /// Create links for `specs` pointing into `package_dir`. Returns the
    /// created link paths.
    pub fn link(&self, package_dir: &Path, specs: &[String]) -> Result<Vec<PathBuf>, Error> {
        fs::create_dir_all(&self.links_dir)
            .map_err(|e| Error::io("failed to create links directory", e))?;

        let mut created = Vec::new();
        for raw in specs {
            let spec = LinkSpec::parse(raw)?;
            let source = join_sanitize_path(package_dir, &spec.path)?;
            if !source.exists() {
                return Err(Error::format(format!(
                    "link target '{}' does not exist in package",
                    spec.path
                )));
            }

            let link = self.links_dir.join(&spec.alias);
            match fs::symlink_metadata(&link) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    warn!(link = %link.display(), "replacing existing link");
                    fs::remove_file(&link).map_err(|e| Error::io("failed to replace link", e))?;
                }
                Ok(_) => {
                    return Err(Error::Io {
                        message: format!("file exists: {}", link.display()),
                    });
                }
                Err(_) => {}
            }

            make_link(&source, &link)?;
            debug!(link = %link.display(), source = %source.display(), "linked");
            created.push(link);
        }
        Ok(created)
    }

    /// Remove every link that points into `package_dir`.
    pub fn unlink(&self, package_dir: &Path) -> Result<usize, Error> {
        let entries = match fs::read_dir(&self.links_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::io("failed to read links directory", e)),
        };

        let mut removed = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if let Ok(target) = fs::read_link(&path)
                && target.starts_with(package_dir)
            {
                fs::remove_file(&path)
                    .map_err(|e| Error::io(&format!("failed to remove {}", path.display()), e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(unix)]
fn make_link(source: &Path, link: &Path) -> Result<(), Error> {
    std::os::unix::fs::symlink(source, link)
        .map_err(|e| Error::io(&format!("failed to link {}", link.display()), e))
}

#[cfg(not(unix))]
fn make_link(source: &Path, link: &Path) -> Result<(), Error> {
    fs::copy(source, link)
        .map(|_| ())
        .map_err(|e| Error::io(&format!("failed to link {}", link.display()), e))
}
