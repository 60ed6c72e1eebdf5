use std::fs;
use std::path::PathBuf;

use sk_core::{Error, InstalledLock};
use tracing::warn;

use crate::layout::Layout;
use crate::staged::write_atomic;

/// Installed-package locks, one JSON file per package.
#[derive(Debug, Clone)]
pub struct LockStore {
    dir: PathBuf,
}

impl LockStore {
    pub fn new(layout: &Layout) -> Self {
        Self {
            dir: layout.locks_dir(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    pub fn read(&self, name: &str) -> Result<Option<InstalledLock>, Error> {
        let path = self.path(name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(&format!("failed to read {}", path.display()), e)),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| Error::format(format!("lock {}: {e}", path.display())))
    }

    pub fn write(&self, name: &str, lock: &InstalledLock) -> Result<(), Error> {
        let json = serde_json::to_vec_pretty(lock)
            .map_err(|e| Error::format(format!("failed to encode lock: {e}")))?;
        write_atomic(&self.path(name), &json)
    }

    pub fn remove(&self, name: &str) -> Result<bool, Error> {
        match fs::remove_file(self.path(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io("failed to remove lock", e)),
        }
    }

    /// All readable locks, sorted by name. Unreadable ones are logged and
    /// skipped.
    pub fn list(&self) -> Result<Vec<(String, InstalledLock)>, Error> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io("failed to list locks", e)),
        };

        let mut locks = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io("failed to list locks", e))?;
            let path = entry.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str())
                && let Some(name) = name.strip_suffix(".json")
            {
                match self.read(name) {
                    Ok(Some(lock)) => locks.push((name.to_string(), lock)),
                    Ok(None) => {}
                    Err(e) => warn!(package = name, error = %e, "skipping unreadable lock"),
                }
            }
        }
        locks.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(locks)
    }
}
