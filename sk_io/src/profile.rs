//! The user profile: configured buckets and frozen packages.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sk_core::{Bucket, Error};
use tracing::debug;

use crate::staged::write_atomic;

pub const DEFAULT_BUCKET: &str = "skep";
pub const DEFAULT_BUCKET_URL: &str = "https://github.com/skep-pkg/bucket";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    #[serde(default = "default_buckets")]
    pub buckets: Vec<Bucket>,
    #[serde(default)]
    pub freeze: Vec<String>,
    /// RFC 3339 time of the last change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

fn default_buckets() -> Vec<Bucket> {
    vec![Bucket {
        name: DEFAULT_BUCKET.to_string(),
        description: "Default bucket".to_string(),
        url: DEFAULT_BUCKET_URL.to_string(),
        weight: 100,
    }]
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            buckets: default_buckets(),
            freeze: Vec::new(),
            updated: None,
        }
    }
}

impl Profile {
    pub fn is_frozen(&self, name: &str) -> bool {
        self.freeze.iter().any(|n| n == name)
    }

    /// Returns the names that were newly frozen.
    pub fn freeze<S: AsRef<str>>(&mut self, names: &[S]) -> Vec<String> {
        let mut added = Vec::new();
        for name in names {
            let name = name.as_ref();
            if !self.is_frozen(name) {
                self.freeze.push(name.to_string());
                added.push(name.to_string());
            }
        }
        added
    }

    /// Returns the names that were frozen and no longer are.
    pub fn unfreeze<S: AsRef<str>>(&mut self, names: &[S]) -> Vec<String> {
        let mut removed = Vec::new();
        for name in names {
            let name = name.as_ref();
            let before = self.freeze.len();
            self.freeze.retain(|n| n != name);
            if self.freeze.len() != before {
                removed.push(name.to_string());
            }
        }
        removed
    }

    pub fn bucket(&self, name: &str) -> Option<&Bucket> {
        self.buckets.iter().find(|b| b.name == name)
    }

    /// Add a bucket, replacing one with the same name.
    pub fn add_bucket(&mut self, bucket: Bucket) -> Result<(), Error> {
        Bucket::validate_name(&bucket.name)?;
        match self.buckets.iter_mut().find(|b| b.name == bucket.name) {
            Some(existing) => *existing = bucket,
            None => self.buckets.push(bucket),
        }
        Ok(())
    }

    pub fn remove_bucket(&mut self, name: &str) -> bool {
        let before = self.buckets.len();
        self.buckets.retain(|b| b.name != name);
        self.buckets.len() != before
    }

    pub fn touch(&mut self) {
        self.updated = Some(Utc::now().to_rfc3339());
    }
}

/// Loads and saves the profile file.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing profile yields the defaults.
    pub fn load(&self) -> Result<Profile, Error> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no profile, using defaults");
                return Ok(Profile::default());
            }
            Err(e) => {
                return Err(Error::io(
                    &format!("failed to read profile {}", self.path.display()),
                    e,
                ));
            }
        };
        serde_json::from_str(&text).map_err(|e| {
            Error::format(format!("profile {}: {e}", self.path.display()))
        })
    }

    pub fn save(&self, profile: &Profile) -> Result<(), Error> {
        let json = serde_json::to_vec_pretty(profile)
            .map_err(|e| Error::format(format!("failed to encode profile: {e}")))?;
        write_atomic(&self.path, &json)
    }

    /// Load, apply `change`, stamp the update time and save.
    pub fn update<T>(&self, change: impl FnOnce(&mut Profile) -> T) -> Result<T, Error> {
        let mut profile = self.load()?;
        let out = change(&mut profile);
        profile.touch();
        self.save(&profile)?;
        Ok(out)
    }
}
