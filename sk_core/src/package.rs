use serde::{Deserialize, Serialize};

use crate::{Checksum, Error, Version};

/// Target architecture for URL selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86,
    X64,
}

impl Arch {
    pub fn host() -> Self {
        #[cfg(target_pointer_width = "64")]
        {
            Arch::X64
        }
        #[cfg(not(target_pointer_width = "64"))]
        {
            Arch::X86
        }
    }
}

/// A named, weighted source of manifests
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bucket {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default = "default_weight", rename = "weights")]
    pub weight: i32,
}

fn default_weight() -> i32 {
    100
}

/// Reserved under the buckets directory for in-progress snapshots.
pub const RESERVED_BUCKET_NAME: &str = "temp";

impl Bucket {
    /// Bucket names become snapshot directory names.
    pub fn validate_name(name: &str) -> Result<(), Error> {
        validate_name("bucket", name)?;
        if name.eq_ignore_ascii_case(RESERVED_BUCKET_NAME) {
            return Err(Error::format(format!("bucket name '{name}' is reserved")));
        }
        Ok(())
    }
}

/// Package and bucket names become directory and file names, so anything
/// that could name another location is refused.
pub fn validate_name(kind: &str, name: &str) -> Result<(), Error> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.starts_with('-')
        || name.chars().any(|c| matches!(c, '/' | '\\' | ':' | '\0') || c.is_whitespace());
    if invalid {
        return Err(Error::format(format!("invalid {kind} name '{name}'")));
    }
    Ok(())
}

/// Persisted record of an installed package
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstalledLock {
    pub version: String,
    pub bucket: String,
    #[serde(default, rename = "weights")]
    pub weight: i32,
}

/// Raw manifest document as stored in a bucket.
#[derive(Debug, Clone, Deserialize, Default)]
struct Manifest {
    #[serde(default)]
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    extension: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, rename = "url.hash")]
    url_hash: Option<String>,
    #[serde(default)]
    url64: Option<String>,
    #[serde(default, rename = "url64.hash")]
    url64_hash: Option<String>,
    #[serde(default)]
    links: Vec<String>,
    #[serde(default)]
    launchers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    pub version: Version,
    pub description: String,
    pub url: String,
    pub checksum: Option<Checksum>,
    pub extension: String,
    pub links: Vec<String>,
    pub launchers: Vec<String>,
    pub bucket: String,
    pub weight: i32,
}

impl Package {
    /// Parse a manifest document. The package is annotated with the bucket
    /// it came from; a manifest without a URL usable on `arch` is
    /// `NotPortedForArchitecture`.
    pub fn from_manifest(
        name: &str,
        text: &str,
        arch: Arch,
        bucket: &Bucket,
    ) -> Result<Self, Error> {
        let manifest: Manifest = serde_json::from_str(text)
            .map_err(|e| Error::format(format!("manifest '{name}': {e}")))?;

        if manifest.version.trim().is_empty() {
            return Err(Error::format(format!("manifest '{name}': missing version")));
        }

        let (url, hash) = select_url(&manifest, arch).ok_or_else(|| {
            Error::NotPortedForArchitecture {
                name: name.to_string(),
                bucket: bucket.name.clone(),
            }
        })?;

        let checksum = match hash {
            Some(h) if !h.trim().is_empty() => Some(Checksum::parse(&h)?),
            _ => None,
        };

        Ok(Package {
            name: name.to_string(),
            version: Version::parse(&manifest.version),
            description: manifest.description,
            url,
            checksum,
            extension: manifest.extension,
            links: manifest.links,
            launchers: manifest.launchers,
            bucket: bucket.name.clone(),
            weight: bucket.weight,
        })
    }

    pub fn lock(&self) -> InstalledLock {
        InstalledLock {
            version: self.version.as_str().to_string(),
            bucket: self.bucket.clone(),
            weight: self.weight,
        }
    }
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|u| !u.trim().is_empty())
}

/// The download URL and its hash for `arch`, owned so the manifest can be
/// taken apart afterwards.
fn select_url(manifest: &Manifest, arch: Arch) -> Option<(String, Option<String>)> {
    if arch == Arch::X64
        && let Some(url) = non_empty(&manifest.url64)
    {
        return Some((url.to_string(), manifest.url64_hash.clone()));
    }
    non_empty(&manifest.url).map(|url| (url.to_string(), manifest.url_hash.clone()))
}
