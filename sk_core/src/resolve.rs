//! Multi-bucket package resolution.
//!
//! A package name is looked up in every configured bucket independently;
//! there are no dependency edges. Each bucket that carries a usable manifest
//! produces one candidate and the best candidate wins:
//!
//! 1. A greater version always wins, whatever the bucket weight.
//! 2. On equal versions the candidate wins only with a strictly greater
//!    weight. When checking for upgrades the candidate must additionally
//!    carry a raw version string different from the installed one, so a
//!    republished identical version is not reinstalled.
//! 3. Otherwise the earlier candidate is kept.
//!
//! Failures are scoped per bucket: a malformed manifest is logged and
//! counted, a manifest without a URL for this architecture is recorded as
//! not ported, and the scan continues with the remaining buckets.

use tracing::{debug, warn};

use crate::{Arch, Bucket, Error, InstalledLock, Package, Version};

/// Where manifests come from. `Ok(None)` means the bucket does not carry
/// the package.
pub trait ManifestSource {
    fn load(&self, bucket: &Bucket, name: &str) -> Result<Option<String>, Error>;
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Found(Package),
    NotFound,
    /// Nothing usable, but these buckets carry the package for another
    /// architecture.
    NotPorted { buckets: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub outcome: Outcome,
    /// Manifests skipped because they failed to load or parse
    pub malformed: usize,
}

impl Resolution {
    pub fn into_package(self, name: &str) -> Result<Package, Error> {
        match self.outcome {
            Outcome::Found(pkg) => Ok(pkg),
            Outcome::NotFound => Err(Error::MissingPackage {
                name: name.to_string(),
            }),
            Outcome::NotPorted { buckets } => Err(Error::NotPortedForArchitecture {
                name: name.to_string(),
                bucket: buckets.join(", "),
            }),
        }
    }
}

/// The value a candidate has to beat.
struct Best {
    version: Version,
    weight: i32,
    package: Option<Package>,
}

pub struct Resolver<'a, S: ManifestSource> {
    buckets: &'a [Bucket],
    source: &'a S,
    arch: Arch,
}

impl<'a, S: ManifestSource> Resolver<'a, S> {
    pub fn new(buckets: &'a [Bucket], source: &'a S, arch: Arch) -> Self {
        Self {
            buckets,
            source,
            arch,
        }
    }

    /// Find the best manifest for `name` across all buckets.
    pub fn resolve(&self, name: &str) -> Resolution {
        self.scan(name, None)
    }

    /// Find a candidate that supersedes the installed lock. `Found` only
    /// when something strictly better than the installed package exists.
    pub fn check_upgrade(&self, name: &str, installed: &InstalledLock) -> Resolution {
        self.scan(name, Some(installed))
    }

    fn scan(&self, name: &str, installed: Option<&InstalledLock>) -> Resolution {
        let mut best = match installed {
            Some(lock) => Some(Best {
                version: Version::parse(&lock.version),
                weight: lock.weight,
                package: None,
            }),
            None => None,
        };
        let installed_raw = installed.map(|lock| lock.version.as_str());
        let mut malformed = 0;
        let mut not_ported = Vec::new();
        let mut seen = false;

        for bucket in self.buckets {
            let text = match self.source.load(bucket, name) {
                Ok(Some(text)) => text,
                Ok(None) => continue,
                Err(e) => {
                    warn!(bucket = %bucket.name, package = name, error = %e, "unable to load manifest");
                    malformed += 1;
                    continue;
                }
            };

            let candidate = match Package::from_manifest(name, &text, self.arch, bucket) {
                Ok(pkg) => pkg,
                Err(Error::NotPortedForArchitecture { .. }) => {
                    debug!(bucket = %bucket.name, package = name, "not yet ported");
                    not_ported.push(bucket.name.clone());
                    continue;
                }
                Err(e) => {
                    warn!(bucket = %bucket.name, package = name, error = %e, "skipping manifest");
                    malformed += 1;
                    continue;
                }
            };
            seen = true;

            let replace = match &best {
                None => true,
                Some(current) => supersedes(&candidate, current, installed_raw),
            };
            if replace {
                debug!(
                    bucket = %bucket.name,
                    version = %candidate.version,
                    weight = candidate.weight,
                    "new best candidate"
                );
                best = Some(Best {
                    version: candidate.version.clone(),
                    weight: candidate.weight,
                    package: Some(candidate),
                });
            }
        }

        let outcome = match best.and_then(|b| b.package) {
            Some(pkg) => Outcome::Found(pkg),
            None if !seen && !not_ported.is_empty() => Outcome::NotPorted {
                buckets: not_ported,
            },
            None => Outcome::NotFound,
        };

        Resolution { outcome, malformed }
    }
}

fn supersedes(candidate: &Package, best: &Best, installed_raw: Option<&str>) -> bool {
    match candidate.version.cmp(&best.version) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => {
            candidate.weight > best.weight
                && installed_raw.is_none_or(|raw| raw != candidate.version.as_str())
        }
    }
}
