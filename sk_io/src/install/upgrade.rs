//! Upgrade-specific logic

use std::sync::Arc;

use sk_core::{Error, InstalledLock, Outcome, Package, Resolver};
use tracing::{debug, warn};

use crate::bucket::BucketDirSource;
use crate::progress::Progress;

use super::Installer;

/// An installed package with a better candidate in the buckets
#[derive(Debug, Clone)]
pub struct Outdated {
    pub name: String,
    pub installed: InstalledLock,
    pub available: Package,
    pub frozen: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeReport {
    Upgraded {
        name: String,
        from: String,
        to: String,
    },
    Frozen {
        name: String,
        version: String,
    },
    Failed {
        name: String,
        error: Error,
    },
}

impl Installer {
    /// Installed packages whose resolution yields something newer, or the
    /// same version from a heavier bucket.
    pub fn outdated(&self) -> Result<Vec<Outdated>, Error> {
        let profile = self.profiles.load()?;
        let source = BucketDirSource::new(self.layout.clone());
        let resolver = Resolver::new(&profile.buckets, &source, self.arch);

        let mut outdated = Vec::new();
        for (name, installed) in self.locks.list()? {
            match resolver.check_upgrade(&name, &installed).outcome {
                Outcome::Found(available) => outdated.push(Outdated {
                    frozen: profile.is_frozen(&name),
                    name,
                    installed,
                    available,
                }),
                _ => debug!(package = %name, version = %installed.version, "up to date"),
            }
        }
        Ok(outdated)
    }

    /// Upgrade every outdated package. Frozen packages are reported and
    /// left alone unless `force`. A failing package does not stop the rest.
    pub async fn upgrade(
        &self,
        force: bool,
        progress: Option<Arc<Progress>>,
    ) -> Result<Vec<UpgradeReport>, Error> {
        let mut reports = Vec::new();

        for item in self.outdated()? {
            if item.frozen && !force {
                reports.push(UpgradeReport::Frozen {
                    name: item.name,
                    version: item.installed.version,
                });
                continue;
            }

            if let Some(progress) = &progress {
                progress.reset();
            }
            let lock = item.available.lock();
            let result = match self.deploy(&item.available, progress.clone()).await {
                Ok(()) => self.locks.write(&item.name, &lock),
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => reports.push(UpgradeReport::Upgraded {
                    name: item.name,
                    from: item.installed.version,
                    to: lock.version,
                }),
                Err(error) => {
                    warn!(package = %item.name, error = %error, "upgrade failed");
                    reports.push(UpgradeReport::Failed {
                        name: item.name,
                        error,
                    });
                }
            }
        }
        Ok(reports)
    }
}
