//! Trait abstractions for network operations so tests can inject failures.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use sk_core::Error;

use crate::progress::Progress;

/// HTTP access used by bucket sync and the installer.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// GET `url` and return the body.
    async fn get(&self, url: &str) -> Result<Vec<u8>, Error>;

    /// Stream `url` into `dest_dir` through a staged file and return the
    /// committed path.
    async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        overwrite: bool,
        progress: Option<Arc<Progress>>,
    ) -> Result<PathBuf, Error>;
}
