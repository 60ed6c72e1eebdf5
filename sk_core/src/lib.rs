pub mod checksum;
pub mod errors;
pub mod package;
pub mod resolve;
pub mod version;

pub use checksum::Checksum;
pub use errors::Error;
pub use package::{Arch, Bucket, InstalledLock, Package, validate_name};
pub use resolve::{ManifestSource, Outcome, Resolution, Resolver};
pub use version::Version;
