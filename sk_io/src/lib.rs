pub mod archive;
pub mod bucket;
pub mod buffer;
pub mod download;
pub mod extract;
pub mod install;
pub mod layout;
pub mod link;
pub mod lock;
pub mod profile;
pub mod progress;
pub mod search;
pub mod staged;
pub mod traits;
pub mod verify;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use archive::{ArchiveEntry, Bzip2Reader, DeflateDecoder, EntryKind, TarReader, ZipArchive};
pub use bucket::{BucketDirSource, BucketSync, SyncOutcome};
pub use buffer::{Buffer, LocalPool, Pool, SyncPool, default_pool};
pub use download::{Downloader, NetConfig};
pub use extract::{ArchiveKind, ExtractOptions, ExtractSummary, extract_archive};
pub use install::{CleanupResult, InstallOutcome, Installer, Outdated, UpgradeReport};
pub use layout::Layout;
pub use link::Linker;
pub use lock::LockStore;
pub use profile::{Profile, ProfileStore};
pub use progress::{Progress, ProgressTicker, Snapshot};
pub use search::{SearchResult, catalog, search_packages};
pub use staged::{StagedFile, StagingSink};
pub use traits::HttpClient;
pub use verify::{blake3_file, sha256_file, verify_file};
