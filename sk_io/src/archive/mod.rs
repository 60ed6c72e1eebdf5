//! Archive containers and their codecs.
//!
//! ZIP archives are random access: the central directory is parsed once and
//! each entry is inflated from its own byte range. TAR archives are read
//! sequentially on top of a [`Transport`] (bzip2, gzip, xz, zstd or plain).

pub mod bzip;
pub mod deflate;
pub mod tar;
pub mod transport;
pub mod zip;

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use sk_core::Error;

pub use bzip::Bzip2Reader;
pub use deflate::DeflateDecoder;
pub use tar::TarReader;
pub use transport::{StreamTransport, Transport};
pub use zip::ZipArchive;

/// ZIP compression methods we can decode.
pub const METHOD_STORED: u16 = 0;
pub const METHOD_DEFLATED: u16 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    HardLink,
    Other,
}

/// Metadata of one archive member. `path` is untrusted until it has been
/// through [`join_sanitize_path`].
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub path: String,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub method: u16,
    pub kind: EntryKind,
    pub modified: Option<SystemTime>,
    pub mode: Option<u32>,
    pub link_target: Option<String>,
    /// Offset of the ZIP local header; zero for TAR entries.
    pub header_offset: u64,
}

impl ArchiveEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Join an untrusted archive path onto `root`.
///
/// `.` and `..` are resolved lexically. The result must lie strictly below
/// `root`: absolute names, names that climb above the root and names that
/// resolve to the root itself are rejected with `PathTraversal`.
pub fn join_sanitize_path(root: &Path, child: &str) -> Result<PathBuf, Error> {
    let traversal = || Error::PathTraversal {
        entry: child.to_string(),
        root: root.to_path_buf(),
    };

    if child.starts_with('/') || child.starts_with('\\') || Path::new(child).is_absolute() {
        return Err(traversal());
    }

    let root = normalize(root);
    let mut joined = root.clone();
    let mut depth = 0usize;

    for segment in child.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if depth == 0 {
                    return Err(traversal());
                }
                joined.pop();
                depth -= 1;
            }
            name => {
                if name.contains('\0') {
                    return Err(traversal());
                }
                joined.push(name);
                depth += 1;
            }
        }
    }

    if depth == 0 || !joined.starts_with(&root) {
        return Err(traversal());
    }

    Ok(joined)
}

/// Lexical normalisation; does not touch the filesystem.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
