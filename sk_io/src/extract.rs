//! Archive extraction onto the filesystem.
//!
//! Every entry path goes through `join_sanitize_path` before anything is
//! written, and every file is written through a `StagedFile` so a failed or
//! canceled entry leaves no partial file behind.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use sk_core::Error;
use tracing::{debug, warn};
use xz2::read::XzDecoder;

use crate::archive::{
    ArchiveEntry, Bzip2Reader, DeflateDecoder, EntryKind, StreamTransport, TarReader, Transport,
    ZipArchive, join_sanitize_path, normalize,
};
use crate::buffer::default_pool;
use crate::progress::Progress;
use crate::staged::{StagedFile, StagingSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    TarZst,
}

impl ArchiveKind {
    /// Detect from a file name or a manifest `extension` value.
    pub fn detect(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        let table: [(&[&str], ArchiveKind); 6] = [
            (&["tar.gz", "tgz"], ArchiveKind::TarGz),
            (&["tar.bz2", "tbz2", "tbz"], ArchiveKind::TarBz2),
            (&["tar.xz", "txz"], ArchiveKind::TarXz),
            (&["tar.zst", "tzst"], ArchiveKind::TarZst),
            (&["tar"], ArchiveKind::Tar),
            (&["zip"], ArchiveKind::Zip),
        ];
        table.iter().find_map(|(suffixes, kind)| {
            suffixes
                .iter()
                .any(|s| name == *s || name.ends_with(&format!(".{s}")))
                .then_some(*kind)
        })
    }
}

#[derive(Default)]
pub struct ExtractOptions<'a> {
    pub overwrite: bool,
    /// Entries for which this returns false are skipped
    pub filter: Option<&'a dyn Fn(&str) -> bool>,
    pub progress: Option<&'a Progress>,
}

impl ExtractOptions<'_> {
    fn wants(&self, path: &str) -> bool {
        self.filter.is_none_or(|f| f(path))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub bytes: u64,
}

pub fn extract_archive(
    archive: &Path,
    dest: &Path,
    options: &ExtractOptions<'_>,
) -> Result<ExtractSummary, Error> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let kind = ArchiveKind::detect(&name)
        .ok_or_else(|| Error::format(format!("unrecognized archive type: {name}")))?;
    extract_archive_as(archive, kind, dest, options)
}

pub fn extract_archive_as(
    archive: &Path,
    kind: ArchiveKind,
    dest: &Path,
    options: &ExtractOptions<'_>,
) -> Result<ExtractSummary, Error> {
    debug!(archive = %archive.display(), dest = %dest.display(), ?kind, "extracting");
    let file = File::open(archive)
        .map_err(|e| Error::io(&format!("failed to open {}", archive.display()), e))?;
    fs::create_dir_all(dest)
        .map_err(|e| Error::io(&format!("failed to create {}", dest.display()), e))?;

    let pool = default_pool();
    match kind {
        ArchiveKind::Zip => extract_zip(BufReader::new(file), dest, options),
        ArchiveKind::Tar => extract_tar(StreamTransport::new(file, pool), dest, options),
        ArchiveKind::TarGz => extract_tar(
            StreamTransport::new(MultiGzDecoder::new(BufReader::new(file)), pool),
            dest,
            options,
        ),
        ArchiveKind::TarBz2 => extract_tar(Bzip2Reader::new(file, pool), dest, options),
        ArchiveKind::TarXz => extract_tar(
            StreamTransport::new(XzDecoder::new(BufReader::new(file)), pool),
            dest,
            options,
        ),
        ArchiveKind::TarZst => {
            let decoder = zstd::stream::read::Decoder::new(file)
                .map_err(|e| Error::io("failed to start zstd decoder", e))?;
            extract_tar(StreamTransport::new(decoder, pool), dest, options)
        }
    }
}

/// Sink that writes into a staged file and remembers why it stopped.
struct FileSink<'a> {
    staged: StagedFile,
    failure: Option<io::Error>,
    progress: Option<&'a Progress>,
}

impl<'a> FileSink<'a> {
    fn create(target: &Path, options: &ExtractOptions<'a>) -> Result<Self, Error> {
        Ok(Self {
            staged: StagedFile::create(target, options.overwrite)?,
            failure: None,
            progress: options.progress,
        })
    }

    fn accept(&mut self, chunk: &[u8]) -> bool {
        match self.staged.write_all(chunk) {
            Ok(()) => {
                if let Some(progress) = self.progress {
                    progress.add(chunk.len() as u64);
                }
                true
            }
            Err(e) => {
                self.failure = Some(e);
                false
            }
        }
    }

    /// A write failure surfaces as `Canceled` from the codec; report the
    /// underlying error instead.
    fn check(&mut self, result: Result<(), Error>) -> Result<(), Error> {
        match (result, self.failure.take()) {
            (Ok(()), _) => Ok(()),
            (Err(_), Some(io)) => Err(Error::io(
                &format!("failed to write {}", self.staged.final_path().display()),
                io,
            )),
            (Err(e), None) => Err(e),
        }
    }

    fn finish(self, entry: &ArchiveEntry) -> Result<PathBuf, Error> {
        if let Some(modified) = entry.modified {
            self.staged.set_modified(modified)?;
        }
        if let Some(mode) = entry.mode {
            self.staged.set_mode(mode)?;
        }
        self.staged.commit()
    }
}

/// Keeps writes inside the extraction root once links exist on disk.
///
/// Entry names are checked lexically by `join_sanitize_path`, but a symlink
/// written by an earlier entry can still redirect a later one. Every
/// existing symlink between the root and a write target must resolve to a
/// location under the canonical root.
struct Confinement {
    root: PathBuf,
    canonical: PathBuf,
}

impl Confinement {
    fn new(dest: &Path) -> Result<Self, Error> {
        create_dir(dest)?;
        let canonical = fs::canonicalize(dest)
            .map_err(|e| Error::io(&format!("failed to resolve {}", dest.display()), e))?;
        Ok(Self {
            root: normalize(dest),
            canonical,
        })
    }

    /// Check every component of `path` below the root, `path` included.
    fn check(&self, entry: &str, path: &Path) -> Result<(), Error> {
        let escape = || Error::PathTraversal {
            entry: entry.to_string(),
            root: self.root.clone(),
        };
        let relative = path.strip_prefix(&self.root).map_err(|_| escape())?;

        let mut current = self.root.clone();
        for component in relative.components() {
            current.push(component);
            let Ok(meta) = fs::symlink_metadata(&current) else {
                // nothing further down exists yet
                return Ok(());
            };
            if meta.file_type().is_symlink() {
                let resolved = fs::canonicalize(&current).map_err(|_| escape())?;
                if !resolved.starts_with(&self.canonical) {
                    return Err(escape());
                }
            }
        }
        Ok(())
    }

    /// Check the directories leading to `path`; `path` itself is replaced
    /// rather than followed.
    fn check_parent(&self, entry: &str, path: &Path) -> Result<(), Error> {
        match path.parent() {
            Some(parent) => self.check(entry, parent),
            None => Ok(()),
        }
    }
}

pub fn extract_zip<R: Read + io::Seek>(
    reader: R,
    dest: &Path,
    options: &ExtractOptions<'_>,
) -> Result<ExtractSummary, Error> {
    let mut archive = ZipArchive::open(reader)?;
    let entries = archive.entries().to_vec();

    // the central directory is known up front, so refuse the whole archive
    // before writing anything
    let targets = entries
        .iter()
        .map(|entry| join_sanitize_path(dest, &entry.path))
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(progress) = options.progress {
        progress.set_total(archive.total_size());
    }

    let confinement = Confinement::new(dest)?;
    let mut decoder = DeflateDecoder::new(default_pool());
    let mut summary = ExtractSummary::default();

    for (entry, target) in entries.iter().zip(targets) {
        if !options.wants(&entry.path) {
            continue;
        }

        match entry.kind {
            EntryKind::Directory => {
                confinement.check(&entry.path, &target)?;
                create_dir(&target)?;
            }
            EntryKind::File => {
                confinement.check_parent(&entry.path, &target)?;
                let mut sink = FileSink::create(&target, options)?;
                let result = archive
                    .extract_entry(entry, &mut decoder, &mut |chunk| sink.accept(chunk))
                    .map(|_| ());
                sink.check(result)?;
                sink.finish(entry)?;
                summary.files += 1;
                summary.bytes += entry.uncompressed_size;
            }
            EntryKind::Symlink => {
                let mut link = Vec::new();
                archive.extract_entry(entry, &mut decoder, &mut |chunk| {
                    link.extend_from_slice(chunk);
                    true
                })?;
                let link = String::from_utf8_lossy(&link).into_owned();
                create_symlink(&confinement, entry, &link, &target, options.overwrite)?;
            }
            EntryKind::HardLink | EntryKind::Other => {
                debug!(path = %entry.path, "skipping unsupported zip entry");
            }
        }
    }

    debug!(files = summary.files, bytes = summary.bytes, "zip extracted");
    Ok(summary)
}

pub fn extract_tar<T: Transport>(
    transport: T,
    dest: &Path,
    options: &ExtractOptions<'_>,
) -> Result<ExtractSummary, Error> {
    let mut reader = TarReader::new(transport);
    let confinement = Confinement::new(dest)?;
    let mut summary = ExtractSummary::default();

    while let Some(entry) = reader.next_entry()? {
        let target = join_sanitize_path(dest, &entry.path)?;
        if !options.wants(&entry.path) {
            reader.skip_entry()?;
            continue;
        }

        match entry.kind {
            EntryKind::Directory => {
                confinement.check(&entry.path, &target)?;
                create_dir(&target)?;
            }
            EntryKind::File => {
                confinement.check_parent(&entry.path, &target)?;
                let mut sink = FileSink::create(&target, options)?;
                let mut extracted = 0;
                let result = reader.write_entry(&mut |chunk| sink.accept(chunk), &mut extracted);
                sink.check(result)?;
                sink.finish(&entry)?;
                summary.files += 1;
                summary.bytes += extracted;
            }
            EntryKind::Symlink => {
                let link = entry.link_target.clone().unwrap_or_default();
                create_symlink(&confinement, &entry, &link, &target, options.overwrite)?;
            }
            EntryKind::HardLink => {
                let link = entry.link_target.clone().unwrap_or_default();
                let source = join_sanitize_path(dest, &link)?;
                confinement.check(&entry.path, &source)?;
                confinement.check_parent(&entry.path, &target)?;
                if !source.is_file() {
                    return Err(Error::format(format!(
                        "hard link '{}' points at missing '{}'",
                        entry.path, link
                    )));
                }
                if options.overwrite && target.exists() {
                    let _ = fs::remove_file(&target);
                }
                if let Some(parent) = target.parent() {
                    create_dir(parent)?;
                }
                fs::copy(&source, &target)
                    .map_err(|e| Error::io(&format!("failed to copy {link}"), e))?;
                summary.files += 1;
            }
            EntryKind::Other => {
                debug!(path = %entry.path, "skipping special tar entry");
            }
        }
    }

    debug!(files = summary.files, bytes = summary.bytes, "tar extracted");
    Ok(summary)
}

fn create_dir(path: &Path) -> Result<(), Error> {
    fs::create_dir_all(path)
        .map_err(|e| Error::io(&format!("failed to create {}", path.display()), e))
}

/// Symlink targets are relative to the link's directory and must stay
/// inside the extraction root.
fn create_symlink(
    confinement: &Confinement,
    entry: &ArchiveEntry,
    link: &str,
    target: &Path,
    overwrite: bool,
) -> Result<(), Error> {
    let escape = || Error::PathTraversal {
        entry: format!("{} -> {}", entry.path, link),
        root: confinement.root.clone(),
    };
    if link.is_empty() || link.starts_with('/') || link.starts_with('\\') {
        return Err(escape());
    }
    let resolved = match entry.path.trim_end_matches('/').rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => format!("{parent}/{link}"),
        _ => link.to_string(),
    };
    join_sanitize_path(&confinement.root, &resolved).map_err(|_| escape())?;
    confinement.check_parent(&entry.path, target)?;

    if target.symlink_metadata().is_ok() {
        if !overwrite {
            return Err(Error::Io {
                message: format!("file exists: {}", target.display()),
            });
        }
        let _ = fs::remove_file(target);
    }
    if let Some(parent) = target.parent() {
        create_dir(parent)?;
    }

    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(link, target)
            .map_err(|e| Error::io(&format!("failed to link {}", target.display()), e))
    }
    #[cfg(not(unix))]
    {
        warn!(path = %entry.path, "symlinks are not supported on this platform; skipped");
        Ok(())
    }
}

/// Flatten a lone top-level directory: `dir/pkg-1.0/*` becomes `dir/*`.
pub fn regularize(dir: &Path) -> Result<(), Error> {
    let mut children = fs::read_dir(dir)
        .map_err(|e| Error::io(&format!("failed to read {}", dir.display()), e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::io(&format!("failed to read {}", dir.display()), e))?;

    if children.len() != 1 {
        return Ok(());
    }
    let only = children.remove(0);
    let is_dir = only.file_type().map(|t| t.is_dir()).unwrap_or(false);
    if !is_dir {
        return Ok(());
    }

    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let hoisted = dir.with_file_name(format!(".{dir_name}.flatten"));
    if hoisted.exists() {
        fs::remove_dir_all(&hoisted)
            .map_err(|e| Error::io(&format!("failed to clear {}", hoisted.display()), e))?;
    }

    fs::rename(only.path(), &hoisted)
        .map_err(|e| Error::io("failed to hoist top-level directory", e))?;
    fs::remove_dir(dir).map_err(|e| Error::io("failed to remove emptied directory", e))?;
    if let Err(e) = fs::rename(&hoisted, dir) {
        warn!(dir = %dir.display(), error = %e, "failed to move flattened directory into place");
        return Err(Error::io("failed to move flattened directory into place", e));
    }

    debug!(dir = %dir.display(), "flattened top-level directory");
    Ok(())
}

/// Write a non-archive payload (a bare executable) into `dest`.
pub fn copy_payload(source: &Path, dest: &Path, file_name: &str) -> Result<PathBuf, Error> {
    let target = join_sanitize_path(dest, file_name)?;
    let mut input = File::open(source)
        .map_err(|e| Error::io(&format!("failed to open {}", source.display()), e))?;
    let mut staged = StagedFile::create(&target, true)?;
    io::copy(&mut input, &mut staged)
        .map_err(|e| Error::io(&format!("failed to copy {}", source.display()), e))?;
    staged.flush().map_err(|e| Error::io("failed to flush", e))?;
    #[cfg(unix)]
    staged.set_mode(0o755)?;
    staged.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staged::part_path;
    use std::io::Cursor;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in files {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    /// tar::Builder refuses `..` in paths, so patch the name in place.
    fn evil_tar(name: &str) -> Vec<u8> {
        let mut bytes = tar_bytes(&[("placeholder", b"x")]);
        let mut header = tar::Header::new_gnu();
        header.as_mut_bytes().copy_from_slice(&bytes[..512]);
        header.as_old_mut().name = [0; 100];
        header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
        header.set_cksum();
        bytes[..512].copy_from_slice(header.as_bytes());
        bytes
    }

    #[test]
    fn detects_archive_kinds() {
        assert_eq!(ArchiveKind::detect("a.zip"), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::detect("a.TAR.GZ"), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::detect("a.tgz"), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::detect("a.tar.bz2"), Some(ArchiveKind::TarBz2));
        assert_eq!(ArchiveKind::detect("a.tar.xz"), Some(ArchiveKind::TarXz));
        assert_eq!(ArchiveKind::detect("a.tar.zst"), Some(ArchiveKind::TarZst));
        assert_eq!(ArchiveKind::detect("a.tar"), Some(ArchiveKind::Tar));
        assert_eq!(ArchiveKind::detect("tar.bz2"), Some(ArchiveKind::TarBz2));
        assert_eq!(ArchiveKind::detect("a.exe"), None);
    }

    #[test]
    fn extracts_zip_to_destination() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("pkg.zip");
        fs::write(&archive, zip_bytes(&[("bin/tool", b"tool"), ("README", b"hi")])).unwrap();
        let dest = tmp.path().join("out");

        let progress = Progress::new();
        let options = ExtractOptions {
            progress: Some(&progress),
            ..Default::default()
        };
        let summary = extract_archive(&archive, &dest, &options).unwrap();

        assert_eq!(summary, ExtractSummary { files: 2, bytes: 6 });
        assert_eq!(fs::read(dest.join("bin/tool")).unwrap(), b"tool");
        assert_eq!(fs::read(dest.join("README")).unwrap(), b"hi");
        assert_eq!(progress.snapshot().current, 6);
        assert_eq!(progress.snapshot().total, 6);
    }

    #[test]
    fn zip_traversal_aborts_before_writing() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("evil.zip");
        fs::write(
            &archive,
            zip_bytes(&[("good.txt", b"fine"), ("../../evil.txt", b"bad")]),
        )
        .unwrap();
        let dest = tmp.path().join("out");

        let err = extract_archive(&archive, &dest, &ExtractOptions::default()).unwrap_err();
        assert!(matches!(err, Error::PathTraversal { .. }));
        assert!(!dest.join("good.txt").exists());
        assert!(!tmp.path().join("evil.txt").exists());
    }

    #[test]
    fn existing_files_need_overwrite() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("pkg.zip");
        fs::write(&archive, zip_bytes(&[("a.txt", b"new")])).unwrap();
        let dest = tmp.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("a.txt"), "old").unwrap();

        assert!(extract_archive(&archive, &dest, &ExtractOptions::default()).is_err());
        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "old");

        let options = ExtractOptions {
            overwrite: true,
            ..Default::default()
        };
        extract_archive(&archive, &dest, &options).unwrap();
        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "new");
    }

    #[test]
    fn extracts_tar_bz2_with_filter() {
        let tmp = TempDir::new().unwrap();
        let raw = tar_bytes(&[("keep/a", b"aaa"), ("skip/b", b"bbb"), ("keep/c", b"ccc")]);
        let mut encoder =
            bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder.write_all(&raw).unwrap();
        let archive = tmp.path().join("pkg.tar.bz2");
        fs::write(&archive, encoder.finish().unwrap()).unwrap();
        let dest = tmp.path().join("out");

        let only_keep = |path: &str| path.starts_with("keep/");
        let options = ExtractOptions {
            filter: Some(&only_keep),
            ..Default::default()
        };
        let summary = extract_archive(&archive, &dest, &options).unwrap();

        assert_eq!(summary.files, 2);
        assert_eq!(fs::read(dest.join("keep/c")).unwrap(), b"ccc");
        assert!(!dest.join("skip").exists());
    }

    #[test]
    fn extracts_tar_gz() {
        let tmp = TempDir::new().unwrap();
        let raw = tar_bytes(&[("x/y.txt", b"gz")]);
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&raw).unwrap();
        let archive = tmp.path().join("pkg.tgz");
        fs::write(&archive, encoder.finish().unwrap()).unwrap();

        let dest = tmp.path().join("out");
        extract_archive(&archive, &dest, &ExtractOptions::default()).unwrap();
        assert_eq!(fs::read(dest.join("x/y.txt")).unwrap(), b"gz");
    }

    #[test]
    fn tar_traversal_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("evil.tar");
        fs::write(&archive, evil_tar("../escape")).unwrap();
        let dest = tmp.path().join("out");

        let err = extract_archive(&archive, &dest, &ExtractOptions::default()).unwrap_err();
        assert!(matches!(err, Error::PathTraversal { .. }));
        assert!(!tmp.path().join("escape").exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_root_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        builder
            .append_link(&mut header, "pkg/link", "../../outside")
            .unwrap();
        let archive = tmp.path().join("link.tar");
        fs::write(&archive, builder.into_inner().unwrap()).unwrap();

        let err = extract_archive(&archive, &tmp.path().join("out"), &ExtractOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::PathTraversal { .. }));
    }

    #[cfg(unix)]
    fn link_tar(build: impl FnOnce(&mut tar::Builder<Vec<u8>>)) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        build(&mut builder);
        builder.into_inner().unwrap()
    }

    #[cfg(unix)]
    fn add_dir(builder: &mut tar::Builder<Vec<u8>>, path: &str) {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        builder.append_data(&mut header, path, std::io::empty()).unwrap();
    }

    #[cfg(unix)]
    fn add_symlink(builder: &mut tar::Builder<Vec<u8>>, path: &str, target: &str) {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        builder.append_link(&mut header, path, target).unwrap();
    }

    #[cfg(unix)]
    fn add_file(builder: &mut tar::Builder<Vec<u8>>, path: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, path, data).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn chained_symlinks_cannot_redirect_writes() {
        let tmp = TempDir::new().unwrap();
        let bytes = link_tar(|b| {
            add_dir(b, "x/y/");
            add_symlink(b, "x/y/s", "..");
            add_dir(b, "d/");
            add_symlink(b, "d/esc", "../x/y/s/../../outside");
            add_file(b, "d/esc/pwned", b"owned");
        });
        let archive = tmp.path().join("chain.tar");
        fs::write(&archive, bytes).unwrap();
        let dest = tmp.path().join("out");

        let err = extract_archive(&archive, &dest, &ExtractOptions::default()).unwrap_err();
        assert!(matches!(err, Error::PathTraversal { .. }));
        assert!(!tmp.path().join("outside").exists());
        assert!(!tmp.path().join("outside/pwned").exists());
    }

    #[cfg(unix)]
    #[test]
    fn chained_symlinks_to_existing_outside_dir_are_refused() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("outside")).unwrap();
        let bytes = link_tar(|b| {
            add_dir(b, "x/y/");
            add_symlink(b, "x/y/s", "..");
            add_dir(b, "d/");
            add_symlink(b, "d/esc", "../x/y/s/../../outside");
            add_dir(b, "d/esc/sub/");
        });
        let archive = tmp.path().join("chain.tar");
        fs::write(&archive, bytes).unwrap();

        let err = extract_archive(&archive, &tmp.path().join("out"), &ExtractOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::PathTraversal { .. }));
        assert!(!tmp.path().join("outside/sub").exists());
    }

    #[cfg(unix)]
    #[test]
    fn top_level_relative_symlink_is_created() {
        let tmp = TempDir::new().unwrap();
        let bytes = link_tar(|b| {
            add_file(b, "tool-1.0", b"bin");
            add_symlink(b, "tool", "tool-1.0");
        });
        let archive = tmp.path().join("tool.tar");
        fs::write(&archive, bytes).unwrap();
        let dest = tmp.path().join("out");

        extract_archive(&archive, &dest, &ExtractOptions::default()).unwrap();
        assert_eq!(
            fs::read_link(dest.join("tool")).unwrap(),
            PathBuf::from("tool-1.0")
        );
        assert_eq!(fs::read(dest.join("tool")).unwrap(), b"bin");
    }

    #[cfg(unix)]
    #[test]
    fn files_through_contained_symlinks_are_written() {
        let tmp = TempDir::new().unwrap();
        let bytes = link_tar(|b| {
            add_dir(b, "pkg-1.0/bin/");
            add_symlink(b, "current", "pkg-1.0");
            add_file(b, "current/bin/tool", b"t");
        });
        let archive = tmp.path().join("pkg.tar");
        fs::write(&archive, bytes).unwrap();
        let dest = tmp.path().join("out");

        extract_archive(&archive, &dest, &ExtractOptions::default()).unwrap();
        assert_eq!(fs::read(dest.join("pkg-1.0/bin/tool")).unwrap(), b"t");
    }

    #[test]
    fn failed_entry_keeps_earlier_files_and_leaves_no_part() {
        let tmp = TempDir::new().unwrap();
        let mut bytes = zip_bytes(&[("a.txt", b"one"), ("b.txt", b"two"), ("c.txt", b"three")]);
        // corrupt the CRC-32 of the second central directory record
        let central: Vec<usize> = bytes
            .windows(4)
            .enumerate()
            .filter(|(_, w)| *w == &b"PK\x01\x02"[..])
            .map(|(i, _)| i)
            .collect();
        assert_eq!(central.len(), 3);
        bytes[central[1] + 16] ^= 0xFF;
        let archive = tmp.path().join("pkg.zip");
        fs::write(&archive, bytes).unwrap();
        let dest = tmp.path().join("out");

        let err = extract_archive(&archive, &dest, &ExtractOptions::default()).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"one");
        assert!(!dest.join("b.txt").exists());
        assert!(!dest.join("c.txt").exists());
        let leftovers: Vec<_> = fs::read_dir(&dest)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec!["a.txt".to_string()]);
    }

    #[test]
    fn blocked_entry_leaves_no_part() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("pkg.tar");
        fs::write(
            &archive,
            tar_bytes(&[("first", b"1"), ("second", &[9u8; 4096])]),
        )
        .unwrap();
        let dest = tmp.path().join("out");
        fs::create_dir_all(dest.join("second")).unwrap();

        // a directory in the way makes committing the second entry fail
        let err = extract_archive(&archive, &dest, &ExtractOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(fs::read(dest.join("first")).unwrap(), b"1");
        assert!(!part_path(&dest.join("second")).exists());
    }

    #[test]
    fn regularize_flattens_single_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("pkg");
        fs::create_dir_all(dir.join("pkg-1.0/bin")).unwrap();
        fs::write(dir.join("pkg-1.0/bin/tool"), "t").unwrap();

        regularize(&dir).unwrap();
        assert_eq!(fs::read_to_string(dir.join("bin/tool")).unwrap(), "t");
        assert!(!dir.join("pkg-1.0").exists());
    }

    #[test]
    fn regularize_leaves_multiple_entries_alone() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("pkg");
        fs::create_dir_all(dir.join("a")).unwrap();
        fs::write(dir.join("b"), "b").unwrap();

        regularize(&dir).unwrap();
        assert!(dir.join("a").is_dir());
        assert!(dir.join("b").is_file());
    }

    #[test]
    fn copy_payload_stages_plain_file() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("download.bin");
        fs::write(&source, "exe").unwrap();
        let dest = tmp.path().join("pkg");

        let placed = copy_payload(&source, &dest, "tool.exe").unwrap();
        assert_eq!(placed, dest.join("tool.exe"));
        assert_eq!(fs::read_to_string(placed).unwrap(), "exe");
    }
}
