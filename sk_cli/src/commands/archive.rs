//! Standalone `unzip` and `untar` commands.

use std::path::{Path, PathBuf};

use console::style;
use sk_core::Error;
use sk_io::extract::extract_archive_as;
use sk_io::{ArchiveKind, ExtractOptions};

use crate::display::{TransferBar, format_bytes, success};
use crate::settings::Settings;

/// Run the unzip command.
pub fn run_unzip(settings: &Settings, archive: &Path, dest: Option<PathBuf>) -> Result<(), Error> {
    extract(settings, archive, ArchiveKind::Zip, dest)
}

/// Run the untar command. The compression is taken from the file name.
pub fn run_untar(settings: &Settings, archive: &Path, dest: Option<PathBuf>) -> Result<(), Error> {
    let name = file_name(archive)?;
    let kind = match ArchiveKind::detect(&name) {
        Some(ArchiveKind::Zip) | None => {
            return Err(Error::format(format!("not a tar archive: {name}")));
        }
        Some(kind) => kind,
    };
    extract(settings, archive, kind, dest)
}

fn extract(
    settings: &Settings,
    archive: &Path,
    kind: ArchiveKind,
    dest: Option<PathBuf>,
) -> Result<(), Error> {
    let dest = match dest {
        Some(dest) => dest,
        None => default_destination(archive)?,
    };

    let bar = TransferBar::start(&file_name(archive)?, settings.quiet());
    let progress = bar.progress();
    let options = ExtractOptions {
        overwrite: settings.force,
        progress: Some(&*progress),
        ..Default::default()
    };
    let result = extract_archive_as(archive, kind, &dest, &options);
    bar.finish();
    let summary = result?;

    success(format!(
        "{} files ({}) extracted to {}",
        summary.files,
        format_bytes(summary.bytes),
        style(dest.display()).bold()
    ));
    Ok(())
}

fn file_name(path: &Path) -> Result<String, Error> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::format(format!("not a file: {}", path.display())))
}

/// `dir/pkg-1.0.tar.gz` extracts into `dir/pkg-1.0`.
pub fn default_destination(archive: &Path) -> Result<PathBuf, Error> {
    let name = file_name(archive)?;
    let lower = name.to_ascii_lowercase();
    let suffixes = [
        ".tar.gz", ".tar.bz2", ".tar.xz", ".tar.zst", ".tgz", ".tbz2", ".tbz", ".txz", ".tzst",
        ".tar", ".zip",
    ];
    let stem = suffixes
        .iter()
        .find(|s| lower.ends_with(*s) && lower.len() > s.len())
        .map(|s| &name[..name.len() - s.len()])
        .unwrap_or(name.as_str());

    let stem = if stem == name {
        format!("{stem}.out")
    } else {
        stem.to_string()
    };
    Ok(archive.with_file_name(stem))
}
