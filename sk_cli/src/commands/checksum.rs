//! `sha256sum` and `b3sum`.

use std::path::{Path, PathBuf};

use sk_core::Error;
use sk_io::{blake3_file, sha256_file};

#[derive(Debug, Clone, Copy)]
pub enum Algorithm {
    Sha256,
    Blake3,
}

/// `<hex>  <path>` for one file.
pub fn digest_line(path: &Path, algorithm: Algorithm) -> Result<String, Error> {
    let hex = match algorithm {
        Algorithm::Sha256 => sha256_file(path)?,
        Algorithm::Blake3 => blake3_file(path)?,
    };
    Ok(format!("{hex}  {}", path.display()))
}

/// Print digests of every file, continuing past unreadable ones.
pub fn run(files: &[PathBuf], algorithm: Algorithm) -> Result<(), Error> {
    let mut first_error = None;
    for file in files {
        match digest_line(file, algorithm) {
            Ok(line) => println!("{line}"),
            Err(e) => {
                eprintln!("{}: {e}", file.display());
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
