use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use sk_core::{Checksum, Error};

const READ_CHUNK: usize = 64 * 1024;

fn for_each_chunk(path: &Path, mut f: impl FnMut(&[u8])) -> Result<(), Error> {
    let mut file = File::open(path)
        .map_err(|e| Error::io(&format!("failed to open {}", path.display()), e))?;
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| Error::io(&format!("failed to read {}", path.display()), e))?;
        if n == 0 {
            return Ok(());
        }
        f(&buf[..n]);
    }
}

pub fn sha256_file(path: &Path) -> Result<String, Error> {
    let mut hasher = Sha256::new();
    for_each_chunk(path, |chunk| hasher.update(chunk))?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn blake3_file(path: &Path) -> Result<String, Error> {
    let mut hasher = blake3::Hasher::new();
    for_each_chunk(path, |chunk| {
        hasher.update(chunk);
    })?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Hash `path` with the algorithm `expected` names and compare.
pub fn verify_file(path: &Path, expected: &Checksum) -> Result<(), Error> {
    let actual = match expected {
        Checksum::Sha256(_) => sha256_file(path)?,
        Checksum::Blake3(_) => blake3_file(path)?,
    };

    if actual != expected.hex() {
        return Err(Error::ChecksumMismatch {
            expected: expected.hex().to_string(),
            actual,
            file_name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
        });
    }
    Ok(())
}
