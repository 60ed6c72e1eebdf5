//! Atomic file output: write to `<final>.part`, rename on commit.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sk_core::Error;

/// Staged output whose final name only appears on `commit`.
///
/// Dropping a sink without committing it behaves like `abandon`.
pub trait StagingSink: Write + Sized {
    fn create(final_path: &Path, overwrite: bool) -> Result<Self, Error>;
    fn commit(self) -> Result<PathBuf, Error>;
    fn abandon(self);
}

pub fn part_path(final_path: &Path) -> PathBuf {
    let mut name = OsString::from(final_path.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

pub struct StagedFile {
    file: Option<fs::File>,
    part_path: PathBuf,
    final_path: PathBuf,
    committed: bool,
}

impl StagedFile {
    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn set_modified(&self, time: SystemTime) -> Result<(), Error> {
        if let Some(file) = &self.file {
            file.set_modified(time)
                .map_err(|e| Error::io("failed to set modification time", e))?;
        }
        Ok(())
    }

    #[cfg(unix)]
    pub fn set_mode(&self, mode: u32) -> Result<(), Error> {
        use std::os::unix::fs::PermissionsExt;
        if let Some(file) = &self.file {
            file.set_permissions(fs::Permissions::from_mode(mode & 0o7777))
                .map_err(|e| Error::io("failed to set permissions", e))?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn set_mode(&self, _mode: u32) -> Result<(), Error> {
        Ok(())
    }

    fn remove_part(&mut self) {
        // unlinking first releases the name at once; the open handle keeps
        // the storage alive until it is closed below
        #[cfg(unix)]
        {
            let _ = fs::remove_file(&self.part_path);
            drop(self.file.take());
        }
        #[cfg(not(unix))]
        {
            drop(self.file.take());
            let _ = fs::remove_file(&self.part_path);
        }
    }
}

impl StagingSink for StagedFile {
    fn create(final_path: &Path, overwrite: bool) -> Result<Self, Error> {
        if !overwrite && final_path.exists() {
            return Err(Error::Io {
                message: format!("file exists: {}", final_path.display()),
            });
        }

        if let Some(parent) = final_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| {
                Error::io(&format!("failed to create directory {}", parent.display()), e)
            })?;
        }

        let part_path = part_path(final_path);
        let file = fs::File::create(&part_path)
            .map_err(|e| Error::io(&format!("failed to create {}", part_path.display()), e))?;

        Ok(Self {
            file: Some(file),
            part_path,
            final_path: final_path.to_path_buf(),
            committed: false,
        })
    }

    fn commit(mut self) -> Result<PathBuf, Error> {
        let Some(mut file) = self.file.take() else {
            return Err(Error::Io {
                message: "staged file already closed".to_string(),
            });
        };
        file.flush()
            .map_err(|e| Error::io("failed to flush staged file", e))?;
        drop(file);

        if let Err(e) = fs::rename(&self.part_path, &self.final_path) {
            let _ = fs::remove_file(&self.part_path);
            return Err(Error::io(
                &format!("failed to rename into {}", self.final_path.display()),
                e,
            ));
        }

        self.committed = true;
        Ok(self.final_path.clone())
    }

    fn abandon(mut self) {
        self.remove_part();
        self.committed = true;
    }
}

impl Write for StagedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.file {
            Some(file) => file.write(buf),
            None => Err(io::Error::other("staged file closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.file {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            self.remove_part();
        }
    }
}

/// Write `bytes` to `path` through a staged file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let mut staged = StagedFile::create(path, true)?;
    staged
        .write_all(bytes)
        .map_err(|e| Error::io(&format!("failed to write {}", path.display()), e))?;
    staged.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn commit_produces_final_file() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("nested/dir/out.txt");

        let mut staged = StagedFile::create(&target, false).unwrap();
        staged.write_all(b"hello world").unwrap();
        assert!(part_path(&target).exists());
        assert!(!target.exists());

        let final_path = staged.commit().unwrap();
        assert_eq!(final_path, target);
        assert_eq!(fs::read_to_string(&target).unwrap(), "hello world");
        assert!(!part_path(&target).exists());
    }

    #[test]
    fn drop_without_commit_leaves_nothing() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("out.bin");

        {
            let mut staged = StagedFile::create(&target, false).unwrap();
            staged.write_all(b"partial data").unwrap();
        }

        assert!(!target.exists());
        assert!(!part_path(&target).exists());
    }

    #[test]
    fn abandon_removes_staging_file() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("out.bin");

        let mut staged = StagedFile::create(&target, false).unwrap();
        staged.write_all(b"data").unwrap();
        staged.abandon();

        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn existing_file_requires_overwrite() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("out.txt");
        fs::write(&target, "old").unwrap();

        assert!(StagedFile::create(&target, false).is_err());
        assert_eq!(fs::read_to_string(&target).unwrap(), "old");

        let mut staged = StagedFile::create(&target, true).unwrap();
        staged.write_all(b"new").unwrap();
        staged.commit().unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
    }

    #[test]
    fn abandoned_overwrite_keeps_previous_content() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("out.txt");
        fs::write(&target, "old").unwrap();

        let mut staged = StagedFile::create(&target, true).unwrap();
        staged.write_all(b"half").unwrap();
        drop(staged);

        assert_eq!(fs::read_to_string(&target).unwrap(), "old");
    }

    #[test]
    fn write_atomic_replaces_content() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("state.json");
        write_atomic(&target, b"{}").unwrap();
        write_atomic(&target, b"{\"a\":1}").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn modification_time_survives_commit() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("dated");
        let when = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_600_000_000);

        let mut staged = StagedFile::create(&target, false).unwrap();
        staged.write_all(b"x").unwrap();
        staged.set_modified(when).unwrap();
        staged.commit().unwrap();

        assert_eq!(fs::metadata(&target).unwrap().modified().unwrap(), when);
    }
}
