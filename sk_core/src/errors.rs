use std::fmt;
use std::path::PathBuf;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Malformed archive, manifest or feed structure.
    Format {
        message: String,
    },
    ChecksumMismatch {
        expected: String,
        actual: String,
        file_name: Option<String>,
    },
    /// An archive entry resolved outside the extraction root.
    PathTraversal {
        entry: String,
        root: PathBuf,
    },
    /// A sink rejected a chunk. Not a defect.
    Canceled,
    NotPortedForArchitecture {
        name: String,
        bucket: String,
    },
    Io {
        message: String,
    },
    NetworkFailure {
        message: String,
    },
    MissingPackage {
        name: String,
    },
    NotInstalled {
        name: String,
    },
    Frozen {
        name: String,
    },
}

impl Error {
    pub fn format(message: impl Into<String>) -> Self {
        Error::Format {
            message: message.into(),
        }
    }

    pub fn io(context: &str, err: impl fmt::Display) -> Self {
        Error::Io {
            message: format!("{context}: {err}"),
        }
    }

    /// Cancellation propagates like any failure but should not be reported
    /// as one.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Format { message } => write!(f, "malformed data: {message}"),
            Error::ChecksumMismatch {
                expected,
                actual,
                file_name,
            } => {
                write!(f, "checksum verification failed")?;
                if let Some(name) = file_name {
                    write!(f, " for '{}'", name)?;
                }
                write!(f, "\n  expected: {}\n  got:      {}", expected, actual)?;
                write!(
                    f,
                    "\n  hint: this may indicate a corrupted download; run 'sk cleancache' and try again"
                )
            }
            Error::PathTraversal { entry, root } => {
                write!(
                    f,
                    "archive entry '{}' escapes destination '{}'\n  hint: the archive is unsafe and was not extracted",
                    entry,
                    root.display()
                )
            }
            Error::Canceled => write!(f, "operation canceled"),
            Error::NotPortedForArchitecture { name, bucket } => {
                write!(
                    f,
                    "package '{}' from bucket '{}' is not yet ported for this architecture",
                    name, bucket
                )
            }
            Error::Io { message } => write!(f, "i/o error: {message}"),
            Error::NetworkFailure { message } => {
                write!(
                    f,
                    "network error: {}\n  hint: check your internet connection and try again",
                    message
                )
            }
            Error::MissingPackage { name } => {
                write!(
                    f,
                    "package '{}' not found in any bucket\n  hint: run 'sk update' to refresh buckets, or 'sk search {}'",
                    name, name
                )
            }
            Error::NotInstalled { name } => {
                write!(
                    f,
                    "package '{}' is not installed\n  hint: run 'sk install {}' to install it",
                    name, name
                )
            }
            Error::Frozen { name } => {
                write!(
                    f,
                    "package '{}' is frozen\n  hint: run 'sk unfreeze {}' or pass --force",
                    name, name
                )
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
        }
    }
}
