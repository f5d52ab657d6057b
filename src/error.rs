use std::fmt;
use std::io;

/// Unified error type for the storage engine.
#[derive(Debug)]
pub enum Error {
    /// IO error from the storage backend. Fatal to the operation in progress.
    Io(io::Error),
    /// Data corruption detected (bad magic, checksum mismatch, undecodable page).
    Corruption(String),
    /// Key not found.
    NotFound,
    /// No committed root exists for this version.
    VersionNotFound(u64),
    /// No committed root exists at or before this timestamp.
    TimestampNotFound(u64),
    /// Read past the end of the appended data.
    Eof,
    /// A fixed-width decode was handed the wrong number of bytes, or an
    /// offset that is not page aligned.
    Bounds { expected: usize, actual: usize },
    /// A key/value pair that can never fit a page, even after a split.
    EntryTooLarge { size: usize, max: usize },
    /// The storage has been closed.
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Corruption(msg) => write!(f, "Corruption: {msg}"),
            Error::NotFound => write!(f, "Not found"),
            Error::VersionNotFound(v) => write!(f, "No committed root for version {v}"),
            Error::TimestampNotFound(ts) => write!(f, "No committed root at timestamp {ts}"),
            Error::Eof => write!(f, "Unexpected end of data"),
            Error::Bounds { expected, actual } => {
                write!(f, "Bounds error: expected {expected}, got {actual}")
            }
            Error::EntryTooLarge { size, max } => {
                write!(f, "Entry too large: {size} bytes (max: {max})")
            }
            Error::Closed => write!(f, "Storage is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
