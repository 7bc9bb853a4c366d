//! Transient Archive - append-only, per-identity, per-month store of committed windows
//!
//! # Layout
//!
//! ```text
//! Backend (name → byte stream)
//!     ↓
//! {identity}-{YYYY}-{MM}.zip          one container per identity per month
//!     ↓
//! {YYYY}-{MM}-{DD}-{H}-{M}.json       one entry per committed window, write-once
//! ```

pub mod backend;
pub mod transient;

pub use backend::{Backend, FsBackend};
pub use transient::{ArchiveLookup, TransientArchive};

#[derive(Debug)]
pub enum ArchiveError {
    Io(std::io::Error),
    Zip(zip::result::ZipError),
    Serialization(serde_json::Error),
    InvalidTimestamp(i64),
}

impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        ArchiveError::Io(err)
    }
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        ArchiveError::Zip(err)
    }
}

impl From<serde_json::Error> for ArchiveError {
    fn from(err: serde_json::Error) -> Self {
        ArchiveError::Serialization(err)
    }
}

impl std::fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveError::Io(e) => write!(f, "IO error: {}", e),
            ArchiveError::Zip(e) => write!(f, "Archive container error: {}", e),
            ArchiveError::Serialization(e) => write!(f, "Serialization error: {}", e),
            ArchiveError::InvalidTimestamp(ts) => {
                write!(f, "Timestamp {} cannot be mapped to a calendar date", ts)
            }
        }
    }
}

impl std::error::Error for ArchiveError {}
