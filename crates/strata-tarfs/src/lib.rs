//! Layer filesystem for strata
//!
//! Opens a decompressed layer tar as a read-only, random-access file tree:
//! one indexing pass, then seek-based reads. Requests normalize to
//! tar-root-relative form, symlink chains are bounded, and nothing a layer
//! contains can cause a read outside the archive bytes.

mod fs;
pub mod path;
pub mod whiteout;

pub use fs::{Entry, EntryKind, TarFs};

use strata_core::{Error, ErrorKind};

/// Errors from the layer filesystem
#[derive(Debug, thiserror::Error)]
pub enum TarFsError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not a symlink: {0}")]
    NotSymlink(String),
    #[error("is a directory: {0}")]
    IsDirectory(String),
    #[error("link chain too long resolving {0}")]
    LinkDepth(String),
    #[error("malformed archive: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<TarFsError> for Error {
    fn from(err: TarFsError) -> Self {
        let kind = match &err {
            TarFsError::Malformed(_) => ErrorKind::Permanent,
            TarFsError::Io(_) => ErrorKind::Transient,
            _ => ErrorKind::Invalid,
        };
        Error::new(kind, err.to_string())
    }
}
