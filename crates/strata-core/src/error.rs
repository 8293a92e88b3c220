//! Error taxonomy shared across the workspace
//!
//! Every fallible operation in strata surfaces an [`Error`] tagged with an
//! [`ErrorKind`]. The kind drives retry policy at the API boundary: transient
//! errors are retried by callers, permanent ones are not, and everything else
//! may stop recurring after a software upgrade.

use std::fmt;

/// Classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// The request conflicts with already-persisted state
    Conflict,
    /// An internal invariant was violated
    Internal,
    /// The input was malformed
    Invalid,
    /// A required precondition was not met (e.g. an unregistered scanner)
    Precondition,
    /// Likely to succeed on retry (transport, lock, database contention)
    Transient,
    /// Will never succeed (e.g. checksum mismatch on immutable content)
    Permanent,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Conflict => "conflict",
            Self::Internal => "internal",
            Self::Invalid => "invalid",
            Self::Precondition => "precondition",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        };
        f.write_str(s)
    }
}

/// Library error: a kind plus a human-readable message
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {msg}")]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, msg)
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Precondition, msg)
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, msg)
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.msg
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == ErrorKind::Permanent
    }

    /// Neither transient nor permanent: may stop recurring after an upgrade
    pub fn is_version_dependent(&self) -> bool {
        !self.is_transient() && !self.is_permanent()
    }

    /// Re-tag the error, keeping the message
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("serialization failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::Transient.to_string(), "transient");
        assert_eq!(ErrorKind::Precondition.to_string(), "precondition");
    }

    #[test]
    fn test_error_display_includes_kind() {
        let err = Error::permanent("checksum mismatch");
        assert_eq!(err.to_string(), "permanent: checksum mismatch");
    }

    #[test]
    fn test_version_dependent() {
        assert!(Error::internal("x").is_version_dependent());
        assert!(Error::invalid("x").is_version_dependent());
        assert!(!Error::transient("x").is_version_dependent());
        assert!(!Error::permanent("x").is_version_dependent());
    }

    #[test]
    fn test_with_kind() {
        let err = Error::internal("db timeout").with_kind(ErrorKind::Transient);
        assert!(err.is_transient());
        assert_eq!(err.message(), "db timeout");
    }
}
