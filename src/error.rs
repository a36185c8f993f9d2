//! Error taxonomy for vecdb.
//!
//! Every fallible operation in this crate returns `Result<T, Error>`. Errors
//! carry a tagged `ErrorKind` (stable, match-able) plus a human message;
//! callers that need stable behavior should match on `kind()`, not on the
//! message text.

/// Tagged error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Dimension mismatch, malformed metadata, empty query text, bad config.
    InvalidInput,
    /// Unknown id, missing term.
    NotFound,
    /// Operation attempted before `init` or after `close`.
    NotReady,
    /// File open/read/write/sync/mmap failure; disk full.
    IoError,
    /// Malformed on-disk header, corrupt posting list, JSON parse failure.
    ParseError,
    /// Duplicate id insert, concurrent write rejected.
    Conflict,
    /// Feature not compiled in.
    Unsupported,
    /// Invariant violation. Should be unreachable; logged and surfaced.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NotReady => "not_ready",
            ErrorKind::IoError => "io_error",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// The crate's single error type: a kind tag plus a message.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotReady, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, message)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::IoError, e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::ParseError, e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::new(ErrorKind::IoError, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let e = Error::invalid_input("dimension mismatch");
        assert_eq!(e.kind(), ErrorKind::InvalidInput);
        assert!(e.to_string().contains("invalid_input"));
        assert!(e.to_string().contains("dimension mismatch"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
        let e: Error = io_err.into();
        assert_eq!(e.kind(), ErrorKind::IoError);
    }
}
