use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for sqlcarve operations.
///
/// Modeled after SQLite's error codes with Rust-idiomatic structure: one
/// variant per failure family, with enough detail to explain the failure
/// without re-reading the file.
#[derive(Error, Debug)]
pub enum CarveError {
    /// Database file not found.
    #[error("database not found: '{path}'")]
    DatabaseNotFound { path: PathBuf },

    /// Cannot open the database file.
    #[error("unable to open database file: '{path}'")]
    CannotOpen { path: PathBuf },

    /// Database file is not a valid SQLite database.
    #[error("file is not a database: '{path}'")]
    NotADatabase { path: PathBuf },

    /// Database file is corrupt.
    #[error("database disk image is malformed: {detail}")]
    DatabaseCorrupt { detail: String },

    /// WAL file is corrupt.
    #[error("WAL file is corrupt: {detail}")]
    WalCorrupt { detail: String },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Short read (fewer bytes than expected).
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// A page number beyond the end of the database was requested.
    #[error("page {page} out of range (database has {page_count} pages)")]
    PageOutOfRange { page: u32, page_count: u32 },

    /// The file is a database, but uses a format this tool cannot read.
    #[error("unsupported database format: {detail}")]
    UnsupportedFormat { detail: String },
}

/// SQLite result codes, for CLI exit-code compatibility.
///
/// The numeric values match C SQLite's `sqlite3.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Generic error.
    Error = 1,
    /// Disk I/O error.
    IoErr = 10,
    /// Database disk image is malformed.
    Corrupt = 11,
    /// Unable to open database file.
    CantOpen = 14,
    /// Not a database file.
    NotADb = 26,
}

impl CarveError {
    /// Map this error to a SQLite error code.
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::DatabaseNotFound { .. } | Self::CannotOpen { .. } => ErrorCode::CantOpen,
            Self::NotADatabase { .. } => ErrorCode::NotADb,
            Self::DatabaseCorrupt { .. }
            | Self::WalCorrupt { .. }
            | Self::PageOutOfRange { .. } => ErrorCode::Corrupt,
            Self::Io(_) | Self::ShortRead { .. } => ErrorCode::IoErr,
            Self::UnsupportedFormat { .. } => ErrorCode::Error,
        }
    }

    /// Get the process exit code for this error (for CLI use).
    pub const fn exit_code(&self) -> i32 {
        self.error_code() as i32
    }

    /// Create a database-corruption error.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::DatabaseCorrupt {
            detail: detail.into(),
        }
    }

    /// Create a WAL-corruption error.
    pub fn wal_corrupt(detail: impl Into<String>) -> Self {
        Self::WalCorrupt {
            detail: detail.into(),
        }
    }

    /// Create an unsupported-format error.
    pub fn unsupported(detail: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            detail: detail.into(),
        }
    }
}

/// Result type alias using `CarveError`.
pub type Result<T> = std::result::Result<T, CarveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_corrupt() {
        let err = CarveError::corrupt("invalid page header");
        assert_eq!(
            err.to_string(),
            "database disk image is malformed: invalid page header"
        );
    }

    #[test]
    fn error_display_not_a_database() {
        let err = CarveError::NotADatabase {
            path: PathBuf::from("/tmp/not.db"),
        };
        assert_eq!(err.to_string(), "file is not a database: '/tmp/not.db'");
    }

    #[test]
    fn error_display_page_out_of_range() {
        let err = CarveError::PageOutOfRange {
            page: 17,
            page_count: 4,
        };
        assert_eq!(
            err.to_string(),
            "page 17 out of range (database has 4 pages)"
        );
    }

    #[test]
    fn error_code_mapping() {
        assert_eq!(
            CarveError::corrupt("x").error_code(),
            ErrorCode::Corrupt
        );
        assert_eq!(
            CarveError::wal_corrupt("x").error_code(),
            ErrorCode::Corrupt
        );
        assert_eq!(
            CarveError::DatabaseNotFound {
                path: PathBuf::new()
            }
            .error_code(),
            ErrorCode::CantOpen
        );
        assert_eq!(
            CarveError::NotADatabase {
                path: PathBuf::new()
            }
            .error_code(),
            ErrorCode::NotADb
        );
        assert_eq!(
            CarveError::ShortRead {
                expected: 100,
                actual: 60
            }
            .error_code(),
            ErrorCode::IoErr
        );
        assert_eq!(CarveError::unsupported("x").error_code(), ErrorCode::Error);
    }

    #[test]
    fn exit_code_values() {
        assert_eq!(CarveError::corrupt("x").exit_code(), 11);
        assert_eq!(
            CarveError::CannotOpen {
                path: PathBuf::new()
            }
            .exit_code(),
            14
        );
        assert_eq!(CarveError::unsupported("x").exit_code(), 1);
    }

    #[test]
    fn io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: CarveError = io_err.into();
        assert!(matches!(err, CarveError::Io(_)));
        assert_eq!(err.error_code(), ErrorCode::IoErr);
    }
}
