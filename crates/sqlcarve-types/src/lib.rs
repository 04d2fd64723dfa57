//! Core SQLite file-format primitives shared across the sqlcarve crates.
//!
//! Everything here describes the on-disk format only. Policy (what to do
//! when a field is damaged) lives with the callers.

pub mod encoding;
pub mod record;
pub mod serial_type;
pub mod value;

pub use value::SqliteValue;

use std::fmt;
use std::num::NonZeroU32;

/// A page number in the database file.
///
/// Page numbers are 1-based (page 0 does not exist). Page 1 holds the file
/// header and the schema table root.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct PageNumber(NonZeroU32);

impl PageNumber {
    /// Page 1, the database header page and schema table root.
    pub const ONE: Self = Self(NonZeroU32::MIN);

    /// Create a page number from a raw u32.
    ///
    /// Returns `None` if `n` is 0.
    #[inline]
    pub const fn new(n: u32) -> Option<Self> {
        match NonZeroU32::new(n) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Get the raw u32 value.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for PageNumber {
    type Error = InvalidPageNumber;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidPageNumber)
    }
}

/// Error returned when attempting to create a `PageNumber` from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidPageNumber;

impl fmt::Display for InvalidPageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("page number cannot be zero")
    }
}

impl std::error::Error for InvalidPageNumber {}

/// Database page size in bytes.
///
/// Must be a power of two between 512 and 65536 (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PageSize(u32);

impl PageSize {
    /// Minimum page size: 512 bytes.
    pub const MIN: Self = Self(512);

    /// Default page size: 4096 bytes.
    pub const DEFAULT: Self = Self(4096);

    /// Maximum page size: 65536 bytes.
    pub const MAX: Self = Self(65_536);

    /// Create a new page size, validating that it is a power of two in
    /// the range \[512, 65536\].
    pub const fn new(size: u32) -> Option<Self> {
        if size < 512 || size > 65_536 || !size.is_power_of_two() {
            None
        } else {
            Some(Self(size))
        }
    }

    /// Get the raw page size in bytes.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Get the page size as a `usize`.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// The usable size of a page (total size minus reserved bytes at the end).
    ///
    /// `reserved` is the per-page byte count stored at offset 20 of the
    /// database header.
    #[inline]
    pub const fn usable(self, reserved: u8) -> u32 {
        self.0 - reserved as u32
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two salt values carried in a WAL header and echoed by every frame.
///
/// A checkpoint that resets the log increments `salt1` and randomizes
/// `salt2`, so frames from an earlier log generation can be recognized
/// and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct WalSalt {
    pub salt1: u32,
    pub salt2: u32,
}

impl fmt::Display for WalSalt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}:{:08x}", self.salt1, self.salt2)
    }
}

/// The magic string at the start of every SQLite database file.
pub const DATABASE_HEADER_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Size of the database file header in bytes.
pub const DATABASE_HEADER_SIZE: usize = 100;

/// Maximum file format version this tool understands (2 = WAL).
pub const MAX_FILE_FORMAT_VERSION: u8 = 2;

/// Smallest usable page size SQLite will produce (`page_size - reserved`).
pub const MIN_USABLE_SIZE: u32 = 480;

/// Errors that can occur while parsing or validating the 100-byte database header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseHeaderError {
    /// Magic string mismatch at bytes 0..16.
    InvalidMagic,
    /// Page size encoding was invalid.
    InvalidPageSize { raw: u16 },
    /// Embedded payload fractions (bytes 21..24) are invalid.
    InvalidPayloadFractions { max: u8, min: u8, leaf: u8 },
    /// The usable page size would fall below SQLite's minimum of 480.
    UsableSizeTooSmall {
        page_size: u32,
        reserved_per_page: u8,
        usable_size: u32,
    },
    /// Read file format version is too new to be understood.
    UnsupportedReadVersion { read_version: u8, max_supported: u8 },
}

impl fmt::Display for DatabaseHeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMagic => f.write_str("invalid database header magic"),
            Self::InvalidPageSize { raw } => write!(f, "invalid page size encoding: {raw}"),
            Self::InvalidPayloadFractions { max, min, leaf } => write!(
                f,
                "invalid payload fractions: max={max} min={min} leaf={leaf}"
            ),
            Self::UsableSizeTooSmall {
                page_size,
                reserved_per_page,
                usable_size,
            } => write!(
                f,
                "usable page size too small: page_size={page_size} reserved={reserved_per_page} usable={usable_size}"
            ),
            Self::UnsupportedReadVersion {
                read_version,
                max_supported,
            } => write!(
                f,
                "unsupported read format version: read_version={read_version} max_supported={max_supported}"
            ),
        }
    }
}

impl std::error::Error for DatabaseHeaderError {}

/// Parsed 100-byte database file header.
///
/// Only the fields the salvage path consults are modeled. Fields this tool
/// never reads (freelist, schema cookie, vacuum settings) are skipped on
/// parse and written as their defaults on serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseHeader {
    pub page_size: PageSize,
    pub write_version: u8,
    pub read_version: u8,
    /// Bytes reserved at the end of every page, offset 20.
    pub reserved_per_page: u8,
    /// File change counter, offset 24.
    pub change_counter: u32,
    /// In-header database size in pages, offset 28. May be stale or zero.
    pub page_count: u32,
    /// The change counter value for which `page_count` is valid, offset 92.
    pub version_valid_for: u32,
    /// SQLite version number that last wrote the file, offset 96.
    pub sqlite_version: u32,
}

impl DatabaseHeader {
    /// Parse and validate a 100-byte database header.
    pub fn from_bytes(buf: &[u8; DATABASE_HEADER_SIZE]) -> Result<Self, DatabaseHeaderError> {
        if &buf[..DATABASE_HEADER_MAGIC.len()] != DATABASE_HEADER_MAGIC {
            return Err(DatabaseHeaderError::InvalidMagic);
        }

        let page_size_raw = encoding::read_u16_be(&buf[16..18]).expect("fixed u16 field");
        let page_size_u32 = match page_size_raw {
            1 => 65_536,
            0 => return Err(DatabaseHeaderError::InvalidPageSize { raw: page_size_raw }),
            n => u32::from(n),
        };
        let page_size = PageSize::new(page_size_u32)
            .ok_or(DatabaseHeaderError::InvalidPageSize { raw: page_size_raw })?;

        let write_version = buf[18];
        let read_version = buf[19];
        let reserved_per_page = buf[20];

        let max_payload = buf[21];
        let min_payload = buf[22];
        let leaf_payload = buf[23];
        if (max_payload, min_payload, leaf_payload) != (64, 32, 32) {
            return Err(DatabaseHeaderError::InvalidPayloadFractions {
                max: max_payload,
                min: min_payload,
                leaf: leaf_payload,
            });
        }

        let usable_size = page_size.usable(reserved_per_page);
        if usable_size < MIN_USABLE_SIZE {
            return Err(DatabaseHeaderError::UsableSizeTooSmall {
                page_size: page_size.get(),
                reserved_per_page,
                usable_size,
            });
        }

        if read_version > MAX_FILE_FORMAT_VERSION {
            return Err(DatabaseHeaderError::UnsupportedReadVersion {
                read_version,
                max_supported: MAX_FILE_FORMAT_VERSION,
            });
        }

        let change_counter = encoding::read_u32_be(&buf[24..28]).expect("fixed u32 field");
        let page_count = encoding::read_u32_be(&buf[28..32]).expect("fixed u32 field");
        let version_valid_for = encoding::read_u32_be(&buf[92..96]).expect("fixed u32 field");
        let sqlite_version = encoding::read_u32_be(&buf[96..100]).expect("fixed u32 field");

        Ok(Self {
            page_size,
            write_version,
            read_version,
            reserved_per_page,
            change_counter,
            page_count,
            version_valid_for,
            sqlite_version,
        })
    }

    /// Check whether the in-header page count can be trusted.
    ///
    /// When `version_valid_for != change_counter` a writer bumped the change
    /// counter without refreshing the size field, so the count must be
    /// recomputed from the actual file size.
    pub const fn is_page_count_stale(&self) -> bool {
        self.version_valid_for != self.change_counter
    }

    /// Derive the page count from the actual file size, rounding up so a
    /// truncated trailing page is still addressable.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn page_count_from_file_size(&self, file_size: u64) -> u32 {
        let count = file_size.div_ceil(self.page_size.get() as u64);
        if count > u32::MAX as u64 {
            u32::MAX
        } else {
            count as u32
        }
    }

    /// Serialize this header into a 100-byte buffer.
    ///
    /// Unmodeled fields are written as the defaults of a freshly created
    /// database (schema format 4, UTF-8 text, empty freelist).
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_to_bytes(
        &self,
        out: &mut [u8; DATABASE_HEADER_SIZE],
    ) -> Result<(), DatabaseHeaderError> {
        let usable_size = self.page_size.usable(self.reserved_per_page);
        if usable_size < MIN_USABLE_SIZE {
            return Err(DatabaseHeaderError::UsableSizeTooSmall {
                page_size: self.page_size.get(),
                reserved_per_page: self.reserved_per_page,
                usable_size,
            });
        }

        out.fill(0);
        out[..16].copy_from_slice(DATABASE_HEADER_MAGIC);
        let raw_page_size: u16 = if self.page_size.get() == 65_536 {
            1
        } else {
            self.page_size.get() as u16
        };
        out[16..18].copy_from_slice(&raw_page_size.to_be_bytes());
        out[18] = self.write_version;
        out[19] = self.read_version;
        out[20] = self.reserved_per_page;
        out[21] = 64;
        out[22] = 32;
        out[23] = 32;
        out[24..28].copy_from_slice(&self.change_counter.to_be_bytes());
        out[28..32].copy_from_slice(&self.page_count.to_be_bytes());
        out[44..48].copy_from_slice(&4u32.to_be_bytes()); // schema format
        out[48..52].copy_from_slice(&(-2000i32).to_be_bytes()); // default cache size
        out[56..60].copy_from_slice(&1u32.to_be_bytes()); // UTF-8 text encoding
        out[92..96].copy_from_slice(&self.version_valid_for.to_be_bytes());
        out[96..100].copy_from_slice(&self.sqlite_version.to_be_bytes());
        Ok(())
    }
}

impl Default for DatabaseHeader {
    fn default() -> Self {
        Self {
            page_size: PageSize::DEFAULT,
            write_version: 1,
            read_version: 1,
            reserved_per_page: 0,
            change_counter: 1,
            page_count: 1,
            version_valid_for: 1,
            sqlite_version: 3_046_000,
        }
    }
}
