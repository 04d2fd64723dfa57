//! Write-ahead log parsing and verified absorption.
//!
//! A WAL file is a 32-byte header followed by frames. Each frame is a
//! 24-byte header plus one page image:
//!
//! ```text
//! WAL header (32 bytes, all fields big-endian):
//!   offset  size  field
//!   0       4     magic (0x377f0682 LE-checksum or 0x377f0683 BE-checksum)
//!   4       4     format version (3007000)
//!   8       4     page size
//!   12      4     checkpoint sequence number
//!   16      4     salt1
//!   20      4     salt2
//!   24      4     checksum1 (over header bytes 0..24)
//!   28      4     checksum2
//!
//! Frame header (24 bytes, all fields big-endian):
//!   0       4     page number
//!   4       4     database size in pages after commit (0 = not a commit)
//!   8       4     salt1 (must match the WAL header)
//!   12      4     salt2
//!   16      4     checksum1 (cumulative)
//!   20      4     checksum2
//! ```
//!
//! The checksum is a rolling pair of u32 accumulators fed 8 bytes at a
//! time. The low bit of the magic selects whether those 8-byte chunks are
//! read as little-endian or big-endian words. Each frame's checksum covers
//! the first 8 bytes of its header plus the page image, seeded by the
//! previous frame's checksum (or the header checksum for the first frame).
//!
//! [`WalSnapshot::absorb`] applies the salvage policy: scan frames in
//! order, stop at the first sign of damage, and keep only frames up to the
//! last commit. A WAL that cannot be used at all is reported as `None`
//! rather than an error, so the caller can fall back to the main file.

use std::collections::HashMap;

use sqlcarve_error::{CarveError, Result};
use sqlcarve_types::{PageNumber, PageSize, WalSalt};
use tracing::{debug, trace};

/// WAL magic for little-endian checksum words.
pub const WAL_MAGIC_LE: u32 = 0x377f_0682;
/// WAL magic for big-endian checksum words.
pub const WAL_MAGIC_BE: u32 = 0x377f_0683;
/// The only WAL format version in use.
pub const WAL_FORMAT_VERSION: u32 = 3_007_000;
/// Size of the WAL file header.
pub const WAL_HEADER_SIZE: usize = 32;
/// Size of each frame header.
pub const WAL_FRAME_HEADER_SIZE: usize = 24;

// ---------------------------------------------------------------------------
// Checksum
// ---------------------------------------------------------------------------

/// The two rolling checksum accumulators used throughout the WAL format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalChecksum {
    pub s1: u32,
    pub s2: u32,
}

impl WalChecksum {
    /// The zero seed used for the WAL header checksum.
    pub const ZERO: Self = Self { s1: 0, s2: 0 };

    /// Fold `data` into the checksum, 8 bytes at a time.
    ///
    /// `data.len()` must be a multiple of 8; page sizes and the checksummed
    /// header prefixes always are. `big_endian` selects how each pair of
    /// u32 words is decoded, per the low bit of the WAL magic.
    #[must_use]
    pub fn advance(self, data: &[u8], big_endian: bool) -> Self {
        debug_assert_eq!(data.len() % 8, 0, "WAL checksum input must be 8-aligned");
        let mut s1 = self.s1;
        let mut s2 = self.s2;
        for chunk in data.chunks_exact(8) {
            let (w0, w1) = if big_endian {
                (
                    u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                    u32::from_be_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
                )
            } else {
                (
                    u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                    u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
                )
            };
            s1 = s1.wrapping_add(w0).wrapping_add(s2);
            s2 = s2.wrapping_add(w1).wrapping_add(s1);
        }
        Self { s1, s2 }
    }
}

/// Compute a frame's cumulative checksum.
///
/// The input is the first 8 bytes of the frame header followed by the page
/// image, seeded by the previous frame's checksum (or the WAL header
/// checksum for frame 1).
#[must_use]
pub fn frame_checksum(
    frame_header: &[u8],
    page_data: &[u8],
    seed: WalChecksum,
    big_endian: bool,
) -> WalChecksum {
    seed.advance(&frame_header[..8], big_endian)
        .advance(page_data, big_endian)
}

// ---------------------------------------------------------------------------
// Header and frame header
// ---------------------------------------------------------------------------

/// Parsed WAL file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalHeader {
    pub magic: u32,
    pub format_version: u32,
    pub page_size: u32,
    pub checkpoint_seq: u32,
    pub salt: WalSalt,
    pub checksum: WalChecksum,
}

impl WalHeader {
    /// Parse and fully validate a WAL header.
    ///
    /// Rejects a short buffer, an unknown magic, an unknown format version,
    /// and a header whose self-checksum does not match.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < WAL_HEADER_SIZE {
            return Err(CarveError::wal_corrupt(format!(
                "WAL header truncated: {} of {WAL_HEADER_SIZE} bytes",
                bytes.len()
            )));
        }
        let word = |off: usize| {
            u32::from_be_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
        };

        let magic = word(0);
        if magic != WAL_MAGIC_LE && magic != WAL_MAGIC_BE {
            return Err(CarveError::wal_corrupt(format!(
                "bad WAL magic: {magic:#010x}"
            )));
        }
        let format_version = word(4);
        if format_version != WAL_FORMAT_VERSION {
            return Err(CarveError::wal_corrupt(format!(
                "unsupported WAL format version: {format_version}"
            )));
        }

        let header = Self {
            magic,
            format_version,
            page_size: word(8),
            checkpoint_seq: word(12),
            salt: WalSalt {
                salt1: word(16),
                salt2: word(20),
            },
            checksum: WalChecksum {
                s1: word(24),
                s2: word(28),
            },
        };

        let computed = WalChecksum::ZERO.advance(&bytes[..24], header.big_endian_checksum());
        if computed != header.checksum {
            return Err(CarveError::wal_corrupt(
                "WAL header checksum mismatch".to_owned(),
            ));
        }
        Ok(header)
    }

    /// Whether checksum words are decoded big-endian, per the magic.
    #[must_use]
    pub const fn big_endian_checksum(&self) -> bool {
        self.magic & 1 == 1
    }

    /// Serialize the header, computing its self-checksum.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; WAL_HEADER_SIZE] {
        let mut bytes = [0u8; WAL_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.format_version.to_be_bytes());
        bytes[8..12].copy_from_slice(&self.page_size.to_be_bytes());
        bytes[12..16].copy_from_slice(&self.checkpoint_seq.to_be_bytes());
        bytes[16..20].copy_from_slice(&self.salt.salt1.to_be_bytes());
        bytes[20..24].copy_from_slice(&self.salt.salt2.to_be_bytes());
        let checksum = WalChecksum::ZERO.advance(&bytes[..24], self.big_endian_checksum());
        bytes[24..28].copy_from_slice(&checksum.s1.to_be_bytes());
        bytes[28..32].copy_from_slice(&checksum.s2.to_be_bytes());
        bytes
    }
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalFrameHeader {
    pub page_number: u32,
    pub db_size: u32,
    pub salt: WalSalt,
    pub checksum: WalChecksum,
}

impl WalFrameHeader {
    /// Parse a frame header. Returns `None` if the buffer is short.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < WAL_FRAME_HEADER_SIZE {
            return None;
        }
        let word = |off: usize| {
            u32::from_be_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
        };
        Some(Self {
            page_number: word(0),
            db_size: word(4),
            salt: WalSalt {
                salt1: word(8),
                salt2: word(12),
            },
            checksum: WalChecksum {
                s1: word(16),
                s2: word(20),
            },
        })
    }

    /// Serialize the frame header.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; WAL_FRAME_HEADER_SIZE] {
        let mut bytes = [0u8; WAL_FRAME_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.page_number.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.db_size.to_be_bytes());
        bytes[8..12].copy_from_slice(&self.salt.salt1.to_be_bytes());
        bytes[12..16].copy_from_slice(&self.salt.salt2.to_be_bytes());
        bytes[16..20].copy_from_slice(&self.checksum.s1.to_be_bytes());
        bytes[20..24].copy_from_slice(&self.checksum.s2.to_be_bytes());
        bytes
    }

    /// A frame with a nonzero database size marks a commit.
    #[must_use]
    pub const fn is_commit(&self) -> bool {
        self.db_size > 0
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// The committed prefix of a WAL, indexed by page number.
///
/// Holds the raw WAL bytes and a map from page number to the newest frame
/// that wrote it, considering only frames up to the last commit. Pages in
/// the snapshot shadow the main database file.
#[derive(Debug)]
pub struct WalSnapshot {
    salt: WalSalt,
    frame_count: u32,
    db_size: u32,
    frames: HashMap<u32, usize>,
    bytes: Vec<u8>,
    page_size: usize,
}

impl WalSnapshot {
    /// Scan a WAL image and absorb its committed frames.
    ///
    /// Returns `None` when the WAL is unusable as a whole: empty, header
    /// truncated or invalid, or written for a different page size. Damage
    /// further in (salt mismatch, checksum mismatch, truncated frame, junk
    /// page number) just ends the scan; everything committed before that
    /// point is kept. At most `max_frame` frames are considered.
    #[must_use]
    pub fn absorb(bytes: Vec<u8>, page_size: PageSize, max_frame: u32) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        let header = match WalHeader::from_bytes(&bytes) {
            Ok(header) => header,
            Err(error) => {
                debug!(error = %error, "WAL rejected, reading from the main file only");
                return None;
            }
        };
        if header.page_size != page_size.get() {
            debug!(
                wal_page_size = header.page_size,
                db_page_size = page_size.get(),
                "WAL page size does not match the database, ignoring it"
            );
            return None;
        }

        let big_endian = header.big_endian_checksum();
        let frame_size = WAL_FRAME_HEADER_SIZE + page_size.as_usize();
        let mut running = header.checksum;
        let mut cursor = WAL_HEADER_SIZE;
        let mut scanned: u32 = 0;

        let mut pending: Vec<(u32, usize)> = Vec::new();
        let mut frames: HashMap<u32, usize> = HashMap::new();
        let mut frame_count = 0u32;
        let mut db_size = 0u32;

        while scanned < max_frame {
            if cursor + frame_size > bytes.len() {
                if cursor < bytes.len() {
                    trace!(
                        frame = scanned + 1,
                        "WAL ends in a partial frame, stopping the scan"
                    );
                }
                break;
            }
            let frame = &bytes[cursor..cursor + frame_size];
            let Some(frame_header) = WalFrameHeader::from_bytes(frame) else {
                break;
            };
            if frame_header.salt != header.salt {
                trace!(
                    frame = scanned + 1,
                    frame_salt = %frame_header.salt,
                    wal_salt = %header.salt,
                    "frame from an older log generation, stopping the scan"
                );
                break;
            }
            if frame_header.page_number == 0 {
                debug!(frame = scanned + 1, "frame names page 0, stopping the scan");
                break;
            }
            let computed = frame_checksum(
                &frame[..8],
                &frame[WAL_FRAME_HEADER_SIZE..],
                running,
                big_endian,
            );
            if computed != frame_header.checksum {
                debug!(
                    frame = scanned + 1,
                    page = frame_header.page_number,
                    "frame checksum mismatch, stopping the scan"
                );
                break;
            }
            running = computed;
            scanned += 1;
            pending.push((frame_header.page_number, cursor + WAL_FRAME_HEADER_SIZE));
            if frame_header.is_commit() {
                for (page, offset) in pending.drain(..) {
                    frames.insert(page, offset);
                }
                frame_count = scanned;
                db_size = frame_header.db_size;
            }
            cursor += frame_size;
        }

        debug!(
            frames = frame_count,
            pages = frames.len(),
            db_size,
            salt = %header.salt,
            "absorbed WAL"
        );
        Some(Self {
            salt: header.salt,
            frame_count,
            db_size,
            frames,
            bytes,
            page_size: page_size.as_usize(),
        })
    }

    /// Salts from the WAL header.
    #[must_use]
    pub const fn salt(&self) -> WalSalt {
        self.salt
    }

    /// Number of frames absorbed, up to and including the last commit.
    #[must_use]
    pub const fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Database size in pages recorded by the last absorbed commit,
    /// or 0 if no frame committed.
    #[must_use]
    pub const fn db_size(&self) -> u32 {
        self.db_size
    }

    /// The newest committed image of `page`, if the WAL holds one.
    #[must_use]
    pub fn page_content(&self, page: PageNumber) -> Option<&[u8]> {
        let offset = *self.frames.get(&page.get())?;
        self.bytes.get(offset..offset + self.page_size)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
