//! Database file access with WAL-first page reads.
//!
//! [`Pager::open`] only captures the path; all I/O happens in
//! [`Pager::initialize`], which validates the database header, settles the
//! page count, and absorbs the committed prefix of `<path>-wal` if one is
//! usable. After that, [`Pager::acquire`] serves each page from the newest
//! committed WAL frame when there is one, otherwise from the main file.
//!
//! The page count in a damaged header is not taken at face value: when the
//! stored count is zero or was not refreshed by the last writer (the
//! version-valid-for counter disagrees with the change counter), the count
//! is derived from the file size instead, rounding up so a truncated final
//! page stays addressable.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use sqlcarve_error::{CarveError, Result};
use sqlcarve_types::{
    DATABASE_HEADER_SIZE, DatabaseHeader, DatabaseHeaderError, PageNumber, PageSize, WalSalt,
};
use tracing::{debug, warn};

use crate::page::Page;
use crate::wal::WalSnapshot;

/// One fully assembled table-leaf cell: local payload plus any overflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafCell {
    pub rowid: i64,
    pub payload: Vec<u8>,
}

/// Read path over one database file and its WAL.
#[derive(Debug)]
pub struct Pager {
    path: PathBuf,
    max_wal_frame: u32,
    file: Option<File>,
    page_size: PageSize,
    reserved_per_page: u8,
    usable_size: u32,
    page_count: u32,
    wal: Option<WalSnapshot>,
}

impl Pager {
    /// Create a pager for `path`. No I/O happens until
    /// [`Pager::initialize`].
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_wal_frame: u32::MAX,
            file: None,
            page_size: PageSize::DEFAULT,
            reserved_per_page: 0,
            usable_size: 0,
            page_count: 0,
            wal: None,
        }
    }

    /// Limit how many WAL frames [`Pager::initialize`] will consider.
    /// Zero disables the WAL entirely. Takes effect at initialization.
    pub fn set_max_wal_frame(&mut self, max_wal_frame: u32) {
        self.max_wal_frame = max_wal_frame;
    }

    /// Open the file, validate its header, settle the page count, and
    /// absorb the WAL.
    pub fn initialize(&mut self) -> Result<()> {
        let mut file = File::open(&self.path).map_err(|error| match error.kind() {
            std::io::ErrorKind::NotFound => CarveError::DatabaseNotFound {
                path: self.path.clone(),
            },
            _ => CarveError::CannotOpen {
                path: self.path.clone(),
            },
        })?;
        let file_len = file.metadata()?.len();
        if file_len < DATABASE_HEADER_SIZE as u64 {
            return Err(CarveError::NotADatabase {
                path: self.path.clone(),
            });
        }

        let mut header_bytes = [0u8; DATABASE_HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;
        let header = DatabaseHeader::from_bytes(&header_bytes).map_err(|error| match error {
            DatabaseHeaderError::InvalidMagic => CarveError::NotADatabase {
                path: self.path.clone(),
            },
            DatabaseHeaderError::UnsupportedReadVersion { .. } => {
                CarveError::unsupported(error.to_string())
            }
            other => CarveError::corrupt(other.to_string()),
        })?;

        let mut page_count = if header.page_count == 0 || header.is_page_count_stale() {
            let derived = header.page_count_from_file_size(file_len);
            debug!(
                stored = header.page_count,
                derived, "header page count not current, derived from file size"
            );
            derived
        } else {
            header.page_count
        };

        self.wal = None;
        if self.max_wal_frame == 0 {
            debug!("WAL frame limit is zero, reading from the main file only");
        } else {
            match std::fs::read(wal_path_for(&self.path)) {
                Ok(bytes) => {
                    if let Some(snapshot) =
                        WalSnapshot::absorb(bytes, header.page_size, self.max_wal_frame)
                    {
                        if snapshot.db_size() > page_count {
                            debug!(
                                from = page_count,
                                to = snapshot.db_size(),
                                "last WAL commit grew the database"
                            );
                            page_count = snapshot.db_size();
                        }
                        self.wal = Some(snapshot);
                    }
                }
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => return Err(CarveError::Io(error)),
            }
        }

        self.page_size = header.page_size;
        self.reserved_per_page = header.reserved_per_page;
        self.usable_size = header.page_size.usable(header.reserved_per_page);
        self.page_count = page_count;
        self.file = Some(file);
        debug!(
            page_size = self.page_size.get(),
            page_count = self.page_count,
            usable_size = self.usable_size,
            wal_frames = self.wal_frame_count(),
            "pager initialized"
        );
        Ok(())
    }

    /// Read and parse a B-tree page.
    pub fn acquire(&mut self, page: PageNumber) -> Result<Page> {
        let data = self.raw_page(page)?;
        Page::parse(page, data, self.usable_size, self.page_count)
    }

    /// Assemble the `index`-th cell of a table leaf, following its
    /// overflow chain if the payload continues off-page.
    pub fn leaf_cell(&mut self, page: &Page, index: usize) -> Result<LeafCell> {
        let cell = page.table_leaf_cell(index)?;
        let payload = match cell.first_overflow {
            None => cell.local.to_vec(),
            Some(first) => self.read_overflow_chain(cell.local, first, cell.payload_size)?,
        };
        Ok(LeafCell {
            rowid: cell.rowid,
            payload,
        })
    }

    fn raw_page(&mut self, page: PageNumber) -> Result<Vec<u8>> {
        if page.get() > self.page_count {
            return Err(CarveError::PageOutOfRange {
                page: page.get(),
                page_count: self.page_count,
            });
        }
        if let Some(wal) = &self.wal {
            if let Some(content) = wal.page_content(page) {
                return Ok(content.to_vec());
            }
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CarveError::corrupt("page requested before pager initialization"))?;
        let page_size = self.page_size.as_usize();
        let offset = u64::from(page.get() - 1) * page_size as u64;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; page_size];
        let mut filled = 0;
        while filled < page_size {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled < page_size {
            return Err(CarveError::ShortRead {
                expected: page_size,
                actual: filled,
            });
        }
        Ok(buf)
    }

    /// Reassemble a payload that spans an overflow chain. Each overflow
    /// page carries a 4-byte next pointer (0 ends the chain) and up to
    /// `usable - 4` payload bytes.
    fn read_overflow_chain(
        &mut self,
        local: &[u8],
        first: PageNumber,
        total_size: u32,
    ) -> Result<Vec<u8>> {
        let total = total_size as usize;
        let mut payload = Vec::with_capacity(total);
        payload.extend_from_slice(local);

        let bytes_per_page = (self.usable_size - 4) as usize;
        let mut next = Some(first);
        let mut visited = HashSet::new();

        while payload.len() < total {
            let Some(pgno) = next else {
                warn!(
                    expected = total,
                    got = payload.len(),
                    "overflow chain ended prematurely"
                );
                return Err(CarveError::corrupt(format!(
                    "overflow chain ended prematurely: got {} of {total} bytes",
                    payload.len()
                )));
            };
            if !visited.insert(pgno.get()) {
                warn!(page = pgno.get(), "overflow chain loops back on itself");
                return Err(CarveError::corrupt(format!(
                    "overflow chain cycles through page {pgno}"
                )));
            }
            let data = self.raw_page(pgno)?;
            next = PageNumber::new(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));

            let needed = total - payload.len();
            let available = data.len().saturating_sub(4).min(bytes_per_page);
            payload.extend_from_slice(&data[4..4 + needed.min(available)]);
        }
        Ok(payload)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Page size from the validated header.
    #[must_use]
    pub const fn page_size(&self) -> PageSize {
        self.page_size
    }

    /// Reserved bytes at the end of every page.
    #[must_use]
    pub const fn reserved_bytes(&self) -> u8 {
        self.reserved_per_page
    }

    /// Usable bytes per page (page size minus the reserved region).
    #[must_use]
    pub const fn usable_size(&self) -> u32 {
        self.usable_size
    }

    /// Effective page count, after deriving from the file size and any
    /// growth recorded by the last WAL commit.
    #[must_use]
    pub const fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Whether reads ignore the WAL, either because none was usable or
    /// because the frame limit was zero.
    #[must_use]
    pub const fn wal_disposed(&self) -> bool {
        self.wal.is_none()
    }

    /// Salts of the absorbed WAL, if one was absorbed.
    #[must_use]
    pub fn wal_salt(&self) -> Option<WalSalt> {
        self.wal.as_ref().map(WalSnapshot::salt)
    }

    /// Committed frames absorbed from the WAL, 0 if it was disposed.
    #[must_use]
    pub fn wal_frame_count(&self) -> u32 {
        self.wal.as_ref().map_or(0, WalSnapshot::frame_count)
    }
}

fn wal_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push("-wal");
    PathBuf::from(name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::cast_possible_truncation)]
mod tests {
    use super::*;
    use crate::page::{LEAF_HEADER_SIZE, PageKind, local_payload_size, max_local_payload};
    use crate::wal::{
        WAL_FORMAT_VERSION, WAL_MAGIC_LE, WalChecksum, WalFrameHeader, WalHeader, frame_checksum,
    };
    use sqlcarve_types::serial_type::write_varint;
    use tempfile::TempDir;

    const PAGE: usize = 512;

    fn pgno(n: u32) -> PageNumber {
        PageNumber::new(n).unwrap()
    }

    fn test_header(page_count: u32) -> DatabaseHeader {
        DatabaseHeader {
            page_size: PageSize::new(PAGE as u32).unwrap(),
            page_count,
            ..DatabaseHeader::default()
        }
    }

    /// A table leaf page with one (rowid, payload) cell.
    fn one_cell_leaf(rowid: i64, payload: &[u8]) -> Vec<u8> {
        let mut page = vec![0u8; PAGE];
        page[0] = 0x0d;
        page[3..5].copy_from_slice(&1u16.to_be_bytes());

        let mut cell = Vec::new();
        let mut varint = [0u8; 9];
        let n = write_varint(&mut varint, payload.len() as u64);
        cell.extend_from_slice(&varint[..n]);
        #[allow(clippy::cast_sign_loss)]
        let n = write_varint(&mut varint, rowid as u64);
        cell.extend_from_slice(&varint[..n]);
        cell.extend_from_slice(payload);

        let top = PAGE - cell.len();
        page[5..7].copy_from_slice(&(top as u16).to_be_bytes());
        page[LEAF_HEADER_SIZE..LEAF_HEADER_SIZE + 2].copy_from_slice(&(top as u16).to_be_bytes());
        page[top..].copy_from_slice(&cell);
        page
    }

    /// Write a database file: page 1 carries the header, the rest are
    /// given page images.
    fn write_db(dir: &TempDir, header: &DatabaseHeader, tail_pages: &[Vec<u8>]) -> PathBuf {
        let path = dir.path().join("fixture.db");
        let mut page1 = vec![0u8; PAGE];
        page1[0..100].copy_from_slice(&{
            let mut bytes = [0u8; DATABASE_HEADER_SIZE];
            header.write_to_bytes(&mut bytes).unwrap();
            bytes
        });
        page1[100] = 0x0d; // empty schema leaf
        page1[105..107].copy_from_slice(&(PAGE as u16).to_be_bytes());

        let mut image = page1;
        for page in tail_pages {
            image.extend_from_slice(page);
        }
        std::fs::write(&path, image).unwrap();
        path
    }

    fn write_wal(db_path: &Path, salt1: u32, frames: &[(u32, u32, Vec<u8>)]) {
        let header = WalHeader {
            magic: WAL_MAGIC_LE,
            format_version: WAL_FORMAT_VERSION,
            page_size: PAGE as u32,
            checkpoint_seq: 0,
            salt: WalSalt {
                salt1,
                salt2: 0x5555_aaaa,
            },
            checksum: WalChecksum::ZERO,
        };
        let header_bytes = header.to_bytes();
        let parsed = WalHeader::from_bytes(&header_bytes).unwrap();
        let mut wal = header_bytes.to_vec();
        let mut running = parsed.checksum;
        for (page_number, db_size, content) in frames {
            let mut frame_header = WalFrameHeader {
                page_number: *page_number,
                db_size: *db_size,
                salt: parsed.salt,
                checksum: WalChecksum::ZERO,
            };
            running = frame_checksum(&frame_header.to_bytes(), content, running, false);
            frame_header.checksum = running;
            wal.extend_from_slice(&frame_header.to_bytes());
            wal.extend_from_slice(content);
        }
        let mut wal_path = db_path.as_os_str().to_owned();
        wal_path.push("-wal");
        std::fs::write(PathBuf::from(wal_path), wal).unwrap();
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut pager = Pager::open(dir.path().join("absent.db"));
        let err = pager.initialize().unwrap_err();
        assert!(matches!(err, CarveError::DatabaseNotFound { .. }));
    }

    #[test]
    fn garbage_and_short_files_are_not_databases() {
        let dir = TempDir::new().unwrap();
        let garbage = dir.path().join("garbage.db");
        std::fs::write(&garbage, vec![0xffu8; 256]).unwrap();
        assert!(matches!(
            Pager::open(&garbage).initialize().unwrap_err(),
            CarveError::NotADatabase { .. }
        ));

        let short = dir.path().join("short.db");
        std::fs::write(&short, b"SQLite format 3\0").unwrap();
        assert!(matches!(
            Pager::open(&short).initialize().unwrap_err(),
            CarveError::NotADatabase { .. }
        ));
    }

    #[test]
    fn reads_pages_from_the_main_file() {
        let dir = TempDir::new().unwrap();
        let path = write_db(&dir, &test_header(2), &[one_cell_leaf(7, b"hello")]);
        let mut pager = Pager::open(path);
        pager.initialize().unwrap();
        assert_eq!(pager.page_size().get(), PAGE as u32);
        assert_eq!(pager.page_count(), 2);
        assert!(pager.wal_disposed());

        let page = pager.acquire(pgno(2)).unwrap();
        assert_eq!(page.kind(), PageKind::LeafTable);
        let cell = pager.leaf_cell(&page, 0).unwrap();
        assert_eq!(cell.rowid, 7);
        assert_eq!(cell.payload, b"hello");

        assert!(matches!(
            pager.acquire(pgno(3)).unwrap_err(),
            CarveError::PageOutOfRange { page: 3, page_count: 2 }
        ));
    }

    #[test]
    fn stale_page_count_is_derived_from_file_size() {
        let dir = TempDir::new().unwrap();
        let mut header = test_header(1);
        header.version_valid_for = header.change_counter + 1;
        let path = write_db(&dir, &header, &[one_cell_leaf(1, b"x"), one_cell_leaf(2, b"y")]);
        let mut pager = Pager::open(path);
        pager.initialize().unwrap();
        assert_eq!(pager.page_count(), 3);
        assert!(pager.acquire(pgno(3)).is_ok());
    }

    #[test]
    fn truncated_final_page_stays_addressable_but_reads_short() {
        let dir = TempDir::new().unwrap();
        let path = write_db(&dir, &test_header(0), &[one_cell_leaf(1, b"x")]);
        // Chop half of page 2 off.
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len((PAGE + PAGE / 2) as u64).unwrap();
        drop(file);

        let mut pager = Pager::open(path);
        pager.initialize().unwrap();
        assert_eq!(pager.page_count(), 2);
        assert!(matches!(
            pager.acquire(pgno(2)).unwrap_err(),
            CarveError::ShortRead { .. }
        ));
    }

    #[test]
    fn wal_frames_shadow_the_main_file() {
        let dir = TempDir::new().unwrap();
        let path = write_db(&dir, &test_header(2), &[one_cell_leaf(1, b"old")]);
        write_wal(&path, 0x1111_2222, &[(2, 2, one_cell_leaf(1, b"new"))]);

        let mut pager = Pager::open(&path);
        pager.initialize().unwrap();
        assert!(!pager.wal_disposed());
        assert_eq!(pager.wal_frame_count(), 1);
        assert_eq!(pager.wal_salt().unwrap().salt1, 0x1111_2222);

        let page = pager.acquire(pgno(2)).unwrap();
        let cell = pager.leaf_cell(&page, 0).unwrap();
        assert_eq!(cell.payload, b"new");
    }

    #[test]
    fn wal_commit_can_grow_the_database() {
        let dir = TempDir::new().unwrap();
        let path = write_db(&dir, &test_header(2), &[one_cell_leaf(1, b"p2")]);
        write_wal(&path, 7, &[(3, 3, one_cell_leaf(9, b"appended"))]);

        let mut pager = Pager::open(&path);
        pager.initialize().unwrap();
        assert_eq!(pager.page_count(), 3);
        let page = pager.acquire(pgno(3)).unwrap();
        assert_eq!(pager.leaf_cell(&page, 0).unwrap().payload, b"appended");
    }

    #[test]
    fn zero_frame_limit_disposes_the_wal() {
        let dir = TempDir::new().unwrap();
        let path = write_db(&dir, &test_header(2), &[one_cell_leaf(1, b"old")]);
        write_wal(&path, 7, &[(2, 2, one_cell_leaf(1, b"new"))]);

        let mut pager = Pager::open(&path);
        pager.set_max_wal_frame(0);
        pager.initialize().unwrap();
        assert!(pager.wal_disposed());
        assert_eq!(pager.wal_salt(), None);

        let page = pager.acquire(pgno(2)).unwrap();
        assert_eq!(pager.leaf_cell(&page, 0).unwrap().payload, b"old");
    }

    #[test]
    fn unusable_wal_is_ignored_without_failing() {
        let dir = TempDir::new().unwrap();
        let path = write_db(&dir, &test_header(2), &[one_cell_leaf(1, b"main")]);
        let mut wal_path = path.as_os_str().to_owned();
        wal_path.push("-wal");
        std::fs::write(PathBuf::from(wal_path), vec![0xccu8; 100]).unwrap();

        let mut pager = Pager::open(&path);
        pager.initialize().unwrap();
        assert!(pager.wal_disposed());
        let page = pager.acquire(pgno(2)).unwrap();
        assert_eq!(pager.leaf_cell(&page, 0).unwrap().payload, b"main");
    }

    #[test]
    fn overflow_payload_is_reassembled() {
        let usable = PAGE as u32;
        let max_local = max_local_payload(usable, PageKind::LeafTable);
        let payload: Vec<u8> = (0..max_local + 200).map(|i| (i % 251) as u8).collect();
        let local_size =
            local_payload_size(payload.len() as u32, usable, PageKind::LeafTable) as usize;

        // Page 2: the leaf cell with a pointer to overflow page 3.
        let mut cell = Vec::new();
        let mut varint = [0u8; 9];
        let n = write_varint(&mut varint, payload.len() as u64);
        cell.extend_from_slice(&varint[..n]);
        let n = write_varint(&mut varint, 5);
        cell.extend_from_slice(&varint[..n]);
        cell.extend_from_slice(&payload[..local_size]);
        cell.extend_from_slice(&3u32.to_be_bytes());

        let mut leaf = vec![0u8; PAGE];
        leaf[0] = 0x0d;
        leaf[3..5].copy_from_slice(&1u16.to_be_bytes());
        let top = PAGE - cell.len();
        leaf[5..7].copy_from_slice(&(top as u16).to_be_bytes());
        leaf[LEAF_HEADER_SIZE..LEAF_HEADER_SIZE + 2].copy_from_slice(&(top as u16).to_be_bytes());
        leaf[top..].copy_from_slice(&cell);

        // Page 3: the overflow remainder, next pointer 0.
        let mut overflow = vec![0u8; PAGE];
        overflow[4..4 + payload.len() - local_size].copy_from_slice(&payload[local_size..]);

        let dir = TempDir::new().unwrap();
        let path = write_db(&dir, &test_header(3), &[leaf, overflow]);
        let mut pager = Pager::open(path);
        pager.initialize().unwrap();

        let page = pager.acquire(pgno(2)).unwrap();
        let assembled = pager.leaf_cell(&page, 0).unwrap();
        assert_eq!(assembled.rowid, 5);
        assert_eq!(assembled.payload, payload);
    }

    #[test]
    fn cyclic_overflow_chain_is_corrupt() {
        let usable = PAGE as u32;
        let max_local = max_local_payload(usable, PageKind::LeafTable);
        let payload_size = max_local + 2000; // needs more than one overflow page
        let local_size = local_payload_size(payload_size, usable, PageKind::LeafTable) as usize;

        let mut cell = Vec::new();
        let mut varint = [0u8; 9];
        let n = write_varint(&mut varint, u64::from(payload_size));
        cell.extend_from_slice(&varint[..n]);
        let n = write_varint(&mut varint, 1);
        cell.extend_from_slice(&varint[..n]);
        cell.extend(std::iter::repeat_n(0u8, local_size));
        cell.extend_from_slice(&3u32.to_be_bytes());

        let mut leaf = vec![0u8; PAGE];
        leaf[0] = 0x0d;
        leaf[3..5].copy_from_slice(&1u16.to_be_bytes());
        let top = PAGE - cell.len();
        leaf[5..7].copy_from_slice(&(top as u16).to_be_bytes());
        leaf[LEAF_HEADER_SIZE..LEAF_HEADER_SIZE + 2].copy_from_slice(&(top as u16).to_be_bytes());
        leaf[top..].copy_from_slice(&cell);

        // Page 3 points back at itself.
        let mut overflow = vec![0u8; PAGE];
        overflow[0..4].copy_from_slice(&3u32.to_be_bytes());

        let dir = TempDir::new().unwrap();
        let path = write_db(&dir, &test_header(3), &[leaf, overflow]);
        let mut pager = Pager::open(path);
        pager.initialize().unwrap();

        let page = pager.acquire(pgno(2)).unwrap();
        let err = pager.leaf_cell(&page, 0).unwrap_err();
        assert!(err.to_string().contains("cycles"));
    }
}
