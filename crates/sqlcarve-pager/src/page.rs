//! B-tree page views.
//!
//! A [`Page`] owns one page image and exposes just enough structure for a
//! salvage walk: the page kind, the child pointers of an interior table
//! page, and the cells of a table leaf. Parsing the page header and cell
//! pointer array is strict (damage there is unrecoverable), while child
//! pointer lookups are lenient: [`Page::child`] reports a zero or
//! out-of-range pointer as `None` and leaves the policy to the caller.

use sqlcarve_error::{CarveError, Result};
use sqlcarve_types::PageNumber;
use sqlcarve_types::serial_type::read_varint;

/// Page header size for leaf pages.
pub const LEAF_HEADER_SIZE: usize = 8;
/// Page header size for interior pages (adds the right-most child).
pub const INTERIOR_HEADER_SIZE: usize = 12;
/// Offset of the page header on page 1, past the database file header.
pub const PAGE_ONE_HEADER_OFFSET: usize = 100;

const CELL_POINTER_SIZE: usize = 2;

/// B-tree page kind, from the flag byte at the start of the page header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    InteriorIndex,
    InteriorTable,
    LeafIndex,
    LeafTable,
}

impl PageKind {
    /// Decode the flag byte. Returns `None` for anything unknown.
    #[must_use]
    pub const fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0x02 => Some(Self::InteriorIndex),
            0x05 => Some(Self::InteriorTable),
            0x0a => Some(Self::LeafIndex),
            0x0d => Some(Self::LeafTable),
            _ => None,
        }
    }

    /// Whether this is an interior (non-leaf) page.
    #[must_use]
    pub const fn is_interior(self) -> bool {
        matches!(self, Self::InteriorIndex | Self::InteriorTable)
    }

    /// Whether this is a leaf page.
    #[must_use]
    pub const fn is_leaf(self) -> bool {
        !self.is_interior()
    }

    /// Whether this is a table (intkey) page.
    #[must_use]
    pub const fn is_table(self) -> bool {
        matches!(self, Self::InteriorTable | Self::LeafTable)
    }

    /// Size of the page header for this kind.
    #[must_use]
    pub const fn header_size(self) -> usize {
        if self.is_interior() {
            INTERIOR_HEADER_SIZE
        } else {
            LEAF_HEADER_SIZE
        }
    }
}

// ---------------------------------------------------------------------------
// Local payload thresholds
// ---------------------------------------------------------------------------

/// Maximum payload bytes stored directly on a page of the given kind.
#[must_use]
pub const fn max_local_payload(usable_size: u32, kind: PageKind) -> u32 {
    if kind.is_table() && kind.is_leaf() {
        usable_size - 35
    } else {
        (usable_size - 12) * 64 / 255 - 23
    }
}

/// Minimum local payload when a cell overflows. Same for all page kinds.
#[must_use]
pub const fn min_local_payload(usable_size: u32) -> u32 {
    (usable_size - 12) * 32 / 255 - 23
}

/// How many payload bytes stay on the page for a cell of `payload_size`.
///
/// ```text
/// local = M + ((P - M) % (U - 4))
/// if local > X: local = M
/// ```
///
/// Where `P` = payload size, `U` = usable size, `X` = max local,
/// `M` = min local.
#[must_use]
pub const fn local_payload_size(payload_size: u32, usable_size: u32, kind: PageKind) -> u32 {
    let max_local = max_local_payload(usable_size, kind);
    if payload_size <= max_local {
        return payload_size;
    }
    let min_local = min_local_payload(usable_size);
    let local = min_local + (payload_size - min_local) % (usable_size - 4);
    if local > max_local { min_local } else { local }
}

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

/// One cell of a table leaf page, before overflow reassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLeafCell<'a> {
    pub rowid: i64,
    /// Total payload size, local and overflow together.
    pub payload_size: u32,
    /// The payload bytes stored on this page.
    pub local: &'a [u8],
    /// First overflow page, when the payload continues off-page.
    pub first_overflow: Option<PageNumber>,
}

/// A parsed B-tree page.
#[derive(Debug)]
pub struct Page {
    number: PageNumber,
    kind: PageKind,
    data: Vec<u8>,
    cell_pointers: Vec<u16>,
    right_child: u32,
    usable_size: u32,
    db_page_count: u32,
}

impl Page {
    /// Parse a page image.
    ///
    /// `db_page_count` bounds the child pointers [`Page::child`] will
    /// accept. The page header and cell pointer array must be intact;
    /// anything wrong with them is reported as corruption.
    pub fn parse(
        number: PageNumber,
        data: Vec<u8>,
        usable_size: u32,
        db_page_count: u32,
    ) -> Result<Self> {
        let header_offset = if number == PageNumber::ONE {
            PAGE_ONE_HEADER_OFFSET
        } else {
            0
        };
        if data.len() < header_offset + LEAF_HEADER_SIZE {
            return Err(CarveError::corrupt(format!(
                "page {number} too small for a B-tree header: {} bytes",
                data.len()
            )));
        }
        let h = &data[header_offset..];

        let kind = PageKind::from_flag(h[0]).ok_or_else(|| {
            CarveError::corrupt(format!(
                "invalid B-tree page flag {:#04x} on page {number}",
                h[0]
            ))
        })?;

        let cell_count = usize::from(u16::from_be_bytes([h[3], h[4]]));
        let raw_content_offset = u16::from_be_bytes([h[5], h[6]]);
        let cell_content_offset = if raw_content_offset == 0 {
            65536
        } else {
            u32::from(raw_content_offset)
        };
        if cell_content_offset as usize > data.len() {
            return Err(CarveError::corrupt(format!(
                "cell content offset {cell_content_offset} past the end of page {number}"
            )));
        }

        let right_child = if kind.is_interior() {
            if data.len() < header_offset + INTERIOR_HEADER_SIZE {
                return Err(CarveError::corrupt(format!(
                    "page {number} too small for an interior B-tree header"
                )));
            }
            u32::from_be_bytes([h[8], h[9], h[10], h[11]])
        } else {
            0
        };

        let ptr_array_start = header_offset + kind.header_size();
        let ptr_array_end = ptr_array_start + cell_count * CELL_POINTER_SIZE;
        if ptr_array_end > data.len() {
            return Err(CarveError::corrupt(format!(
                "cell pointer array extends past page {number}: {cell_count} cells"
            )));
        }
        let mut cell_pointers = Vec::with_capacity(cell_count);
        for i in 0..cell_count {
            let off = ptr_array_start + i * CELL_POINTER_SIZE;
            cell_pointers.push(u16::from_be_bytes([data[off], data[off + 1]]));
        }

        Ok(Self {
            number,
            kind,
            data,
            cell_pointers,
            right_child,
            usable_size,
            db_page_count,
        })
    }

    #[must_use]
    pub const fn number(&self) -> PageNumber {
        self.number
    }

    #[must_use]
    pub const fn kind(&self) -> PageKind {
        self.kind
    }

    /// Number of cells on the page.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cell_pointers.len()
    }

    /// Number of children of an interior page (cells plus the right-most
    /// pointer). Zero for leaves.
    #[must_use]
    pub fn child_count(&self) -> usize {
        if self.kind.is_interior() {
            self.cell_pointers.len() + 1
        } else {
            0
        }
    }

    /// The `index`-th child of an interior page, left to right. The last
    /// index is the right-most pointer from the page header.
    ///
    /// Returns `None` for a leaf, an index past the last child, or a
    /// pointer that cannot be valid here: zero, or beyond the database
    /// page count. Distinguishing those is the caller's concern; all of
    /// them mean the child cannot be followed.
    #[must_use]
    pub fn child(&self, index: usize) -> Option<PageNumber> {
        if !self.kind.is_interior() {
            return None;
        }
        let raw = if index < self.cell_pointers.len() {
            let off = usize::from(self.cell_pointers[index]);
            let bytes = self.data.get(off..off + 4)?;
            u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
        } else if index == self.cell_pointers.len() {
            self.right_child
        } else {
            return None;
        };
        if raw > self.db_page_count {
            return None;
        }
        PageNumber::new(raw)
    }

    /// Parse the `index`-th cell of a table leaf page.
    ///
    /// The caller reassembles overflow via the pager; this only slices the
    /// local portion.
    pub fn table_leaf_cell(&self, index: usize) -> Result<TableLeafCell<'_>> {
        if self.kind != PageKind::LeafTable {
            return Err(CarveError::corrupt(format!(
                "cell requested from a {:?} page {}",
                self.kind, self.number
            )));
        }
        let offset = usize::from(*self.cell_pointers.get(index).ok_or_else(|| {
            CarveError::corrupt(format!(
                "cell index {index} out of range on page {}",
                self.number
            ))
        })?);
        let cell = self.data.get(offset..).ok_or_else(|| {
            CarveError::corrupt(format!(
                "cell pointer {offset} past the end of page {}",
                self.number
            ))
        })?;

        let (payload_size, n_payload) = read_varint(cell).ok_or_else(|| {
            CarveError::corrupt(format!("truncated payload size on page {}", self.number))
        })?;
        let payload_size = u32::try_from(payload_size).map_err(|_| {
            CarveError::corrupt(format!(
                "payload size {payload_size} too large on page {}",
                self.number
            ))
        })?;
        let (rowid, n_rowid) = read_varint(&cell[n_payload..]).ok_or_else(|| {
            CarveError::corrupt(format!("truncated rowid on page {}", self.number))
        })?;
        #[allow(clippy::cast_possible_wrap)]
        let rowid = rowid as i64;

        let local_size = local_payload_size(payload_size, self.usable_size, self.kind) as usize;
        let local_start = offset + n_payload + n_rowid;
        let local = self
            .data
            .get(local_start..local_start + local_size)
            .ok_or_else(|| {
                CarveError::corrupt(format!(
                    "cell payload extends past page {}: {local_size} bytes at {local_start}",
                    self.number
                ))
            })?;

        let first_overflow = if (local_size as u32) < payload_size {
            let ptr_start = local_start + local_size;
            let bytes = self.data.get(ptr_start..ptr_start + 4).ok_or_else(|| {
                CarveError::corrupt(format!(
                    "overflow pointer extends past page {}",
                    self.number
                ))
            })?;
            let raw = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            Some(PageNumber::new(raw).ok_or_else(|| {
                CarveError::corrupt(format!(
                    "zero overflow pointer on page {}",
                    self.number
                ))
            })?)
        } else {
            None
        };

        Ok(TableLeafCell {
            rowid,
            payload_size,
            local,
            first_overflow,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::cast_possible_truncation)]
mod tests {
    use super::*;
    use sqlcarve_types::serial_type::write_varint;

    const PAGE: usize = 512;
    const USABLE: u32 = 512;

    fn pgno(n: u32) -> PageNumber {
        PageNumber::new(n).unwrap()
    }

    /// Build a table leaf page holding the given (rowid, payload) cells.
    fn leaf_page(cells: &[(i64, &[u8])]) -> Vec<u8> {
        let mut page = vec![0u8; PAGE];
        page[0] = 0x0d;
        page[3..5].copy_from_slice(&(cells.len() as u16).to_be_bytes());

        let mut top = PAGE;
        let mut pointers = Vec::new();
        for &(rowid, payload) in cells {
            let mut cell = Vec::new();
            let mut varint = [0u8; 9];
            let n = write_varint(&mut varint, payload.len() as u64);
            cell.extend_from_slice(&varint[..n]);
            let n = write_varint(&mut varint, rowid as u64);
            cell.extend_from_slice(&varint[..n]);
            cell.extend_from_slice(payload);
            top -= cell.len();
            page[top..top + cell.len()].copy_from_slice(&cell);
            pointers.push(top as u16);
        }
        page[5..7].copy_from_slice(&(top as u16).to_be_bytes());
        for (i, ptr) in pointers.iter().enumerate() {
            let off = LEAF_HEADER_SIZE + i * 2;
            page[off..off + 2].copy_from_slice(&ptr.to_be_bytes());
        }
        page
    }

    /// Build an interior table page with the given children. The last
    /// entry becomes the right-most pointer.
    fn interior_page(children: &[u32]) -> Vec<u8> {
        let (&right, keyed) = children.split_last().unwrap();
        let mut page = vec![0u8; PAGE];
        page[0] = 0x05;
        page[3..5].copy_from_slice(&(keyed.len() as u16).to_be_bytes());
        page[8..12].copy_from_slice(&right.to_be_bytes());

        let mut top = PAGE;
        let mut pointers = Vec::new();
        for (i, &child) in keyed.iter().enumerate() {
            let mut cell = Vec::new();
            cell.extend_from_slice(&child.to_be_bytes());
            let mut varint = [0u8; 9];
            let n = write_varint(&mut varint, (i as u64 + 1) * 10);
            cell.extend_from_slice(&varint[..n]);
            top -= cell.len();
            page[top..top + cell.len()].copy_from_slice(&cell);
            pointers.push(top as u16);
        }
        page[5..7].copy_from_slice(&(top as u16).to_be_bytes());
        for (i, ptr) in pointers.iter().enumerate() {
            let off = INTERIOR_HEADER_SIZE + i * 2;
            page[off..off + 2].copy_from_slice(&ptr.to_be_bytes());
        }
        page
    }

    #[test]
    fn parses_a_table_leaf() {
        let data = leaf_page(&[(1, b"alpha"), (7, b"beta")]);
        let page = Page::parse(pgno(2), data, USABLE, 10).unwrap();
        assert_eq!(page.kind(), PageKind::LeafTable);
        assert_eq!(page.cell_count(), 2);
        assert_eq!(page.child_count(), 0);
        assert_eq!(page.child(0), None);

        let first = page.table_leaf_cell(0).unwrap();
        assert_eq!(first.rowid, 1);
        assert_eq!(first.local, b"alpha");
        assert_eq!(first.first_overflow, None);
        let second = page.table_leaf_cell(1).unwrap();
        assert_eq!(second.rowid, 7);
        assert_eq!(second.local, b"beta");
    }

    #[test]
    fn interior_children_in_order_with_rightmost_last() {
        let data = interior_page(&[3, 4, 9]);
        let page = Page::parse(pgno(2), data, USABLE, 10).unwrap();
        assert_eq!(page.kind(), PageKind::InteriorTable);
        assert_eq!(page.child_count(), 3);
        assert_eq!(page.child(0), Some(pgno(3)));
        assert_eq!(page.child(1), Some(pgno(4)));
        assert_eq!(page.child(2), Some(pgno(9)));
        assert_eq!(page.child(3), None);
    }

    #[test]
    fn zero_and_out_of_range_children_are_none() {
        let data = interior_page(&[0, 99, 5]);
        let page = Page::parse(pgno(2), data, USABLE, 10).unwrap();
        assert_eq!(page.child(0), None); // zero pointer
        assert_eq!(page.child(1), None); // beyond page count
        assert_eq!(page.child(2), Some(pgno(5)));
    }

    #[test]
    fn rejects_unknown_flag() {
        let mut data = vec![0u8; PAGE];
        data[0] = 0x07;
        let err = Page::parse(pgno(2), data, USABLE, 10).unwrap_err();
        assert!(err.to_string().contains("page flag"));
    }

    #[test]
    fn rejects_oversized_cell_pointer_array() {
        let mut data = vec![0u8; PAGE];
        data[0] = 0x0d;
        data[3..5].copy_from_slice(&1000u16.to_be_bytes());
        data[5..7].copy_from_slice(&(PAGE as u16).to_be_bytes());
        assert!(Page::parse(pgno(2), data, USABLE, 10).is_err());
    }

    #[test]
    fn page_one_header_sits_past_the_file_header() {
        let inner = leaf_page(&[(1, b"schema row")]);
        // Rebuild at offset 100: flag, counts, and pointer array shift,
        // while cell offsets stay page-absolute.
        let mut data = vec![0u8; PAGE];
        data[100] = 0x0d;
        data[103..105].copy_from_slice(&1u16.to_be_bytes());
        data[105..107].copy_from_slice(&inner[5..7]);
        data[108..110].copy_from_slice(&inner[8..10]);
        let top = u16::from_be_bytes([inner[5], inner[6]]) as usize;
        data[top..].copy_from_slice(&inner[top..]);

        let page = Page::parse(PageNumber::ONE, data, USABLE, 10).unwrap();
        assert_eq!(page.cell_count(), 1);
        assert_eq!(page.table_leaf_cell(0).unwrap().local, b"schema row");
    }

    #[test]
    fn truncated_cell_is_corrupt() {
        let mut data = leaf_page(&[(1, b"payload")]);
        // Point the cell at the very end of the page.
        data[8..10].copy_from_slice(&((PAGE - 1) as u16).to_be_bytes());
        data[PAGE - 1] = 0x80; // truncated varint
        let page = Page::parse(pgno(2), data, USABLE, 10).unwrap();
        assert!(page.table_leaf_cell(0).is_err());
    }

    #[test]
    fn overflowing_cell_reports_its_first_overflow_page() {
        let max_local = max_local_payload(USABLE, PageKind::LeafTable) as usize;
        let payload_size = max_local + 100;
        let local_size = local_payload_size(payload_size as u32, USABLE, PageKind::LeafTable);

        let mut cell = Vec::new();
        let mut varint = [0u8; 9];
        let n = write_varint(&mut varint, payload_size as u64);
        cell.extend_from_slice(&varint[..n]);
        let n = write_varint(&mut varint, 42);
        cell.extend_from_slice(&varint[..n]);
        cell.extend(std::iter::repeat_n(0xabu8, local_size as usize));
        cell.extend_from_slice(&6u32.to_be_bytes());

        let mut data = vec![0u8; PAGE];
        data[0] = 0x0d;
        data[3..5].copy_from_slice(&1u16.to_be_bytes());
        let top = PAGE - cell.len();
        data[5..7].copy_from_slice(&(top as u16).to_be_bytes());
        data[8..10].copy_from_slice(&(top as u16).to_be_bytes());
        data[top..].copy_from_slice(&cell);

        let page = Page::parse(pgno(2), data, USABLE, 10).unwrap();
        let parsed = page.table_leaf_cell(0).unwrap();
        assert_eq!(parsed.rowid, 42);
        assert_eq!(parsed.payload_size as usize, payload_size);
        assert_eq!(parsed.local.len(), local_size as usize);
        assert_eq!(parsed.first_overflow, Some(pgno(6)));
    }

    #[test]
    fn local_payload_thresholds() {
        assert_eq!(max_local_payload(512, PageKind::LeafTable), 477);
        assert_eq!(max_local_payload(512, PageKind::LeafIndex), 102);
        assert_eq!(min_local_payload(512), 39);
        // Below the threshold everything is local.
        assert_eq!(local_payload_size(477, 512, PageKind::LeafTable), 477);
        // Above it, the local portion drops to the modular split.
        let local = local_payload_size(478, 512, PageKind::LeafTable);
        assert!(local < 478);
        assert!(local >= 39);
    }
}
