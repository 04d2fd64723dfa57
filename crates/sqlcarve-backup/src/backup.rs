//! The salvage run.
//!
//! [`Backup`] owns a [`Pager`] and a [`Material`] and drives one pass:
//! initialize the pager, stamp the manifest with the source geometry,
//! then walk the schema. Each table row triggers a nested walk of that
//! table's tree while the schema walk is parked on its cell.
//!
//! Errors land at three severities. Local damage (a table tree that is
//! corrupt, leafless, or whose schema row has no SQL) drops that one
//! table and the run carries on. An unreadable page or row anywhere else
//! is fatal and fails the run, with one asymmetry: a fatal inside the
//! `sqlite_sequence` walk is held back so the remaining catalog rows are
//! still salvaged, and only then fails the run. The first fatal recorded
//! wins [`Backup::status`].

use std::fmt;
use std::path::PathBuf;

use sqlcarve_error::{CarveError, Result};
use sqlcarve_pager::{LeafCell, Page, Pager};
use sqlcarve_types::PageNumber;
use tracing::{debug, trace, warn};

use crate::crawler::{PageAction, PageVisitor, crawl_tree};
use crate::master::{CatalogRecord, CatalogSink, crawl_master};
use crate::material::{DropReason, DroppedTable, Material, MaterialInfo, WalStamp};
use crate::sequence::{SEQUENCE_TABLE, SequenceRecord, SequenceSink, crawl_sequence};

/// Table-name filter. Returning `true` keeps the table.
pub type TableFilter = Box<dyn Fn(&str) -> bool>;

/// Builds a [`Material`] from one database file.
pub struct Backup {
    pager: Pager,
    material: Material,
    filter: Option<TableFilter>,
    dropped: Vec<DroppedTable>,
    fatal: Option<CarveError>,
    max_wal_frame: u32,
}

impl Backup {
    /// Prepare a run against `path`. No I/O happens until [`Backup::run`].
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            pager: Pager::open(path),
            material: Material::default(),
            filter: None,
            dropped: Vec::new(),
            fatal: None,
            max_wal_frame: u32::MAX,
        }
    }

    /// Keep only tables for which `filter` returns true.
    ///
    /// The filter sees every candidate name, `sqlite_sequence` included:
    /// rejecting that name skips the sequence walk entirely, and each
    /// sequence row is checked against the filter as well.
    pub fn set_filter(&mut self, filter: impl Fn(&str) -> bool + 'static) {
        self.filter = Some(Box::new(filter));
    }

    /// Cap how many WAL frames the run may absorb. Zero ignores the WAL.
    pub fn set_max_wal_frame(&mut self, max_wal_frame: u32) {
        self.max_wal_frame = max_wal_frame;
    }

    /// Walk the database and build the manifest.
    ///
    /// Returns whether the manifest is trustworthy. On `false`,
    /// [`Backup::status`] carries the first fatal error; whatever was
    /// salvaged before it is still in [`Backup::material`].
    pub fn run(&mut self) -> bool {
        self.material = Material::default();
        self.dropped.clear();
        self.fatal = None;

        self.pager.set_max_wal_frame(self.max_wal_frame);
        if let Err(error) = self.pager.initialize() {
            warn!(
                path = %self.pager.path().display(),
                error = %error,
                "cannot read the database"
            );
            self.fatal = Some(error);
            return false;
        }
        self.material.info = Some(MaterialInfo {
            page_size: self.pager.page_size(),
            reserved_bytes: self.pager.reserved_bytes(),
            wal: self.pager.wal_salt().map(|salt| WalStamp {
                salt,
                frame_count: self.pager.wal_frame_count(),
            }),
        });

        let mut pass = CatalogPass {
            material: &mut self.material,
            filter: self.filter.as_deref(),
            dropped: &mut self.dropped,
            deferred: None,
        };
        let master = crawl_master(&mut self.pager, &mut pass);
        let deferred = pass.deferred;

        if let Some(error) = deferred {
            warn!(error = %error, "sequence walk failed, manifest sequences are incomplete");
            self.fatal = Some(error);
        }
        if let Err(error) = master {
            warn!(error = %error, "schema walk failed");
            if self.fatal.is_none() {
                self.fatal = Some(error);
            }
        }
        debug!(
            tables = self.material.contents.len(),
            dropped = self.dropped.len(),
            ok = self.fatal.is_none(),
            "salvage run finished"
        );
        self.fatal.is_none()
    }

    /// The manifest built by the last run.
    #[must_use]
    pub fn material(&self) -> &Material {
        &self.material
    }

    /// Consume the backup, keeping only the manifest.
    #[must_use]
    pub fn into_material(self) -> Material {
        self.material
    }

    /// The first fatal error of the last run, if any.
    #[must_use]
    pub fn status(&self) -> Option<&CarveError> {
        self.fatal.as_ref()
    }

    /// Consume the backup, keeping only the first fatal error.
    #[must_use]
    pub fn into_status(self) -> Option<CarveError> {
        self.fatal
    }

    /// Tables dropped for local damage during the last run.
    #[must_use]
    pub fn dropped_tables(&self) -> &[DroppedTable] {
        &self.dropped
    }
}

impl fmt::Debug for Backup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backup")
            .field("path", &self.pager.path())
            .field("tables", &self.material.contents.len())
            .field("dropped", &self.dropped.len())
            .field("fatal", &self.fatal)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Catalog pass
// ---------------------------------------------------------------------------

/// One pass over the schema rows: walks each user table as its row
/// arrives and routes `sqlite_sequence` to the sequence walk.
struct CatalogPass<'a> {
    material: &'a mut Material,
    filter: Option<&'a dyn Fn(&str) -> bool>,
    dropped: &'a mut Vec<DroppedTable>,
    /// A fatal from the sequence walk, held until the catalog finishes.
    deferred: Option<CarveError>,
}

impl CatalogPass<'_> {
    fn allows(&self, name: &str) -> bool {
        self.filter.is_none_or(|filter| filter(name))
    }

    fn drop_table(&mut self, name: String, reason: DropReason) {
        debug!(table = %name, %reason, "dropping table");
        self.dropped.push(DroppedTable { name, reason });
    }
}

impl CatalogSink for CatalogPass<'_> {
    fn on_table(&mut self, pager: &mut Pager, record: CatalogRecord) -> Result<()> {
        if !self.allows(&record.name) {
            trace!(table = %record.name, "filtered out");
            return Ok(());
        }
        if record.name == SEQUENCE_TABLE {
            let mut sequences = SequencePass {
                material: &mut *self.material,
                filter: self.filter,
            };
            if let Err(error) = crawl_sequence(pager, record.rootpage, &mut sequences) {
                // The rest of the catalog is still worth salvaging.
                if self.deferred.is_none() {
                    self.deferred = Some(error);
                }
            }
            return Ok(());
        }
        if self.allows(&record.name) {
            let mut walk = TableWalk::new();
            let outcome = crawl_tree(pager, record.rootpage, &mut walk)?;
            if walk.corrupted || outcome.is_corrupted() {
                self.drop_table(record.name, DropReason::CorruptTree);
            } else if walk.pages.is_empty() {
                self.drop_table(record.name, DropReason::NoLeafPages);
            } else if record.sql.is_empty() {
                self.drop_table(record.name, DropReason::EmptySql);
            } else {
                trace!(table = %record.name, pages = walk.pages.len(), "table salvaged");
                let content = self.material.content_mut(record.name);
                content.sql = record.sql;
                content.pages = std::mem::take(&mut walk.pages);
            }
        }
        Ok(())
    }
}

/// Merges sequence rows into the manifest, largest value per table.
struct SequencePass<'a> {
    material: &'a mut Material,
    filter: Option<&'a dyn Fn(&str) -> bool>,
}

impl SequenceSink for SequencePass<'_> {
    fn on_sequence(&mut self, record: SequenceRecord) -> Result<()> {
        let keep = self.filter.is_none_or(|filter| filter(&record.name));
        if !keep {
            trace!(table = %record.name, "sequence row filtered out");
            return Ok(());
        }
        let content = self.material.content_mut(record.name);
        content.sequence = content.sequence.max(record.seq);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Table walk
// ---------------------------------------------------------------------------

/// Collects one user table's leaf page numbers.
///
/// The first leaf reached records the height where leaves live. From
/// then on, an interior page one level above that appends its children
/// to the page list without descending, saving one read per leaf. An
/// invalid child pointer while doing so marks the walk corrupted and
/// stops collecting from that page. Pages that are not table pages are
/// ignored.
struct TableWalk {
    leaf_height: Option<u32>,
    pages: Vec<PageNumber>,
    corrupted: bool,
}

impl TableWalk {
    fn new() -> Self {
        Self {
            leaf_height: None,
            pages: Vec::new(),
            corrupted: false,
        }
    }
}

impl PageVisitor for TableWalk {
    fn visit_page(&mut self, page: &Page, height: u32) -> Result<PageAction> {
        if !page.kind().is_table() {
            trace!(page = page.number().get(), kind = ?page.kind(), "ignoring non-table page");
            return Ok(PageAction::Skip);
        }
        if page.kind().is_leaf() {
            self.leaf_height = Some(height);
            self.pages.push(page.number());
            return Ok(PageAction::Skip);
        }
        if self.leaf_height == Some(height + 1) {
            // Every child of this page is a leaf; count them in place.
            for index in 0..page.child_count() {
                let Some(child) = page.child(index) else {
                    warn!(
                        page = page.number().get(),
                        index, "invalid child pointer under a leaf parent"
                    );
                    self.corrupted = true;
                    break;
                };
                self.pages.push(child);
            }
            return Ok(PageAction::Skip);
        }
        Ok(PageAction::Descend)
    }

    fn visit_cell(&mut self, _pager: &mut Pager, page: &Page, _cell: &LeafCell) -> Result<()> {
        unreachable!(
            "page-collection walk descended into cells of leaf {}",
            page.number()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_database_fails_without_touching_the_manifest() {
        let mut backup = Backup::new("/no/such/path/fixture.db");
        assert!(!backup.run());
        assert!(matches!(
            backup.status(),
            Some(CarveError::DatabaseNotFound { .. })
        ));
        assert!(backup.material().info.is_none());
        assert!(backup.material().contents.is_empty());
        assert!(backup.dropped_tables().is_empty());
    }

    #[test]
    fn debug_omits_the_filter() {
        let mut backup = Backup::new("fixture.db");
        backup.set_filter(|name| name != "audit_log");
        let rendered = format!("{backup:?}");
        assert!(rendered.contains("fixture.db"));
        assert!(rendered.contains(".."));
    }
}
