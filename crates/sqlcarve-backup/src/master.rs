//! Schema table traversal.
//!
//! Every database keeps its catalog in a table tree rooted at page 1.
//! Each row has five columns: type, name, tbl_name, rootpage, sql. Only
//! `type = 'table'` rows with a usable root page are of interest here;
//! indexes, views, triggers, and virtual tables have no tree to salvage
//! and are skipped without comment.
//!
//! Damage at this level is unrecoverable: with an undecodable catalog
//! row or a broken catalog tree there is no trustworthy way to attribute
//! anything below it, so both end the run.

use sqlcarve_error::{CarveError, Result};
use sqlcarve_pager::{LeafCell, Page, PageKind, Pager};
use sqlcarve_types::record::parse_record;
use sqlcarve_types::{PageNumber, SqliteValue};
use tracing::{debug, trace};

use crate::crawler::{CrawlOutcome, PageAction, PageVisitor, crawl_tree};

/// Root of the schema table, fixed by the file format.
pub const MASTER_ROOT: PageNumber = PageNumber::ONE;

/// Columns of a schema row: type, name, tbl_name, rootpage, sql.
const MASTER_COLUMNS: usize = 5;

/// One table definition lifted from the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRecord {
    pub name: String,
    pub rootpage: PageNumber,
    /// The CREATE statement, empty when the schema row stored NULL.
    pub sql: String,
}

/// Receiver for decoded table rows.
pub trait CatalogSink {
    /// Called once per table row, in rowid order. The pager is lent so
    /// the sink can walk the table's tree before the next row arrives.
    fn on_table(&mut self, pager: &mut Pager, record: CatalogRecord) -> Result<()>;
}

/// Walk the schema table and feed every table row to `sink`.
pub fn crawl_master<S: CatalogSink>(pager: &mut Pager, sink: &mut S) -> Result<()> {
    let mut visitor = MasterVisitor { sink };
    match crawl_tree(pager, MASTER_ROOT, &mut visitor)? {
        CrawlOutcome::Completed => Ok(()),
        CrawlOutcome::Corrupted { detail } => {
            Err(CarveError::corrupt(format!("schema table: {detail}")))
        }
    }
}

struct MasterVisitor<'a, S> {
    sink: &'a mut S,
}

impl<S: CatalogSink> PageVisitor for MasterVisitor<'_, S> {
    fn visit_page(&mut self, page: &Page, _height: u32) -> Result<PageAction> {
        match page.kind() {
            PageKind::InteriorTable | PageKind::LeafTable => Ok(PageAction::Descend),
            other => Err(CarveError::corrupt(format!(
                "schema tree contains a {other:?} page at {}",
                page.number()
            ))),
        }
    }

    fn visit_cell(&mut self, pager: &mut Pager, page: &Page, cell: &LeafCell) -> Result<()> {
        match decode_catalog_row(cell, page)? {
            Some(record) => self.sink.on_table(pager, record),
            None => Ok(()),
        }
    }
}

/// Decode one schema row. `Ok(None)` means the row is intact but not a
/// table whose tree can be walked.
fn decode_catalog_row(cell: &LeafCell, page: &Page) -> Result<Option<CatalogRecord>> {
    let Some(values) = parse_record(&cell.payload) else {
        return Err(CarveError::corrupt(format!(
            "undecodable schema row {} on page {}",
            cell.rowid,
            page.number()
        )));
    };
    if values.len() < MASTER_COLUMNS {
        return Err(CarveError::corrupt(format!(
            "schema row {} has {} columns, expected {MASTER_COLUMNS}",
            cell.rowid,
            values.len()
        )));
    }
    let Some(kind) = values[0].as_text() else {
        return Err(CarveError::corrupt(format!(
            "schema row {} has a non-text type column",
            cell.rowid
        )));
    };
    if kind != "table" {
        trace!(rowid = cell.rowid, kind, "skipping non-table schema row");
        return Ok(None);
    }
    let Some(name) = values[1].as_text() else {
        return Err(CarveError::corrupt(format!(
            "schema row {} has a non-text name column",
            cell.rowid
        )));
    };
    let Some(root) = values[3].as_integer() else {
        return Err(CarveError::corrupt(format!(
            "table '{name}' has a non-integer rootpage"
        )));
    };
    let Some(rootpage) = u32::try_from(root).ok().and_then(PageNumber::new) else {
        // CREATE VIRTUAL TABLE rows store rootpage 0.
        debug!(name, rootpage = root, "table has no tree root, skipping");
        return Ok(None);
    };
    let sql = match &values[4] {
        SqliteValue::Text(sql) => sql.clone(),
        SqliteValue::Null => String::new(),
        _ => {
            return Err(CarveError::corrupt(format!(
                "table '{name}' has a non-text sql column"
            )));
        }
    };
    Ok(Some(CatalogRecord {
        name: name.to_owned(),
        rootpage,
        sql,
    }))
}
