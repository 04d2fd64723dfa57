//! `sqlite_sequence` traversal.
//!
//! The bookkeeping table behind AUTOINCREMENT holds (name, seq) rows.
//! Unlike the schema, individual oddities here are tolerated: a row
//! without a usable table name is skipped and a non-integer seq counts
//! as zero. Only an undecodable row or a broken tree is an error, and
//! the caller decides how hard that error lands.

use sqlcarve_error::{CarveError, Result};
use sqlcarve_pager::{LeafCell, Page, PageKind, Pager};
use sqlcarve_types::record::parse_record;
use sqlcarve_types::{PageNumber, SqliteValue};
use tracing::trace;

use crate::crawler::{CrawlOutcome, PageAction, PageVisitor, crawl_tree};

/// Name of the bookkeeping table behind AUTOINCREMENT.
pub const SEQUENCE_TABLE: &str = "sqlite_sequence";

/// One (table name, highest used rowid) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    pub name: String,
    pub seq: i64,
}

/// Receiver for decoded sequence rows.
pub trait SequenceSink {
    fn on_sequence(&mut self, record: SequenceRecord) -> Result<()>;
}

/// Walk `sqlite_sequence` from `root` and feed each row to `sink`.
pub fn crawl_sequence<S: SequenceSink>(
    pager: &mut Pager,
    root: PageNumber,
    sink: &mut S,
) -> Result<()> {
    let mut visitor = SequenceVisitor { sink };
    match crawl_tree(pager, root, &mut visitor)? {
        CrawlOutcome::Completed => Ok(()),
        CrawlOutcome::Corrupted { detail } => Err(CarveError::corrupt(format!(
            "{SEQUENCE_TABLE}: {detail}"
        ))),
    }
}

struct SequenceVisitor<'a, S> {
    sink: &'a mut S,
}

impl<S: SequenceSink> PageVisitor for SequenceVisitor<'_, S> {
    fn visit_page(&mut self, page: &Page, _height: u32) -> Result<PageAction> {
        match page.kind() {
            PageKind::InteriorTable | PageKind::LeafTable => Ok(PageAction::Descend),
            other => Err(CarveError::corrupt(format!(
                "{SEQUENCE_TABLE} tree contains a {other:?} page at {}",
                page.number()
            ))),
        }
    }

    fn visit_cell(&mut self, _pager: &mut Pager, _page: &Page, cell: &LeafCell) -> Result<()> {
        match decode_sequence_row(cell)? {
            Some(record) => self.sink.on_sequence(record),
            None => Ok(()),
        }
    }
}

fn decode_sequence_row(cell: &LeafCell) -> Result<Option<SequenceRecord>> {
    let Some(values) = parse_record(&cell.payload) else {
        return Err(CarveError::corrupt(format!(
            "undecodable {SEQUENCE_TABLE} row {}",
            cell.rowid
        )));
    };
    let name = match values.first().and_then(SqliteValue::as_text) {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => {
            trace!(rowid = cell.rowid, "sequence row without a table name");
            return Ok(None);
        }
    };
    let seq = values
        .get(1)
        .and_then(SqliteValue::as_integer)
        .unwrap_or_default();
    Ok(Some(SequenceRecord { name, seq }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlcarve_types::record::serialize_record;

    fn cell(rowid: i64, values: &[SqliteValue]) -> LeafCell {
        LeafCell {
            rowid,
            payload: serialize_record(values),
        }
    }

    #[test]
    fn decodes_a_plain_row() {
        let row = cell(
            1,
            &[
                SqliteValue::Text("orders".to_owned()),
                SqliteValue::Integer(41),
            ],
        );
        let record = decode_sequence_row(&row).unwrap().unwrap();
        assert_eq!(record.name, "orders");
        assert_eq!(record.seq, 41);
    }

    #[test]
    fn nameless_rows_are_skipped() {
        let row = cell(2, &[SqliteValue::Null, SqliteValue::Integer(3)]);
        assert_eq!(decode_sequence_row(&row).unwrap(), None);
        let row = cell(3, &[SqliteValue::Text(String::new()), SqliteValue::Integer(3)]);
        assert_eq!(decode_sequence_row(&row).unwrap(), None);
    }

    #[test]
    fn non_integer_seq_counts_as_zero() {
        let row = cell(
            4,
            &[
                SqliteValue::Text("t".to_owned()),
                SqliteValue::Text("not a number".to_owned()),
            ],
        );
        assert_eq!(decode_sequence_row(&row).unwrap().unwrap().seq, 0);
    }

    #[test]
    fn undecodable_rows_are_errors() {
        let row = LeafCell {
            rowid: 5,
            payload: vec![0xff; 3],
        };
        assert!(decode_sequence_row(&row).is_err());
    }
}
