//! Salvage-manifest extraction from damaged SQLite databases.
//!
//! One [`Backup::run`] walks whatever survives of a database's schema
//! and produces a [`Material`]: per table, the CREATE statement, the
//! leaf page numbers holding its rows, and its auto-increment sequence.
//! A repair step can then carve row data out of exactly those pages
//! without trusting anything else in the file.
//!
//! The walk is built to keep going: damage confined to one table drops
//! that table and nothing else. Only damage to the schema itself, or an
//! unreadable page mid-walk, fails the run.

pub mod backup;
pub mod crawler;
pub mod master;
pub mod material;
pub mod sequence;

pub use backup::{Backup, TableFilter};
pub use crawler::{CrawlOutcome, MAX_CRAWL_DEPTH, PageAction, PageVisitor, crawl_tree};
pub use master::{CatalogRecord, CatalogSink, MASTER_ROOT, crawl_master};
pub use material::{DropReason, DroppedTable, Material, MaterialInfo, TableContent, WalStamp};
pub use sequence::{SEQUENCE_TABLE, SequenceRecord, SequenceSink, crawl_sequence};
