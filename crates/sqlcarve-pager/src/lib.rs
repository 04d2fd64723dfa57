//! Read path over a possibly damaged SQLite database: header validation,
//! WAL absorption, page parsing, and overflow reassembly.
//!
//! The pager never writes. It exists to hand out [`Page`] views that a
//! salvage walk can traverse, preferring the newest committed WAL frame
//! for each page over the image in the main file.

pub mod page;
pub mod pager;
pub mod wal;

pub use page::{Page, PageKind, TableLeafCell};
pub use pager::{LeafCell, Pager};
pub use wal::WalSnapshot;
