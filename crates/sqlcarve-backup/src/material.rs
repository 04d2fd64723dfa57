//! The salvage manifest.
//!
//! A [`Material`] is what a run leaves behind: the geometry of the source
//! database plus, per surviving table, its CREATE statement, its leaf page
//! numbers, and its auto-increment sequence. It deliberately stores page
//! *numbers*, not page contents; re-reading the pages is the consumer's
//! job, against the same WAL generation recorded in [`WalStamp`].

use std::collections::BTreeMap;
use std::fmt;

use sqlcarve_types::{PageNumber, PageSize, WalSalt};

/// Geometry of the source database, captured once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MaterialInfo {
    pub page_size: PageSize,
    pub reserved_bytes: u8,
    /// Identity of the absorbed WAL, `None` when reads bypassed it.
    pub wal: Option<WalStamp>,
}

/// Which WAL generation the manifest was read against.
///
/// A later checkpoint rewrites the salts, so a consumer can tell whether
/// the recorded page numbers still mean what they meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WalStamp {
    pub salt: WalSalt,
    pub frame_count: u32,
}

/// Everything salvaged for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TableContent {
    /// The CREATE statement from the schema row.
    pub sql: String,
    /// Highest auto-increment value seen for this table.
    pub sequence: i64,
    /// Leaf page numbers in discovery order.
    pub pages: Vec<PageNumber>,
}

/// The full manifest: geometry plus per-table content, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Material {
    pub info: Option<MaterialInfo>,
    pub contents: BTreeMap<String, TableContent>,
}

impl Material {
    /// Look up one table's content.
    #[must_use]
    pub fn content(&self, name: &str) -> Option<&TableContent> {
        self.contents.get(name)
    }

    /// Get or create the content slot for `name`.
    pub fn content_mut(&mut self, name: String) -> &mut TableContent {
        self.contents.entry(name).or_default()
    }
}

/// A table the run gave up on, and why.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DroppedTable {
    pub name: String,
    pub reason: DropReason,
}

/// Why a table was dropped rather than salvaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DropReason {
    /// Its tree was structurally damaged.
    CorruptTree,
    /// Its tree walk finished without finding a leaf page.
    NoLeafPages,
    /// Its schema row carried no CREATE statement.
    EmptySql,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::CorruptTree => "corrupt tree",
            Self::NoLeafPages => "no leaf pages",
            Self::EmptySql => "empty sql",
        };
        f.write_str(text)
    }
}
