//! Public API facade for sqlcarve.
//!
//! Most consumers want [`salvage`] for a one-call run, or [`Backup`] when
//! they need filters, a WAL frame cap, or the partial manifest of a failed
//! run. The internal crates are re-exported for anything lower level.

pub use sqlcarve_backup::{
    Backup, DropReason, DroppedTable, Material, MaterialInfo, SEQUENCE_TABLE, TableContent,
    TableFilter, WalStamp,
};
pub use sqlcarve_error::{CarveError, ErrorCode, Result};
pub use sqlcarve_pager;
pub use sqlcarve_types;
pub use sqlcarve_types::{PageNumber, PageSize, SqliteValue, WalSalt};

use std::path::PathBuf;

/// Walk the database at `path` and return its salvage manifest.
///
/// Fails on the first fatal error. To keep whatever was salvaged before
/// a failure, drive a [`Backup`] directly and read its material after
/// `run` returns false.
pub fn salvage(path: impl Into<PathBuf>) -> Result<Material> {
    let mut backup = Backup::new(path);
    if backup.run() {
        Ok(backup.into_material())
    } else {
        Err(backup
            .into_status()
            .unwrap_or_else(|| CarveError::corrupt("salvage run failed")))
    }
}
