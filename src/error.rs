//! User-visible error taxonomy.
//!
//! Fallible operations return [`eyre::Result`]; the conditions callers are
//! expected to discriminate on are raised as [`IndexError`] values inside
//! the report and recovered with `Report::downcast_ref::<IndexError>()`.
//! Internal invariant violations (corrupt node tags, short records, an
//! exhausted buffer pool) are plain ad-hoc reports.

use thiserror::Error;

/// Errors a caller of [`BTreeIndex`](crate::index::BTreeIndex) can
/// meaningfully react to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// Scan low bound must use `GT`/`GTE` and high bound `LT`/`LTE`.
    #[error("scan bounds must use GT/GTE below and LT/LTE above")]
    BadOperator,

    /// Scan range is inverted.
    #[error("scan low value exceeds high value")]
    BadScanRange,

    /// No key in the index satisfies the scan predicate. The cursor is
    /// already cleaned up when this is returned.
    #[error("no key satisfies the scan predicate")]
    NoSuchKeyFound,

    /// `scan_next` or `end_scan` called with no scan in progress.
    #[error("no scan is in progress")]
    ScanNotInitialized,

    /// The active scan has yielded every matching entry.
    #[error("index scan completed")]
    IndexScanCompleted,

    /// An existing index file's metadata page disagrees with the
    /// parameters it was opened with.
    #[error("index metadata does not match relation '{relation}' at offset {attr_byte_offset}")]
    IndexMetadataMismatch {
        relation: String,
        attr_byte_offset: u32,
    },

    /// A relation or index file does not exist on disk.
    #[error("file not found: {0}")]
    FileNotFound(String),
}
