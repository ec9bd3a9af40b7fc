//! # ordix — a disk-resident B+ tree attribute index
//!
//! `ordix` maps 32-bit integer keys, extracted at a fixed byte offset of
//! each record in a base relation, to record ids `(page, slot)`. The
//! index is built once by scanning the relation, grows through inserts,
//! and answers bounded range scans through a single streaming cursor.
//!
//! ## Quick start
//!
//! ```ignore
//! use ordix::{BTreeIndex, BufferPool, Datatype, Operator};
//!
//! let pool = BufferPool::new(64)?;
//! let mut index = BTreeIndex::create(&pool, "relA", 0, Datatype::Integer)?;
//!
//! index.start_scan(25, Operator::GT, 40, Operator::LT)?;
//! while let Ok(rid) = index.scan_next() {
//!     println!("{:?}", rid);
//! }
//! index.end_scan()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   index: nodes, metadata, B+ tree       │
//! ├──────────────────┬──────────────────────┤
//! │   heap: record   │                      │
//! │   pages + scan   │                      │
//! ├──────────────────┴──────────────────────┤
//! │   storage: buffer pool over page files  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Every on-disk structure is a `zerocopy` view over a pinned page
//! buffer: the same bytes serve reads and writes, and a freshly opened
//! file is self-describing (unused slots are zero, array lengths are
//! found by probing for the first sentinel).
//!
//! ## Scope
//!
//! One scan cursor per index instance, insert-only after construction,
//! integer keys only, no write-ahead logging; the file is flushed when
//! the index is dropped.

pub mod config;
pub mod error;
pub mod heap;
pub mod index;
pub mod storage;
pub mod types;

pub use error::IndexError;
pub use heap::HeapFile;
pub use index::BTreeIndex;
pub use storage::{BufferPool, PageFile};
pub use types::{Datatype, Operator, PageId, RecordId};
