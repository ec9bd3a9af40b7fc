//! # Storage Layer
//!
//! Fixed-size page files and the pin-counted buffer pool the index and
//! heap layers run on.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  index::BTreeIndex      heap::HeapFile   │
//! ├──────────────────────────────────────────┤
//! │  BufferPool (frames, pins, eviction)     │
//! ├──────────────────────────────────────────┤
//! │  PageFile (page-granular file I/O)       │
//! └──────────────────────────────────────────┘
//! ```
//!
//! A [`PageFile`] is nothing but `PAGE_SIZE`-byte pages addressed by a
//! 1-based page number; page 0 is the universal "no page" sentinel and is
//! never stored. The [`BufferPool`] caches frames from any number of open
//! page files, keyed by `(file_id, page_no)`, and hands out [`PageGuard`]
//! pins. A pinned frame cannot be evicted; a frame mutated through its
//! guard is written back before its slot is reused and on
//! [`BufferPool::flush_file`].
//!
//! ## Pinning discipline
//!
//! Guards are the only way to touch page bytes, so pin balance holds by
//! construction: every fetch is matched by exactly one unpin when the
//! guard drops, dirty if the page was borrowed mutably, clean otherwise.

mod file;
mod pool;

pub use file::PageFile;
pub use pool::{BufferPool, FileId, PageGuard};

pub use crate::config::PAGE_SIZE;
