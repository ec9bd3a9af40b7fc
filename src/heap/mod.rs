//! # Heap Layer
//!
//! The base relation an index is built over: an append-only file of
//! slotted record pages, plus the sequential scan that feeds ingestion.
//!
//! Records are opaque byte strings addressed by
//! [`RecordId`](crate::types::RecordId). The index layer never interprets
//! a record beyond reading the indexed attribute at a fixed byte offset.

mod file;

pub use file::{HeapFile, HeapScan, MAX_RECORD_SIZE};
