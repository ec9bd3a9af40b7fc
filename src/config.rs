//! # Configuration Constants
//!
//! Central home for the deployment constants the rest of the crate derives
//! its layout from. Values that depend on each other are co-located so a
//! change to one is checked against the others at compile time.
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> LEAF_CAP / INT_CAP (index::node, derived per-node-kind)
//!       │
//!       └─> HEAP_SLOT_AREA (heap::file, slot directory budget)
//!
//! DEFAULT_POOL_CAPACITY (64 frames)
//!       │
//!       └─> must exceed 2 × tree height + 1, the worst-case number of
//!           simultaneously pinned pages during a cascading split
//! ```

/// Size of every page in every file, in bytes. The fundamental unit of
/// I/O, caching, and node layout.
pub const PAGE_SIZE: usize = 4096;

/// Default number of frames in a [`BufferPool`](crate::storage::BufferPool).
///
/// A split pins the node and its new sibling at each level of the descent
/// path, so the pool must hold at least `2 × height + 1` pages. 64 frames
/// covers trees far deeper than a 32-bit key space can produce.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// Smallest pool the constructor accepts.
pub const MIN_POOL_CAPACITY: usize = 8;

const _: () = assert!(PAGE_SIZE % 8 == 0, "PAGE_SIZE must be 8-byte granular");

const _: () = assert!(
    DEFAULT_POOL_CAPACITY >= MIN_POOL_CAPACITY,
    "default pool capacity below the accepted minimum"
);
