//! # Index Layer
//!
//! The disk-resident B+ tree over a single integer attribute of a
//! relation: node layout, the metadata page, and the tree itself with its
//! insertion and range-scan machinery.
//!
//! ## File layout
//!
//! ```text
//! <relation>,<offset>        one page per node
//! ┌─────────────┬──────────┬──────────┬─────
//! │ page 1      │ page 2   │ page 3   │ ...
//! │ IndexMeta   │ root     │ nodes allocated by splits,
//! │             │ (leaf at │ in creation order
//! │             │  birth)  │
//! └─────────────┴──────────┴──────────┴─────
//! ```
//!
//! Leaves hold `(key, record id)` pairs and link left to right through
//! their `right_sibling` page number; internal nodes hold separator keys
//! and child page numbers. The metadata page records which page is the
//! current root, which changes only when a root split grows the tree.

mod meta;
mod node;
mod tree;

pub use meta::{IndexMeta, META_PAGE, RELATION_NAME_LEN};
pub use node::{
    node_kind, InternalNode, InternalNodeMut, LeafNode, LeafNodeMut, NodeKind, INT_CAP, LEAF_CAP,
};
pub use tree::BTreeIndex;
