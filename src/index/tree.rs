//! # B+ Tree Index
//!
//! The tree that maps integer attribute values to record ids. One index
//! instance owns one open index file and at most one scan cursor.
//!
//! ## Construction
//!
//! [`BTreeIndex::create`] builds a fresh index from its base relation:
//!
//! ```text
//! 1. Open the relation heap file (missing relation is an error and
//!    leaves nothing behind)
//! 2. Create "<relation>,<offset>" next to it
//! 3. Page 1: metadata header; page 2: the root, born as an empty leaf
//! 4. Sequentially scan the relation, extract the i32 at the attribute
//!    offset of each record, insert (key, rid)
//! ```
//!
//! [`BTreeIndex::open`] attaches to an existing index file after checking
//! that its metadata page describes the same relation, offset, and
//! datatype the caller asked for.
//!
//! ## Insertion
//!
//! A single recursive descent. Each level pins its node, routes to the
//! child, and recurses; the return value reports whether the child split:
//!
//! ```text
//! insert_into(page) -> Option<(separator, new_page)>
//!
//! leaf, not full      write at the lower bound, done
//! leaf, full          split at LEAF_CAP / 2, insert into the proper
//!                     half, link siblings, promote right's first key
//! internal            recurse; on child split install (separator,
//!                     new_page) here, splitting in turn when full
//! root split          allocate a new internal root with the two
//!                     halves as children, update the metadata page
//! ```
//!
//! An internal split has one boundary case: when the separator being
//! installed falls exactly at the split point it is not stored in either
//! half but rises to the grandparent itself.
//!
//! A node that did not split is unpinned clean; every node that changed
//! is unpinned dirty. During one split the node and its new sibling are
//! the only extra pins, so a pool of `2 × height + 1` frames always
//! suffices.
//!
//! ## Range scans
//!
//! The cursor lives on the index as an `Option<ScanState>`; there is at
//! most one scan per index. `start_scan` descends with the low bound,
//! lowering `GT v` to `GTE v + 1`, and leaves the first qualifying leaf
//! pinned. `scan_next` streams entries from the pinned leaf, hopping
//! right-sibling links (unpinning before pinning the next), and reports
//! exhaustion with [`IndexError::IndexScanCompleted`]. `end_scan` drops
//! the cursor; dropping the index ends any scan and flushes the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{bail, ensure, Result};

use crate::error::IndexError;
use crate::heap::HeapFile;
use crate::storage::{BufferPool, FileId, PageFile, PageGuard};
use crate::types::{Datatype, Operator, PageId, RecordId};

use super::meta::{IndexMeta, META_PAGE};
use super::node::{
    node_kind, InternalNode, InternalNodeMut, LeafNode, LeafNodeMut, NodeKind, INT_CAP, LEAF_CAP,
};

/// Outcome of an insertion that split a node: the new right sibling and
/// the separator to install in the parent.
struct SplitResult {
    separator: i32,
    new_page: PageId,
}

struct ScanState {
    leaf: PageGuard,
    next_entry: usize,
    high: i32,
    high_op: Operator,
}

/// B+ tree index over one integer attribute of a relation.
pub struct BTreeIndex {
    pool: Arc<BufferPool>,
    file: FileId,
    index_path: PathBuf,
    attr_byte_offset: u32,
    attr_type: Datatype,
    root_page: PageId,
    scan: Option<ScanState>,
}

impl BTreeIndex {
    /// Builds a fresh index over `relation_path`, ingesting every record.
    ///
    /// Fails with [`IndexError::FileNotFound`] if the relation is
    /// missing; any later failure removes the partially built index file.
    pub fn create(
        pool: &Arc<BufferPool>,
        relation_path: impl AsRef<Path>,
        attr_byte_offset: u32,
        attr_type: Datatype,
    ) -> Result<Self> {
        ensure!(
            attr_type == Datatype::Integer,
            "only Integer attributes can be indexed"
        );
        let relation_path = relation_path.as_ref();
        let heap = HeapFile::open(pool, relation_path)?;

        let index_path = Self::index_path_for(relation_path, attr_byte_offset)?;
        let file = pool.create_file(&index_path)?;

        match Self::build(pool, file, index_path.clone(), &heap, attr_byte_offset, attr_type) {
            Ok(index) => Ok(index),
            Err(e) => {
                let _ = pool.close_file(file);
                let _ = PageFile::remove(&index_path);
                Err(e)
            }
        }
    }

    fn build(
        pool: &Arc<BufferPool>,
        file: FileId,
        index_path: PathBuf,
        heap: &HeapFile,
        attr_byte_offset: u32,
        attr_type: Datatype,
    ) -> Result<Self> {
        let relation = relation_name_of(heap.path())?;

        let (meta_page, mut meta_guard) = pool.allocate_page(file)?;
        ensure!(
            meta_page == META_PAGE,
            "metadata page allocated as page {} instead of {}",
            meta_page,
            META_PAGE
        );
        IndexMeta::init(meta_guard.data_mut(), &relation, attr_byte_offset, attr_type)?;

        let (root_page, mut root_guard) = pool.allocate_page(file)?;
        LeafNodeMut::init(root_guard.data_mut())?;
        drop(root_guard);

        IndexMeta::from_page_mut(meta_guard.data_mut())?.set_root_page(root_page);
        drop(meta_guard);

        let mut index = Self {
            pool: Arc::clone(pool),
            file,
            index_path,
            attr_byte_offset,
            attr_type,
            root_page,
            scan: None,
        };

        for entry in heap.scan() {
            let (rid, record) = entry?;
            let key = attr_key(&record, attr_byte_offset)?;
            index.insert_entry(key, rid)?;
        }

        Ok(index)
    }

    /// Attaches to an existing index file, validating its metadata page
    /// against the requested relation, offset, and datatype.
    pub fn open(
        pool: &Arc<BufferPool>,
        relation_path: impl AsRef<Path>,
        attr_byte_offset: u32,
        attr_type: Datatype,
    ) -> Result<Self> {
        ensure!(
            attr_type == Datatype::Integer,
            "only Integer attributes can be indexed"
        );
        let relation_path = relation_path.as_ref();
        let relation = relation_name_of(relation_path)?;
        let index_path = Self::index_path_for(relation_path, attr_byte_offset)?;
        let file = pool.open_file(&index_path)?;

        let root_page = {
            let validated: Result<PageId> = (|| {
                let guard = pool.fetch_page(file, META_PAGE)?;
                let meta = IndexMeta::from_page(guard.data())?;
                if !meta.matches(&relation, attr_byte_offset, attr_type) {
                    return Err(IndexError::IndexMetadataMismatch {
                        relation: relation.clone(),
                        attr_byte_offset,
                    }
                    .into());
                }
                let root_page = meta.root_page();
                ensure!(root_page != 0, "index metadata names no root page");
                Ok(root_page)
            })();
            match validated {
                Ok(root_page) => root_page,
                Err(e) => {
                    let _ = pool.close_file(file);
                    return Err(e);
                }
            }
        };

        Ok(Self {
            pool: Arc::clone(pool),
            file,
            index_path,
            attr_byte_offset,
            attr_type,
            root_page,
            scan: None,
        })
    }

    /// Name of the index file for a relation and attribute offset:
    /// `<relation>,<offset>` next to the relation file.
    pub fn index_path_for(relation_path: &Path, attr_byte_offset: u32) -> Result<PathBuf> {
        let relation = relation_name_of(relation_path)?;
        Ok(relation_path.with_file_name(format!("{},{}", relation, attr_byte_offset)))
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn attr_byte_offset(&self) -> u32 {
        self.attr_byte_offset
    }

    pub fn attr_type(&self) -> Datatype {
        self.attr_type
    }

    /// Inserts one `(key, rid)` pair. Duplicate keys are kept, landing
    /// before previously inserted equal keys.
    pub fn insert_entry(&mut self, key: i32, rid: RecordId) -> Result<()> {
        ensure!(!rid.is_null(), "cannot index the null record id");
        if let Some(split) = self.insert_into(self.root_page, key, rid)? {
            self.grow_root(split)?;
        }
        Ok(())
    }

    fn insert_into(&self, page_no: PageId, key: i32, rid: RecordId) -> Result<Option<SplitResult>> {
        let guard = self.pool.fetch_page(self.file, page_no)?;
        match node_kind(guard.data())? {
            NodeKind::Leaf => self.insert_into_leaf(guard, key, rid),
            NodeKind::Internal => {
                let child = {
                    let node = InternalNode::from_page(guard.data())?;
                    node.child_at(node.child_index_for(key))
                };
                ensure!(child != 0, "internal node {} routed to the null page", page_no);

                match self.insert_into(child, key, rid)? {
                    None => Ok(None),
                    Some(split) => self.install_separator(guard, split),
                }
            }
        }
    }

    fn insert_into_leaf(
        &self,
        mut guard: PageGuard,
        key: i32,
        rid: RecordId,
    ) -> Result<Option<SplitResult>> {
        let mut leaf = LeafNodeMut::from_page(guard.data_mut())?;
        let idx = leaf.lower_bound(key);

        if !leaf.is_full() {
            leaf.insert_at(idx, key, rid)?;
            return Ok(None);
        }

        let (new_page, mut new_guard) = self.pool.allocate_page(self.file)?;
        let mut new_leaf = LeafNodeMut::init(new_guard.data_mut())?;

        let mid = LEAF_CAP / 2;
        leaf.split_into(&mut new_leaf, mid)?;
        if idx < mid {
            leaf.insert_at(idx, key, rid)?;
        } else {
            new_leaf.insert_at(idx - mid, key, rid)?;
        }

        new_leaf.set_right_sibling(leaf.right_sibling());
        leaf.set_right_sibling(new_page);

        Ok(Some(SplitResult {
            separator: new_leaf.key_at(0),
            new_page,
        }))
    }

    fn install_separator(
        &self,
        mut guard: PageGuard,
        split: SplitResult,
    ) -> Result<Option<SplitResult>> {
        let mut node = InternalNodeMut::from_page(guard.data_mut())?;
        let pos = node.child_index_for(split.separator);

        if !node.is_full() {
            node.install_at(pos, split.separator, split.new_page)?;
            return Ok(None);
        }

        let mid = (INT_CAP - 1) / 2;
        // At the exact split point the incoming separator is stored in
        // neither half; it rises to the grandparent itself.
        let promote_displaced = pos != mid;
        let displaced = node.key_at(mid);
        let level = node.level();

        let (new_page, mut new_guard) = self.pool.allocate_page(self.file)?;
        let mut new_node = InternalNodeMut::init(new_guard.data_mut(), level)?;
        node.split_into(&mut new_node, mid, promote_displaced)?;

        let separator = if promote_displaced {
            if pos < mid {
                node.install_at(pos, split.separator, split.new_page)?;
            } else {
                new_node.install_at(pos - mid - 1, split.separator, split.new_page)?;
            }
            displaced
        } else {
            new_node.set_child(0, split.new_page);
            split.separator
        };

        Ok(Some(SplitResult { separator, new_page }))
    }

    fn grow_root(&mut self, split: SplitResult) -> Result<()> {
        let old_root = self.root_page;
        let level = {
            let guard = self.pool.fetch_page(self.file, old_root)?;
            match node_kind(guard.data())? {
                NodeKind::Leaf => 1,
                NodeKind::Internal => 0,
            }
        };

        let (new_root, mut guard) = self.pool.allocate_page(self.file)?;
        let mut node = InternalNodeMut::init(guard.data_mut(), level)?;
        node.set_child(0, old_root);
        node.set_key(0, split.separator);
        node.set_child(1, split.new_page);
        drop(guard);

        let mut meta_guard = self.pool.fetch_page(self.file, META_PAGE)?;
        IndexMeta::from_page_mut(meta_guard.data_mut())?.set_root_page(new_root);
        drop(meta_guard);

        self.root_page = new_root;
        Ok(())
    }

    /// Positions the cursor on the first entry satisfying
    /// `(key low_op low) AND (key high_op high)` and pins its leaf.
    ///
    /// An already active scan is ended first. When nothing qualifies the
    /// cursor is left clean and [`IndexError::NoSuchKeyFound`] is
    /// returned.
    pub fn start_scan(
        &mut self,
        low: i32,
        low_op: Operator,
        high: i32,
        high_op: Operator,
    ) -> Result<()> {
        if !matches!(low_op, Operator::GT | Operator::GTE)
            || !matches!(high_op, Operator::LT | Operator::LTE)
        {
            return Err(IndexError::BadOperator.into());
        }
        if low > high {
            return Err(IndexError::BadScanRange.into());
        }
        if self.scan.is_some() {
            self.end_scan()?;
        }

        // For integer keys a strict bound reduces to its closed form; a
        // strict bound at the top of the key space matches nothing.
        let probe = match low_op {
            Operator::GTE => low,
            _ => match low.checked_add(1) {
                Some(probe) => probe,
                None => return Err(IndexError::NoSuchKeyFound.into()),
            },
        };

        // Descend toward the leaf that could hold the first qualifying
        // key, reading and releasing each internal node along the way.
        // The descent uses the closed-form probe: with ties descending
        // left, probing a GT scan with `low` itself could land one leaf
        // short, in front of sibling entries still equal to `low`.
        let mut page_no = self.root_page;
        let mut guard = loop {
            let guard = self.pool.fetch_page(self.file, page_no)?;
            match node_kind(guard.data())? {
                NodeKind::Leaf => break guard,
                NodeKind::Internal => {
                    let node = InternalNode::from_page(guard.data())?;
                    let child = node.child_at(node.child_index_for(probe));
                    ensure!(child != 0, "internal node {} routed to the null page", page_no);
                    page_no = child;
                }
            }
        };

        let (len, idx, sibling) = {
            let leaf = LeafNode::from_page(guard.data())?;
            (leaf.len(), leaf.lower_bound(probe), leaf.right_sibling())
        };

        let mut next_entry = idx;
        if idx == len {
            // Nothing qualifies in this leaf; the candidate, if any, is
            // the first entry of the right sibling.
            if sibling == 0 {
                return Err(IndexError::NoSuchKeyFound.into());
            }
            drop(guard);
            guard = self.pool.fetch_page(self.file, sibling)?;
            next_entry = 0;
        }

        {
            let leaf = LeafNode::from_page(guard.data())?;
            let rid = leaf.rid_at(next_entry);
            let key = leaf.key_at(next_entry);
            if rid.is_null() || past_high(key, high, high_op) {
                return Err(IndexError::NoSuchKeyFound.into());
            }
        }

        self.scan = Some(ScanState {
            leaf: guard,
            next_entry,
            high,
            high_op,
        });
        Ok(())
    }

    /// Returns the next matching record id.
    ///
    /// Fails with [`IndexError::ScanNotInitialized`] when no scan is
    /// active and [`IndexError::IndexScanCompleted`] once the range is
    /// exhausted; the exhausted cursor stays active until
    /// [`end_scan`](Self::end_scan).
    pub fn scan_next(&mut self) -> Result<RecordId> {
        let scan = self
            .scan
            .as_mut()
            .ok_or(IndexError::ScanNotInitialized)?;
        let (high, high_op) = (scan.high, scan.high_op);

        if scan.next_entry >= LEAF_CAP {
            return Err(IndexError::IndexScanCompleted.into());
        }

        let (rid, key, sibling, last_of_leaf) = {
            let leaf = LeafNode::from_page(scan.leaf.data())?;
            let rid = leaf.rid_at(scan.next_entry);
            let key = leaf.key_at(scan.next_entry);
            let last_of_leaf = scan.next_entry + 1 == LEAF_CAP
                || leaf.rid_at(scan.next_entry + 1).is_null();
            (rid, key, leaf.right_sibling(), last_of_leaf)
        };

        if rid.is_null() || past_high(key, high, high_op) {
            return Err(IndexError::IndexScanCompleted.into());
        }

        scan.next_entry += 1;
        if last_of_leaf && sibling != 0 {
            // Release the drained leaf before pinning its sibling.
            self.scan = None;
            let leaf = self.pool.fetch_page(self.file, sibling)?;
            self.scan = Some(ScanState {
                leaf,
                next_entry: 0,
                high,
                high_op,
            });
        }

        Ok(rid)
    }

    /// Drops the cursor, unpinning the current leaf.
    pub fn end_scan(&mut self) -> Result<()> {
        if self.scan.take().is_none() {
            return Err(IndexError::ScanNotInitialized.into());
        }
        Ok(())
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        self.scan = None;
        let _ = self.pool.flush_file(self.file);
        let _ = self.pool.close_file(self.file);
    }
}

impl std::fmt::Debug for BTreeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTreeIndex")
            .field("index_path", &self.index_path)
            .field("attr_byte_offset", &self.attr_byte_offset)
            .field("attr_type", &self.attr_type)
            .field("root_page", &self.root_page)
            .field("scan_active", &self.scan.is_some())
            .finish()
    }
}

fn past_high(key: i32, high: i32, high_op: Operator) -> bool {
    key > high || (key == high && matches!(high_op, Operator::LT))
}

fn relation_name_of(path: &Path) -> Result<String> {
    match path.file_name() {
        Some(name) => Ok(name.to_string_lossy().into_owned()),
        None => bail!("relation path '{}' has no file name", path.display()),
    }
}

fn attr_key(record: &[u8], attr_byte_offset: u32) -> Result<i32> {
    let offset = attr_byte_offset as usize;
    ensure!(
        offset + 4 <= record.len(),
        "record of {} bytes has no integer attribute at offset {}",
        record.len(),
        offset
    );
    let bytes: [u8; 4] = record[offset..offset + 4].try_into()?;
    Ok(i32::from_le_bytes(bytes))
}
