//! # B+ Tree Node Layout
//!
//! One node per page, discriminated by the first four bytes interpreted
//! as a little-endian i32: `-1` marks a leaf, any value `>= 0` marks an
//! internal node (the value is the node's `level`, stored but never
//! interpreted).
//!
//! ## Leaf page
//!
//! ```text
//! Offset  Size          Field
//! ------  ------------  -------------------------------------
//! 0       4             tag (always -1)
//! 4       4 * LEAF_CAP  keys, non-decreasing over the used prefix
//! 1364    8 * LEAF_CAP  record ids, 1:1 with keys
//! 4084    4             right_sibling page number (0 = none)
//! ```
//!
//! ## Internal page
//!
//! ```text
//! Offset  Size          Field
//! ------  ------------  -------------------------------------
//! 0       4             level (0, or 1 just above the leaves)
//! 4       4 * INT_CAP   separator keys
//! 2048    4 * (INT_CAP + 1)  child page numbers
//! ```
//!
//! Capacities are the largest counts that fit a page:
//! `LEAF_CAP = (PAGE_SIZE - 8) / 12 = 340` and
//! `INT_CAP = (PAGE_SIZE - 8) / 8 = 511`.
//!
//! ## Self-describing lengths
//!
//! Nodes carry no count field. Unused trailing slots are zero, and valid
//! data never contains a zero page number or a null record id, so the
//! used length of each array is the index of its first sentinel, found by
//! `partition_point`. [`LeafNodeMut::init`] and [`InternalNodeMut::init`]
//! therefore zero the whole page before writing the tag.
//!
//! Keys get no such probe: 0 is a perfectly valid key, so a node's key
//! count is always derived from its rid or child count.
//!
//! ## Views
//!
//! As in the rest of the crate, nodes are borrowed views over pinned page
//! bytes: `LeafNode`/`InternalNode` read, `LeafNodeMut`/`InternalNodeMut`
//! write through the same layout. `from_page` checks the tag; reading a
//! page whose tag matches neither kind is reported as corruption.

use eyre::{bail, ensure, Result};
use zerocopy::little_endian::{I32, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::storage::PAGE_SIZE;
use crate::types::{PageId, RecordId};

/// Key slots in a leaf node.
pub const LEAF_CAP: usize = (PAGE_SIZE - 4 - 4) / (4 + 8);

/// Key slots in an internal node; child slots are `INT_CAP + 1`.
pub const INT_CAP: usize = (PAGE_SIZE - 4 - 4) / (4 + 4);

const LEAF_TAG: i32 = -1;

const _: () = assert!(size_of::<LeafPage>() <= PAGE_SIZE, "leaf layout overflows the page");
const _: () = assert!(
    size_of::<InternalPage>() <= PAGE_SIZE,
    "internal layout overflows the page"
);
const _: () = assert!(LEAF_CAP >= 4 && INT_CAP >= 4, "page too small for a useful node");

#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct LeafPage {
    tag: I32,
    keys: [I32; LEAF_CAP],
    rids: [RecordId; LEAF_CAP],
    right_sibling: U32,
}

#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct InternalPage {
    level: I32,
    keys: [I32; INT_CAP],
    children: [U32; INT_CAP + 1],
}

/// The two node kinds a page can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Internal,
}

/// Reads the discriminating tag of a node page.
pub fn node_kind(data: &[u8]) -> Result<NodeKind> {
    ensure!(data.len() == PAGE_SIZE, "node page must be PAGE_SIZE bytes");
    let tag = i32::from_le_bytes(data[..4].try_into().expect("4-byte prefix"));
    match tag {
        LEAF_TAG => Ok(NodeKind::Leaf),
        t if t >= 0 => Ok(NodeKind::Internal),
        t => bail!("corrupt node tag {}", t),
    }
}

fn leaf_ref(data: &[u8]) -> Result<&LeafPage> {
    ensure!(data.len() == PAGE_SIZE, "node page must be PAGE_SIZE bytes");
    let node = LeafPage::ref_from_bytes(&data[..size_of::<LeafPage>()])
        .map_err(|e| eyre::eyre!("failed to read leaf page: {:?}", e))?;
    ensure!(
        node.tag.get() == LEAF_TAG,
        "expected a leaf node, found tag {}",
        node.tag.get()
    );
    Ok(node)
}

fn internal_ref(data: &[u8]) -> Result<&InternalPage> {
    ensure!(data.len() == PAGE_SIZE, "node page must be PAGE_SIZE bytes");
    let node = InternalPage::ref_from_bytes(&data[..size_of::<InternalPage>()])
        .map_err(|e| eyre::eyre!("failed to read internal page: {:?}", e))?;
    ensure!(
        node.level.get() >= 0,
        "expected an internal node, found tag {}",
        node.level.get()
    );
    Ok(node)
}

/// Read-only view of a leaf node.
pub struct LeafNode<'a> {
    node: &'a LeafPage,
}

impl<'a> LeafNode<'a> {
    pub fn from_page(data: &'a [u8]) -> Result<Self> {
        Ok(Self {
            node: leaf_ref(data)?,
        })
    }

    /// Used length of the key/rid arrays: the first null rid slot.
    pub fn len(&self) -> usize {
        self.node.rids.partition_point(|r| !r.is_null())
    }

    pub fn is_empty(&self) -> bool {
        self.node.rids[0].is_null()
    }

    pub fn is_full(&self) -> bool {
        !self.node.rids[LEAF_CAP - 1].is_null()
    }

    pub fn key_at(&self, idx: usize) -> i32 {
        self.node.keys[idx].get()
    }

    pub fn rid_at(&self, idx: usize) -> RecordId {
        self.node.rids[idx]
    }

    pub fn right_sibling(&self) -> PageId {
        self.node.right_sibling.get()
    }

    /// First position at which `probe` could be inserted without breaking
    /// sortedness. Equal keys land before existing equals.
    pub fn lower_bound(&self, probe: i32) -> usize {
        self.node.keys[..self.len()].partition_point(|k| k.get() < probe)
    }
}

/// Mutable view of a leaf node.
pub struct LeafNodeMut<'a> {
    node: &'a mut LeafPage,
}

impl<'a> LeafNodeMut<'a> {
    /// Zeroes the page and stamps the leaf tag.
    pub fn init(data: &'a mut [u8]) -> Result<Self> {
        ensure!(data.len() == PAGE_SIZE, "node page must be PAGE_SIZE bytes");
        data.fill(0);
        let node = LeafPage::mut_from_bytes(&mut data[..size_of::<LeafPage>()])
            .map_err(|e| eyre::eyre!("failed to map leaf page: {:?}", e))?;
        node.tag = I32::new(LEAF_TAG);
        Ok(Self { node })
    }

    pub fn from_page(data: &'a mut [u8]) -> Result<Self> {
        leaf_ref(data)?;
        let node = LeafPage::mut_from_bytes(&mut data[..size_of::<LeafPage>()])
            .map_err(|e| eyre::eyre!("failed to map leaf page: {:?}", e))?;
        Ok(Self { node })
    }

    pub fn len(&self) -> usize {
        self.node.rids.partition_point(|r| !r.is_null())
    }

    pub fn is_empty(&self) -> bool {
        self.node.rids[0].is_null()
    }

    pub fn is_full(&self) -> bool {
        !self.node.rids[LEAF_CAP - 1].is_null()
    }

    pub fn key_at(&self, idx: usize) -> i32 {
        self.node.keys[idx].get()
    }

    pub fn rid_at(&self, idx: usize) -> RecordId {
        self.node.rids[idx]
    }

    pub fn right_sibling(&self) -> PageId {
        self.node.right_sibling.get()
    }

    pub fn set_right_sibling(&mut self, page_no: PageId) {
        self.node.right_sibling = U32::new(page_no);
    }

    pub fn lower_bound(&self, probe: i32) -> usize {
        self.node.keys[..self.len()].partition_point(|k| k.get() < probe)
    }

    /// Shifts `[idx..len)` right by one and writes the pair at `idx`.
    pub fn insert_at(&mut self, idx: usize, key: i32, rid: RecordId) -> Result<()> {
        let len = self.len();
        ensure!(len < LEAF_CAP, "insert into a full leaf");
        ensure!(idx <= len, "leaf insert index {} beyond length {}", idx, len);

        self.node.keys.copy_within(idx..len, idx + 1);
        self.node.rids.copy_within(idx..len, idx + 1);
        self.node.keys[idx] = I32::new(key);
        self.node.rids[idx] = rid;
        Ok(())
    }

    /// Moves slots `[split_at..LEAF_CAP)` into the empty node `right` and
    /// zeroes them here. Sibling links are the caller's business.
    pub fn split_into(&mut self, right: &mut LeafNodeMut<'_>, split_at: usize) -> Result<()> {
        ensure!(self.is_full(), "splitting a leaf that is not full");
        ensure!(right.len() == 0, "splitting into a non-empty leaf");
        ensure!(split_at > 0 && split_at < LEAF_CAP, "degenerate leaf split at {}", split_at);

        let moved = LEAF_CAP - split_at;
        right.node.keys[..moved].copy_from_slice(&self.node.keys[split_at..]);
        right.node.rids[..moved].copy_from_slice(&self.node.rids[split_at..]);
        self.node.keys[split_at..].fill(I32::new(0));
        self.node.rids[split_at..].fill(RecordId::null());
        Ok(())
    }
}

/// Read-only view of an internal node.
pub struct InternalNode<'a> {
    node: &'a InternalPage,
}

impl<'a> InternalNode<'a> {
    pub fn from_page(data: &'a [u8]) -> Result<Self> {
        Ok(Self {
            node: internal_ref(data)?,
        })
    }

    pub fn level(&self) -> i32 {
        self.node.level.get()
    }

    /// Used child count: the first zero child slot.
    pub fn child_count(&self) -> usize {
        self.node.children.partition_point(|c| c.get() != 0)
    }

    /// A node with `c` children holds `c - 1` keys.
    pub fn key_count(&self) -> usize {
        self.child_count().saturating_sub(1)
    }

    pub fn is_full(&self) -> bool {
        self.node.children[INT_CAP].get() != 0
    }

    pub fn key_at(&self, idx: usize) -> i32 {
        self.node.keys[idx].get()
    }

    pub fn child_at(&self, idx: usize) -> PageId {
        self.node.children[idx].get()
    }

    /// Index of the child subtree a probe key belongs to: the lower
    /// bound of the probe in the separator array, or the last child when
    /// every separator is below the probe. A probe equal to `keys[i]`
    /// descends into child `i`; equal keys that a split left behind in
    /// the left sibling stay reachable, and the scan recovers the rest
    /// by streaming right through the leaf chain.
    pub fn child_index_for(&self, probe: i32) -> usize {
        self.node.keys[..self.key_count()].partition_point(|k| k.get() < probe)
    }
}

/// Mutable view of an internal node.
pub struct InternalNodeMut<'a> {
    node: &'a mut InternalPage,
}

impl<'a> InternalNodeMut<'a> {
    /// Zeroes the page and stamps the level.
    pub fn init(data: &'a mut [u8], level: i32) -> Result<Self> {
        ensure!(data.len() == PAGE_SIZE, "node page must be PAGE_SIZE bytes");
        ensure!(level >= 0, "internal node level must be non-negative");
        data.fill(0);
        let node = InternalPage::mut_from_bytes(&mut data[..size_of::<InternalPage>()])
            .map_err(|e| eyre::eyre!("failed to map internal page: {:?}", e))?;
        node.level = I32::new(level);
        Ok(Self { node })
    }

    pub fn from_page(data: &'a mut [u8]) -> Result<Self> {
        internal_ref(data)?;
        let node = InternalPage::mut_from_bytes(&mut data[..size_of::<InternalPage>()])
            .map_err(|e| eyre::eyre!("failed to map internal page: {:?}", e))?;
        Ok(Self { node })
    }

    pub fn level(&self) -> i32 {
        self.node.level.get()
    }

    pub fn child_count(&self) -> usize {
        self.node.children.partition_point(|c| c.get() != 0)
    }

    pub fn key_count(&self) -> usize {
        self.child_count().saturating_sub(1)
    }

    pub fn is_full(&self) -> bool {
        self.node.children[INT_CAP].get() != 0
    }

    pub fn key_at(&self, idx: usize) -> i32 {
        self.node.keys[idx].get()
    }

    pub fn child_at(&self, idx: usize) -> PageId {
        self.node.children[idx].get()
    }

    pub fn child_index_for(&self, probe: i32) -> usize {
        self.node.keys[..self.key_count()].partition_point(|k| k.get() < probe)
    }

    pub fn set_key(&mut self, idx: usize, key: i32) {
        self.node.keys[idx] = I32::new(key);
    }

    pub fn set_child(&mut self, idx: usize, page_no: PageId) {
        self.node.children[idx] = U32::new(page_no);
    }

    /// Installs a separator at key position `idx` with its right child at
    /// `idx + 1`, shifting both arrays.
    pub fn install_at(&mut self, idx: usize, key: i32, child: PageId) -> Result<()> {
        let children = self.child_count();
        let keys = children - 1;
        ensure!(!self.is_full(), "install into a full internal node");
        ensure!(idx <= keys, "internal insert index {} beyond {} keys", idx, keys);

        self.node.keys.copy_within(idx..keys, idx + 1);
        self.node.children.copy_within(idx + 1..children, idx + 2);
        self.node.keys[idx] = I32::new(key);
        self.node.children[idx + 1] = U32::new(child);
        Ok(())
    }

    /// Moves the upper half of a full node into the empty node `right`.
    ///
    /// Child slots `[split_at + 1 ..= INT_CAP]` always move. When
    /// `promote_displaced`, the key at `split_at` rises to the parent
    /// (read it before calling, its slot is zeroed) and keys
    /// `[split_at + 1 .. INT_CAP)` move. Otherwise the separator being
    /// installed rises instead: keys `[split_at .. INT_CAP)` move and
    /// child slot 0 of `right` is left for the caller to fill with the
    /// installed separator's child. Vacated slots here are zeroed.
    pub fn split_into(
        &mut self,
        right: &mut InternalNodeMut<'_>,
        split_at: usize,
        promote_displaced: bool,
    ) -> Result<()> {
        ensure!(self.is_full(), "splitting an internal node that is not full");
        ensure!(right.child_count() == 0, "splitting into a non-empty internal node");
        ensure!(
            split_at > 0 && split_at < INT_CAP - 1,
            "degenerate internal split at {}",
            split_at
        );

        let moved_children = INT_CAP - split_at;
        let dst = if promote_displaced { 0 } else { 1 };
        right.node.children[dst..dst + moved_children]
            .copy_from_slice(&self.node.children[split_at + 1..]);

        if promote_displaced {
            let moved_keys = INT_CAP - split_at - 1;
            right.node.keys[..moved_keys].copy_from_slice(&self.node.keys[split_at + 1..]);
        } else {
            let moved_keys = INT_CAP - split_at;
            right.node.keys[..moved_keys].copy_from_slice(&self.node.keys[split_at..]);
        }

        self.node.keys[split_at..].fill(I32::new(0));
        self.node.children[split_at + 1..].fill(U32::new(0));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    #[test]
    fn capacities_match_the_page_budget() {
        assert_eq!(LEAF_CAP, 340);
        assert_eq!(INT_CAP, 511);
        assert!(4 + 12 * LEAF_CAP + 4 <= PAGE_SIZE);
        assert!(4 + 4 * INT_CAP + 4 * (INT_CAP + 1) <= PAGE_SIZE);
    }

    #[test]
    fn node_kind_discriminates_on_the_tag() {
        let mut data = page();
        LeafNodeMut::init(&mut data).unwrap();
        assert_eq!(node_kind(&data).unwrap(), NodeKind::Leaf);

        InternalNodeMut::init(&mut data, 1).unwrap();
        assert_eq!(node_kind(&data).unwrap(), NodeKind::Internal);

        data[..4].copy_from_slice(&(-7i32).to_le_bytes());
        assert!(node_kind(&data).is_err());
    }

    #[test]
    fn fresh_leaf_is_empty_with_no_sibling() {
        let mut data = page();
        let leaf = LeafNodeMut::init(&mut data).unwrap();
        assert_eq!(leaf.len(), 0);
        assert!(!leaf.is_full());
        assert_eq!(leaf.right_sibling(), 0);
    }

    #[test]
    fn leaf_insert_keeps_keys_sorted() {
        let mut data = page();
        let mut leaf = LeafNodeMut::init(&mut data).unwrap();

        for (i, key) in [50, 10, 30, 20, 40].into_iter().enumerate() {
            let idx = leaf.lower_bound(key);
            leaf.insert_at(idx, key, RecordId::new(1, i as u16)).unwrap();
        }

        assert_eq!(leaf.len(), 5);
        let keys: Vec<_> = (0..5).map(|i| leaf.key_at(i)).collect();
        assert_eq!(keys, vec![10, 20, 30, 40, 50]);
        assert_eq!(leaf.rid_at(2), RecordId::new(1, 2));
    }

    #[test]
    fn leaf_lower_bound_places_duplicates_first() {
        let mut data = page();
        let mut leaf = LeafNodeMut::init(&mut data).unwrap();
        for (i, key) in [10, 20, 20, 30].into_iter().enumerate() {
            leaf.insert_at(i, key, RecordId::new(1, i as u16)).unwrap();
        }

        assert_eq!(leaf.lower_bound(20), 1);
        assert_eq!(leaf.lower_bound(25), 3);
        assert_eq!(leaf.lower_bound(9), 0);
        assert_eq!(leaf.lower_bound(31), 4);
    }

    #[test]
    fn leaf_split_moves_the_upper_half() {
        let mut left_data = page();
        let mut left = LeafNodeMut::init(&mut left_data).unwrap();
        for i in 0..LEAF_CAP {
            left.insert_at(i, i as i32, RecordId::new(1, i as u16)).unwrap();
        }
        assert!(left.is_full());

        let mut right_data = page();
        let mut right = LeafNodeMut::init(&mut right_data).unwrap();
        let mid = LEAF_CAP / 2;
        left.split_into(&mut right, mid).unwrap();

        assert_eq!(left.len(), mid);
        assert_eq!(right.len(), LEAF_CAP - mid);
        assert_eq!(right.key_at(0), mid as i32);
        assert_eq!(right.rid_at(0), RecordId::new(1, mid as u16));
        assert_eq!(left.key_at(mid - 1), mid as i32 - 1);
    }

    #[test]
    fn internal_child_lookup_follows_separators() {
        let mut data = page();
        let mut node = InternalNodeMut::init(&mut data, 1).unwrap();
        // children: [p10] 10 [p20] 20 [p30]
        node.set_child(0, 100);
        node.set_key(0, 10);
        node.set_child(1, 200);
        node.set_key(1, 20);
        node.set_child(2, 300);

        let data = data;
        let node = InternalNode::from_page(&data).unwrap();
        assert_eq!(node.child_count(), 3);
        assert_eq!(node.key_count(), 2);
        assert_eq!(node.child_index_for(5), 0);
        // a probe equal to a separator stays left of it
        assert_eq!(node.child_index_for(10), 0);
        assert_eq!(node.child_index_for(15), 1);
        assert_eq!(node.child_index_for(20), 1);
        assert_eq!(node.child_index_for(21), 2);
        assert_eq!(node.child_index_for(99), 2);
    }

    #[test]
    fn internal_install_shifts_keys_and_children() {
        let mut data = page();
        let mut node = InternalNodeMut::init(&mut data, 0).unwrap();
        node.set_child(0, 100);
        node.set_key(0, 10);
        node.set_child(1, 200);
        node.set_key(1, 30);
        node.set_child(2, 300);

        node.install_at(1, 20, 250).unwrap();

        assert_eq!(node.child_count(), 4);
        assert_eq!(
            (0..3).map(|i| node.key_at(i)).collect::<Vec<_>>(),
            vec![10, 20, 30]
        );
        assert_eq!(
            (0..4).map(|i| node.child_at(i)).collect::<Vec<_>>(),
            vec![100, 200, 250, 300]
        );
    }

    fn full_internal(data: &mut [u8]) -> InternalNodeMut<'_> {
        let mut node = InternalNodeMut::init(data, 0).unwrap();
        // keys 2, 4, 6, ...; child left of key 2k is page id 1000 + k
        node.set_child(0, 1000);
        for i in 0..INT_CAP {
            node.set_key(i, 2 * (i as i32 + 1));
            node.set_child(i + 1, 1001 + i as u32);
        }
        assert!(node.is_full());
        node
    }

    #[test]
    fn internal_split_promoting_the_displaced_key() {
        let mut left_data = page();
        let mut left = full_internal(&mut left_data);
        let mid = (INT_CAP - 1) / 2;
        let displaced = left.key_at(mid);

        let mut right_data = page();
        let mut right = InternalNodeMut::init(&mut right_data, 0).unwrap();
        left.split_into(&mut right, mid, true).unwrap();

        assert_eq!(left.child_count(), mid + 1);
        assert_eq!(left.key_count(), mid);
        assert_eq!(right.child_count(), INT_CAP - mid);
        assert_eq!(right.key_count(), INT_CAP - mid - 1);
        // the displaced key is in neither half
        assert_eq!(left.key_at(mid - 1), displaced - 2);
        assert_eq!(right.key_at(0), displaced + 2);
        // child adjacency is preserved across the cut
        assert_eq!(left.child_at(mid), 1000 + mid as u32);
        assert_eq!(right.child_at(0), 1001 + mid as u32);
    }

    #[test]
    fn internal_split_absorbing_the_incoming_key() {
        let mut left_data = page();
        let mut left = full_internal(&mut left_data);
        let mid = (INT_CAP - 1) / 2;
        let at_mid = left.key_at(mid);

        let mut right_data = page();
        let mut right = InternalNodeMut::init(&mut right_data, 0).unwrap();
        left.split_into(&mut right, mid, false).unwrap();
        right.set_child(0, 9999);

        assert_eq!(left.key_count(), mid);
        assert_eq!(right.key_count(), INT_CAP - mid);
        assert_eq!(right.key_at(0), at_mid);
        assert_eq!(right.child_at(0), 9999);
        assert_eq!(right.child_at(1), 1001 + mid as u32);
    }

    #[test]
    fn zeroed_page_probes_read_zero_lengths() {
        let mut data = page();
        LeafNodeMut::init(&mut data).unwrap();
        let leaf = LeafNode::from_page(&data).unwrap();
        assert_eq!(leaf.len(), 0);
        assert_eq!(leaf.lower_bound(0), 0);

        let mut data = page();
        InternalNodeMut::init(&mut data, 0).unwrap();
        let node = InternalNode::from_page(&data).unwrap();
        assert_eq!(node.child_count(), 0);
        assert_eq!(node.key_count(), 0);
    }

    #[test]
    fn zero_keys_are_distinguished_from_unused_slots() {
        let mut data = page();
        let mut leaf = LeafNodeMut::init(&mut data).unwrap();
        leaf.insert_at(0, 0, RecordId::new(3, 1)).unwrap();
        leaf.insert_at(1, 0, RecordId::new(3, 2)).unwrap();

        assert_eq!(leaf.len(), 2);
        assert_eq!(leaf.lower_bound(1), 2);
    }
}
