//! Index file metadata page.
//!
//! Page 1 of every index file opens with this header; the rest of the
//! page is zero. The root page number is the only field that changes
//! after creation, and only when a root split installs a new root.
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -------------------------------------------
//! 0       20    relation name, truncated / zero-padded
//! 20      4     byte offset of the indexed attribute
//! 24      4     datatype tag of the indexed attribute
//! 28      4     current root page number
//! ```

use eyre::{ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::storage::PAGE_SIZE;
use crate::types::{Datatype, PageId};

/// The metadata page is always the first page of the index file.
pub const META_PAGE: PageId = 1;

/// Width of the fixed relation-name field.
pub const RELATION_NAME_LEN: usize = 20;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct IndexMeta {
    relation: [u8; RELATION_NAME_LEN],
    attr_byte_offset: U32,
    attr_type: U32,
    root_page: U32,
}

const _: () = assert!(size_of::<IndexMeta>() <= PAGE_SIZE, "metadata overflows the page");

impl IndexMeta {
    pub fn from_page(data: &[u8]) -> Result<&Self> {
        ensure!(data.len() == PAGE_SIZE, "metadata page must be PAGE_SIZE bytes");
        Self::ref_from_bytes(&data[..size_of::<Self>()])
            .map_err(|e| eyre::eyre!("failed to read index metadata: {:?}", e))
    }

    pub fn from_page_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(data.len() == PAGE_SIZE, "metadata page must be PAGE_SIZE bytes");
        Self::mut_from_bytes(&mut data[..size_of::<Self>()])
            .map_err(|e| eyre::eyre!("failed to read index metadata: {:?}", e))
    }

    /// Writes a fresh header onto a zeroed metadata page.
    pub fn init(
        data: &mut [u8],
        relation: &str,
        attr_byte_offset: u32,
        attr_type: Datatype,
    ) -> Result<()> {
        let meta = Self::from_page_mut(data)?;
        meta.relation = encode_relation_name(relation);
        meta.attr_byte_offset = U32::new(attr_byte_offset);
        meta.attr_type = U32::new(attr_type.tag());
        meta.root_page = U32::new(0);
        Ok(())
    }

    /// True when the stored header describes the same index the caller
    /// asked for.
    pub fn matches(&self, relation: &str, attr_byte_offset: u32, attr_type: Datatype) -> bool {
        self.relation == encode_relation_name(relation)
            && self.attr_byte_offset.get() == attr_byte_offset
            && self.attr_type.get() == attr_type.tag()
    }

    pub fn relation_name(&self) -> String {
        let end = self
            .relation
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(RELATION_NAME_LEN);
        String::from_utf8_lossy(&self.relation[..end]).into_owned()
    }

    pub fn attr_byte_offset(&self) -> u32 {
        self.attr_byte_offset.get()
    }

    pub fn attr_type(&self) -> Option<Datatype> {
        Datatype::from_tag(self.attr_type.get())
    }

    pub fn root_page(&self) -> PageId {
        self.root_page.get()
    }

    pub fn set_root_page(&mut self, page_no: PageId) {
        self.root_page = U32::new(page_no);
    }
}

/// Truncates or zero-pads a relation name into the fixed field.
fn encode_relation_name(relation: &str) -> [u8; RELATION_NAME_LEN] {
    let mut field = [0u8; RELATION_NAME_LEN];
    let bytes = relation.as_bytes();
    let len = bytes.len().min(RELATION_NAME_LEN);
    field[..len].copy_from_slice(&bytes[..len]);
    field
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_read_back() {
        let mut data = vec![0u8; PAGE_SIZE];
        IndexMeta::init(&mut data, "employees", 12, Datatype::Integer).unwrap();

        let meta = IndexMeta::from_page(&data).unwrap();
        assert_eq!(meta.relation_name(), "employees");
        assert_eq!(meta.attr_byte_offset(), 12);
        assert_eq!(meta.attr_type(), Some(Datatype::Integer));
        assert_eq!(meta.root_page(), 0);
        assert!(meta.matches("employees", 12, Datatype::Integer));
    }

    #[test]
    fn long_relation_names_truncate_consistently() {
        let long = "a_relation_name_well_beyond_twenty_bytes";
        let mut data = vec![0u8; PAGE_SIZE];
        IndexMeta::init(&mut data, long, 0, Datatype::Integer).unwrap();

        let meta = IndexMeta::from_page(&data).unwrap();
        assert_eq!(meta.relation_name().len(), RELATION_NAME_LEN);
        // lookups use the same truncation, so the stored prefix matches
        assert!(meta.matches(long, 0, Datatype::Integer));
        assert!(!meta.matches("a_relation_name_othr", 0, Datatype::Integer));
    }

    #[test]
    fn mismatches_are_detected_fieldwise() {
        let mut data = vec![0u8; PAGE_SIZE];
        IndexMeta::init(&mut data, "rel", 4, Datatype::Integer).unwrap();

        let meta = IndexMeta::from_page(&data).unwrap();
        assert!(!meta.matches("other", 4, Datatype::Integer));
        assert!(!meta.matches("rel", 8, Datatype::Integer));
        assert!(!meta.matches("rel", 4, Datatype::Double));
    }

    #[test]
    fn root_page_updates_in_place() {
        let mut data = vec![0u8; PAGE_SIZE];
        IndexMeta::init(&mut data, "rel", 0, Datatype::Integer).unwrap();

        IndexMeta::from_page_mut(&mut data).unwrap().set_root_page(17);
        assert_eq!(IndexMeta::from_page(&data).unwrap().root_page(), 17);
    }
}
