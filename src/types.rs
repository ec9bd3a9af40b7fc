//! Scalar types shared across the storage, heap, and index layers.
//!
//! Everything here has a fixed on-disk representation: record ids are
//! embedded verbatim in heap slot directories and leaf node arrays, and
//! the datatype tag is stored in the index metadata page. All multi-byte
//! fields are little-endian.

use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Page number within a file. 0 means "no page" and is never allocated.
pub type PageId = u32;

/// Location of a record in its relation file: the page it lives on and
/// its slot within that page.
///
/// The all-zero value is the "empty slot" sentinel. Real records never
/// live on page 0, so `page_no() == 0` is sufficient to detect it.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct RecordId {
    page_no: U32,
    slot_no: U16,
    reserved: U16,
}

impl RecordId {
    pub fn new(page_no: PageId, slot_no: u16) -> Self {
        Self {
            page_no: U32::new(page_no),
            slot_no: U16::new(slot_no),
            reserved: U16::new(0),
        }
    }

    /// The all-zero sentinel marking an unused slot.
    pub fn null() -> Self {
        Self::new(0, 0)
    }

    pub fn page_no(&self) -> PageId {
        self.page_no.get()
    }

    pub fn slot_no(&self) -> u16 {
        self.slot_no.get()
    }

    pub fn is_null(&self) -> bool {
        self.page_no.get() == 0
    }
}

impl std::fmt::Debug for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_no.get(), self.slot_no.get())
    }
}

/// Datatype of the attribute an index is built over.
///
/// Only `Integer` is implemented; the other tags exist so metadata pages
/// written by future versions remain readable.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datatype {
    Integer = 0,
    Double = 1,
    String = 2,
}

impl Datatype {
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Datatype::Integer),
            1 => Some(Datatype::Double),
            2 => Some(Datatype::String),
            _ => None,
        }
    }

    pub fn tag(self) -> u32 {
        self as u32
    }
}

/// Comparison operator bounding one end of a range scan.
///
/// The low bound takes `GT`/`GTE`, the high bound `LT`/`LTE`; a scan
/// started with any other pairing is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    LT,
    LTE,
    GTE,
    GT,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_is_eight_bytes() {
        assert_eq!(size_of::<RecordId>(), 8);
    }

    #[test]
    fn record_id_null_sentinel() {
        assert!(RecordId::null().is_null());
        assert!(!RecordId::new(1, 0).is_null());
        assert_eq!(RecordId::null().as_bytes(), &[0u8; 8]);
    }

    #[test]
    fn record_id_round_trips_through_bytes() {
        let rid = RecordId::new(42, 7);
        let back = RecordId::read_from_bytes(rid.as_bytes()).unwrap();
        assert_eq!(back, rid);
        assert_eq!(back.page_no(), 42);
        assert_eq!(back.slot_no(), 7);
    }

    #[test]
    fn datatype_tag_round_trip() {
        for dt in [Datatype::Integer, Datatype::Double, Datatype::String] {
            assert_eq!(Datatype::from_tag(dt.tag()), Some(dt));
        }
        assert_eq!(Datatype::from_tag(3), None);
    }
}
