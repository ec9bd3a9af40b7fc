//! Slotted record pages and the sequential relation scan.
//!
//! ## Page layout
//!
//! ```text
//! +--------------------+
//! | Header (8B)        |  record_count, free_start, free_end
//! +--------------------+
//! | Slot Array         |  (offset: u16, len: u16) per record
//! +--------------------+
//! | Free Space         |
//! +--------------------+
//! | Record Bytes       |  grows upward from the end of the page
//! +--------------------+
//! ```
//!
//! Slot `i` of page `p` is record id `(p, i)`. Inserts go to the last
//! page until a record no longer fits, then a new page is allocated;
//! records are never deleted or moved, so slot directories only grow.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};
use zerocopy::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::storage::{BufferPool, FileId, PageGuard, PAGE_SIZE};
use crate::types::{PageId, RecordId};

const HEAP_HEADER_SIZE: usize = 8;
const SLOT_SIZE: usize = 4;

/// Largest record a single page can hold.
pub const MAX_RECORD_SIZE: usize = PAGE_SIZE - HEAP_HEADER_SIZE - SLOT_SIZE;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct HeapPageHeader {
    record_count: U16,
    free_start: U16,
    free_end: U16,
    reserved: U16,
}

impl HeapPageHeader {
    fn read(data: &[u8]) -> Result<&Self> {
        Self::ref_from_bytes(&data[..HEAP_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read heap page header: {:?}", e))
    }

    fn read_mut(data: &mut [u8]) -> Result<&mut Self> {
        Self::mut_from_bytes(&mut data[..HEAP_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read heap page header: {:?}", e))
    }

    fn free_space(&self) -> usize {
        (self.free_end.get() as usize).saturating_sub(self.free_start.get() as usize)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct HeapSlot {
    offset: U16,
    len: U16,
}

fn slot_at(data: &[u8], slot_no: usize) -> Result<HeapSlot> {
    let start = HEAP_HEADER_SIZE + slot_no * SLOT_SIZE;
    HeapSlot::read_from_bytes(&data[start..start + SLOT_SIZE])
        .map_err(|e| eyre::eyre!("failed to read heap slot {}: {:?}", slot_no, e))
}

/// Append-only record file backing a relation.
pub struct HeapFile {
    pool: Arc<BufferPool>,
    file: FileId,
    path: PathBuf,
    last_page: PageId,
}

impl HeapFile {
    /// Creates an empty relation file. Fails if `path` already exists.
    pub fn create(pool: &Arc<BufferPool>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = pool.create_file(&path)?;
        Ok(Self {
            pool: Arc::clone(pool),
            file,
            path,
            last_page: 0,
        })
    }

    /// Opens an existing relation file, failing with
    /// [`IndexError::FileNotFound`](crate::IndexError::FileNotFound) if it
    /// is missing.
    pub fn open(pool: &Arc<BufferPool>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = pool.open_file(&path)?;
        let last_page = pool.file_page_count(file)?;
        Ok(Self {
            pool: Arc::clone(pool),
            file,
            path,
            last_page,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a record and returns its id.
    pub fn insert_record(&mut self, record: &[u8]) -> Result<RecordId> {
        ensure!(
            record.len() <= MAX_RECORD_SIZE,
            "record of {} bytes exceeds the {} byte page budget",
            record.len(),
            MAX_RECORD_SIZE
        );

        let needed = record.len() + SLOT_SIZE;

        let mut guard = match self.last_page {
            0 => self.fresh_page()?,
            page_no => {
                let guard = self.pool.fetch_page(self.file, page_no)?;
                let header = HeapPageHeader::read(guard.data())?;
                if header.free_space() < needed {
                    drop(guard);
                    self.fresh_page()?
                } else {
                    guard
                }
            }
        };

        let page_no = guard.page_no();
        let data = guard.data_mut();
        let header = HeapPageHeader::read(data)?;
        let slot_no = header.record_count.get();
        let cell_start = header.free_end.get() as usize - record.len();
        let slot_start = header.free_start.get() as usize;

        data[cell_start..cell_start + record.len()].copy_from_slice(record);
        let slot = HeapSlot {
            offset: U16::new(cell_start as u16),
            len: U16::new(record.len() as u16),
        };
        data[slot_start..slot_start + SLOT_SIZE].copy_from_slice(slot.as_bytes());

        let header = HeapPageHeader::read_mut(data)?;
        header.record_count = U16::new(slot_no + 1);
        header.free_start = U16::new((slot_start + SLOT_SIZE) as u16);
        header.free_end = U16::new(cell_start as u16);

        Ok(RecordId::new(page_no, slot_no))
    }

    fn fresh_page(&mut self) -> Result<PageGuard> {
        let (page_no, mut guard) = self.pool.allocate_page(self.file)?;
        let header = HeapPageHeader::read_mut(guard.data_mut())?;
        header.free_start = U16::new(HEAP_HEADER_SIZE as u16);
        header.free_end = U16::new(PAGE_SIZE as u16);
        self.last_page = page_no;
        Ok(guard)
    }

    /// Reads one record by id.
    pub fn record(&self, rid: RecordId) -> Result<Vec<u8>> {
        ensure!(!rid.is_null(), "cannot read the null record id");
        let guard = self
            .pool
            .fetch_page(self.file, rid.page_no())
            .wrap_err_with(|| format!("record {:?} page missing", rid))?;
        let data = guard.data();

        let header = HeapPageHeader::read(data)?;
        ensure!(
            rid.slot_no() < header.record_count.get(),
            "record {:?} beyond the page's {} slots",
            rid,
            header.record_count.get()
        );

        let slot = slot_at(data, rid.slot_no() as usize)?;
        let start = slot.offset.get() as usize;
        Ok(data[start..start + slot.len.get() as usize].to_vec())
    }

    /// Sequential scan over every record in (page, slot) order.
    ///
    /// The scan pins one heap page at a time; the end of the relation is
    /// plain iterator exhaustion.
    pub fn scan(&self) -> HeapScan {
        HeapScan {
            pool: Arc::clone(&self.pool),
            file: self.file,
            page_count: self.last_page,
            next_page: 1,
            next_slot: 0,
            current: None,
        }
    }

    /// Writes all cached changes through to disk.
    pub fn flush(&self) -> Result<()> {
        self.pool.flush_file(self.file)
    }
}

impl Drop for HeapFile {
    fn drop(&mut self) {
        let _ = self.pool.close_file(self.file);
    }
}

impl std::fmt::Debug for HeapFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapFile")
            .field("path", &self.path)
            .field("last_page", &self.last_page)
            .finish()
    }
}

/// Iterator over `(record id, record bytes)` pairs of a relation.
pub struct HeapScan {
    pool: Arc<BufferPool>,
    file: FileId,
    page_count: PageId,
    next_page: PageId,
    next_slot: u16,
    current: Option<PageGuard>,
}

impl HeapScan {
    fn advance(&mut self) -> Result<Option<(RecordId, Vec<u8>)>> {
        loop {
            if self.current.is_none() {
                if self.next_page > self.page_count {
                    return Ok(None);
                }
                self.current = Some(self.pool.fetch_page(self.file, self.next_page)?);
            }

            let guard = self.current.as_ref().expect("guard installed above");
            let data = guard.data();
            let record_count = HeapPageHeader::read(data)?.record_count.get();

            if self.next_slot >= record_count {
                self.current = None;
                self.next_page += 1;
                self.next_slot = 0;
                continue;
            }

            let slot = slot_at(data, self.next_slot as usize)?;
            let start = slot.offset.get() as usize;
            let bytes = data[start..start + slot.len.get() as usize].to_vec();
            let rid = RecordId::new(self.next_page, self.next_slot);
            self.next_slot += 1;
            return Ok(Some((rid, bytes)));
        }
    }
}

impl Iterator for HeapScan {
    type Item = Result<(RecordId, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().transpose()
    }
}
