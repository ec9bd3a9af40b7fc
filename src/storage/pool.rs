//! # Buffer Pool
//!
//! A pin-counted page cache over any number of open [`PageFile`]s.
//!
//! ## Frame bookkeeping
//!
//! Every cached page lives in a `Frame`:
//!
//! ```text
//! Frame {
//!     key: PageKey,           // (file_id, page_no)
//!     pin_count: AtomicU32,   // > 0 blocks eviction
//!     dirty: AtomicBool,      // written back before the slot is reused
//!     visited: AtomicBool,    // second-chance bit
//!     data: Box<[u8; 4096]>,  // the page bytes
//! }
//! ```
//!
//! Eviction is a second-chance sweep: a hand walks the frame table,
//! pinned frames are skipped, a set `visited` bit buys the frame one more
//! round, and the first unvisited unpinned frame is the victim. Dirty
//! victims are written back to their file before the slot is reused.
//!
//! ## Guards
//!
//! [`fetch_page`](BufferPool::fetch_page) and
//! [`allocate_page`](BufferPool::allocate_page) pin the frame and return a
//! [`PageGuard`]. The guard is the only access path to page bytes:
//! `data()` borrows them read-only, `data_mut()` borrows them mutably and
//! marks the frame dirty, and dropping the guard releases the pin. A
//! caller that never touches `data_mut` therefore unpins clean, and pin
//! balance cannot be violated by a forgotten unpin.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use eyre::{bail, ensure, Result};
use parking_lot::RwLock;

use crate::config::MIN_POOL_CAPACITY;
use crate::types::PageId;

use super::{PageFile, PAGE_SIZE};

/// Handle to a file registered with a [`BufferPool`].
pub type FileId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PageKey {
    file_id: FileId,
    page_no: PageId,
}

struct Frame {
    key: PageKey,
    pin_count: AtomicU32,
    dirty: AtomicBool,
    visited: AtomicBool,
    data: Box<[u8; PAGE_SIZE]>,
}

impl Frame {
    fn new(key: PageKey) -> Self {
        Self {
            key,
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            visited: AtomicBool::new(false),
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }

    fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }

    fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
        self.visited.store(true, Ordering::Release);
    }

    fn unpin(&self) {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin called on unpinned frame");
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    fn clear_visited(&self) -> bool {
        self.visited.swap(false, Ordering::AcqRel)
    }
}

struct FrameTable {
    entries: Vec<Frame>,
    index: HashMap<PageKey, usize>,
    hand: usize,
    capacity: usize,
}

impl FrameTable {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            hand: 0,
            capacity,
        }
    }

    fn get(&self, key: &PageKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    fn insert(&mut self, frame: Frame) -> usize {
        let key = frame.key;
        let idx = self.entries.len();
        self.entries.push(frame);
        self.index.insert(key, idx);
        idx
    }

    /// Second-chance sweep for an evictable frame. Returns `None` when
    /// every frame is pinned.
    fn find_victim(&mut self) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }

        let start = self.hand;
        let mut wrapped_once = false;

        loop {
            let frame = &self.entries[self.hand];

            if frame.is_pinned() {
                self.hand = (self.hand + 1) % self.entries.len();
                if self.hand == start {
                    if wrapped_once {
                        return None;
                    }
                    wrapped_once = true;
                }
                continue;
            }

            if frame.clear_visited() {
                self.hand = (self.hand + 1) % self.entries.len();
                continue;
            }

            return Some(self.hand);
        }
    }

    fn remove(&mut self, idx: usize) -> Frame {
        let frame = self.entries.swap_remove(idx);
        self.index.remove(&frame.key);

        if idx < self.entries.len() {
            let moved_key = self.entries[idx].key;
            self.index.insert(moved_key, idx);
        }

        if self.hand >= self.entries.len() {
            self.hand = 0;
        }

        frame
    }
}

/// Pin-counted page cache shared by every file of the database.
pub struct BufferPool {
    frames: RwLock<FrameTable>,
    files: RwLock<HashMap<FileId, PageFile>>,
    next_file_id: AtomicU32,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Result<Arc<Self>> {
        ensure!(
            capacity >= MIN_POOL_CAPACITY,
            "pool capacity {} below the minimum of {}",
            capacity,
            MIN_POOL_CAPACITY
        );

        Ok(Arc::new(Self {
            frames: RwLock::new(FrameTable::new(capacity)),
            files: RwLock::new(HashMap::new()),
            next_file_id: AtomicU32::new(1),
        }))
    }

    /// Creates a fresh page file on disk and registers it.
    pub fn create_file<P: AsRef<Path>>(&self, path: P) -> Result<FileId> {
        self.register(PageFile::create(path)?)
    }

    /// Opens an existing page file and registers it.
    pub fn open_file<P: AsRef<Path>>(&self, path: P) -> Result<FileId> {
        self.register(PageFile::open(path)?)
    }

    fn register(&self, file: PageFile) -> Result<FileId> {
        let file_id = self.next_file_id.fetch_add(1, Ordering::AcqRel);
        self.files.write().insert(file_id, file);
        Ok(file_id)
    }

    /// Writes back the file's dirty frames, drops all its frames, and
    /// closes the handle. Fails if any of its pages is still pinned.
    pub fn close_file(&self, file_id: FileId) -> Result<()> {
        let mut frames = self.frames.write();
        {
            let files = self.files.read();
            let file = match files.get(&file_id) {
                Some(file) => file,
                None => bail!("close_file on unknown file id {}", file_id),
            };

            for frame in frames.entries.iter().filter(|f| f.key.file_id == file_id) {
                ensure!(
                    !frame.is_pinned(),
                    "cannot close '{}': page {} is still pinned",
                    file.path().display(),
                    frame.key.page_no
                );
                if frame.is_dirty() {
                    file.write_page(frame.key.page_no, frame.data.as_slice())?;
                    frame.clear_dirty();
                }
            }
            file.sync()?;
        }

        while let Some(idx) = frames
            .entries
            .iter()
            .position(|f| f.key.file_id == file_id)
        {
            frames.remove(idx);
        }
        drop(frames);

        self.files.write().remove(&file_id);
        Ok(())
    }

    /// Allocates a fresh zeroed page in the file and returns it pinned.
    pub fn allocate_page(self: &Arc<Self>, file_id: FileId) -> Result<(PageId, PageGuard)> {
        let page_no = {
            let mut files = self.files.write();
            let file = match files.get_mut(&file_id) {
                Some(file) => file,
                None => bail!("allocate_page on unknown file id {}", file_id),
            };
            file.allocate_page()?
        };

        let key = PageKey { file_id, page_no };
        let mut frames = self.frames.write();
        if frames.is_full() {
            self.evict_one(&mut frames)?;
        }

        let frame = Frame::new(key);
        frame.pin();
        frames.insert(frame);

        Ok((
            page_no,
            PageGuard {
                pool: Arc::clone(self),
                key,
            },
        ))
    }

    /// Pins a page, reading it from disk if it is not cached.
    pub fn fetch_page(self: &Arc<Self>, file_id: FileId, page_no: PageId) -> Result<PageGuard> {
        ensure!(page_no >= 1, "page 0 is the null page and cannot be fetched");
        let key = PageKey { file_id, page_no };

        {
            let frames = self.frames.read();
            if let Some(idx) = frames.get(&key) {
                frames.entries[idx].pin();
                return Ok(PageGuard {
                    pool: Arc::clone(self),
                    key,
                });
            }
        }

        let mut frames = self.frames.write();
        if let Some(idx) = frames.get(&key) {
            frames.entries[idx].pin();
            return Ok(PageGuard {
                pool: Arc::clone(self),
                key,
            });
        }

        if frames.is_full() {
            self.evict_one(&mut frames)?;
        }

        let mut frame = Frame::new(key);
        {
            let files = self.files.read();
            let file = match files.get(&file_id) {
                Some(file) => file,
                None => bail!("fetch_page on unknown file id {}", file_id),
            };
            file.read_page(page_no, frame.data.as_mut_slice())?;
        }
        frame.pin();
        frames.insert(frame);

        Ok(PageGuard {
            pool: Arc::clone(self),
            key,
        })
    }

    fn evict_one(&self, frames: &mut FrameTable) -> Result<()> {
        let idx = match frames.find_victim() {
            Some(idx) => idx,
            None => bail!(
                "buffer pool exhausted: all {} frames are pinned",
                frames.capacity
            ),
        };

        if frames.entries[idx].is_dirty() {
            let key = frames.entries[idx].key;
            let files = self.files.read();
            let file = match files.get(&key.file_id) {
                Some(file) => file,
                None => bail!("dirty frame for unknown file id {}", key.file_id),
            };
            file.write_page(key.page_no, frames.entries[idx].data.as_slice())?;
            frames.entries[idx].clear_dirty();
        }

        frames.remove(idx);
        Ok(())
    }

    /// Writes back every dirty frame of the file and syncs it.
    pub fn flush_file(&self, file_id: FileId) -> Result<()> {
        let frames = self.frames.read();
        let files = self.files.read();
        let file = match files.get(&file_id) {
            Some(file) => file,
            None => bail!("flush_file on unknown file id {}", file_id),
        };

        for frame in frames.entries.iter().filter(|f| f.key.file_id == file_id) {
            if frame.is_dirty() {
                file.write_page(frame.key.page_no, frame.data.as_slice())?;
                frame.clear_dirty();
            }
        }

        file.sync()
    }

    /// Number of pages currently in the file (cached or not).
    pub fn file_page_count(&self, file_id: FileId) -> Result<u32> {
        let files = self.files.read();
        match files.get(&file_id) {
            Some(file) => Ok(file.page_count()),
            None => bail!("file_page_count on unknown file id {}", file_id),
        }
    }

    /// Number of frames currently pinned at least once.
    pub fn pinned_count(&self) -> usize {
        self.frames
            .read()
            .entries
            .iter()
            .filter(|f| f.is_pinned())
            .count()
    }

    fn unpin(&self, key: &PageKey) {
        let frames = self.frames.read();
        if let Some(idx) = frames.get(key) {
            frames.entries[idx].unpin();
        }
    }

    fn data(&self, key: &PageKey) -> Option<&[u8]> {
        let frames = self.frames.read();
        frames.get(key).map(|idx| {
            let ptr = frames.entries[idx].data.as_ptr();
            // SAFETY: the frame data is a separate heap allocation that
            // outlives this call as long as the frame stays resident, and
            // a PageGuard exists for this key, so the frame is pinned and
            // cannot be evicted. Frame moves within the table relocate the
            // Frame struct, not the boxed page bytes.
            unsafe { std::slice::from_raw_parts(ptr, PAGE_SIZE) }
        })
    }

    // SAFETY: returns a mutable page reference while only holding a read
    // lock. Callers must guarantee exclusive access; PageGuard::data_mut
    // does so by taking &mut self on the only handle to the pin.
    #[allow(clippy::mut_from_ref)]
    unsafe fn data_mut_unchecked(&self, key: &PageKey) -> Option<&mut [u8]> {
        let frames = self.frames.read();
        frames.get(key).map(|idx| {
            let frame = &frames.entries[idx];
            frame.mark_dirty();
            let ptr = frame.data.as_ptr() as *mut u8;
            std::slice::from_raw_parts_mut(ptr, PAGE_SIZE)
        })
    }
}

/// RAII pin on one page of one file.
///
/// Holding a guard keeps the frame resident; dropping it releases the
/// pin. Mutable access marks the frame dirty, so a page that was only
/// read is unpinned clean.
pub struct PageGuard {
    pool: Arc<BufferPool>,
    key: PageKey,
}

impl PageGuard {
    pub fn page_no(&self) -> PageId {
        self.key.page_no
    }

    pub fn data(&self) -> &[u8] {
        self.pool.data(&self.key).expect("pinned page not resident") // INVARIANT: a PageGuard exists only for resident, pinned frames
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        // SAFETY: &mut self gives exclusive access through this pin, and
        // the pin keeps the frame resident for the borrow's duration.
        unsafe {
            self.pool
                .data_mut_unchecked(&self.key)
                .expect("pinned page not resident") // INVARIANT: a PageGuard exists only for resident, pinned frames
        }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.pool.unpin(&self.key);
    }
}

impl std::fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("file_id", &self.key.file_id)
            .field("page_no", &self.key.page_no)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pool_with_file(capacity: usize) -> (Arc<BufferPool>, FileId, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(capacity).unwrap();
        let file = pool.create_file(dir.path().join("pool.db")).unwrap();
        (pool, file, dir)
    }

    #[test]
    fn allocate_returns_pinned_zeroed_pages() {
        let (pool, file, _dir) = pool_with_file(8);

        let (p1, g1) = pool.allocate_page(file).unwrap();
        let (p2, g2) = pool.allocate_page(file).unwrap();

        assert_eq!((p1, p2), (1, 2));
        assert_eq!(g1.data(), &[0u8; PAGE_SIZE]);
        assert_eq!(pool.pinned_count(), 2);

        drop(g1);
        drop(g2);
        assert_eq!(pool.pinned_count(), 0);
    }

    #[test]
    fn writes_survive_eviction_pressure() {
        let (pool, file, _dir) = pool_with_file(8);

        for i in 0..24u8 {
            let (_, mut guard) = pool.allocate_page(file).unwrap();
            guard.data_mut()[0] = i;
        }

        for i in 0..24u8 {
            let guard = pool.fetch_page(file, i as u32 + 1).unwrap();
            assert_eq!(guard.data()[0], i, "page {} lost its write", i + 1);
        }
    }

    #[test]
    fn pinned_pages_are_never_evicted() {
        let (pool, file, _dir) = pool_with_file(8);

        let (p1, mut guard) = pool.allocate_page(file).unwrap();
        guard.data_mut()[100] = 0x5A;

        for _ in 0..32 {
            let (_, _g) = pool.allocate_page(file).unwrap();
        }

        assert_eq!(guard.data()[100], 0x5A);
        drop(guard);

        let guard = pool.fetch_page(file, p1).unwrap();
        assert_eq!(guard.data()[100], 0x5A);
    }

    #[test]
    fn all_pinned_pool_reports_exhaustion() {
        let (pool, file, _dir) = pool_with_file(8);

        let mut guards = Vec::new();
        for _ in 0..8 {
            guards.push(pool.allocate_page(file).unwrap().1);
        }

        let err = pool.allocate_page(file).unwrap_err();
        assert!(err.to_string().contains("all 8 frames are pinned"));
    }

    #[test]
    fn flush_file_persists_dirty_frames() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.db");
        let pool = BufferPool::new(8).unwrap();
        let file = pool.create_file(&path).unwrap();

        let (page_no, mut guard) = pool.allocate_page(file).unwrap();
        guard.data_mut()[7] = 0x77;
        drop(guard);

        pool.flush_file(file).unwrap();

        let raw = PageFile::open(&path).unwrap();
        let mut buf = [0u8; PAGE_SIZE];
        raw.read_page(page_no, &mut buf).unwrap();
        assert_eq!(buf[7], 0x77);
    }

    #[test]
    fn close_file_writes_back_and_releases() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.db");
        let pool = BufferPool::new(8).unwrap();
        let file = pool.create_file(&path).unwrap();

        let (page_no, mut guard) = pool.allocate_page(file).unwrap();
        guard.data_mut()[0] = 0xEE;
        drop(guard);
        pool.close_file(file).unwrap();

        let reopened = pool.open_file(&path).unwrap();
        let guard = pool.fetch_page(reopened, page_no).unwrap();
        assert_eq!(guard.data()[0], 0xEE);
    }

    #[test]
    fn close_file_with_pinned_page_fails() {
        let (pool, file, _dir) = pool_with_file(8);
        let (_, _guard) = pool.allocate_page(file).unwrap();
        assert!(pool.close_file(file).is_err());
    }

    #[test]
    fn clean_fetch_does_not_dirty_the_frame() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.db");
        let pool = BufferPool::new(8).unwrap();
        let file = pool.create_file(&path).unwrap();

        let (page_no, mut guard) = pool.allocate_page(file).unwrap();
        guard.data_mut()[0] = 1;
        drop(guard);
        pool.flush_file(file).unwrap();

        // Read-only fetch, then overwrite the disk copy behind the pool's
        // back; a clean frame must not be written back on close.
        let guard = pool.fetch_page(file, page_no).unwrap();
        assert_eq!(guard.data()[0], 1);
        drop(guard);

        {
            let raw = PageFile::open(&path).unwrap();
            let mut buf = [0u8; PAGE_SIZE];
            raw.read_page(page_no, &mut buf).unwrap();
            buf[0] = 9;
            raw.write_page(page_no, &buf).unwrap();
            raw.sync().unwrap();
        }

        pool.close_file(file).unwrap();

        let raw = PageFile::open(&path).unwrap();
        let mut buf = [0u8; PAGE_SIZE];
        raw.read_page(page_no, &mut buf).unwrap();
        assert_eq!(buf[0], 9);
    }
}
