//! Page-granular file I/O.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};

use crate::error::IndexError;
use crate::types::PageId;

use super::PAGE_SIZE;

/// A file of `PAGE_SIZE`-byte pages addressed by 1-based page number.
///
/// Page numbers are never recycled; the file only grows. Page 0 is the
/// "no page" sentinel, so page `n` lives at byte offset
/// `(n - 1) * PAGE_SIZE`.
#[derive(Debug)]
pub struct PageFile {
    file: File,
    path: PathBuf,
    page_count: u32,
}

impl PageFile {
    /// Creates a fresh, empty page file. Fails if `path` already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to create page file '{}'", path.display()))?;

        Ok(Self {
            file,
            path,
            page_count: 0,
        })
    }

    /// Opens an existing page file, failing with
    /// [`IndexError::FileNotFound`] if it does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::FileNotFound(path.display().to_string()).into());
            }
            Err(e) => {
                return Err(e)
                    .wrap_err_with(|| format!("failed to open page file '{}'", path.display()));
            }
        };

        let len = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();
        ensure!(
            len % PAGE_SIZE as u64 == 0,
            "page file '{}' length {} is not a multiple of the page size",
            path.display(),
            len
        );

        Ok(Self {
            file,
            path,
            page_count: (len / PAGE_SIZE as u64) as u32,
        })
    }

    /// Deletes a page file from disk, failing with
    /// [`IndexError::FileNotFound`] if it does not exist.
    pub fn remove<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(IndexError::FileNotFound(path.display().to_string()).into())
            }
            Err(e) => {
                Err(e).wrap_err_with(|| format!("failed to remove '{}'", path.display()))
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    fn offset_of(page_no: PageId) -> u64 {
        (page_no as u64 - 1) * PAGE_SIZE as u64
    }

    /// Extends the file by one zeroed page and returns its page number.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        let page_no = self.page_count + 1;
        self.write_page(page_no, &[0u8; PAGE_SIZE])?;
        self.page_count = page_no;
        Ok(page_no)
    }

    pub fn read_page(&self, page_no: PageId, buf: &mut [u8]) -> Result<()> {
        ensure!(buf.len() == PAGE_SIZE, "page buffer must be PAGE_SIZE bytes");
        ensure!(
            page_no >= 1 && page_no <= self.page_count,
            "page {} out of bounds in '{}' (page_count={})",
            page_no,
            self.path.display(),
            self.page_count
        );

        let mut handle = &self.file;
        handle.seek(SeekFrom::Start(Self::offset_of(page_no)))?;
        handle
            .read_exact(buf)
            .wrap_err_with(|| format!("failed to read page {} of '{}'", page_no, self.path.display()))
    }

    pub fn write_page(&self, page_no: PageId, buf: &[u8]) -> Result<()> {
        ensure!(buf.len() == PAGE_SIZE, "page buffer must be PAGE_SIZE bytes");
        ensure!(
            page_no >= 1 && page_no <= self.page_count + 1,
            "page {} beyond the end of '{}' (page_count={})",
            page_no,
            self.path.display(),
            self.page_count
        );

        let mut handle = &self.file;
        handle.seek(SeekFrom::Start(Self::offset_of(page_no)))?;
        handle
            .write_all(buf)
            .wrap_err_with(|| format!("failed to write page {} of '{}'", page_no, self.path.display()))
    }

    pub fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .wrap_err_with(|| format!("failed to sync '{}'", self.path.display()))
    }
}
