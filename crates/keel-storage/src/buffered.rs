//! Buffered page access for a single file.
//!
//! `BufferedFile` routes all page I/O of one disk file through the
//! buffer pool: fetches load from disk on a miss, allocations extend
//! the file with a pooled zero page, and evicted dirty pages are
//! written back before the evicting operation completes.

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use std::cell::Cell;
use std::sync::Arc;

use keel_buffer::{BufferFrame, BufferPool};
use keel_common::page::{PageId, PageNo, PAGE_SIZE};
use keel_common::{KeelError, Result};

use crate::disk::DiskManager;

/// A disk file whose pages are accessed through the buffer pool.
#[derive(Debug)]
pub struct BufferedFile {
    disk: Arc<DiskManager>,
    pool: Arc<BufferPool>,
    file_id: u32,
}

impl BufferedFile {
    /// Creates a buffered view over an already-open disk file.
    pub fn new(disk: Arc<DiskManager>, pool: Arc<BufferPool>, file_id: u32) -> Self {
        Self {
            disk,
            pool,
            file_id,
        }
    }

    /// Returns the file ID.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the disk manager.
    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Returns the buffer pool.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Returns the number of the file's first page.
    pub fn first_page_no(&self) -> Result<PageNo> {
        self.disk.first_page_no(self.file_id)
    }

    /// Returns the number of pages in the file.
    pub fn num_pages(&self) -> Result<u32> {
        self.disk.num_pages(self.file_id)
    }

    /// Fetches a page, pinning it for the lifetime of the returned
    /// [`PagePin`]. Loads from disk on a pool miss.
    pub fn fetch(&self, page_no: PageNo) -> Result<PagePin<'_>> {
        let page_id = PageId::new(self.file_id, page_no);

        if let Some(frame) = self.pool.fetch_page(page_id) {
            return Ok(PagePin::new(self, frame, page_no));
        }

        let image = self.disk.read_page(page_id)?;
        let (frame, evicted) = self.pool.load_page(page_id, &image)?;
        if let Some(evicted) = evicted {
            if let Err(e) = self.disk.write_page(evicted.page_id, &*evicted.data) {
                self.pool.unpin_page(page_id, false);
                return Err(e);
            }
        }
        Ok(PagePin::new(self, frame, page_no))
    }

    /// Allocates a fresh page at the end of the file and pins it.
    ///
    /// The page image is all zeroes, both on disk and in the pool.
    pub fn alloc(&self) -> Result<PagePin<'_>> {
        let page_no = self.disk.allocate_page(self.file_id)?;
        let page_id = PageId::new(self.file_id, page_no);

        let (frame, evicted) = self.pool.new_page(page_id)?;
        if let Some(evicted) = evicted {
            if let Err(e) = self.disk.write_page(evicted.page_id, &*evicted.data) {
                self.pool.unpin_page(page_id, false);
                return Err(e);
            }
        }
        Ok(PagePin::new(self, frame, page_no))
    }

    /// Releases one pin that was handed off via [`PagePin::keep`].
    pub fn unpin_page(&self, page_no: PageNo, dirty: bool) -> Result<()> {
        let page_id = PageId::new(self.file_id, page_no);
        if self.pool.unpin_page(page_id, dirty) {
            Ok(())
        } else {
            Err(KeelError::PageNotFound {
                page_id: page_id.as_u64(),
            })
        }
    }

    /// Writes all of this file's dirty pool pages to disk and syncs.
    pub fn flush(&self) -> Result<()> {
        let disk = &self.disk;
        self.pool
            .flush_file(self.file_id, |page_id, data| disk.write_page(page_id, data))?;
        self.disk.flush_file(self.file_id)
    }

    /// Drops this file's pool pages without writing them back.
    ///
    /// Used when the file itself is about to be deleted.
    pub fn discard_pages(&self) -> usize {
        self.pool.discard_file(self.file_id)
    }
}

/// A pinned page.
///
/// The pin is released when the value is dropped; the page is unpinned
/// dirty iff [`PagePin::data_mut`] was called. [`PagePin::keep`]
/// transfers responsibility for the pin to the caller (used by the
/// scan cursor, whose standing leaf pin outlives any one call).
pub struct PagePin<'a> {
    file: &'a BufferedFile,
    frame: &'a BufferFrame,
    page_no: PageNo,
    dirty: Cell<bool>,
}

impl<'a> PagePin<'a> {
    fn new(file: &'a BufferedFile, frame: &'a BufferFrame, page_no: PageNo) -> Self {
        Self {
            file,
            frame,
            page_no,
            dirty: Cell::new(false),
        }
    }

    /// Returns the pinned page's number.
    pub fn page_no(&self) -> PageNo {
        self.page_no
    }

    /// Read access to the page image.
    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.read_data()
    }

    /// Write access to the page image. Marks the pin dirty.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.dirty.set(true);
        self.frame.write_data()
    }

    /// Releases ownership of the pin without unpinning the page.
    ///
    /// The caller becomes responsible for a matching
    /// [`BufferedFile::unpin_page`]. Returns the page number.
    pub fn keep(self) -> PageNo {
        let page_no = self.page_no;
        std::mem::forget(self);
        page_no
    }
}

impl Drop for PagePin<'_> {
    fn drop(&mut self) {
        let page_id = PageId::new(self.file.file_id, self.page_no);
        self.file.pool.unpin_page(page_id, self.dirty.get());
    }
}
