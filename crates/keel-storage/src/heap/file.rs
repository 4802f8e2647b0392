//! Heap file manager with buffer pool integration.
//!
//! All page I/O is routed through the buffer pool. Records are
//! appended: the file keeps a hint to the page the last insert went
//! to and allocates a fresh page when it fills up. There is no delete
//! or update, so no free-space tracking is needed.

use bytes::Bytes;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use keel_buffer::BufferPool;
use keel_common::page::{PageNo, NULL_PAGE_NO};
use keel_common::{KeelError, Result};

use crate::buffered::BufferedFile;
use crate::disk::DiskManager;
use crate::heap::page::{HeapPage, SlotId};
use crate::record::RecordId;

/// Heap file storing variable-length records in slotted pages.
#[derive(Debug)]
pub struct HeapFile {
    /// Buffered page access for the backing file.
    file: BufferedFile,
    /// Relation name (also the file name).
    name: String,
    /// Page the last insert went to (0 = none yet).
    last_page_hint: AtomicU32,
}

impl HeapFile {
    /// Creates a new heap file for the given relation.
    pub fn create(
        disk: Arc<DiskManager>,
        pool: Arc<BufferPool>,
        name: &str,
    ) -> Result<Self> {
        let file_id = disk.open_file(name, true)?;
        Ok(Self::bind(disk, pool, file_id, name))
    }

    /// Opens an existing heap file.
    pub fn open(disk: Arc<DiskManager>, pool: Arc<BufferPool>, name: &str) -> Result<Self> {
        let file_id = disk.open_file(name, false)?;
        Ok(Self::bind(disk, pool, file_id, name))
    }

    fn bind(disk: Arc<DiskManager>, pool: Arc<BufferPool>, file_id: u32, name: &str) -> Self {
        let last_page = disk.num_pages(file_id).unwrap_or(0);
        Self {
            file: BufferedFile::new(disk, pool, file_id),
            name: name.to_string(),
            last_page_hint: AtomicU32::new(last_page),
        }
    }

    /// Returns the relation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of pages in the file.
    pub fn num_pages(&self) -> Result<u32> {
        self.file.num_pages()
    }

    /// Returns the buffered file for page-level access.
    pub(crate) fn buffered(&self) -> &BufferedFile {
        &self.file
    }

    /// Inserts a record, returning its record ID.
    pub fn insert_record(&self, payload: &[u8]) -> Result<RecordId> {
        if payload.len() > HeapPage::MAX_RECORD_SIZE {
            return Err(KeelError::RecordTooLarge {
                size: payload.len(),
                max: HeapPage::MAX_RECORD_SIZE,
            });
        }

        let hint = self.last_page_hint.load(Ordering::Relaxed);
        if hint != NULL_PAGE_NO {
            if let Some(rid) = self.try_insert_at(hint, payload)? {
                return Ok(rid);
            }
        }

        // Hint page full (or no pages yet): extend the file
        let page = self.file.alloc()?;
        let slot = HeapPage::insert_record_in_slice(&mut **page.data_mut(), payload)?;
        let page_no = page.page_no();
        drop(page);

        self.last_page_hint.store(page_no, Ordering::Relaxed);
        Ok(RecordId::new(page_no, slot.0))
    }

    /// Tries to insert into one page; Ok(None) means it was full.
    fn try_insert_at(&self, page_no: PageNo, payload: &[u8]) -> Result<Option<RecordId>> {
        let page = self.file.fetch(page_no)?;

        let fits = {
            let data = page.data();
            HeapPage::free_space_in_slice(&**data) >= payload.len() + HeapPage::SLOT_SIZE
        };
        if !fits {
            return Ok(None);
        }

        let slot = HeapPage::insert_record_in_slice(&mut **page.data_mut(), payload)?;
        Ok(Some(RecordId::new(page_no, slot.0)))
    }

    /// Retrieves a record by its record ID.
    pub fn record(&self, rid: RecordId) -> Result<Bytes> {
        let page = self.file.fetch(rid.page_no)?;
        let data = page.data();
        match HeapPage::record_in_slice(&**data, SlotId(rid.slot_no)) {
            Some(payload) => Ok(Bytes::copy_from_slice(payload)),
            None => Err(KeelError::RecordNotFound(rid.to_string())),
        }
    }

    /// Flushes the file's dirty pages to disk.
    pub fn flush(&self) -> Result<()> {
        self.file.flush()
    }
}
