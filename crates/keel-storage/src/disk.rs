//! Disk manager for page-level file I/O.
//!
//! Each managed file is a "blob file": a flat sequence of fixed-size
//! pages addressed by page number. Pages are numbered from 1 so that 0
//! remains free as the null sentinel the index layout relies on.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use keel_common::page::{PageId, PageNo, PAGE_SIZE};
use keel_common::{KeelError, Result};

/// Configuration for the disk manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskManagerConfig {
    /// Base directory for data files.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

/// Manages reading and writing pages to disk files.
///
/// Files are registered by name (the index composes its own file name
/// from relation and attribute offset); each open file is assigned a
/// numeric file ID used in `PageId`s for the lifetime of the manager.
#[derive(Debug)]
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// Open file registry.
    inner: Mutex<DiskInner>,
}

#[derive(Debug)]
struct DiskInner {
    /// Next file ID to hand out.
    next_file_id: u32,
    /// Name to file ID mapping for open files.
    ids_by_name: HashMap<String, u32>,
    /// Open file handles keyed by file ID.
    files: HashMap<u32, FileHandle>,
}

/// Handle for an open data file.
#[derive(Debug)]
struct FileHandle {
    /// The file handle.
    file: File,
    /// Path to the file.
    #[allow(dead_code)]
    path: PathBuf,
    /// Number of pages in the file.
    num_pages: u32,
}

impl DiskManager {
    /// Creates a new disk manager.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            config,
            inner: Mutex::new(DiskInner {
                next_file_id: 1,
                ids_by_name: HashMap::new(),
                files: HashMap::new(),
            }),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Generates the on-disk path for a file name.
    fn file_path(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(name)
    }

    /// Returns true if a file with the given name exists on disk.
    pub fn file_exists(&self, name: &str) -> bool {
        self.file_path(name).exists()
    }

    /// Opens a data file by name, returning its file ID.
    ///
    /// With `create = false` the file must already exist on disk.
    /// Opening an already-open name returns the existing ID.
    pub fn open_file(&self, name: &str, create: bool) -> Result<u32> {
        let mut inner = self.inner.lock();

        if let Some(&file_id) = inner.ids_by_name.get(name) {
            return Ok(file_id);
        }

        let path = self.file_path(name);
        if !create && !path.exists() {
            return Err(KeelError::FileNotFound(name.to_string()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        let file_id = inner.next_file_id;
        inner.next_file_id += 1;
        inner.ids_by_name.insert(name.to_string(), file_id);
        inner.files.insert(
            file_id,
            FileHandle {
                file,
                path,
                num_pages,
            },
        );

        Ok(file_id)
    }

    /// Closes (if open) and removes a file.
    pub fn delete_file(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(file_id) = inner.ids_by_name.remove(name) {
            inner.files.remove(&file_id);
        }
        drop(inner);

        let path = self.file_path(name);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        let mut inner = self.inner.lock();
        let handle = inner
            .files
            .get_mut(&page_id.file_id)
            .ok_or(KeelError::FileNotOpen(page_id.file_id))?;

        if page_id.page_no == 0 || page_id.page_no > handle.num_pages {
            return Err(KeelError::PageNotFound {
                page_id: page_id.as_u64(),
            });
        }

        let offset = (page_id.page_no as u64 - 1) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = [0u8; PAGE_SIZE];
        handle.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// Writes a page to disk.
    ///
    /// `data` must be exactly one page long.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), PAGE_SIZE);

        let mut inner = self.inner.lock();
        let handle = inner
            .files
            .get_mut(&page_id.file_id)
            .ok_or(KeelError::FileNotOpen(page_id.file_id))?;

        if page_id.page_no == 0 {
            return Err(KeelError::PageNotFound {
                page_id: page_id.as_u64(),
            });
        }

        let offset = (page_id.page_no as u64 - 1) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(data)?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        // Track the extension if we wrote past the old end
        if page_id.page_no > handle.num_pages {
            handle.num_pages = page_id.page_no;
        }

        Ok(())
    }

    /// Allocates a new page at the end of the file.
    ///
    /// The page is zero-filled on disk. Returns its page number.
    pub fn allocate_page(&self, file_id: u32) -> Result<PageNo> {
        let mut inner = self.inner.lock();
        let handle = inner
            .files
            .get_mut(&file_id)
            .ok_or(KeelError::FileNotOpen(file_id))?;

        let page_no = handle.num_pages + 1;
        let offset = (page_no as u64 - 1) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(&[0u8; PAGE_SIZE])?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        handle.num_pages = page_no;
        Ok(page_no)
    }

    /// Returns the number of pages in a file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        let inner = self.inner.lock();
        let handle = inner
            .files
            .get(&file_id)
            .ok_or(KeelError::FileNotOpen(file_id))?;
        Ok(handle.num_pages)
    }

    /// Returns the number of the file's first page.
    pub fn first_page_no(&self, file_id: u32) -> Result<PageNo> {
        let inner = self.inner.lock();
        let handle = inner
            .files
            .get(&file_id)
            .ok_or(KeelError::FileNotOpen(file_id))?;

        if handle.num_pages == 0 {
            return Err(KeelError::PageNotFound {
                page_id: PageId::new(file_id, 1).as_u64(),
            });
        }
        Ok(1)
    }

    /// Flushes pending writes of one file to disk.
    pub fn flush_file(&self, file_id: u32) -> Result<()> {
        let inner = self.inner.lock();
        let handle = inner
            .files
            .get(&file_id)
            .ok_or(KeelError::FileNotOpen(file_id))?;
        handle.file.sync_all()?;
        Ok(())
    }

    /// Flushes all pending writes to disk.
    pub fn flush_all(&self) -> Result<()> {
        let inner = self.inner.lock();
        for handle in inner.files.values() {
            handle.file.sync_all()?;
        }
        Ok(())
    }
}
