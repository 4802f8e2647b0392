//! B+ tree secondary index over a heap relation.

use std::sync::Arc;
use tracing::debug;

use keel_buffer::BufferPool;
use keel_common::page::PageNo;
use keel_common::types::AttrType;
use keel_common::{KeelError, Result};

use super::node::{IndexMeta, LeafNode, NonLeafNode};
use super::scan::ScanState;
use crate::buffered::{BufferedFile, PagePin};
use crate::disk::DiskManager;
use crate::heap::{FileScan, HeapFile};
use crate::record::RecordId;

/// Disk-resident B+ tree index over one attribute of a relation.
///
/// The index file holds a meta page (the file's first page), an
/// initial root leaf, and further node pages created by splits. All
/// page access goes through the buffer pool; the index is
/// single-threaded and the caller serializes operations.
#[derive(Debug)]
pub struct BTreeIndex {
    /// Buffered page access for the index file.
    pub(super) file: BufferedFile,
    /// Index file name, `"<relation>.<offset>"`.
    index_name: String,
    /// Name of the indexed relation.
    relation_name: String,
    /// Page number of the meta page.
    header_page_no: PageNo,
    /// Page number of the current root.
    pub(super) root_page_no: PageNo,
    /// Whether the root is still a leaf (no split has reached it yet).
    pub(super) root_is_leaf: bool,
    /// Byte offset of the indexed attribute within a record.
    attr_byte_offset: usize,
    /// Type of the indexed attribute.
    attr_type: AttrType,
    /// The active range scan, if any.
    pub(super) scan: Option<ScanState>,
}

impl BTreeIndex {
    /// Opens the index for `relation_name` keyed on the attribute at
    /// `attr_byte_offset`, creating and bulk-loading it from the
    /// relation's heap file if the index file does not exist yet.
    pub fn open(
        disk: Arc<DiskManager>,
        pool: Arc<BufferPool>,
        relation_name: &str,
        attr_byte_offset: usize,
        attr_type: AttrType,
    ) -> Result<Self> {
        if !attr_type.is_supported() {
            return Err(KeelError::UnsupportedAttrType(attr_type.to_string()));
        }

        let index_name = format!("{}.{}", relation_name, attr_byte_offset);
        let create = !disk.file_exists(&index_name);

        if create {
            Self::create(disk, pool, relation_name, index_name, attr_byte_offset, attr_type)
        } else {
            Self::rebind(disk, pool, relation_name, index_name, attr_byte_offset, attr_type)
        }
    }

    /// Creates the index file, materializes meta and root pages, and
    /// bulk-loads every record of the relation.
    fn create(
        disk: Arc<DiskManager>,
        pool: Arc<BufferPool>,
        relation_name: &str,
        index_name: String,
        attr_byte_offset: usize,
        attr_type: AttrType,
    ) -> Result<Self> {
        let file_id = disk.open_file(&index_name, true)?;
        let file = BufferedFile::new(disk.clone(), pool, file_id);

        let header_page_no;
        let root_page_no;
        {
            let meta_page = file.alloc()?;
            header_page_no = meta_page.page_no();
            // The zeroed root page already is a valid empty leaf
            root_page_no = file.alloc()?.page_no();

            IndexMeta {
                relation_name: relation_name.to_string(),
                attr_byte_offset: attr_byte_offset as u32,
                attr_type,
                root_is_leaf: true,
                root_page_no,
            }
            .write(&mut **meta_page.data_mut());
        }

        let mut index = Self {
            file,
            index_name,
            relation_name: relation_name.to_string(),
            header_page_no,
            root_page_no,
            root_is_leaf: true,
            attr_byte_offset,
            attr_type,
            scan: None,
        };

        debug!(index = %index.index_name, "created index file");

        // A partially built index is useless; drop the file on any
        // bulk-load failure.
        if let Err(e) = index.bulk_load() {
            index.file.discard_pages();
            let _ = disk.delete_file(&index.index_name);
            return Err(e);
        }

        index.file.flush()?;
        Ok(index)
    }

    /// Opens an existing index file and rebinds from its meta page.
    fn rebind(
        disk: Arc<DiskManager>,
        pool: Arc<BufferPool>,
        relation_name: &str,
        index_name: String,
        attr_byte_offset: usize,
        attr_type: AttrType,
    ) -> Result<Self> {
        let file_id = disk.open_file(&index_name, false)?;
        let file = BufferedFile::new(disk, pool, file_id);

        let header_page_no = file.first_page_no()?;
        let meta = {
            let meta_page = file.fetch(header_page_no)?;
            let data = meta_page.data();
            IndexMeta::read(&**data)?
        };

        if meta.relation_name != relation_name
            || meta.attr_byte_offset != attr_byte_offset as u32
            || meta.attr_type != attr_type
        {
            return Err(KeelError::BadIndexInfo(index_name));
        }

        debug!(
            index = %index_name,
            root = meta.root_page_no,
            root_is_leaf = meta.root_is_leaf,
            "opened existing index file"
        );

        Ok(Self {
            file,
            index_name,
            relation_name: relation_name.to_string(),
            header_page_no,
            root_page_no: meta.root_page_no,
            root_is_leaf: meta.root_is_leaf,
            attr_byte_offset,
            attr_type,
            scan: None,
        })
    }

    /// Returns the index file name, `"<relation>.<offset>"`.
    pub fn name(&self) -> &str {
        &self.index_name
    }

    /// Returns true while the root has never split.
    pub fn is_root_leaf(&self) -> bool {
        self.root_is_leaf
    }

    /// Returns the page number of the current root.
    pub fn root_page_no(&self) -> PageNo {
        self.root_page_no
    }

    /// Inserts a (key, rid) entry.
    ///
    /// `key` holds the raw attribute bytes; for an integer index these
    /// are 4 little-endian bytes.
    pub fn insert_entry(&mut self, key: &[u8], rid: RecordId) -> Result<()> {
        let key = self.decode_key(key)?;

        if self.root_is_leaf {
            self.insert_at_root_leaf(key, rid)
        } else {
            match self.lookup_leaf(self.root_page_no, key, rid)? {
                Some((new_page_no, sep)) => {
                    self.make_new_root(self.root_page_no, sep, new_page_no, false)
                }
                None => Ok(()),
            }
        }
    }

    /// Interprets raw attribute bytes as a key of the indexed type.
    pub(super) fn decode_key(&self, key: &[u8]) -> Result<i32> {
        match self.attr_type {
            AttrType::Integer => {
                if key.len() < 4 {
                    return Err(KeelError::KeyTooShort {
                        len: key.len(),
                        need: 4,
                    });
                }
                Ok(i32::from_le_bytes([key[0], key[1], key[2], key[3]]))
            }
            other => Err(KeelError::UnsupportedAttrType(other.to_string())),
        }
    }

    /// Insert while the root is still a leaf: operate on it directly,
    /// growing the tree to height two when it overflows.
    fn insert_at_root_leaf(&mut self, key: i32, rid: RecordId) -> Result<()> {
        let root_no = self.root_page_no;
        let promoted;
        let new_leaf_no;
        {
            let page = self.file.fetch(root_no)?;
            let full = LeafNode::is_full(&**page.data());
            if !full {
                LeafNode::insert(&mut **page.data_mut(), key, rid);
                return Ok(());
            }

            let right = self.file.alloc()?;
            new_leaf_no = right.page_no();
            let mut left_data = page.data_mut();
            let mut right_data = right.data_mut();
            promoted = LeafNode::split(
                &mut **left_data,
                &mut **right_data,
                new_leaf_no,
                key,
                rid,
            );
        }

        self.make_new_root(root_no, promoted, new_leaf_no, true)
    }

    /// Recursive descent from a non-leaf node to the target leaf.
    ///
    /// Returns the (page, separator) promoted out of this node if it
    /// had to split, to be applied by the caller one level up. The pin
    /// on `curr` is released before recursing so pin depth stays
    /// bounded; it is re-taken to apply a returned promotion.
    fn lookup_leaf(
        &self,
        curr: PageNo,
        key: i32,
        rid: RecordId,
    ) -> Result<Option<(PageNo, i32)>> {
        let page = self.file.fetch(curr)?;
        let (level, child_no) = {
            let data = page.data();
            (
                NonLeafNode::level(&**data),
                NonLeafNode::child_for_insert(&**data, key),
            )
        };

        if level == 1 {
            // The child is the target leaf
            let leaf = self.file.fetch(child_no)?;
            let full = LeafNode::is_full(&**leaf.data());
            if !full {
                LeafNode::insert(&mut **leaf.data_mut(), key, rid);
                return Ok(None);
            }

            let right = self.file.alloc()?;
            let new_leaf_no = right.page_no();
            let sep = {
                let mut leaf_data = leaf.data_mut();
                let mut right_data = right.data_mut();
                LeafNode::split(&mut **leaf_data, &mut **right_data, new_leaf_no, key, rid)
            };
            drop(leaf);
            drop(right);

            return self.apply_promotion(page, sep, new_leaf_no);
        }

        // Interior level: release this node while the subtree works
        drop(page);
        match self.lookup_leaf(child_no, key, rid)? {
            None => Ok(None),
            Some((new_child_no, sep)) => {
                let page = self.file.fetch(curr)?;
                self.apply_promotion(page, sep, new_child_no)
            }
        }
    }

    /// Installs a promoted (separator, child) into the pinned non-leaf
    /// `page`, splitting it when full and bubbling the result upward.
    fn apply_promotion(
        &self,
        page: PagePin<'_>,
        sep: i32,
        new_child: PageNo,
    ) -> Result<Option<(PageNo, i32)>> {
        let full = NonLeafNode::is_full(&**page.data());
        if !full {
            NonLeafNode::insert(&mut **page.data_mut(), sep, new_child);
            return Ok(None);
        }

        let right = self.file.alloc()?;
        let new_page_no = right.page_no();
        let promoted = {
            let mut left_data = page.data_mut();
            let mut right_data = right.data_mut();
            NonLeafNode::split(&mut **left_data, &mut **right_data, sep, new_child)
        };

        Ok(Some((new_page_no, promoted)))
    }

    /// Grows the tree by one level: a new non-leaf root over the old
    /// root and the page promoted out of it. The meta page is
    /// rewritten to the new root identity.
    fn make_new_root(
        &mut self,
        left: PageNo,
        sep: i32,
        new_child: PageNo,
        children_are_leaves: bool,
    ) -> Result<()> {
        let new_root_no = {
            let root = self.file.alloc()?;
            let level = if children_are_leaves { 1 } else { 0 };
            NonLeafNode::init_root(&mut **root.data_mut(), level, left, new_child, sep);
            root.page_no()
        };

        self.root_page_no = new_root_no;
        self.root_is_leaf = false;

        {
            let meta_page = self.file.fetch(self.header_page_no)?;
            IndexMeta {
                relation_name: self.relation_name.clone(),
                attr_byte_offset: self.attr_byte_offset as u32,
                attr_type: self.attr_type,
                root_is_leaf: false,
                root_page_no: new_root_no,
            }
            .write(&mut **meta_page.data_mut());
        }

        debug!(index = %self.index_name, root = new_root_no, "installed new root");
        Ok(())
    }

    /// Feeds every record of the base relation through `insert_entry`.
    fn bulk_load(&mut self) -> Result<usize> {
        let heap = HeapFile::open(
            self.file.disk().clone(),
            self.file.pool().clone(),
            &self.relation_name,
        )?;
        let mut scan = FileScan::new(&heap);

        let offset = self.attr_byte_offset;
        let key_size = self.attr_type.key_size();
        let mut loaded = 0usize;

        loop {
            match scan.scan_next() {
                Ok(rid) => {
                    let record = scan.record()?;
                    if record.len() < offset + key_size {
                        return Err(KeelError::RecordTooShort {
                            offset,
                            len: record.len(),
                        });
                    }
                    self.insert_entry(&record[offset..offset + key_size], rid)?;
                    loaded += 1;
                }
                Err(KeelError::EndOfFile) => break,
                Err(e) => return Err(e),
            }
        }

        debug!(index = %self.index_name, records = loaded, "bulk load complete");
        Ok(loaded)
    }

    /// Flushes the index file and releases the instance.
    pub fn close(mut self) -> Result<()> {
        self.release_scan();
        self.file.flush()
    }

    /// Drops any active scan's standing pin.
    pub(super) fn release_scan(&mut self) {
        if let Some(state) = self.scan.take() {
            if let Some(page_no) = state.current_page_no {
                let _ = self.file.unpin_page(page_no, false);
            }
        }
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        self.release_scan();
        let _ = self.file.flush();
    }
}
