//! Sequential scan over a heap file.

use bytes::Bytes;

use keel_common::page::PageNo;
use keel_common::{KeelError, Result};

use crate::heap::file::HeapFile;
use crate::heap::page::{HeapPage, SlotId};
use crate::record::RecordId;

/// Sequential scanner over every record in a heap file.
///
/// `scan_next` advances to the next record and returns its ID, raising
/// `EndOfFile` once the file is exhausted; `record` returns the
/// payload of the record `scan_next` last stopped on. This is the
/// interface bulk index construction consumes.
pub struct FileScan<'a> {
    heap: &'a HeapFile,
    next_page_no: PageNo,
    next_slot: u16,
    current: Option<(RecordId, Bytes)>,
}

impl<'a> FileScan<'a> {
    /// Creates a scanner positioned before the first record.
    pub fn new(heap: &'a HeapFile) -> Self {
        Self {
            heap,
            next_page_no: 1,
            next_slot: 0,
            current: None,
        }
    }

    /// Advances to the next record and returns its record ID.
    ///
    /// Raises `EndOfFile` when the relation is exhausted.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        let num_pages = self.heap.num_pages()?;

        while self.next_page_no <= num_pages {
            let page = self.heap.buffered().fetch(self.next_page_no)?;
            let data = page.data();
            let slot_count = HeapPage::slot_count_in_slice(&**data);

            while (self.next_slot as usize) < slot_count {
                let slot = self.next_slot;
                self.next_slot += 1;

                if let Some(payload) = HeapPage::record_in_slice(&**data, SlotId(slot)) {
                    let rid = RecordId::new(self.next_page_no, slot);
                    self.current = Some((rid, Bytes::copy_from_slice(payload)));
                    return Ok(rid);
                }
            }

            drop(data);
            drop(page);
            self.next_page_no += 1;
            self.next_slot = 0;
        }

        self.current = None;
        Err(KeelError::EndOfFile)
    }

    /// Returns the payload of the current record.
    pub fn record(&self) -> Result<Bytes> {
        match &self.current {
            Some((_, payload)) => Ok(payload.clone()),
            None => Err(KeelError::NoCurrentRecord),
        }
    }
}
