//! Record identifiers for heap-file records.

use keel_common::page::{PageNo, NULL_PAGE_NO};

/// Unique identifier for a record within a heap file.
///
/// Combines the page number with a slot number inside that page. A
/// page number of 0 doubles as the "empty slot" sentinel in index leaf
/// nodes, which is why heap pages are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    /// Page containing this record.
    pub page_no: PageNo,
    /// Slot number within the page.
    pub slot_no: u16,
}

impl RecordId {
    /// Size of the on-disk encoding in bytes.
    pub const DISK_SIZE: usize = 8;

    /// The null record ID (empty-slot sentinel).
    pub const NULL: RecordId = RecordId {
        page_no: NULL_PAGE_NO,
        slot_no: 0,
    };

    /// Creates a new record ID.
    pub fn new(page_no: PageNo, slot_no: u16) -> Self {
        Self { page_no, slot_no }
    }

    /// Returns true if this is the empty-slot sentinel.
    pub fn is_null(&self) -> bool {
        self.page_no == NULL_PAGE_NO
    }

    /// Serializes the record ID to its fixed on-disk form.
    ///
    /// Layout: page_no (4, LE) + slot_no (2, LE) + 2 reserved bytes.
    pub fn to_bytes(&self) -> [u8; Self::DISK_SIZE] {
        let mut buf = [0u8; Self::DISK_SIZE];
        buf[0..4].copy_from_slice(&self.page_no.to_le_bytes());
        buf[4..6].copy_from_slice(&self.slot_no.to_le_bytes());
        buf
    }

    /// Deserializes a record ID from its on-disk form.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            page_no: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            slot_no: u16::from_le_bytes([buf[4], buf[5]]),
        }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_no, self.slot_no)
    }
}
