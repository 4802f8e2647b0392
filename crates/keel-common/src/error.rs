//! Error types for KeelDB.

use thiserror::Error;

/// Result type alias using KeelError.
pub type Result<T> = std::result::Result<T, KeelError>;

/// Errors that can occur in KeelDB operations.
#[derive(Debug, Error)]
pub enum KeelError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file {0} is not open")]
    FileNotOpen(u32),

    // Storage errors
    #[error("page not found: {page_id}")]
    PageNotFound { page_id: u64 },

    #[error("buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("page full, unable to insert record")]
    PageFull,

    #[error("record of {size} bytes does not fit in a page (max {max})")]
    RecordTooLarge { size: usize, max: usize },

    #[error("record too short for attribute at byte offset {offset} (record is {len} bytes)")]
    RecordTooShort { offset: usize, len: usize },

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("file scan has no current record")]
    NoCurrentRecord,

    #[error("end of file reached")]
    EndOfFile,

    // Index errors
    #[error("index meta page does not match the requested index: {0}")]
    BadIndexInfo(String),

    #[error("attribute type {0} is not supported by this index")]
    UnsupportedAttrType(String),

    #[error("key too short: {len} bytes (need {need})")]
    KeyTooShort { len: usize, need: usize },

    #[error("B+ tree corrupted: {0}")]
    TreeCorrupted(String),

    // Scan errors
    #[error("invalid scan operator for bound")]
    BadOpcode,

    #[error("invalid scan range: high value is below low value")]
    BadScanRange,

    #[error("no key in the index satisfies the scan's low bound")]
    NoSuchKeyFound,

    #[error("no scan is currently in progress")]
    ScanNotInitialized,

    #[error("index scan completed")]
    IndexScanCompleted,
}
