//! Disk-resident B+ tree secondary index.
//!
//! The index maps one fixed-offset integer attribute of a heap
//! relation to the record IDs holding each value, and answers ordered
//! range scans over it. Nodes live in fixed-size pages behind the
//! buffer pool:
//!
//! ```text
//! page 1: meta (relation, attribute, root identity)
//! page 2: initial root leaf
//! page 3+: nodes created by splits
//! ```
//!
//! Inserts descend recursively from the root; a full leaf splits and
//! promotes the first key of its new right sibling, a full non-leaf
//! splits around the median of its separators. Height grows only by
//! installing a new root over the old one. Leaves form a singly
//! linked sibling chain in ascending key order, which the range-scan
//! cursor walks while keeping exactly one leaf pinned.
//!
//! The index is insert-only: there is no delete and no rebalancing,
//! and slot occupancy is tracked with the empty-slot sentinel (a
//! record ID with page number 0).

pub mod constants;
pub mod index;
pub mod node;
pub mod scan;

pub use constants::{LEAF_CAPACITY, NONLEAF_CAPACITY};
pub use index::BTreeIndex;
pub use node::{IndexMeta, LeafNode, NonLeafNode};
