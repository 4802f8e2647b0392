//! Range-scan cursor over the index leaf chain.

use keel_common::page::{PageNo, NULL_PAGE_NO};
use keel_common::types::Operator;
use keel_common::{KeelError, Result};

use super::constants::LEAF_CAPACITY;
use super::index::BTreeIndex;
use super::node::{LeafNode, NonLeafNode};
use crate::record::RecordId;

/// State of an in-progress range scan.
///
/// While a scan is active the cursor's current leaf stays pinned in
/// the buffer pool (the "standing pin"); `current_page_no` is None
/// once the sibling chain has been exhausted, at which point nothing
/// is pinned anymore.
#[derive(Debug)]
pub(super) struct ScanState {
    low: i32,
    low_op: Operator,
    high: i32,
    high_op: Operator,
    /// The pinned leaf the cursor is positioned on.
    pub(super) current_page_no: Option<PageNo>,
    /// Slot index of the next entry to emit.
    next_entry: usize,
}

fn satisfies_low(key: i32, low: i32, low_op: Operator) -> bool {
    match low_op {
        Operator::Gt => key > low,
        _ => key >= low,
    }
}

fn satisfies_high(key: i32, high: i32, high_op: Operator) -> bool {
    match high_op {
        Operator::Lt => key < high,
        _ => key <= high,
    }
}

impl BTreeIndex {
    /// Begins a range scan over `[low, high]` under the given bound
    /// operators.
    ///
    /// The low operator must be `Gt` or `Gte` and the high operator
    /// `Lt` or `Lte` (else `BadOpcode`); the high value must not be
    /// below the low value (else `BadScanRange`). An already-active
    /// scan is ended first. Raises `NoSuchKeyFound` when no entry
    /// satisfies the low bound.
    pub fn start_scan(
        &mut self,
        low: &[u8],
        low_op: Operator,
        high: &[u8],
        high_op: Operator,
    ) -> Result<()> {
        if self.scan.is_some() {
            self.end_scan()?;
        }

        if !low_op.is_low_bound() || !high_op.is_high_bound() {
            return Err(KeelError::BadOpcode);
        }

        let low = self.decode_key(low)?;
        let high = self.decode_key(high)?;
        if high < low {
            return Err(KeelError::BadScanRange);
        }

        // Walk down to the leftmost leaf that could satisfy the low
        // bound.
        let mut page_no = self.root_page_no;
        if !self.root_is_leaf {
            loop {
                let page = self.file.fetch(page_no)?;
                let (level, child_no) = {
                    let data = page.data();
                    (
                        NonLeafNode::level(&**data),
                        NonLeafNode::child_for_scan(&**data, low),
                    )
                };
                drop(page);

                page_no = child_no;
                if level == 1 {
                    break;
                }
            }
        }

        // Position on the first satisfying entry, following the
        // sibling chain: the descent may land one leaf early, and the
        // low bound may exceed everything in this leaf.
        loop {
            let page = self.file.fetch(page_no)?;
            let (found, right_sib) = {
                let data = page.data();
                let count = LeafNode::entry_count(&**data);
                let found = (0..count)
                    .find(|&i| satisfies_low(LeafNode::key_at(&**data, i), low, low_op));
                (found, LeafNode::right_sibling(&**data))
            };

            if let Some(next_entry) = found {
                let current = page.keep();
                self.scan = Some(ScanState {
                    low,
                    low_op,
                    high,
                    high_op,
                    current_page_no: Some(current),
                    next_entry,
                });
                return Ok(());
            }

            drop(page);
            if right_sib == NULL_PAGE_NO {
                return Err(KeelError::NoSuchKeyFound);
            }
            page_no = right_sib;
        }
    }

    /// Returns the next record ID in the scan.
    ///
    /// Raises `ScanNotInitialized` without an active scan and
    /// `IndexScanCompleted` once the next entry fails the high bound
    /// or the leaf chain is exhausted.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        let state = self.scan.as_mut().ok_or(KeelError::ScanNotInitialized)?;

        let page_no = match state.current_page_no {
            Some(page_no) => page_no,
            None => return Err(KeelError::IndexScanCompleted),
        };

        // Transient pin on top of the standing one for the duration of
        // this call.
        let page = self.file.fetch(page_no)?;
        let (rid, advanced_off_leaf, right_sib) = {
            let data = page.data();
            let key = LeafNode::key_at(&**data, state.next_entry);
            if !satisfies_high(key, state.high, state.high_op) {
                return Err(KeelError::IndexScanCompleted);
            }

            let rid = LeafNode::rid_at(&**data, state.next_entry);
            state.next_entry += 1;

            let off_leaf = state.next_entry >= LEAF_CAPACITY
                || !LeafNode::slot_used(&**data, state.next_entry);
            (rid, off_leaf, LeafNode::right_sibling(&**data))
        };
        drop(page);

        if advanced_off_leaf {
            // Release the exhausted leaf before pinning its successor
            // so pin depth stays bounded.
            self.file.unpin_page(page_no, false)?;
            if right_sib == NULL_PAGE_NO {
                state.current_page_no = None;
            } else {
                let next = self.file.fetch(right_sib)?;
                state.current_page_no = Some(next.keep());
                state.next_entry = 0;
            }
        }

        Ok(rid)
    }

    /// Ends the active scan, releasing its standing pin.
    pub fn end_scan(&mut self) -> Result<()> {
        if self.scan.is_none() {
            return Err(KeelError::ScanNotInitialized);
        }
        self.release_scan();
        Ok(())
    }
}
