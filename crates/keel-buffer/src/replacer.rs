//! Page replacement policies for the buffer pool.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::frame::FrameId;

/// Trait for page replacement algorithms.
///
/// Whether a frame may actually be evicted is decided by the caller
/// through the predicate passed to [`Replacer::evict`]; the pool checks
/// pin counts there, so the replacer only tracks recency.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Selects a victim frame for eviction.
    ///
    /// `can_evict` is consulted for each candidate; frames it rejects
    /// (typically pinned ones) are skipped. Returns None if no frame
    /// is evictable.
    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId>;

    /// Removes a frame from consideration (e.g. when it returns to the
    /// free list).
    fn remove(&self, frame_id: FrameId);
}

/// Clock replacement algorithm.
///
/// Reference bits are atomics so access recording is lock-free; only
/// the clock hand lives behind a mutex.
#[derive(Debug)]
pub struct ClockReplacer {
    /// Number of frames.
    num_frames: usize,
    /// Reference bit per frame.
    reference_bits: Vec<AtomicBool>,
    /// Current clock hand position.
    hand: Mutex<usize>,
}

impl ClockReplacer {
    /// Creates a new clock replacer for the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            reference_bits: (0..num_frames).map(|_| AtomicBool::new(false)).collect(),
            hand: Mutex::new(0),
        }
    }

    /// Returns the total capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_frames
    }
}

impl Replacer for ClockReplacer {
    #[inline]
    fn record_access(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(true, Ordering::Relaxed);
        }
    }

    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId> {
        let mut hand = self.hand.lock();

        // Two full rotations: the first may only be clearing reference
        // bits, the second then finds any frame the predicate allows.
        for _ in 0..self.num_frames * 2 {
            let idx = *hand;
            *hand = (*hand + 1) % self.num_frames;

            if self.reference_bits[idx].swap(false, Ordering::Relaxed) {
                continue;
            }
            let candidate = FrameId(idx as u32);
            if can_evict(candidate) {
                return Some(candidate);
            }
        }
        None
    }

    #[inline]
    fn remove(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(false, Ordering::Relaxed);
        }
    }
}
