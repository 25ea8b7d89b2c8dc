//! Fixed-capacity PCM slice buffers and their producer/renderer handoff.
//!
//! Grounded in the original `ScheduledAudioRegion`'s per-slice `NSLock`
//! array (`Audio/ScheduledAudioRegion.h`: `_sliceBuffer`/`_sliceLocks`),
//! replaced with a per-slice atomic ownership word, the same "avoid
//! locks on the hot path, use atomics" preference
//! `bae::playback::streaming_source::StreamingState` shows for its
//! finished/starving/frames-consumed bookkeeping.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::pcm::SampleClock;

const OWNER_PRODUCER: u8 = 0;
const OWNER_RENDERER: u8 = 1;

/// A fixed-capacity PCM buffer enqueued as a unit to the renderer.
#[derive(Debug)]
pub struct Slice {
    /// Capacity is `frames_per_slice * bytes_per_frame`; `valid_frames`
    /// may leave a suffix of this buffer unused (short reads, EOF).
    data: Vec<u8>,
    pub presentation_timestamp: SampleClock,
    pub valid_frames: u32,
    bytes_per_frame: u32,
}

impl Slice {
    fn new(capacity_bytes: usize, bytes_per_frame: u32) -> Self {
        Self {
            data: vec![0u8; capacity_bytes],
            presentation_timestamp: SampleClock::ZERO,
            valid_frames: 0,
            bytes_per_frame,
        }
    }

    /// The full backing buffer, for the producer to fill.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Only the valid prefix of the buffer, for the renderer to play.
    pub fn valid_bytes(&self) -> &[u8] {
        let len = (self.valid_frames as usize) * (self.bytes_per_frame as usize);
        &self.data[..len.min(self.data.len())]
    }

    fn clear(&mut self) {
        self.data.iter_mut().for_each(|b| *b = 0);
        self.valid_frames = 0;
    }
}

struct SliceCell {
    data: UnsafeCell<Slice>,
    owner: AtomicU8,
}

// SAFETY: `data` is only ever dereferenced by the side currently recorded
// in `owner`, and ownership changes only at `release_after_fill` /
// `release_after_consume`, which happen-after every prior access via the
// `Release`/`Acquire` pair on `owner`. No two sides ever hold a live
// reference at the same time.
unsafe impl Sync for SliceCell {}

/// A region-local ring of `N` slice buffers with producer/consumer handoff.
pub struct SliceBufferRing {
    cells: Vec<SliceCell>,
    frames_per_slice: u32,
}

impl SliceBufferRing {
    /// Allocate all `n` slice buffers once. Not resizable while attached.
    pub fn allocate(n: usize, frames_per_slice: u32, bytes_per_frame: u32) -> Self {
        let capacity_bytes = frames_per_slice as usize * bytes_per_frame as usize;
        let cells = (0..n)
            .map(|_| SliceCell {
                data: UnsafeCell::new(Slice::new(capacity_bytes, bytes_per_frame)),
                owner: AtomicU8::new(OWNER_PRODUCER),
            })
            .collect();
        Self {
            cells,
            frames_per_slice,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn frames_per_slice(&self) -> u32 {
        self.frames_per_slice
    }

    pub fn is_owned_by_producer(&self, i: usize) -> bool {
        self.cells[i].owner.load(Ordering::Acquire) == OWNER_PRODUCER
    }

    pub fn is_owned_by_renderer(&self, i: usize) -> bool {
        self.cells[i].owner.load(Ordering::Acquire) == OWNER_RENDERER
    }

    /// Producer-side acquire. Panics (debug builds) if slice `i` is not
    /// currently producer-owned. Signals a handoff-protocol violation.
    pub fn acquire_for_fill(&self, i: usize) -> &mut Slice {
        debug_assert!(
            self.is_owned_by_producer(i),
            "slice {i} acquired for fill while renderer-owned"
        );
        // SAFETY: see the `Sync` impl above. Producer ownership means no
        // other side holds a reference right now.
        unsafe { &mut *self.cells[i].data.get() }
    }

    /// Producer → renderer handoff point.
    pub fn release_after_fill(&self, i: usize) {
        self.cells[i].owner.store(OWNER_RENDERER, Ordering::Release);
    }

    /// Consumer-side acquire. Panics (debug builds) if slice `i` is not
    /// currently renderer-owned.
    pub fn acquire_for_consume(&self, i: usize) -> &Slice {
        debug_assert!(
            self.is_owned_by_renderer(i),
            "slice {i} acquired for consume while producer-owned"
        );
        // SAFETY: see the `Sync` impl above.
        unsafe { &*self.cells[i].data.get() }
    }

    /// Renderer → producer handoff point.
    pub fn release_after_consume(&self, i: usize) {
        self.cells[i].owner.store(OWNER_PRODUCER, Ordering::Release);
    }

    /// Zero a slice and reset its valid-frame count. Caller must hold
    /// producer ownership of `i`.
    pub fn clear(&self, i: usize) {
        self.acquire_for_fill(i).clear();
    }

    pub fn clear_all(&self) {
        for i in 0..self.cells.len() {
            self.clear(i);
        }
    }
}

/// A slice handed to the renderer, carrying everything it needs to play
/// the buffer plus the callback that reports it consumed.
///
/// Owns an `Arc` to its ring (rather than borrowing) so it is `'static`
/// and can freely cross into whatever thread the renderer completes work
/// on.
pub struct SliceSubmission {
    ring: Arc<SliceBufferRing>,
    index: usize,
    pub presentation_timestamp: SampleClock,
    pub valid_frames: u32,
    completion: Option<Box<dyn FnOnce(u32) + Send>>,
}

impl SliceSubmission {
    pub(crate) fn new(
        ring: Arc<SliceBufferRing>,
        index: usize,
        presentation_timestamp: SampleClock,
        valid_frames: u32,
        completion: Box<dyn FnOnce(u32) + Send>,
    ) -> Self {
        Self {
            ring,
            index,
            presentation_timestamp,
            valid_frames,
            completion: Some(completion),
        }
    }

    /// The valid PCM bytes for this slice. Safe to call any number of
    /// times before `complete`. The renderer holds the slice until then.
    pub fn pcm_bytes(&self) -> &[u8] {
        self.ring.acquire_for_consume(self.index).valid_bytes()
    }

    /// Report that the renderer has consumed `frames_consumed` frames of
    /// this slice. Consumes `self`; a slice can only be completed once.
    pub fn complete(mut self, frames_consumed: u32) {
        if let Some(cb) = self.completion.take() {
            cb(frames_consumed);
        }
    }
}

impl Drop for SliceSubmission {
    fn drop(&mut self) {
        debug_assert!(
            self.completion.is_none(),
            "SliceSubmission dropped without calling complete(), \
             slice {} would never be released back to the producer",
            self.index
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handoff_round_trip() {
        let ring = SliceBufferRing::allocate(2, 4, 2);
        assert!(ring.is_owned_by_producer(0));

        {
            let slice = ring.acquire_for_fill(0);
            slice.buffer_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
            slice.valid_frames = 2;
        }
        ring.release_after_fill(0);
        assert!(ring.is_owned_by_renderer(0));

        let slice = ring.acquire_for_consume(0);
        assert_eq!(slice.valid_bytes(), &[1, 2, 3, 4]);

        ring.release_after_consume(0);
        assert!(ring.is_owned_by_producer(0));
    }

    #[test]
    #[should_panic]
    fn acquire_for_fill_while_renderer_owned_panics() {
        let ring = SliceBufferRing::allocate(1, 4, 2);
        ring.release_after_fill(0);
        ring.acquire_for_fill(0);
    }

    #[test]
    fn clear_resets_valid_frames() {
        let ring = SliceBufferRing::allocate(1, 4, 2);
        {
            let slice = ring.acquire_for_fill(0);
            slice.buffer_mut()[0] = 9;
            slice.valid_frames = 1;
        }
        ring.clear(0);
        let slice = ring.acquire_for_fill(0);
        assert_eq!(slice.valid_frames, 0);
        assert!(slice.buffer_mut().iter().all(|&b| b == 0));
    }

    #[test]
    fn submission_pcm_bytes_and_complete() {
        let ring = Arc::new(SliceBufferRing::allocate(1, 4, 2));
        {
            let slice = ring.acquire_for_fill(0);
            slice.buffer_mut()[..2].copy_from_slice(&[7, 8]);
            slice.valid_frames = 1;
            slice.presentation_timestamp = SampleClock(10);
        }
        ring.release_after_fill(0);

        let called = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let called2 = called.clone();
        let submission = SliceSubmission::new(
            ring.clone(),
            0,
            SampleClock(10),
            1,
            Box::new(move |frames| {
                called2.store(frames, Ordering::SeqCst);
            }),
        );
        assert_eq!(submission.pcm_bytes(), &[7, 8]);
        submission.complete(1);
        assert_eq!(called.load(Ordering::SeqCst), 1);
    }
}
