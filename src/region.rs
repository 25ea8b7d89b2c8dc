//! Binds one decoder to one [`SliceBufferRing`], tracking the
//! scheduled/rendered frame counters that make it an authoritative
//! play-cursor.
//!
//! Grounded in `Audio/ScheduledAudioRegion.h`: `framesScheduled`/
//! `framesRendered`/`atEnd`/`startTime`, `readAudioInSlice:`,
//! `scheduledAdditionalFrames:`/`renderedAdditionalFrames:`.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::pcm::{PcmFormat, SampleClock};
use crate::slice::SliceBufferRing;
use crate::staging::PcmStagingDecoder;

/// Identifies a region across its lifetime in a scheduler's region list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub u64);

/// A region's start timestamp, either fixed up front or chained onto
/// whatever another region's *actual* end turns out to be.
///
/// An unset `start_time` at `enqueue_region` time cannot be resolved to a
/// concrete value immediately: "end-timestamp of the previous region"
/// means that region's actual scheduled length, which is only known
/// once that region stops being scheduled (naturally at EOF, or forced
/// by removal), not its declared `total_frames` at enqueue time.
#[derive(Debug, Clone, Copy)]
pub(crate) enum StartTime {
    Resolved(SampleClock),
    Pending(RegionId),
}

/// A contiguous audio source (one decoder) with its own slice ring and
/// start timestamp.
pub struct ScheduledRegion {
    id: RegionId,
    decoder: Mutex<PcmStagingDecoder>,
    slices: Arc<SliceBufferRing>,
    start: Mutex<StartTime>,
    frames_scheduled: AtomicU64,
    frames_rendered: AtomicU64,
    at_end: AtomicBool,
    total_frames: u64,
    format: PcmFormat,
    /// Index of the next slice the producer should fill, cycling over
    /// `0..slices.len()`. Slices within a region are always filled in
    /// ascending order, so a single cursor suffices.
    next_fill_index: AtomicUsize,
}

impl ScheduledRegion {
    pub(crate) fn new(
        id: RegionId,
        decoder: PcmStagingDecoder,
        start: StartTime,
        slices_per_region: usize,
        frames_per_slice: u32,
    ) -> Self {
        let format = decoder.pcm_format();
        let total_frames = decoder.total_frames();
        let slices = SliceBufferRing::allocate(
            slices_per_region,
            frames_per_slice,
            format.bytes_per_frame(),
        );
        Self {
            id,
            decoder: Mutex::new(decoder),
            slices: Arc::new(slices),
            start: Mutex::new(start),
            frames_scheduled: AtomicU64::new(0),
            frames_rendered: AtomicU64::new(0),
            at_end: AtomicBool::new(false),
            total_frames,
            format,
            next_fill_index: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> RegionId {
        self.id
    }

    /// The region's start timestamp. Panics if it is still waiting on a
    /// predecessor to terminate; callers must check [`Self::is_start_resolved`]
    /// first (the producer loop's candidate selection already does).
    pub fn start_time(&self) -> SampleClock {
        match *self.start.lock().unwrap() {
            StartTime::Resolved(t) => t,
            StartTime::Pending(_) => panic!("invalid-state: start_time read before resolution"),
        }
    }

    /// Whether this region's start timestamp is known yet.
    pub fn is_start_resolved(&self) -> bool {
        matches!(*self.start.lock().unwrap(), StartTime::Resolved(_))
    }

    /// The region this one is waiting on to resolve its own start, if any.
    pub(crate) fn pending_predecessor(&self) -> Option<RegionId> {
        match *self.start.lock().unwrap() {
            StartTime::Pending(id) => Some(id),
            StartTime::Resolved(_) => None,
        }
    }

    /// Fix this region's start timestamp to `value`. Only valid once, while
    /// still `Pending`.
    pub(crate) fn resolve_start_time(&self, value: SampleClock) {
        let mut start = self.start.lock().unwrap();
        debug_assert!(
            matches!(*start, StartTime::Pending(_)),
            "start_time resolved twice"
        );
        *start = StartTime::Resolved(value);
    }

    /// Re-point a still-pending region at a different predecessor. Used
    /// when the predecessor it was waiting on is itself removed before ever
    /// being scheduled.
    pub(crate) fn retarget_pending(&self, new_predecessor: RegionId) {
        let mut start = self.start.lock().unwrap();
        debug_assert!(
            matches!(*start, StartTime::Pending(_)),
            "retargeted a region whose start is already resolved"
        );
        *start = StartTime::Pending(new_predecessor);
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn pcm_format(&self) -> PcmFormat {
        self.format
    }

    pub fn slices(&self) -> &Arc<SliceBufferRing> {
        &self.slices
    }

    pub fn frames_scheduled(&self) -> u64 {
        self.frames_scheduled.load(Ordering::Acquire)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Acquire)
    }

    pub fn at_end(&self) -> bool {
        self.at_end.load(Ordering::Acquire)
    }

    /// `at_end` is true and every scheduled frame has been confirmed
    /// rendered; the region can be dropped safely.
    pub fn is_terminal(&self) -> bool {
        self.at_end() && self.frames_rendered() >= self.frames_scheduled()
    }

    /// The timestamp the *next* slice filled from this region will carry.
    pub fn next_presentation_timestamp(&self) -> SampleClock {
        self.start_time() + self.frames_scheduled()
    }

    /// The slice index the producer should fill next.
    pub fn next_fill_index(&self) -> usize {
        self.next_fill_index.load(Ordering::Acquire)
    }

    /// Whether the next-in-line slice is currently producer-owned (i.e.
    /// the renderer has returned it and a fill can proceed).
    pub fn is_next_slot_ready(&self) -> bool {
        self.slices.is_owned_by_producer(self.next_fill_index())
    }

    /// Advance the fill cursor after a successful `fill_slice` call.
    pub fn advance_fill_index(&self) {
        let n = self.slices.len();
        let next = (self.next_fill_index() + 1) % n;
        self.next_fill_index.store(next, Ordering::Release);
    }

    /// Producer-side: fill slice `i`, acquiring and releasing it in the
    /// process. Returns the number of frames written. A return of 0 with
    /// [`ScheduledRegion::at_end`] now true means the decoder is
    /// exhausted; a return of 0 otherwise is a transient under-run.
    pub fn fill_slice(&self, i: usize) -> u32 {
        let timestamp = self.next_presentation_timestamp();
        let frames_per_slice = self.slices.frames_per_slice();

        let (frames, eof) = {
            let mut decoder = self.decoder.lock().unwrap();
            let slice = self.slices.acquire_for_fill(i);
            let (frames, eof) = decoder.read_audio(slice.buffer_mut(), frames_per_slice);
            slice.valid_frames = frames;
            slice.presentation_timestamp = timestamp;
            (frames, eof)
        };
        self.slices.release_after_fill(i);

        if eof {
            if !self.at_end.swap(true, Ordering::AcqRel) {
                debug!(region = self.id.0, "region reached end of stream");
            }
        }
        if frames > 0 {
            self.frames_scheduled.fetch_add(frames as u64, Ordering::AcqRel);
        }
        frames
    }

    /// Renderer-completion-side: record `frames` as rendered and hand
    /// slice `i` back to the producer.
    pub fn on_slice_consumed(&self, i: usize, frames: u32) {
        self.frames_rendered.fetch_add(frames as u64, Ordering::AcqRel);
        self.slices.release_after_consume(i);
    }

    /// Force `at_end` regardless of decoder state. Used when a region is
    /// removed mid-schedule, so it can still become terminal (and release
    /// `region_being_rendered`) once its already-scheduled slices finish
    /// rendering, instead of waiting on an EOF that will never come.
    pub fn force_at_end(&self) {
        if !self.at_end.swap(true, Ordering::AcqRel) {
            debug!(region = self.id.0, "region forcibly marked at-end (removed mid-schedule)");
        }
    }

    pub fn reset_counters(&self) {
        self.frames_scheduled.store(0, Ordering::Release);
        self.frames_rendered.store(0, Ordering::Release);
        self.at_end.store(false, Ordering::Release);
        self.next_fill_index.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{DecodeOutcome, Decoder};
    use crate::error::DecoderError;

    struct SilentDecoder {
        total: u64,
        pos: u64,
        format: PcmFormat,
    }

    impl Decoder for SilentDecoder {
        fn pcm_format(&self) -> PcmFormat {
            self.format
        }
        fn total_frames(&self) -> u64 {
            self.total
        }
        fn current_frame(&self) -> u64 {
            self.pos
        }
        fn seek_to_frame(&mut self, frame: u64) -> Result<(), DecoderError> {
            self.pos = frame;
            Ok(())
        }
        fn read_audio(
            &mut self,
            dst: &mut [u8],
            max_frames: u32,
        ) -> Result<DecodeOutcome, DecoderError> {
            if self.pos >= self.total {
                return Ok(DecodeOutcome::Eof);
            }
            let remaining = self.total - self.pos;
            let n = (max_frames as u64).min(remaining) as u32;
            let bpf = self.format.bytes_per_frame() as usize;
            dst[..n as usize * bpf].fill(0);
            self.pos += n as u64;
            Ok(DecodeOutcome::Frames(n))
        }
    }

    fn region(total_frames: u64, frames_per_slice: u32, slices: usize) -> ScheduledRegion {
        let format = PcmFormat::new(44_100, 2, 16, true);
        let decoder = SilentDecoder {
            total: total_frames,
            pos: 0,
            format,
        };
        let staging = PcmStagingDecoder::new(Box::new(decoder), 16 * 1024);
        ScheduledRegion::new(
            RegionId(1),
            staging,
            StartTime::Resolved(SampleClock::ZERO),
            slices,
            frames_per_slice,
        )
    }

    #[test]
    fn fill_slice_advances_timestamps_and_counters() {
        let r = region(2048, 1024, 4);
        let written0 = r.fill_slice(0);
        assert_eq!(written0, 1024);
        assert_eq!(r.frames_scheduled(), 1024);

        let slice0_ts = r.slices().acquire_for_consume(0).presentation_timestamp;
        assert_eq!(slice0_ts, SampleClock::ZERO);
        r.slices().release_after_consume(0);

        let written1 = r.fill_slice(1);
        assert_eq!(written1, 1024);
        let slice1_ts = r.slices().acquire_for_consume(1).presentation_timestamp;
        assert_eq!(slice1_ts, SampleClock(1024));
    }

    #[test]
    fn fill_slice_sets_at_end_on_eof() {
        let r = region(512, 1024, 4);
        let written = r.fill_slice(0);
        assert_eq!(written, 512);
        assert!(r.at_end());
        assert!(!r.is_terminal(), "rendered hasn't caught up yet");

        r.on_slice_consumed(0, 512);
        assert!(r.is_terminal());
    }

    #[test]
    fn reset_counters_is_idempotent() {
        let r = region(1024, 1024, 2);
        r.fill_slice(0);
        r.reset_counters();
        r.reset_counters();
        assert_eq!(r.frames_scheduled(), 0);
        assert_eq!(r.frames_rendered(), 0);
        assert!(!r.at_end());
    }
}
