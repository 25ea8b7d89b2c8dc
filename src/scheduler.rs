//! Orchestrates a FIFO sequence of [`ScheduledRegion`]s, keeping a
//! [`RendererSink`] continuously supplied with slices via a dedicated
//! producer thread.
//!
//! Grounded in `Audio/AudioScheduler.h` and its scheduling/draining
//! state machine. The producer runs on a plain `std::thread`, not a
//! tokio task; see the design notes on why this path stays off
//! async/await.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::config::{SchedulerConfig, StagingConfig};
use crate::decoder::Decoder;
use crate::error::SchedulerError;
use crate::events::{self, EventReceiver, EventSender, SchedulerEvent};
use crate::pcm::SampleClock;
use crate::region::{RegionId, ScheduledRegion, StartTime};
use crate::sink::RendererSink;
use crate::slice::SliceSubmission;
use crate::staging::PcmStagingDecoder;

/// Scheduler lifecycle state (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Scheduling,
    Draining,
}

/// A counting semaphore used to park the producer thread when there is
/// nothing to do. Grounded in `bae::playback::streaming_buffer`'s
/// `Condvar`-based blocking read.
struct WakeSignal {
    count: Mutex<u64>,
    condvar: Condvar,
}

impl WakeSignal {
    fn new() -> Self {
        Self {
            count: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    fn signal(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.condvar.notify_one();
    }

    fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.condvar.wait(count).unwrap();
        }
        *count -= 1;
    }
}

struct SchedulerState {
    regions: VecDeque<Arc<ScheduledRegion>>,
    region_being_scheduled: Option<RegionId>,
    region_being_rendered: Option<RegionId>,
    scheduled_start_time: SampleClock,
    phase: Phase,
    pending_removal: HashSet<RegionId>,
}

struct Inner {
    sink: Arc<dyn RendererSink>,
    config: SchedulerConfig,
    staging_config: StagingConfig,
    state: Mutex<SchedulerState>,
    wake: WakeSignal,
    events: EventSender,
    frames_scheduled: AtomicU64,
    frames_rendered: AtomicU64,
    next_region_id: AtomicU64,
    producer: Mutex<Option<JoinHandle<()>>>,
    producer_running: AtomicBool,
}

/// Drives a FIFO sequence of scheduled regions into a renderer sink.
///
/// Construction fixes `slices_per_region` (N) and `frames_per_slice` (F)
/// for the scheduler's lifetime (defaults: N=16, F=4096).
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(sink: Arc<dyn RendererSink>, config: SchedulerConfig) -> (Self, EventReceiver) {
        Self::with_staging_config(sink, config, StagingConfig::default())
    }

    pub fn with_staging_config(
        sink: Arc<dyn RendererSink>,
        config: SchedulerConfig,
        staging_config: StagingConfig,
    ) -> (Self, EventReceiver) {
        let (events, rx) = events::channel();
        let inner = Arc::new(Inner {
            sink,
            config,
            staging_config,
            state: Mutex::new(SchedulerState {
                regions: VecDeque::new(),
                region_being_scheduled: None,
                region_being_rendered: None,
                scheduled_start_time: SampleClock::ZERO,
                phase: Phase::Idle,
                pending_removal: HashSet::new(),
            }),
            wake: WakeSignal::new(),
            events,
            frames_scheduled: AtomicU64::new(0),
            frames_rendered: AtomicU64::new(0),
            next_region_id: AtomicU64::new(0),
            producer: Mutex::new(None),
            producer_running: AtomicBool::new(false),
        });
        (Self { inner }, rx)
    }

    /// Append a region built from `decoder` to the FIFO play order. If
    /// `start_time` is `None` the scheduler assigns it as the previous
    /// region's end timestamp (or `scheduled_start_time` if this is the
    /// first region).
    pub fn enqueue_region(
        &self,
        decoder: Box<dyn Decoder>,
        start_time: Option<SampleClock>,
    ) -> Result<RegionId, SchedulerError> {
        let format = decoder.pcm_format();
        if format.channels == 0 || format.bits_per_sample == 0 || format.sample_rate == 0 {
            return Err(SchedulerError::DecoderAttachFailed(
                crate::error::DecoderError::FormatNotSupported(
                    "zero channels, bits-per-sample, or sample rate".into(),
                ),
            ));
        }

        let staging = PcmStagingDecoder::new(decoder, self.inner.staging_config.ring_capacity_bytes);
        let id = RegionId(self.inner.next_region_id.fetch_add(1, Ordering::Relaxed));

        let mut state = self.inner.state.lock().unwrap();
        let start = match start_time {
            Some(t) => StartTime::Resolved(t),
            None => match state.regions.back() {
                None => StartTime::Resolved(state.scheduled_start_time),
                // The previous region has already stopped being scheduled;
                // its frames_scheduled is frozen, so resolve right away
                // instead of chaining onto a region that will never advance.
                Some(prev) if prev.at_end() => {
                    StartTime::Resolved(prev.start_time() + prev.frames_scheduled())
                }
                Some(prev) => StartTime::Pending(prev.id()),
            },
        };
        let region = Arc::new(ScheduledRegion::new(
            id,
            staging,
            start,
            self.inner.config.slices_per_region,
            self.inner.config.frames_per_slice,
        ));
        state.regions.push_back(region);
        drop(state);

        self.inner.wake.signal();
        Ok(id)
    }

    /// Remove a region. If it is not currently being scheduled or
    /// rendered it is dropped immediately; otherwise it is marked and
    /// removed once the producer advances past it.
    pub fn remove_region(&self, id: RegionId) -> Result<(), SchedulerError> {
        let mut state = self.inner.state.lock().unwrap();
        if state.region_being_scheduled == Some(id) || state.region_being_rendered == Some(id) {
            state.pending_removal.insert(id);
            return Ok(());
        }
        let removed = state.regions.iter().find(|r| r.id() == id).cloned();
        let before = state.regions.len();
        state.regions.retain(|r| r.id() != id);
        if state.regions.len() == before {
            return Err(SchedulerError::RegionNotFound);
        }
        if let Some(removed) = removed {
            relink_removed(&mut state, &removed);
        }
        Ok(())
    }

    /// Enter Scheduling and spawn the producer thread.
    pub fn start_scheduling(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if state.phase == Phase::Scheduling {
            return;
        }
        state.phase = Phase::Scheduling;
        drop(state);

        self.inner.producer_running.store(true, Ordering::Release);
        let inner = self.inner.clone();
        let handle = std::thread::spawn(move || producer_loop(inner));
        *self.inner.producer.lock().unwrap() = Some(handle);

        self.inner.events.emit(SchedulerEvent::StartedScheduling);
        self.inner.wake.signal();
        info!("scheduler started");
    }

    /// Enter Draining: the producer observes this and exits; outstanding
    /// renderer-owned slices still complete. Blocks until the producer
    /// thread itself has exited (not until rendering has fully drained).
    pub fn stop_scheduling(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.phase == Phase::Idle {
                return;
            }
            state.phase = Phase::Draining;
        }
        self.inner.wake.signal();

        if let Some(handle) = self.inner.producer.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.inner.producer_running.store(false, Ordering::Release);

        maybe_finish_draining(&self.inner);
    }

    /// Clear pending regions except the currently scheduling/rendering
    /// ones; zero aggregate counters; clear slice buffers of dropped
    /// regions. Idempotent.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock().unwrap();
        let keep: HashSet<RegionId> = [state.region_being_scheduled, state.region_being_rendered]
            .into_iter()
            .flatten()
            .collect();
        let dropped: Vec<_> = state
            .regions
            .iter()
            .filter(|r| !keep.contains(&r.id()))
            .cloned()
            .collect();
        state.regions.retain(|r| keep.contains(&r.id()));
        state.pending_removal.clear();
        drop(state);

        self.inner.frames_scheduled.store(0, Ordering::Relaxed);
        self.inner.frames_rendered.store(0, Ordering::Relaxed);
        for region in dropped {
            region.slices().clear_all();
        }
    }

    /// Stronger reset: drops every region, including active ones. Only
    /// safe to call once the renderer has been externally quiesced.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.regions.clear();
        state.region_being_scheduled = None;
        state.region_being_rendered = None;
        state.pending_removal.clear();
        state.phase = Phase::Idle;
        drop(state);

        self.inner.frames_scheduled.store(0, Ordering::Relaxed);
        self.inner.frames_rendered.store(0, Ordering::Relaxed);
        self.inner.sink.flush();
    }

    pub fn is_scheduling(&self) -> bool {
        self.inner.state.lock().unwrap().phase == Phase::Scheduling
    }

    pub fn is_rendering(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        state
            .regions
            .iter()
            .any(|r| (0..r.slices().len()).any(|i| r.slices().is_owned_by_renderer(i)))
    }

    pub fn frames_scheduled(&self) -> u64 {
        self.inner.frames_scheduled.load(Ordering::Acquire)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.inner.frames_rendered.load(Ordering::Acquire)
    }

    pub fn region_being_scheduled(&self) -> Option<RegionId> {
        self.inner.state.lock().unwrap().region_being_scheduled
    }

    pub fn region_being_rendered(&self) -> Option<RegionId> {
        self.inner.state.lock().unwrap().region_being_rendered
    }

    /// The renderer's sample-clock position. Only defined while
    /// Scheduling.
    pub fn current_play_time(&self) -> Option<SampleClock> {
        let state = self.inner.state.lock().unwrap();
        if state.phase == Phase::Scheduling {
            Some(self.inner.sink.current_timestamp())
        } else {
            None
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.inner.producer_running.load(Ordering::Acquire) {
            self.stop_scheduling();
        }
    }
}

/// Remove `id` from the region list once nothing still references it,
/// either because the caller asked for its removal or because it has
/// naturally run to completion.
fn try_retire_locked(state: &mut SchedulerState, id: RegionId) {
    if state.region_being_scheduled == Some(id) || state.region_being_rendered == Some(id) {
        return;
    }
    let terminal = state.regions.iter().find(|r| r.id() == id).map(|r| r.is_terminal());
    if let Some(terminal) = terminal {
        if state.pending_removal.remove(&id) || terminal {
            state.regions.retain(|r| r.id() != id);
        }
    }
}

/// `removed` never advanced past the FIFO (it was dropped before being
/// scheduled), so anyone chained onto it must be retargeted at whatever it
/// was itself chained to, skipping it in the dependency chain.
fn relink_removed(state: &mut SchedulerState, removed: &Arc<ScheduledRegion>) {
    for r in state.regions.iter() {
        if r.pending_predecessor() == Some(removed.id()) {
            match removed.pending_predecessor() {
                Some(grandparent) => r.retarget_pending(grandparent),
                None => r.resolve_start_time(removed.start_time()),
            }
        }
    }
}

/// `region` has just stopped being scheduled, naturally or by forced
/// removal, so its `frames_scheduled` is now frozen. Anything still
/// chained onto it via [`StartTime::Pending`] can have its own start
/// timestamp fixed to that actual length.
fn resolve_successor_start(state: &mut SchedulerState, region: &Arc<ScheduledRegion>) {
    let resolved = region.start_time() + region.frames_scheduled();
    for r in state.regions.iter() {
        if r.pending_predecessor() == Some(region.id()) {
            r.resolve_start_time(resolved);
        }
    }
}

fn maybe_finish_draining(inner: &Arc<Inner>) {
    let mut state = inner.state.lock().unwrap();
    if state.phase != Phase::Draining {
        return;
    }
    let producer_running = inner.producer_running.load(Ordering::Acquire);
    let rendering = state
        .regions
        .iter()
        .any(|r| (0..r.slices().len()).any(|i| r.slices().is_owned_by_renderer(i)));
    if !producer_running && !rendering {
        state.phase = Phase::Idle;
        drop(state);
        inner.events.emit(SchedulerEvent::StoppedScheduling);
        debug!("scheduler fully drained");
    }
}

fn mark_scheduling_region(inner: &Arc<Inner>, region: &Arc<ScheduledRegion>) {
    let mut state = inner.state.lock().unwrap();
    if state.region_being_scheduled != Some(region.id()) {
        state.region_being_scheduled = Some(region.id());
        drop(state);
        inner
            .events
            .emit(SchedulerEvent::StartedSchedulingRegion(region.id()));
    }
}

fn finish_scheduling_region(inner: &Arc<Inner>, region: &Arc<ScheduledRegion>) {
    let id = region.id();
    // A region stops being scheduled either because its decoder hit EOF
    // (at_end already set) or because it was removed mid-stream, force
    // it here so `is_terminal` can still fire once rendering catches up.
    region.force_at_end();
    inner.events.emit(SchedulerEvent::FinishedSchedulingRegion(id));
    let mut state = inner.state.lock().unwrap();
    if state.region_being_scheduled == Some(id) {
        state.region_being_scheduled = None;
    }
    resolve_successor_start(&mut state, region);
    try_retire_locked(&mut state, id);
}

fn handle_completion(inner: &Arc<Inner>, region: &Arc<ScheduledRegion>, index: usize, frames_consumed: u32) {
    region.on_slice_consumed(index, frames_consumed);
    inner
        .frames_rendered
        .fetch_add(frames_consumed as u64, Ordering::AcqRel);

    let id = region.id();
    let mut state = inner.state.lock().unwrap();
    let became_current = state.region_being_rendered != Some(id);
    if became_current {
        state.region_being_rendered = Some(id);
    }
    let terminal = region.is_terminal();
    if terminal && state.region_being_rendered == Some(id) {
        state.region_being_rendered = None;
    }
    try_retire_locked(&mut state, id);
    drop(state);

    if became_current {
        inner.events.emit(SchedulerEvent::StartedRenderingRegion(id));
    }
    if terminal {
        inner.events.emit(SchedulerEvent::FinishedRenderingRegion(id));
    }

    maybe_finish_draining(inner);
    inner.wake.signal();
}

fn submit_slice(inner: &Arc<Inner>, region: &Arc<ScheduledRegion>, index: usize, _frames: u32) {
    let ring = region.slices().clone();
    let (presentation_timestamp, valid_frames) = {
        let slice = ring.acquire_for_consume(index);
        (slice.presentation_timestamp, slice.valid_frames)
    };

    let inner_cloned = inner.clone();
    let region_cloned = region.clone();
    let completion: Box<dyn FnOnce(u32) + Send> = Box::new(move |frames_consumed| {
        handle_completion(&inner_cloned, &region_cloned, index, frames_consumed);
    });

    let submission = SliceSubmission::new(ring, index, presentation_timestamp, valid_frames, completion);
    if let Err(err) = inner.sink.submit(submission) {
        warn!(error = %err, "renderer submit failed, entering draining");
        let mut state = inner.state.lock().unwrap();
        state.phase = Phase::Draining;
    }
}

fn producer_loop(inner: Arc<Inner>) {
    loop {
        let (candidate, draining) = {
            let state = inner.state.lock().unwrap();
            let draining = state.phase == Phase::Draining;
            let candidate = state
                .regions
                .iter()
                .find(|r| {
                    r.is_start_resolved()
                        && !r.at_end()
                        && r.frames_scheduled() < r.total_frames() + inner.config.schedule_pad_frames
                })
                .cloned();
            (candidate, draining)
        };

        // Once draining, no new slices get scheduled, even if there is
        // still schedulable work sitting in the FIFO; only already
        // renderer-owned slices are left to complete.
        if draining {
            break;
        }

        let Some(region) = candidate else {
            inner.wake.wait();
            continue;
        };

        mark_scheduling_region(&inner, &region);

        let index = region.next_fill_index();
        if !region.is_next_slot_ready() {
            inner.wake.wait();
            continue;
        }

        let pending_remove = inner.state.lock().unwrap().pending_removal.contains(&region.id());

        let frames = region.fill_slice(index);
        inner.frames_scheduled.fetch_add(frames as u64, Ordering::AcqRel);

        if frames == 0 && region.at_end() {
            finish_scheduling_region(&inner, &region);
            continue;
        }

        region.advance_fill_index();
        submit_slice(&inner, &region, index, frames);

        if region.at_end() || pending_remove {
            finish_scheduling_region(&inner, &region);
        }
    }
}
