//! Lifecycle notifications emitted by the scheduler.
//!
//! Replaces the original Cocoa delegate (six `AudioScheduler` delegate
//! methods) with a plain enum delivered over a channel, the same shape
//! as `bae::playback::PlaybackProgress`/`subscribe_progress`. Purely
//! informational; nothing in the scheduler waits on a receiver reading
//! these.

use tokio::sync::mpsc;

use crate::region::RegionId;

/// One of the six scheduler lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    StartedScheduling,
    StoppedScheduling,
    StartedSchedulingRegion(RegionId),
    FinishedSchedulingRegion(RegionId),
    StartedRenderingRegion(RegionId),
    FinishedRenderingRegion(RegionId),
}

/// Sending half, held by the scheduler. Cloneable so both the caller
/// thread and the producer thread can emit events.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<SchedulerEvent>,
}

impl EventSender {
    /// Best-effort: if every receiver has been dropped, events are
    /// silently discarded rather than treated as an error. Observers
    /// are optional.
    pub fn emit(&self, event: SchedulerEvent) {
        let _ = self.tx.send(event);
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<SchedulerEvent>;

/// Construct a connected sender/receiver pair for a new scheduler.
pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}
