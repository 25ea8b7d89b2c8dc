//! The renderer sink contract consumed by [`crate::scheduler::Scheduler`].
//!
//! The device/hardware path (e.g. `bae`'s `cpal`-based output) is out of
//! scope here; the scheduler only needs something that accepts slices,
//! reports a sample clock, and can be flushed.

use crate::error::SinkError;
use crate::pcm::SampleClock;
use crate::slice::SliceSubmission;

/// External real-time audio consumer.
///
/// `submit` must return quickly: it hands the slice to whatever device
/// queue is doing the actual playback and returns; the eventual
/// completion is reported later through the callback carried inside
/// `submission`, not through this call's return value.
pub trait RendererSink: Send + Sync {
    /// Accept a slice for playback. The sink must invoke
    /// `submission.completion` exactly once, from any thread, once the
    /// slice has been fully consumed (never from inside this call).
    fn submit(&self, submission: SliceSubmission) -> Result<(), SinkError>;

    /// The renderer's current sample-clock position.
    fn current_timestamp(&self) -> SampleClock;

    /// Discard any slices the sink is holding. Only called by
    /// [`crate::scheduler::Scheduler::clear`], after the caller has
    /// externally quiesced the renderer.
    fn flush(&self);
}
