//! Scheduler and staging tunables.
//!
//! Mirrors `bae_core::cache::CacheConfig`: a plain `Default`-derived
//! value struct carrying the constants that would otherwise be magic
//! numbers scattered through the scheduler.

/// Tunables fixed for the lifetime of a [`crate::scheduler::Scheduler`].
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Number of slice buffers per region.
    pub slices_per_region: usize,
    /// Frames held by each slice buffer.
    pub frames_per_slice: u32,
    /// Extra frames beyond `total_frames` a region may still be considered
    /// "active for scheduling" for, guards against off-by-one EOF races.
    pub schedule_pad_frames: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slices_per_region: 16,
            frames_per_slice: 4096,
            schedule_pad_frames: 0,
        }
    }
}

/// Tunables for a [`crate::staging::PcmStagingDecoder`]'s internal ring.
#[derive(Debug, Clone, Copy)]
pub struct StagingConfig {
    /// Capacity, in bytes, of the staging ring buffer between the raw
    /// decoder and the slice filler.
    pub ring_capacity_bytes: usize,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            // ~4 slices worth of stereo 16-bit audio at the default slice
            // size; comfortably absorbs one decoder refill burst.
            ring_capacity_bytes: 4 * 4096 * 4,
        }
    }
}
