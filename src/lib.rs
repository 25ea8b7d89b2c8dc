//! Sample-accurate PCM slice scheduling for real-time playback.
//!
//! Pipeline: a raw [`decoder::Decoder`] is staged through a
//! [`ring_buffer::RingBuffer`] into fixed-size [`slice::Slice`] buffers
//! by [`staging::PcmStagingDecoder`]; a [`region::ScheduledRegion`] binds
//! one decoder/ring pair together with its play-cursor bookkeeping; a
//! [`scheduler::Scheduler`] orchestrates an ordered FIFO of regions on a
//! dedicated producer thread, delivering slices to a
//! [`sink::RendererSink`] and reporting lifecycle events.

pub mod config;
pub mod decoder;
pub mod error;
pub mod events;
pub mod pcm;
pub mod region;
pub mod ring_buffer;
pub mod scheduler;
pub mod sink;
pub mod slice;
pub mod staging;

pub use config::{SchedulerConfig, StagingConfig};
pub use decoder::{DecodeOutcome, Decoder};
pub use error::{DecoderError, SchedulerError, SinkError};
pub use events::{EventReceiver, SchedulerEvent};
pub use pcm::{PcmFormat, SampleClock};
pub use region::{RegionId, ScheduledRegion};
pub use ring_buffer::RingBuffer;
pub use scheduler::Scheduler;
pub use sink::RendererSink;
pub use slice::{Slice, SliceBufferRing, SliceSubmission};
pub use staging::PcmStagingDecoder;
