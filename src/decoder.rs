//! The decoder contract consumed by [`crate::staging::PcmStagingDecoder`].
//!
//! Format parsing and metadata are out of scope for this crate; any
//! component satisfying this trait (FLAC, MP3, CUE-sheet splitting,
//! whatever `bae`'s own decoders implement) can be scheduled.

use crate::error::DecoderError;
use crate::pcm::PcmFormat;

/// Outcome of a single call into a raw decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// `n` frames were written to the destination buffer.
    Frames(u32),
    /// The decoder has no more frames to produce.
    Eof,
}

/// A source of raw, already-PCM-formatted audio frames.
///
/// Implementations must not assume they are called from any particular
/// thread, but the scheduler only ever calls into a given decoder from
/// its producer thread, never concurrently.
pub trait Decoder: Send {
    /// Fixed PCM format of the frames this decoder produces.
    fn pcm_format(&self) -> PcmFormat;

    /// Total frame count, if known in advance.
    fn total_frames(&self) -> u64;

    /// Frame index of the next frame this decoder will produce.
    fn current_frame(&self) -> u64;

    /// Seek to an absolute frame index.
    fn seek_to_frame(&mut self, frame: u64) -> Result<(), DecoderError>;

    /// Fill `dst` with up to `max_frames` frames of interleaved PCM.
    ///
    /// `dst` is guaranteed to be at least `max_frames * bytes_per_frame`
    /// bytes long. Returns [`DecodeOutcome::Frames`] with the number of
    /// frames actually written (which may be less than `max_frames` on a
    /// short read that is not EOF), or [`DecodeOutcome::Eof`] once there
    /// is nothing left to produce.
    fn read_audio(
        &mut self,
        dst: &mut [u8],
        max_frames: u32,
    ) -> Result<DecodeOutcome, DecoderError>;
}
