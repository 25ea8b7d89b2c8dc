//! Wraps a raw [`Decoder`] behind a uniform `read_audio` interface backed
//! by a [`RingBuffer`] staging layer.
//!
//! Grounded in `Audio/AudioStreamDecoder.h`, which pairs a format decoder
//! with exactly this kind of `CircularBuffer`.

use tracing::{debug, trace};

use crate::decoder::{DecodeOutcome, Decoder};
use crate::error::DecoderError;
use crate::pcm::PcmFormat;
use crate::ring_buffer::RingBuffer;

/// Presents any [`Decoder`] as a uniform `read_audio(dst, frames) ->
/// (frames_produced, at_end)` source, isolating the caller from the
/// raw decoder's own read granularity via a staging ring.
pub struct PcmStagingDecoder {
    decoder: Box<dyn Decoder>,
    ring: RingBuffer,
    format: PcmFormat,
    eof: bool,
    scratch: Vec<u8>,
}

impl PcmStagingDecoder {
    /// Construct a staging decoder. `ring_capacity_bytes` should be at
    /// least one slice's worth of PCM to avoid needless refill churn.
    pub fn new(decoder: Box<dyn Decoder>, ring_capacity_bytes: usize) -> Self {
        let format = decoder.pcm_format();
        Self {
            decoder,
            ring: RingBuffer::new(ring_capacity_bytes),
            format,
            eof: false,
            scratch: Vec::new(),
        }
    }

    pub fn pcm_format(&self) -> PcmFormat {
        self.format
    }

    pub fn total_frames(&self) -> u64 {
        self.decoder.total_frames()
    }

    pub fn current_frame(&self) -> u64 {
        self.decoder.current_frame()
    }

    pub fn seek_to_frame(&mut self, frame: u64) -> Result<(), DecoderError> {
        self.decoder.seek_to_frame(frame)?;
        self.ring.reset();
        self.eof = false;
        Ok(())
    }

    /// Fill `dst` with up to `max_frames` frames. Returns
    /// `(frames_produced, at_end)`. A `frames_produced == 0` with
    /// `at_end == false` is a transient under-run; the caller should
    /// retry, not treat it as failure.
    pub fn read_audio(&mut self, dst: &mut [u8], max_frames: u32) -> (u32, bool) {
        let bytes_per_frame = self.format.bytes_per_frame() as usize;
        let needed_bytes = max_frames as usize * bytes_per_frame;

        if !self.eof && self.ring.bytes_available() < needed_bytes {
            self.refill(needed_bytes);
        }

        let available_bytes = self.ring.bytes_available().min(dst.len()).min(needed_bytes);
        let read_bytes = self.ring.get(&mut dst[..available_bytes]);
        let frames_produced = (read_bytes / bytes_per_frame.max(1)) as u32;

        let at_end = self.eof && self.ring.is_empty();
        if frames_produced == 0 {
            trace!(
                at_end,
                "staging decoder produced no frames this call"
            );
        }
        (frames_produced, at_end)
    }

    /// Pull raw frames from the underlying decoder into the staging ring
    /// until `needed_bytes` are buffered or the decoder hits EOF.
    fn refill(&mut self, needed_bytes: usize) {
        let bytes_per_frame = self.format.bytes_per_frame() as usize;
        while !self.eof && self.ring.bytes_available() < needed_bytes {
            let free = self.ring.free_space();
            if free < bytes_per_frame {
                break;
            }
            let max_frames = (free / bytes_per_frame) as u32;
            if self.scratch.len() < max_frames as usize * bytes_per_frame {
                self.scratch.resize(max_frames as usize * bytes_per_frame, 0);
            }

            match self.decoder.read_audio(&mut self.scratch, max_frames) {
                Ok(DecodeOutcome::Frames(0)) => {
                    // Transient under-run from the raw decoder, stop
                    // trying this call, the caller will retry later.
                    break;
                }
                Ok(DecodeOutcome::Frames(n)) => {
                    let bytes = n as usize * bytes_per_frame;
                    let written = self.ring.put(&self.scratch[..bytes]);
                    debug_assert_eq!(written, bytes, "staging ring rejected bytes it reported free");
                }
                Ok(DecodeOutcome::Eof) => {
                    debug!("decoder reached EOF during staging refill");
                    self.eof = true;
                }
                Err(err) => {
                    debug!(error = %err, "decoder error during staging refill, treating as EOF");
                    self.eof = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcm::PcmFormat;

    /// A decoder that yields fixed-size chunks of an in-memory byte
    /// sequence, then EOF. Used to exercise the staging/refill loop.
    struct FixtureDecoder {
        data: Vec<u8>,
        pos: usize,
        chunk_frames: u32,
        format: PcmFormat,
    }

    impl Decoder for FixtureDecoder {
        fn pcm_format(&self) -> PcmFormat {
            self.format
        }

        fn total_frames(&self) -> u64 {
            (self.data.len() / self.format.bytes_per_frame() as usize) as u64
        }

        fn current_frame(&self) -> u64 {
            (self.pos / self.format.bytes_per_frame() as usize) as u64
        }

        fn seek_to_frame(&mut self, frame: u64) -> Result<(), DecoderError> {
            self.pos = frame as usize * self.format.bytes_per_frame() as usize;
            Ok(())
        }

        fn read_audio(
            &mut self,
            dst: &mut [u8],
            max_frames: u32,
        ) -> Result<DecodeOutcome, DecoderError> {
            if self.pos >= self.data.len() {
                return Ok(DecodeOutcome::Eof);
            }
            let bpf = self.format.bytes_per_frame() as usize;
            let want_frames = max_frames.min(self.chunk_frames);
            let want_bytes = (want_frames as usize * bpf).min(self.data.len() - self.pos);
            dst[..want_bytes].copy_from_slice(&self.data[self.pos..self.pos + want_bytes]);
            self.pos += want_bytes;
            Ok(DecodeOutcome::Frames((want_bytes / bpf) as u32))
        }
    }

    fn fixture(total_frames: usize, chunk_frames: u32) -> PcmStagingDecoder {
        let format = PcmFormat::new(44_100, 1, 8, true); // 1 byte/frame for simple arithmetic
        let data: Vec<u8> = (0..total_frames).map(|i| (i % 256) as u8).collect();
        let decoder = FixtureDecoder {
            data,
            pos: 0,
            chunk_frames,
            format,
        };
        PcmStagingDecoder::new(Box::new(decoder), 64)
    }

    #[test]
    fn reads_exact_request_when_available() {
        let mut staging = fixture(100, 16);
        let mut buf = vec![0u8; 10];
        let (frames, at_end) = staging.read_audio(&mut buf, 10);
        assert_eq!(frames, 10);
        assert!(!at_end);
        assert_eq!(&buf[..10], &(0u8..10).collect::<Vec<_>>()[..]);
    }

    #[test]
    fn reports_eof_on_short_final_read() {
        let mut staging = fixture(10, 16);
        let mut buf = vec![0u8; 20];
        let (frames, at_end) = staging.read_audio(&mut buf, 20);
        assert_eq!(frames, 10);
        assert!(at_end);
        // Subsequent reads keep returning 0/at_end rather than erroring.
        let (frames2, at_end2) = staging.read_audio(&mut buf, 5);
        assert_eq!(frames2, 0);
        assert!(at_end2);
    }

    #[test]
    fn refills_across_multiple_decoder_calls() {
        // chunk_frames smaller than the slice request forces >1 refill call.
        let mut staging = fixture(50, 8);
        let mut buf = vec![0u8; 30];
        let (frames, at_end) = staging.read_audio(&mut buf, 30);
        assert_eq!(frames, 30);
        assert!(!at_end);
        assert_eq!(&buf[..30], &(0u8..30).collect::<Vec<_>>()[..]);
    }

    #[test]
    fn seek_resets_eof_and_ring() {
        let mut staging = fixture(10, 16);
        let mut buf = vec![0u8; 20];
        let (_, at_end) = staging.read_audio(&mut buf, 20);
        assert!(at_end);

        staging.seek_to_frame(0).unwrap();
        let (frames, at_end2) = staging.read_audio(&mut buf, 10);
        assert_eq!(frames, 10);
        assert!(!at_end2);
    }
}
