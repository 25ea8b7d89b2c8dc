//! Error taxonomy for the scheduling subsystem.
//!
//! One enum per failure domain, following the pattern in
//! `bae_core::cache::CacheError` / `bae::storage::traits::StorageError`:
//! `thiserror`-derived, `#[from]` where a lower layer's error naturally
//! becomes a variant of a higher layer's. Programming errors (the
//! `invalid-state` kind) are not represented here at all, they panic
//! at the call site instead of being returned as `Result`.

use thiserror::Error;

/// Errors raised by a decoder's `read_audio` / construction path.
#[derive(Error, Debug)]
pub enum DecoderError {
    #[error("format not recognized")]
    FormatNotRecognized,
    #[error("format not supported: {0}")]
    FormatNotSupported(String),
    #[error("decoder I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the renderer sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("renderer rejected slice: {0}")]
    SubmitFailed(String),
}

/// Errors surfaced to callers of the scheduler's public API.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("failed to attach decoder: {0}")]
    DecoderAttachFailed(#[from] DecoderError),

    #[error("renderer submit failed: {0}")]
    RendererSubmitFailed(#[from] SinkError),

    #[error("region not found")]
    RegionNotFound,
}
