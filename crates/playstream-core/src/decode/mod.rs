//! Decoder capability
//!
//! The streaming and peak layers only need to open a file at a frame
//! offset and pull interleaved f32 frames out of it; everything about the
//! container lives behind this trait. `wav::WavDecoder` is the one
//! implementation shipped here.

mod wav;

pub use wav::WavDecoder;

use thiserror::Error;

/// Errors opening or reading an audio file
///
/// Callers treat any of these as "file unreadable": log and skip.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// File missing, unreadable, or not a valid container
    #[error("failed to open {path}: {reason}")]
    Open { path: String, reason: String },

    /// Seeking to the requested start offset failed
    #[error("failed to seek {path} to frame {offset}: {reason}")]
    Seek {
        path: String,
        offset: u64,
        reason: String,
    },

    /// Sample format the decoder can't convert
    #[error("{path}: unsupported sample format: {reason}")]
    UnsupportedFormat { path: String, reason: String },
}

/// A decoded audio stream, open at some position
pub trait Decoder: Send {
    /// Number of interleaved channels
    fn channels(&self) -> usize;

    /// Sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Decode up to `frames` frames into `out` (interleaved f32)
    ///
    /// Returns the number of whole frames decoded. A short read means the
    /// end of the file; a decode error mid-file is logged and also ends
    /// the stream.
    fn read(&mut self, out: &mut [f32], frames: usize) -> usize;
}
