//! Realtime disk streaming
//!
//! A `Streamer` owns one background thread that decodes audio from disk
//! into a wait-free ring; the audio callback drains the ring through
//! `read` without ever allocating, locking, or touching the filesystem.
//! `chunk` supplies the sources that cross chunk-file boundaries,
//! `resample` the ratio-curve voices and the multi-voice mixer.

pub mod chunk;
pub mod resample;
pub mod ring;
pub mod streamer;

pub use chunk::{ChunkDirSource, FileSource};
pub use resample::{MixStreamer, RatioCurve, ResampleStreamer};
pub use streamer::{Streamer, TracksStreamer};

/// A count or offset in sample frames
pub type Frames = usize;

/// A pull-based producer of interleaved audio
///
/// `read` always fills `out` completely, zero-padding past the end of the
/// data, and reports done only on a call that produced nothing. That
/// convention lets callers mix sources without tracking partial lengths;
/// it matches the chunk readers, which substitute silence for missing data
/// anyway.
pub trait AudioSource: Send {
    /// Fill `out` with `out.len() / channels` interleaved frames
    ///
    /// Returns true when the source is exhausted and wrote no audio.
    fn read(&mut self, channels: usize, out: &mut [f32]) -> bool;
}

/// Additive merge of several sources
///
/// Used by `TracksStreamer` to combine the per-track chunk readers at
/// initialize time. Summation order is irrelevant; done once every input
/// is done.
pub struct Mix {
    sources: Vec<Box<dyn AudioSource>>,
    buffer: Vec<f32>,
}

impl Mix {
    pub fn new(sources: Vec<Box<dyn AudioSource>>) -> Self {
        Self { sources, buffer: Vec::new() }
    }
}

impl AudioSource for Mix {
    fn read(&mut self, channels: usize, out: &mut [f32]) -> bool {
        out.fill(0.0);
        self.buffer.resize(out.len(), 0.0);
        let mut done = true;
        for source in &mut self.sources {
            if !source.read(channels, &mut self.buffer) {
                done = false;
                for (o, s) in out.iter_mut().zip(&self.buffer) {
                    *o += s;
                }
            }
        }
        done
    }
}


#[cfg(test)]
mod tests {
    use super::testing::SliceSource;
    use super::*;

    #[test]
    fn test_mix_sums_and_finishes() {
        let a = Box::new(SliceSource::new(vec![1.0, 2.0, 3.0, 4.0]));
        let b = Box::new(SliceSource::new(vec![0.5, 0.5]));
        let mut mix = Mix::new(vec![a, b]);

        let mut out = vec![0.0; 4];
        assert!(!mix.read(1, &mut out));
        assert_eq!(out, vec![1.5, 2.5, 3.0, 4.0]);

        // Both inputs exhausted, nothing written: done.
        assert!(mix.read(1, &mut out));
        assert_eq!(out, vec![0.0; 4]);
    }

    #[test]
    fn test_mix_of_nothing_is_done() {
        let mut mix = Mix::new(Vec::new());
        let mut out = vec![0.0; 2];
        assert!(mix.read(1, &mut out));
    }
}
