//! Ratio-curve resampling and the thru-voice mixer
//!
//! `Resample` plays an `AudioSource` through a time-varying speed curve
//! with linear interpolation. `ResampleStreamer` is one such voice behind
//! its own worker thread, and `MixStreamer` holds a fixed set of voices
//! the audio callback mixes, so note-thru can trigger samples without
//! touching the disk from the realtime thread.

use std::path::{Path, PathBuf};

use crate::config::StreamConfig;

use super::chunk::FileSource;
use super::streamer::Streamer;
use super::{AudioSource, Frames};

/// A resampling speed curve, sampled at a fixed frame interval
///
/// Breakpoint `i` takes effect at source frame `i * frames_per_ratio`;
/// between breakpoints the ratio is linearly interpolated, past the last
/// one it holds. A ratio of 2 consumes source frames twice as fast, so it
/// plays an octave up.
#[derive(Debug, Clone, PartialEq)]
pub struct RatioCurve {
    ratios: Vec<f64>,
    frames_per_ratio: usize,
}

impl RatioCurve {
    pub fn new(ratios: Vec<f64>, frames_per_ratio: usize) -> Self {
        debug_assert!(frames_per_ratio > 0);
        Self { ratios, frames_per_ratio }
    }

    /// Ratio in effect at `frame`; an empty curve means no resampling
    pub fn at(&self, frame: f64) -> f64 {
        if self.ratios.is_empty() {
            return 1.0;
        }
        let pos = frame / self.frames_per_ratio as f64;
        let i = pos as usize;
        if i + 1 < self.ratios.len() {
            let frac = pos - pos.floor();
            self.ratios[i] + frac * (self.ratios[i + 1] - self.ratios[i])
        } else {
            self.ratios[self.ratios.len() - 1]
        }
    }

    pub fn ratios(&self) -> &[f64] {
        &self.ratios
    }

    /// Sum of the breakpoints, used as a cheap content fingerprint
    pub fn sum(&self) -> f64 {
        self.ratios.iter().sum()
    }
}

/// Plays an inner source through a `RatioCurve`
///
/// Keeps a sliding window of source frames and linearly interpolates
/// between adjacent ones; the last frame is held when the cursor lands
/// past the final window frame. The curve is indexed by absolute source
/// position, counted from wherever the inner source started.
pub struct Resample {
    source: Box<dyn AudioSource>,
    channels: usize,
    curve: RatioCurve,
    /// Source frames [win_start, win_start + window.len() / channels)
    window: Vec<f32>,
    win_start: Frames,
    /// Fractional source position of the next output frame
    src_pos: f64,
    source_done: bool,
    block: Vec<f32>,
}

impl Resample {
    pub fn new(
        source: Box<dyn AudioSource>,
        channels: usize,
        curve: RatioCurve,
        block_frames: usize,
    ) -> Self {
        debug_assert!(block_frames > 0);
        Self {
            source,
            channels,
            curve,
            window: Vec::new(),
            win_start: 0,
            src_pos: 0.0,
            source_done: false,
            block: vec![0.0; block_frames * channels],
        }
    }

    fn win_frames(&self) -> Frames {
        self.window.len() / self.channels
    }

    /// Extend the window until it covers source frame `frame`, or the
    /// source runs out
    fn fill_to(&mut self, frame: Frames) {
        while !self.source_done && self.win_start + self.win_frames() <= frame {
            if self.source.read(self.channels, &mut self.block) {
                self.source_done = true;
            } else {
                self.window.extend_from_slice(&self.block);
            }
        }
    }
}

impl AudioSource for Resample {
    fn read(&mut self, channels: usize, out: &mut [f32]) -> bool {
        debug_assert_eq!(channels, self.channels);
        let frames = out.len() / channels;
        let mut written: Frames = 0;
        while written < frames {
            let i0 = self.src_pos as Frames;
            // Frames the cursor has passed are never needed again.
            if i0 > self.win_start {
                let advance = (i0 - self.win_start).min(self.win_frames());
                self.window.drain(..advance * channels);
                self.win_start += advance;
            }
            self.fill_to(i0 + 1);
            let end = self.win_start + self.win_frames();
            if i0 >= end {
                break;
            }
            let frac = (self.src_pos - i0 as f64) as f32;
            let base0 = (i0 - self.win_start) * channels;
            // Hold the last frame when its successor doesn't exist.
            let base1 = if i0 + 1 < end { base0 + channels } else { base0 };
            for channel in 0..channels {
                let s0 = self.window[base0 + channel];
                let s1 = self.window[base1 + channel];
                out[written * channels + channel] = s0 + frac * (s1 - s0);
            }
            written += 1;
            let ratio = self.curve.at(self.src_pos);
            debug_assert!(ratio > 0.0, "non-positive ratio {} at {}", ratio, self.src_pos);
            self.src_pos += if ratio > 0.0 { ratio } else { 1.0 };
        }
        out[written * channels..].fill(0.0);
        written == 0
    }
}

/// Arguments for one resampling voice
#[derive(Debug, Clone)]
enum VoiceArgs {
    Play {
        path: PathBuf,
        offset: Frames,
        ratios: Vec<f64>,
    },
    Stop,
}

/// One sample-playing voice behind a worker thread
///
/// Unsynchronized: if the worker falls behind, the voice plays late rather
/// than dropping frames, which is the right call for note-thru.
pub struct ResampleStreamer {
    inner: Streamer<VoiceArgs>,
}

impl ResampleStreamer {
    pub fn new(config: &StreamConfig, channels: usize) -> Self {
        let config = config.clone();
        let inner = Streamer::new(
            "resample",
            channels,
            config.ring_frames,
            config.max_frames,
            false,
            move |args: VoiceArgs| match args {
                VoiceArgs::Play { path, offset, ratios } => {
                    let source = FileSource::new(channels, true, config.sample_rate, &path, offset);
                    let curve = RatioCurve::new(ratios, config.frames_per_ratio);
                    Some(Box::new(Resample::new(
                        Box::new(source),
                        channels,
                        curve,
                        config.read_buffer_frames,
                    )) as Box<dyn AudioSource>)
                }
                VoiceArgs::Stop => None,
            },
        );
        Self { inner }
    }

    /// Play `path` from `offset` frames through `ratios` (realtime-safe)
    pub fn start(&mut self, path: &Path, offset: Frames, ratios: Vec<f64>) {
        self.inner.start(VoiceArgs::Play {
            path: path.to_path_buf(),
            offset,
            ratios,
        });
    }

    /// Cut the voice off (realtime-safe)
    ///
    /// Buffered audio is discarded so the voice goes quiet now, not after
    /// the ring drains. One block the worker is mid-write can still slip
    /// through before it sees the restart.
    pub fn stop(&mut self) {
        self.inner.start(VoiceArgs::Stop);
        self.inner.flush();
    }

    /// Realtime read; see [`Streamer::read`]
    pub fn read(&mut self, out: &mut [f32]) -> bool {
        self.inner.read(out)
    }
}

impl AudioSource for ResampleStreamer {
    fn read(&mut self, _channels: usize, out: &mut [f32]) -> bool {
        self.inner.read(out)
    }
}

/// A fixed bank of resampling voices mixed down to one stream
///
/// The voice count, channel layout, and scratch buffer are all fixed at
/// construction, so `read` never allocates.
pub struct MixStreamer {
    voices: Vec<ResampleStreamer>,
    volumes: Vec<f32>,
    active: Vec<bool>,
    buffer: Vec<f32>,
}

impl MixStreamer {
    pub fn new(config: &StreamConfig, channels: usize, voices: usize) -> Self {
        Self {
            voices: (0..voices)
                .map(|_| ResampleStreamer::new(config, channels))
                .collect(),
            volumes: vec![1.0; voices],
            active: vec![false; voices],
            buffer: vec![0.0; config.max_frames * channels],
        }
    }

    pub fn voices(&self) -> usize {
        self.voices.len()
    }

    /// Start `voice` playing `path` (realtime-safe)
    pub fn start(&mut self, voice: usize, path: &Path, offset: Frames, ratios: Vec<f64>, volume: f32) {
        debug_assert!(voice < self.voices.len());
        if let Some(streamer) = self.voices.get_mut(voice) {
            streamer.start(path, offset, ratios);
            self.volumes[voice] = volume;
            self.active[voice] = true;
        }
    }

    /// Cut `voice` off (realtime-safe)
    pub fn stop(&mut self, voice: usize) {
        debug_assert!(voice < self.voices.len());
        if let Some(streamer) = self.voices.get_mut(voice) {
            streamer.stop();
            self.active[voice] = false;
        }
    }

    pub fn stop_all(&mut self) {
        for voice in 0..self.voices.len() {
            self.stop(voice);
        }
    }

    /// Mix all active voices into `out`; true when every voice is done
    pub fn read(&mut self, out: &mut [f32]) -> bool {
        debug_assert!(out.len() <= self.buffer.len());
        out.fill(0.0);
        let mut done = true;
        for voice in 0..self.voices.len() {
            if !self.active[voice] {
                continue;
            }
            if self.voices[voice].read(&mut self.buffer[..out.len()]) {
                self.active[voice] = false;
                continue;
            }
            done = false;
            let volume = self.volumes[voice];
            for (o, s) in out.iter_mut().zip(&self.buffer) {
                *o += s * volume;
            }
        }
        done
    }
}
