//! WAV decoding via hound

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use hound::{SampleFormat, WavReader};

use super::{DecodeError, Decoder};

/// Scale factors to map integer PCM to [-1, 1]
const SCALE_16: f32 = 1.0 / 32768.0;
const SCALE_24: f32 = 1.0 / 8388608.0;
const SCALE_32: f32 = 1.0 / 2147483648.0;

/// A WAV file open for streaming, positioned at some frame
pub struct WavDecoder {
    reader: WavReader<BufReader<File>>,
    path: String,
    channels: usize,
    sample_rate: u32,
    format: SampleFormat,
    scale: f32,
    /// Set once a read error has been reported, so a corrupt file logs once
    /// and then behaves like EOF.
    failed: bool,
}

impl WavDecoder {
    /// Open `path` and seek to `offset` frames
    ///
    /// An offset at or past the end of the file is not an error; the
    /// decoder just reads zero frames.
    pub fn open(path: &Path, offset: u64) -> Result<Self, DecodeError> {
        let display = path.display().to_string();
        let mut reader = WavReader::open(path).map_err(|e| DecodeError::Open {
            path: display.clone(),
            reason: e.to_string(),
        })?;
        let spec = reader.spec();
        let scale = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Float, 32) => 1.0,
            (SampleFormat::Int, 16) => SCALE_16,
            (SampleFormat::Int, 24) => SCALE_24,
            (SampleFormat::Int, 32) => SCALE_32,
            (format, bits) => {
                return Err(DecodeError::UnsupportedFormat {
                    path: display,
                    reason: format!("{:?} at {} bits", format, bits),
                })
            }
        };
        // Seeking past the end is clamped so reads just return 0 frames.
        let duration = reader.duration() as u64;
        let target = offset.min(duration);
        reader.seek(target as u32).map_err(|e| DecodeError::Seek {
            path: display.clone(),
            offset,
            reason: e.to_string(),
        })?;
        Ok(Self {
            reader,
            path: display,
            channels: spec.channels as usize,
            sample_rate: spec.sample_rate,
            format: spec.sample_format,
            scale,
            failed: false,
        })
    }
}

impl Decoder for WavDecoder {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&mut self, out: &mut [f32], frames: usize) -> usize {
        if self.failed {
            return 0;
        }
        let want = frames * self.channels;
        debug_assert!(out.len() >= want);
        let mut filled = 0;
        match self.format {
            SampleFormat::Float => {
                for sample in self.reader.samples::<f32>().take(want) {
                    match sample {
                        Ok(s) => {
                            out[filled] = s;
                            filled += 1;
                        }
                        Err(e) => {
                            log::warn!("{}: read error: {}", self.path, e);
                            self.failed = true;
                            break;
                        }
                    }
                }
            }
            SampleFormat::Int => {
                for sample in self.reader.samples::<i32>().take(want) {
                    match sample {
                        Ok(s) => {
                            out[filled] = s as f32 * self.scale;
                            filled += 1;
                        }
                        Err(e) => {
                            log::warn!("{}: read error: {}", self.path, e);
                            self.failed = true;
                            break;
                        }
                    }
                }
            }
        }
        filled / self.channels
    }
}
