//! Chunk-file sources
//!
//! A logical sample stream lives on disk as a directory of fixed-duration
//! WAV chunks named by chunk number (`000.wav`, `001.wav`, ...). Chunk
//! boundaries are exactly `chunk_frames` apart; a missing number is one
//! chunk of silence. `ChunkDirSource` walks such a directory from a frame
//! offset, `FileSource` plays a single standalone file.

use std::path::{Path, PathBuf};

use crate::decode::{Decoder, WavDecoder};

use super::{AudioSource, Frames};

/// Chunk files are `.wav`, but not debug dumps or other junk
/// (e.g. reaper `.repeaks` files).
fn is_chunk(name: &str) -> bool {
    name.ends_with(".wav") && !name.ends_with(".debug.wav")
}

/// Chunk position encoded in the filename stem
fn chunk_number(name: &str) -> Option<usize> {
    name.strip_suffix(".wav")?.parse().ok()
}

/// List the chunks in `dir` as (number, filename), sorted by number
fn list_chunks(dir: &Path) -> Vec<(usize, String)> {
    let mut chunks = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("list_chunks: not a dir {:?}: {}", dir, e);
            return chunks;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_chunk(&name) || !entry.path().is_file() {
            continue;
        }
        match chunk_number(&name) {
            Some(number) => chunks.push((number, name)),
            None => log::warn!("{:?}: can't parse chunk number from {:?}", dir, name),
        }
    }
    chunks.sort();
    chunks
}

/// Open a chunk or sample file, checking it against the expected format
///
/// Returns the decoder and its channel count, or None if the file is
/// unreadable or mismatched, in which case it is treated as absent.
fn open_checked(
    channels: usize,
    one_channel_ok: bool,
    sample_rate: u32,
    path: &Path,
    offset: Frames,
) -> Option<(WavDecoder, usize)> {
    let decoder = match WavDecoder::open(path, offset as u64) {
        Ok(decoder) => decoder,
        Err(e) => {
            log::warn!("{}", e);
            return None;
        }
    };
    let file_channels = decoder.channels();
    if !(file_channels == channels || (one_channel_ok && file_channels == 1)) {
        log::warn!(
            "{:?}: expected {} channels, got {}",
            path, channels, file_channels
        );
        None
    } else if decoder.sample_rate() != sample_rate {
        log::warn!(
            "{:?}: expected sample rate {}, got {}",
            path, sample_rate, decoder.sample_rate()
        );
        None
    } else {
        Some((decoder, file_channels))
    }
}

/// One logical sample stream read across chunk-file boundaries
///
/// Missing or unreadable chunks play as silence for exactly their span,
/// so everything after them stays time-aligned. A chunk that ends short
/// is silence to its boundary for the same reason.
pub struct ChunkDirSource {
    channels: usize,
    sample_rate: u32,
    chunk_frames: Frames,
    dir: PathBuf,
    /// Chunk currently being produced; None once the directory is exhausted
    index: Option<usize>,
    decoder: Option<WavDecoder>,
    /// Frames until the current chunk's boundary
    frames_left: Frames,
}

impl ChunkDirSource {
    /// Open the stream in `dir` at `offset` frames from its start
    pub fn new(
        channels: usize,
        sample_rate: u32,
        chunk_frames: Frames,
        dir: &Path,
        offset: Frames,
    ) -> Self {
        debug_assert!(chunk_frames > 0);
        let index = offset / chunk_frames;
        let chunk_offset = offset % chunk_frames;
        log::info!("dir {:?}: start at chunk {} + {}", dir, index, chunk_offset);
        let mut source = Self {
            channels,
            sample_rate,
            chunk_frames,
            dir: dir.to_path_buf(),
            index: Some(index),
            decoder: None,
            frames_left: 0,
        };
        source.enter_chunk(index, chunk_offset);
        source
    }

    /// Position the cursor at `index` + `offset`: open the chunk file if it
    /// exists, schedule silence if a later chunk does, end the stream
    /// otherwise.
    fn enter_chunk(&mut self, index: usize, offset: Frames) {
        self.decoder = None;
        let chunks = list_chunks(&self.dir);
        if let Some((_, name)) = chunks.iter().find(|(number, _)| *number == index) {
            self.decoder = open_checked(
                self.channels,
                false,
                self.sample_rate,
                &self.dir.join(name),
                offset,
            )
            .map(|(decoder, _)| decoder);
            self.frames_left = self.chunk_frames - offset;
        } else if chunks.iter().any(|(number, _)| *number > index) {
            // Missing chunk with more to come: one chunk of silence.
            self.frames_left = self.chunk_frames - offset;
        } else {
            log::info!("dir {:?}: done after chunk {}", self.dir, index);
            self.index = None;
            self.frames_left = 0;
        }
    }
}

impl AudioSource for ChunkDirSource {
    fn read(&mut self, channels: usize, out: &mut [f32]) -> bool {
        debug_assert_eq!(channels, self.channels);
        let frames = out.len() / channels;
        let mut total: Frames = 0;
        while self.index.is_some() && total < frames {
            let want = frames - total;
            let offset = total * channels;
            let delta;
            match self.decoder.as_mut() {
                None => {
                    // Silent chunk, or a chunk that ended early.
                    delta = self.frames_left.min(want);
                    out[offset..offset + delta * channels].fill(0.0);
                    self.frames_left -= delta;
                }
                Some(decoder) => {
                    delta = decoder.read(&mut out[offset..offset + want * channels], want);
                    // delta could exceed frames_left if a file is longer
                    // than one chunk, which shouldn't happen; the min keeps
                    // the cursor sane if it does.
                    self.frames_left -= delta.min(self.frames_left);
                    if delta < want {
                        // Short read, this file is done.
                        self.decoder = None;
                    }
                }
            }
            if self.frames_left == 0 {
                if let Some(index) = self.index {
                    self.index = Some(index + 1);
                    self.enter_chunk(index + 1, 0);
                }
            }
            total += delta;
        }
        out[total * channels..].fill(0.0);
        total == 0
    }
}

/// A single standalone sample file
///
/// With `expand_channels`, a mono file is broadcast into every output
/// channel; this is how one-channel instrument samples play on a stereo
/// stream.
pub struct FileSource {
    expand_channels: bool,
    decoder: Option<WavDecoder>,
    file_channels: usize,
    expand_buffer: Vec<f32>,
}

impl FileSource {
    pub fn new(
        channels: usize,
        expand_channels: bool,
        sample_rate: u32,
        path: &Path,
        offset: Frames,
    ) -> Self {
        log::info!("{:?} + {}", path, offset);
        let (decoder, file_channels) =
            match open_checked(channels, expand_channels, sample_rate, path, offset) {
                Some((decoder, file_channels)) => (Some(decoder), file_channels),
                None => (None, 0),
            };
        Self {
            expand_channels,
            decoder,
            file_channels,
            expand_buffer: Vec::new(),
        }
    }
}

impl AudioSource for FileSource {
    fn read(&mut self, channels: usize, out: &mut [f32]) -> bool {
        let frames = out.len() / channels;
        let Some(decoder) = self.decoder.as_mut() else {
            out.fill(0.0);
            return true;
        };
        let read;
        if self.expand_channels && self.file_channels == 1 && channels != 1 {
            self.expand_buffer.resize(frames, 0.0);
            read = decoder.read(&mut self.expand_buffer, frames);
            for frame in 0..read {
                for channel in 0..channels {
                    out[frame * channels + channel] = self.expand_buffer[frame];
                }
            }
        } else {
            read = decoder.read(&mut out[..frames * channels], frames);
        }
        // The decoder only reads less than asked if the file ended.
        if read < frames {
            self.decoder = None;
        }
        out[read * channels..].fill(0.0);
        read == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 2;
    const CHUNK_FRAMES: Frames = 4;

    fn write_wav(path: &Path, channels: u16, samples: &[f32]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn read_all(source: &mut dyn AudioSource, channels: usize, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * channels];
        source.read(channels, &mut out);
        out
    }

    #[test]
    fn test_missing_chunk_is_silent_span() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("000.wav"), 1, &[0.1, 0.2, 0.3, 0.4]);
        write_wav(&dir.path().join("002.wav"), 1, &[0.5, 0.6, 0.7, 0.8]);

        let mut source = ChunkDirSource::new(1, SAMPLE_RATE, CHUNK_FRAMES, dir.path(), 0);
        let out = read_all(&mut source, 1, 12);
        assert_eq!(
            out,
            vec![0.1, 0.2, 0.3, 0.4, 0.0, 0.0, 0.0, 0.0, 0.5, 0.6, 0.7, 0.8]
        );

        let mut out = vec![1.0; 4];
        assert!(source.read(1, &mut out));
        assert_eq!(out, vec![0.0; 4]);
    }

    #[test]
    fn test_request_ends_inside_gap() {
        // The "3 seconds from a 2-second chunk plus a gap" scenario: the
        // tail of the request is the start of the missing chunk's silence.
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("000.wav"), 1, &[0.1, 0.2, 0.3, 0.4]);
        write_wav(&dir.path().join("002.wav"), 1, &[0.5, 0.6, 0.7, 0.8]);

        let mut source = ChunkDirSource::new(1, SAMPLE_RATE, CHUNK_FRAMES, dir.path(), 0);
        let out = read_all(&mut source, 1, 6);
        assert_eq!(out, vec![0.1, 0.2, 0.3, 0.4, 0.0, 0.0]);
    }

    #[test]
    fn test_short_final_chunk_pads_then_finishes() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("000.wav"), 1, &[0.1, 0.2]);

        let mut source = ChunkDirSource::new(1, SAMPLE_RATE, CHUNK_FRAMES, dir.path(), 0);
        let mut out = vec![1.0; 8];
        assert!(!source.read(1, &mut out));
        // 2 decoded frames, silence to the chunk boundary, zero tail.
        assert_eq!(out, vec![0.1, 0.2, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(source.read(1, &mut out));
    }

    #[test]
    fn test_start_offset_mid_chunk() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("000.wav"), 1, &[0.1, 0.2, 0.3, 0.4]);
        write_wav(&dir.path().join("001.wav"), 1, &[0.5, 0.6, 0.7, 0.8]);

        let mut source = ChunkDirSource::new(1, SAMPLE_RATE, CHUNK_FRAMES, dir.path(), 3);
        let out = read_all(&mut source, 1, 4);
        assert_eq!(out, vec![0.4, 0.5, 0.6, 0.7]);
    }

    #[test]
    fn test_start_offset_inside_gap() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("001.wav"), 1, &[0.5, 0.6, 0.7, 0.8]);

        let mut source = ChunkDirSource::new(1, SAMPLE_RATE, CHUNK_FRAMES, dir.path(), 2);
        let out = read_all(&mut source, 1, 4);
        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.6]);
    }

    #[test]
    fn test_mismatched_file_plays_as_silence() {
        let dir = tempfile::tempdir().unwrap();
        // Stereo where mono is expected: skipped, but its span is kept.
        write_wav(&dir.path().join("000.wav"), 2, &[0.9; 8]);
        write_wav(&dir.path().join("001.wav"), 1, &[0.5, 0.6, 0.7, 0.8]);

        let mut source = ChunkDirSource::new(1, SAMPLE_RATE, CHUNK_FRAMES, dir.path(), 0);
        let out = read_all(&mut source, 1, 8);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.0, 0.5, 0.6, 0.7, 0.8]);
    }

    #[test]
    fn test_debug_wav_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("000.wav"), 1, &[0.1, 0.2, 0.3, 0.4]);
        write_wav(&dir.path().join("000.debug.wav"), 1, &[0.9; 4]);

        let mut source = ChunkDirSource::new(1, SAMPLE_RATE, CHUNK_FRAMES, dir.path(), 0);
        let out = read_all(&mut source, 1, 4);
        assert_eq!(out, vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_empty_directory_is_done() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = ChunkDirSource::new(1, SAMPLE_RATE, CHUNK_FRAMES, dir.path(), 0);
        let mut out = vec![1.0; 4];
        assert!(source.read(1, &mut out));
        assert_eq!(out, vec![0.0; 4]);
    }

    #[test]
    fn test_file_source_expands_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.wav");
        write_wav(&path, 1, &[0.1, 0.2]);

        let mut source = FileSource::new(2, true, SAMPLE_RATE, &path, 0);
        let mut out = vec![1.0; 8];
        assert!(!source.read(2, &mut out));
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2, 0.0, 0.0, 0.0, 0.0]);
        assert!(source.read(2, &mut out));
    }

    #[test]
    fn test_file_source_rejects_mismatch_without_expand() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.wav");
        write_wav(&path, 1, &[0.1, 0.2]);

        let mut source = FileSource::new(2, false, SAMPLE_RATE, &path, 0);
        let mut out = vec![1.0; 4];
        assert!(source.read(2, &mut out));
        assert_eq!(out, vec![0.0; 4]);
    }

    #[test]
    fn test_file_source_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.wav");
        write_wav(&path, 1, &[0.1, 0.2, 0.3, 0.4]);

        let mut source = FileSource::new(1, false, SAMPLE_RATE, &path, 2);
        let mut out = vec![0.0; 2];
        assert!(!source.read(1, &mut out));
        assert_eq!(out, vec![0.3, 0.4]);
    }
}
