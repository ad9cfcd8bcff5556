//! Streaming and peak-cache configuration
//!
//! These are the tuning constants the rest of the crate consumes but never
//! computes: chunk duration, sample rates, buffer sizes. They are normally
//! loaded once at startup from a YAML file and handed to whichever
//! streamers and caches the application creates.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Engine configuration
///
/// All frame counts are in sample frames at `sample_rate` unless noted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Base sample rate of all chunk files and voices, in Hz
    pub sample_rate: u32,
    /// Duration of one on-disk sample chunk, in seconds
    pub chunk_seconds: usize,
    /// Rate of the stored waveform peaks, in peaks per second
    ///
    /// Small enough to make display fast, large enough to retain resolution
    /// in the waveform.
    pub reduced_sampling_rate: usize,
    /// Frames read from disk at once when computing peaks
    pub read_buffer_frames: usize,
    /// Spacing of ratio-curve breakpoints, in source frames
    pub frames_per_ratio: usize,
    /// Capacity of the audio ring between the worker and the callback,
    /// in frames
    pub ring_frames: usize,
    /// Largest block the worker decodes in one go, in frames
    pub max_frames: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        let sample_rate = 44100;
        Self {
            sample_rate,
            chunk_seconds: 4,
            reduced_sampling_rate: 120,
            read_buffer_frames: 256,
            frames_per_ratio: sample_rate as usize / 2,
            ring_frames: 8192,
            max_frames: 512,
        }
    }
}

impl StreamConfig {
    /// Frames covered by one chunk file
    pub fn chunk_frames(&self) -> usize {
        self.chunk_seconds * self.sample_rate as usize
    }
}

/// Load configuration from a YAML file
///
/// A missing file yields the defaults; an unparseable file logs a warning
/// and also yields the defaults, so a stale config never prevents startup.
pub fn load_config(path: &Path) -> StreamConfig {
    if !path.exists() {
        log::info!("load_config: {:?} doesn't exist, using defaults", path);
        return StreamConfig::default();
    }
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("load_config: failed to parse {:?}: {}, using defaults", path, e);
                StreamConfig::default()
            }
        },
        Err(e) => {
            log::warn!("load_config: failed to read {:?}: {}, using defaults", path, e);
            StreamConfig::default()
        }
    }
}

/// Save configuration to a YAML file, creating parent directories
pub fn save_config(config: &StreamConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write config file: {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config = load_config(Path::new("/nonexistent/path/playstream.yaml"));
        assert_eq!(config, StreamConfig::default());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playstream.yaml");

        let config = StreamConfig {
            chunk_seconds: 2,
            ring_frames: 4096,
            ..StreamConfig::default()
        };

        save_config(&config, &path).unwrap();
        let loaded = load_config(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_chunk_frames() {
        let config = StreamConfig::default();
        assert_eq!(config.chunk_frames(), 4 * 44100);
    }
}
