//! playstream core - disk streaming and waveform peak caching for the sequencer

pub mod config;
pub mod decode;
pub mod peaks;
pub mod stream;

pub use config::StreamConfig;
pub use peaks::PeakCache;
pub use stream::{AudioSource, Frames};
