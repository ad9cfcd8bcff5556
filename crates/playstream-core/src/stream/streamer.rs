//! Streamer: realtime/non-realtime split
//!
//! A `Streamer` is created in a non-realtime context and spawns its worker
//! thread right away. After that the public methods are realtime-safe:
//! `start` stages arguments through a wait-free queue and posts the
//! semaphore, `read` only drains the ring. Everything that can block —
//! listing directories, opening decoders, the reads themselves — happens
//! in the worker, which turns the staged arguments into an `AudioSource`
//! via the `init` closure and keeps the ring topped up.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use crate::config::StreamConfig;

use super::chunk::ChunkDirSource;
use super::ring::{sample_ring, RingControl};
use super::{AudioSource, Frames, Mix};

/// Staged start() calls waiting for the worker; it only ever acts on the
/// newest one.
const ARGS_QUEUE_CAPACITY: usize = 8;

/// Streams audio from a worker thread into a ring the realtime thread drains
///
/// `A` is whatever `start` needs to describe a stream; the worker passes
/// the latest staged value to `init` whenever the restart flag is set.
pub struct Streamer<A: Clone + Send + 'static> {
    channels: usize,
    /// Synchronized streams owe their place on the timeline: on underrun
    /// they emit silence and later skip the late frames. Unsynchronized
    /// (thru) streams just play whatever arrives.
    synchronized: bool,
    control: Arc<RingControl>,
    args_tx: rtrb::Producer<A>,
    ring_rx: rtrb::Consumer<f32>,
    worker: Option<thread::JoinHandle<()>>,
    /// Frames owed to the consumer after underruns
    debt: Frames,
}

impl<A: Clone + Send + 'static> Streamer<A> {
    /// Spawn the worker thread; `init` runs there and nowhere else
    pub fn new<F>(
        name: &'static str,
        channels: usize,
        ring_frames: usize,
        max_frames: usize,
        synchronized: bool,
        init: F,
    ) -> Self
    where
        F: FnMut(A) -> Option<Box<dyn AudioSource>> + Send + 'static,
    {
        let control = Arc::new(RingControl::new());
        let (args_tx, args_rx) = rtrb::RingBuffer::new(ARGS_QUEUE_CAPACITY);
        let (ring_tx, ring_rx) = sample_ring(ring_frames * channels);
        let worker = {
            let control = Arc::clone(&control);
            thread::Builder::new()
                .name(format!("stream-{}", name))
                .spawn(move || {
                    Worker {
                        control,
                        args_rx,
                        ring_tx,
                        init,
                        channels,
                        staged: None,
                        audio: None,
                        buffer: vec![0.0; max_frames * channels],
                    }
                    .run()
                })
                .expect("failed to spawn streaming thread")
        };
        Self {
            channels,
            synchronized,
            control,
            args_tx,
            ring_rx,
            worker: Some(worker),
            debt: 0,
        }
    }

    /// Stage new stream arguments and wake the worker (realtime-safe)
    pub fn start(&mut self, args: A) {
        self.debt = 0;
        // If the queue is somehow full the worker restarts from the newest
        // staged args it already has; there is nothing useful to do here.
        let _ = self.args_tx.push(args);
        self.restart();
    }

    /// Have the worker tear down and re-run initialize (realtime-safe)
    pub fn restart(&mut self) {
        self.control.restart.store(true, Ordering::Relaxed);
        self.control.space.post();
    }

    /// Drain up to `out.len() / channels` frames from the ring
    ///
    /// Never blocks. Frames the worker hasn't produced yet come out as
    /// silence; a synchronized stream skips them once the worker catches
    /// up so the stream stays time-aligned. Returns true only when the
    /// ring is empty and the producer has finished.
    pub fn read(&mut self, out: &mut [f32]) -> bool {
        let channels = self.channels;
        let frames = out.len() / channels;
        if self.synchronized && self.debt > 0 {
            let avail = self.ring_rx.slots() / channels;
            let skip = self.debt.min(avail);
            if skip > 0 {
                if let Ok(chunk) = self.ring_rx.read_chunk(skip * channels) {
                    chunk.commit_all();
                }
                self.debt -= skip;
                self.control.space.post();
            }
        }
        let avail = self.ring_rx.slots() / channels;
        let take = frames.min(avail);
        if take > 0 {
            if let Ok(chunk) = self.ring_rx.read_chunk(take * channels) {
                let (a, b) = chunk.as_slices();
                out[..a.len()].copy_from_slice(a);
                out[a.len()..a.len() + b.len()].copy_from_slice(b);
                chunk.commit_all();
            }
            self.control.space.post();
        }
        out[take * channels..].fill(0.0);
        if take < frames && self.synchronized && !self.control.producer_done() {
            self.debt += frames - take;
        }
        take == 0 && self.control.producer_done() && self.ring_rx.is_empty()
    }

    /// Discard everything buffered (realtime-safe)
    pub(crate) fn flush(&mut self) {
        let slots = self.ring_rx.slots();
        if slots > 0 {
            if let Ok(chunk) = self.ring_rx.read_chunk(slots) {
                chunk.commit_all();
            }
            self.control.space.post();
        }
    }

    #[cfg(test)]
    pub(crate) fn producer_finished(&self) -> bool {
        self.control.producer_done()
    }

    #[cfg(test)]
    pub(crate) fn buffered_frames(&self) -> usize {
        self.ring_rx.slots() / self.channels
    }
}

impl<A: Clone + Send + 'static> Drop for Streamer<A> {
    fn drop(&mut self) {
        self.control.quit.store(true, Ordering::Relaxed);
        self.control.space.post();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Worker-thread half of a Streamer
struct Worker<A, F> {
    control: Arc<RingControl>,
    args_rx: rtrb::Consumer<A>,
    ring_tx: rtrb::Producer<f32>,
    init: F,
    channels: usize,
    /// Newest args seen, kept so a bare restart() can re-initialize
    staged: Option<A>,
    audio: Option<Box<dyn AudioSource>>,
    buffer: Vec<f32>,
}

impl<A, F> Worker<A, F>
where
    A: Clone + Send,
    F: FnMut(A) -> Option<Box<dyn AudioSource>>,
{
    fn run(&mut self) {
        loop {
            self.control.space.wait();
            if self.control.quit() {
                break;
            }
            if self.control.restart.swap(false, Ordering::Relaxed) {
                while let Ok(args) = self.args_rx.pop() {
                    self.staged = Some(args);
                }
                self.audio = match self.staged.clone() {
                    Some(args) => (self.init)(args),
                    None => None,
                };
                self.control
                    .producer_done
                    .store(self.audio.is_none(), Ordering::Release);
            }
            self.produce();
        }
    }

    /// Pull blocks from the source while the ring has room
    fn produce(&mut self) {
        while let Some(audio) = self.audio.as_mut() {
            if self.control.quit() || self.control.restart.load(Ordering::Relaxed) {
                return;
            }
            let space = self.ring_tx.slots() / self.channels;
            if space == 0 {
                return;
            }
            let frames = space.min(self.buffer.len() / self.channels);
            let out = &mut self.buffer[..frames * self.channels];
            if audio.read(self.channels, out) {
                // Out of data: leave the ring to drain.
                self.audio = None;
                self.control.producer_done.store(true, Ordering::Release);
                return;
            }
            if let Ok(chunk) = self.ring_tx.write_chunk_uninit(out.len()) {
                chunk.fill_from_iter(out.iter().copied());
            }
        }
    }
}

/// Arguments for one TracksStreamer playback
#[derive(Debug, Clone)]
pub struct TracksArgs {
    pub dir: PathBuf,
    pub start_offset: Frames,
    /// Track directory names to skip entirely (not decoded at all)
    pub mutes: Vec<String>,
}

/// Streams a whole performance: every track directory under one root,
/// mixed additively
pub struct TracksStreamer {
    inner: Streamer<TracksArgs>,
}

impl TracksStreamer {
    pub fn new(config: &StreamConfig, channels: usize) -> Self {
        let config = config.clone();
        let inner = Streamer::new(
            "tracks",
            channels,
            config.ring_frames,
            config.max_frames,
            true,
            move |args: TracksArgs| initialize_tracks(&config, channels, &args),
        );
        Self { inner }
    }

    /// Begin streaming `dir` at `start_offset` frames (realtime-safe)
    pub fn start(&mut self, dir: &Path, start_offset: Frames, mutes: Vec<String>) {
        self.inner.start(TracksArgs {
            dir: dir.to_path_buf(),
            start_offset,
            mutes,
        });
    }

    pub fn restart(&mut self) {
        self.inner.restart();
    }

    /// Realtime read; see [`Streamer::read`]
    pub fn read(&mut self, out: &mut [f32]) -> bool {
        self.inner.read(out)
    }
}

impl AudioSource for TracksStreamer {
    fn read(&mut self, _channels: usize, out: &mut [f32]) -> bool {
        self.inner.read(out)
    }
}

/// Worker-side initialize: open one chunk reader per unmuted track
fn initialize_tracks(
    config: &StreamConfig,
    channels: usize,
    args: &TracksArgs,
) -> Option<Box<dyn AudioSource>> {
    let entries = match std::fs::read_dir(&args.dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("initialize_tracks: not a dir {:?}: {}", args.dir, e);
            return None;
        }
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    let mut tracks: Vec<Box<dyn AudioSource>> = Vec::new();
    for name in names {
        if args.mutes.contains(&name) {
            log::info!("track {:?}: muted", name);
            continue;
        }
        tracks.push(Box::new(ChunkDirSource::new(
            channels,
            config.sample_rate,
            config.chunk_frames(),
            &args.dir.join(&name),
            args.start_offset,
        )));
    }
    log::info!("dir {:?}: streaming {} tracks", args.dir, tracks.len());
    if tracks.is_empty() {
        None
    } else {
        Some(Box::new(Mix::new(tracks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::testing::SliceSource;
    use std::time::Duration;

    fn test_config() -> StreamConfig {
        StreamConfig {
            sample_rate: 2,
            chunk_seconds: 2,
            ring_frames: 64,
            max_frames: 4,
            ..StreamConfig::default()
        }
    }

    fn write_wav(path: &Path, samples: &[f32]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 2,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn wait_for<P: FnMut() -> bool>(mut ready: P) {
        for _ in 0..1000 {
            if ready() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("worker never got there");
    }

    #[test]
    fn test_tracks_streamer_mixes_tracks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("t1")).unwrap();
        std::fs::create_dir(dir.path().join("t2")).unwrap();
        write_wav(&dir.path().join("t1/000.wav"), &[0.5, 0.5, 0.5, 0.5]);
        write_wav(&dir.path().join("t2/000.wav"), &[0.25, 0.25, 0.25, 0.25]);

        let mut streamer = TracksStreamer::new(&test_config(), 1);
        streamer.start(dir.path(), 0, Vec::new());
        wait_for(|| streamer.inner.buffered_frames() >= 4);

        let mut out = vec![0.0; 4];
        assert!(!streamer.read(&mut out));
        assert_eq!(out, vec![0.75; 4]);

        wait_for(|| streamer.inner.producer_finished());
        assert!(streamer.read(&mut out));
        assert_eq!(out, vec![0.0; 4]);
    }

    #[test]
    fn test_tracks_streamer_honors_mutes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("t1")).unwrap();
        std::fs::create_dir(dir.path().join("t2")).unwrap();
        write_wav(&dir.path().join("t1/000.wav"), &[0.5, 0.5, 0.5, 0.5]);
        write_wav(&dir.path().join("t2/000.wav"), &[0.25, 0.25, 0.25, 0.25]);

        let mut streamer = TracksStreamer::new(&test_config(), 1);
        streamer.start(dir.path(), 0, vec!["t2".to_string()]);
        wait_for(|| streamer.inner.buffered_frames() >= 4);

        let mut out = vec![0.0; 4];
        assert!(!streamer.read(&mut out));
        assert_eq!(out, vec![0.5; 4]);
    }

    #[test]
    fn test_synchronized_underrun_skips_late_frames() {
        // Ring of 4 frames, source of 8: read 6 while only 4 are buffered.
        // The 2 missing frames play as silence, and when the worker catches
        // up those 2 late frames are discarded to stay time-aligned.
        let samples: Vec<f32> = (0..8).map(|i| i as f32 / 8.0).collect();
        let mut streamer = {
            let samples = samples.clone();
            Streamer::new("test", 1, 4, 4, true, move |(): ()| {
                Some(Box::new(SliceSource::new(samples.clone())) as Box<dyn AudioSource>)
            })
        };
        streamer.start(());
        wait_for(|| streamer.buffered_frames() >= 4);

        let mut out = vec![9.0; 6];
        assert!(!streamer.read(&mut out));
        let mut expected = samples[..4].to_vec();
        expected.extend_from_slice(&[0.0, 0.0]);
        assert_eq!(out, expected);

        // Worker refills with frames 4..8; frames 4 and 5 are late and get
        // skipped.
        wait_for(|| streamer.buffered_frames() >= 4);
        assert!(!streamer.read(&mut out));
        assert_eq!(&out[..2], &samples[6..8]);
        assert_eq!(&out[2..], &[0.0; 4]);

        wait_for(|| streamer.producer_finished());
        assert!(streamer.read(&mut out));
    }

    #[test]
    fn test_done_only_after_tail_drained() {
        let samples: Vec<f32> = (0..8).map(|i| (i + 1) as f32 / 8.0).collect();
        let mut streamer = {
            let samples = samples.clone();
            Streamer::new("test", 1, 16, 4, true, move |(): ()| {
                Some(Box::new(SliceSource::new(samples.clone())) as Box<dyn AudioSource>)
            })
        };
        streamer.start(());
        wait_for(|| streamer.producer_finished());

        // The producer has finished, but every frame it committed must
        // still come out before read reports done.
        let mut out = vec![0.0; 4];
        assert!(!streamer.read(&mut out));
        assert_eq!(&out[..], &samples[..4]);
        assert!(!streamer.read(&mut out));
        assert_eq!(&out[..], &samples[4..8]);
        assert!(streamer.read(&mut out));
        assert_eq!(out, vec![0.0; 4]);
    }

    #[test]
    fn test_restart_reinitializes() {
        let mut streamer = Streamer::new("test", 1, 16, 4, true, move |n: usize| {
            Some(Box::new(SliceSource::new(vec![n as f32; 4])) as Box<dyn AudioSource>)
        });
        streamer.start(1);
        wait_for(|| streamer.buffered_frames() >= 4);
        let mut out = vec![0.0; 4];
        assert!(!streamer.read(&mut out));
        assert_eq!(out, vec![1.0; 4]);

        wait_for(|| streamer.producer_finished());
        streamer.start(2);
        wait_for(|| streamer.buffered_frames() >= 4);
        assert!(!streamer.read(&mut out));
        assert_eq!(out, vec![2.0; 4]);
    }

    #[test]
    fn test_start_on_missing_dir_finishes() {
        let mut streamer = TracksStreamer::new(&test_config(), 1);
        streamer.start(Path::new("/nonexistent/performance"), 0, Vec::new());
        // The worker fails to initialize and reports done; read never blocks.
        wait_for(|| {
            let mut out = vec![0.0; 2];
            streamer.read(&mut out)
        });
    }
}
