//! Waveform peak cache
//!
//! The UI draws waveforms from per-period maxima ("peaks") rather than raw
//! samples. Peaks are extracted once per sample file, at
//! `reduced_sampling_rate` peaks per second of track time, with the period
//! width following the same ratio curve the file will be resampled with so
//! the waveform lines up with the notes. Extraction is slow enough to be
//! worth persisting: each file gets a `<name>.peaks` sidecar, keyed by a
//! checksum of the ratios so a re-render with new ratios recomputes.
//!
//! In-memory sharing uses `Weak` refs plus a root list: `load` hands out
//! `Arc<Entry>`s and keeps each entry alive until the next `gc`, which
//! drops the roots and keeps only entries still referenced from outside.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use crate::config::StreamConfig;
use crate::decode::{Decoder, WavDecoder};
use crate::stream::RatioCurve;

/// Identity of one file's peaks
///
/// `start` is where the sample begins in track time, and `ratios` is the
/// resample curve it was rendered with; either changing means different
/// peaks. Ordered so it can key a BTreeMap; f64s compare via `total_cmp`.
#[derive(Debug, Clone)]
pub struct Params {
    pub path: PathBuf,
    pub start: f64,
    pub ratios: Vec<f64>,
}

impl Ord for Params {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path
            .cmp(&other.path)
            .then(self.start.total_cmp(&other.start))
            .then_with(|| cmp_f64s(&self.ratios, &other.ratios))
    }
}

impl PartialOrd for Params {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Params {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Params {}

fn cmp_f64s(xs: &[f64], ys: &[f64]) -> Ordering {
    for (x, y) in xs.iter().zip(ys) {
        match x.total_cmp(y) {
            Ordering::Equal => continue,
            ord => return ord,
        }
    }
    xs.len().cmp(&ys.len())
}

/// Peaks for one sample file, immutable once loaded
#[derive(Debug)]
pub struct Entry {
    pub start: f64,
    pub peaks: Vec<f32>,
}

/// Caches peaks per (file, start, ratios)
///
/// Single-threaded by contract; wrap it in the [`global`](PeakCache::global)
/// mutex to share it.
pub struct PeakCache {
    config: StreamConfig,
    cache: BTreeMap<Params, Weak<Entry>>,
    /// Strong refs to everything loaded since the last gc
    gc_roots: Vec<Arc<Entry>>,
}

impl PeakCache {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            cache: BTreeMap::new(),
            gc_roots: Vec::new(),
        }
    }

    /// Process-wide instance, on the default config
    pub fn global() -> &'static Mutex<PeakCache> {
        static CACHE: OnceLock<Mutex<PeakCache>> = OnceLock::new();
        CACHE.get_or_init(|| Mutex::new(PeakCache::new(StreamConfig::default())))
    }

    /// How many pixels each peak covers at this zoom
    ///
    /// Above `reduced_sampling_rate` pixels per unit of track time the
    /// stored peaks are too coarse and one peak spans several pixels;
    /// below it, `MixedEntry::at_zoom` reduces to one peak per pixel.
    pub fn pixels_per_peak(&self, zoom_factor: f64) -> f64 {
        let period = self.config.reduced_sampling_rate as f64 / zoom_factor;
        if period <= 1.0 {
            1.0 / period
        } else {
            1.0
        }
    }

    /// Get the peaks for `params`, loading them if no live entry exists
    ///
    /// The entry stays alive at least until the next [`gc`](Self::gc).
    pub fn load(&mut self, params: &Params) -> Arc<Entry> {
        if let Some(entry) = self.cache.get(params).and_then(Weak::upgrade) {
            return entry;
        }
        let curve = RatioCurve::new(params.ratios.clone(), self.config.frames_per_ratio);
        let peaks = cached_load(&self.config, &params.path, &curve);
        let entry = Arc::new(Entry {
            start: params.start,
            peaks,
        });
        self.gc_roots.push(Arc::clone(&entry));
        self.cache.insert(params.clone(), Arc::downgrade(&entry));
        entry
    }

    /// Drop the roots; keep only entries the caller still holds
    pub fn gc(&mut self) {
        let gc_roots = &mut self.gc_roots;
        gc_roots.clear();
        self.cache.retain(|_, weak| match weak.upgrade() {
            Some(entry) => {
                gc_roots.push(entry);
                true
            }
            None => false,
        });
    }
}

/// Several files' peaks mixed for display as one track
///
/// All constituents must share a start. While there is a single source
/// the entry just shares its peaks vector; a second `add` switches to an
/// owned element-wise sum, zero-extending to the longest constituent.
pub struct MixedEntry {
    pub start: f64,
    reduced_sampling_rate: usize,
    peaks_one: Option<Arc<Entry>>,
    peaks_sum: Vec<f32>,
    sources: Vec<Arc<Entry>>,
    max_peak: f32,
    cached_zoom: f64,
    zoom_cache: Option<Arc<Vec<f32>>>,
}

impl MixedEntry {
    pub fn new(start: f64, reduced_sampling_rate: usize) -> Self {
        Self {
            start,
            reduced_sampling_rate,
            peaks_one: None,
            peaks_sum: Vec::new(),
            sources: Vec::new(),
            max_peak: 0.0,
            cached_zoom: 0.0,
            zoom_cache: None,
        }
    }

    pub fn add(&mut self, entry: Arc<Entry>) {
        debug_assert_eq!(self.start, entry.start);
        if self.peaks_sum.is_empty() {
            match self.peaks_one.take() {
                None => self.peaks_one = Some(Arc::clone(&entry)),
                Some(one) => {
                    self.peaks_sum = one.peaks.clone();
                    sum_into(&mut self.peaks_sum, &entry.peaks);
                }
            }
        } else {
            sum_into(&mut self.peaks_sum, &entry.peaks);
        }
        self.sources.push(entry);
        self.max_peak = self.peaks().iter().fold(0.0, |max, &p| max.max(p));
        self.zoom_cache = None;
    }

    pub fn peaks(&self) -> &[f32] {
        match &self.peaks_one {
            Some(one) => &one.peaks,
            None => &self.peaks_sum,
        }
    }

    pub fn max_peak(&self) -> f32 {
        self.max_peak
    }

    /// Peaks downsampled for a zoom factor, memoized per zoom
    pub fn at_zoom(&mut self, zoom_factor: f64) -> Arc<Vec<f32>> {
        if let Some(cache) = &self.zoom_cache {
            if self.cached_zoom == zoom_factor {
                return Arc::clone(cache);
            }
        }
        let reduced = Arc::new(reduce_zoom(
            self.peaks(),
            self.reduced_sampling_rate,
            zoom_factor,
        ));
        self.cached_zoom = zoom_factor;
        self.zoom_cache = Some(Arc::clone(&reduced));
        reduced
    }
}

fn sum_into(out: &mut Vec<f32>, peaks: &[f32]) {
    // The vectors can have different lengths if one ran out of samples.
    if peaks.len() > out.len() {
        out.resize(peaks.len(), 0.0);
    }
    for (o, p) in out.iter_mut().zip(peaks) {
        *o += p;
    }
}

/// Max of each `reduced_sampling_rate / zoom_factor` sized bucket
///
/// `zoom_factor` is pixels per unit of track time, so it is the desired
/// output sampling rate; at or above the stored rate the peaks pass
/// through unchanged.
fn reduce_zoom(peaks: &[f32], reduced_sampling_rate: usize, zoom_factor: f64) -> Vec<f32> {
    let period = reduced_sampling_rate as f64 / zoom_factor;
    if period <= 1.0 {
        return peaks.to_vec();
    }
    let mut out = Vec::with_capacity((peaks.len() as f64 / period).ceil() as usize);
    let mut left = period;
    let mut accum: f32 = 0.0;
    for &peak in peaks {
        if left < 1.0 {
            out.push(accum);
            accum = peak;
            left += period;
        }
        accum = accum.max(peak);
        left -= 1.0;
    }
    if !peaks.is_empty() {
        out.push(accum);
    }
    out
}

fn peaks_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".peaks");
    PathBuf::from(name)
}

/// Read peaks from the sidecar, or extract and persist them
fn cached_load(config: &StreamConfig, path: &Path, curve: &RatioCurve) -> Vec<f32> {
    let cache_path = peaks_path(path);
    let ratios_sum = curve.sum();
    if let Some(peaks) = read_cache(&cache_path, ratios_sum) {
        return peaks;
    }
    let peaks = extract_peaks(config, path, curve);
    write_cache(&cache_path, &peaks, ratios_sum);
    peaks
}

/// Sidecar format: 8-byte LE f64 sum of the ratios, then packed LE f32s.
/// A sum mismatch means the ratios changed and the file is stale.
fn read_cache(path: &Path, ratios_sum: f64) -> Option<Vec<f32>> {
    let bytes = std::fs::read(path).ok()?;
    if bytes.len() < 8 || (bytes.len() - 8) % 4 != 0 {
        log::warn!("{:?}: truncated peaks file, ignoring", path);
        return None;
    }
    let mut sum = [0; 8];
    sum.copy_from_slice(&bytes[..8]);
    if f64::from_le_bytes(sum) != ratios_sum {
        return None;
    }
    let mut peaks = Vec::with_capacity((bytes.len() - 8) / 4);
    for chunk in bytes[8..].chunks_exact(4) {
        let mut sample = [0; 4];
        sample.copy_from_slice(chunk);
        peaks.push(f32::from_le_bytes(sample));
    }
    Some(peaks)
}

fn write_cache(path: &Path, peaks: &[f32], ratios_sum: f64) {
    let mut bytes = Vec::with_capacity(8 + peaks.len() * 4);
    bytes.extend_from_slice(&ratios_sum.to_le_bytes());
    for peak in peaks {
        bytes.extend_from_slice(&peak.to_le_bytes());
    }
    if let Err(e) = std::fs::write(path, bytes) {
        log::warn!("writing {:?}: {}", path, e);
        // Don't leave a partial file behind to be mistaken for a cache.
        let _ = std::fs::remove_file(path);
    }
}

/// Max |sample| across channels per period, period width following the
/// ratio curve
///
/// A ratio of 2 consumes source frames twice as fast, so its periods are
/// twice as wide and the waveform is displayed compressed, matching what
/// resampled playback will sound like. Unreadable or mismatched files
/// yield no peaks.
fn extract_peaks(config: &StreamConfig, path: &Path, curve: &RatioCurve) -> Vec<f32> {
    let mut peaks = Vec::new();
    let mut decoder = match WavDecoder::open(path, 0) {
        Ok(decoder) => decoder,
        Err(e) => {
            log::warn!("{}", e);
            return peaks;
        }
    };
    if decoder.sample_rate() != config.sample_rate {
        log::warn!(
            "{:?}: expected sample rate {}, got {}",
            path, config.sample_rate, decoder.sample_rate()
        );
        return peaks;
    }
    let channels = decoder.channels();
    let mut buffer = vec![0.0; config.read_buffer_frames * channels];
    // Source frames per peak, before the ratio curve stretches it.
    let srate = config.sample_rate as f64 / config.reduced_sampling_rate as f64;
    let mut frame: usize = 0;
    let mut frames_left: usize = 0;
    let mut period = srate * curve.at(0.0);
    let mut index = 0;
    let mut accum: f32 = 0.0;
    loop {
        if period <= 0.0 {
            // A zero or negative ratio would never consume another frame;
            // stop with the peaks extracted so far.
            log::warn!(
                "{:?}: non-positive peak period {} at frame {}, stopping",
                path, period, frame
            );
            break;
        }
        if frames_left == 0 {
            frames_left = decoder.read(&mut buffer, config.read_buffer_frames);
            if frames_left == 0 {
                break;
            }
            index = 0;
        }
        let consume = period.min(frames_left as f64).floor() as usize;
        let end = index + consume * channels;
        for &sample in &buffer[index..end] {
            accum = accum.max(sample.abs());
        }
        index = end;
        frames_left -= consume;
        period -= consume as f64;
        frame += consume;
        if period < 1.0 {
            peaks.push(accum);
            accum = 0.0;
            period += srate * curve.at(frame as f64);
        }
    }
    peaks
}
