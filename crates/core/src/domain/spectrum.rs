//! Spectrum feed for visualization
//!
//! ```text
//!  audio thread                 spectrum thread               readers
//!  ┌──────────────┐  work queue  ┌────────────────┐  publish  ┌──────────────┐
//!  │ SpectrumTap  │─────────────►│ SpectrumWorker │──────────►│ SpectrumFeed │
//!  │ (try_send)   │◄─────────────│ (FFT)          │           │ (latest())   │
//!  └──────────────┘  free pool   └────────────────┘           └──────────────┘
//! ```
//!
//! The tap only moves pre-allocated buffers through bounded crossbeam
//! channels with `try_recv`/`try_send`, so it never blocks or allocates. If
//! the worker falls behind, updates are dropped and counted.

use crate::domain::audio::{EngineError, Result};
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner, Length};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// Default number of visual bins
pub const DEFAULT_BINS: usize = 60;

/// Downsampled magnitude spectrum of one processed block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumSnapshot {
    /// Increases by one for every published snapshot; 0 = nothing yet
    pub sequence: u64,
    pub magnitudes: Vec<f32>,
}

impl SpectrumSnapshot {
    fn silent(bins: usize) -> Self {
        Self {
            sequence: 0,
            magnitudes: vec![0.0; bins],
        }
    }

    pub fn bins(&self) -> usize {
        self.magnitudes.len()
    }

    pub fn peak(&self) -> f32 {
        self.magnitudes.iter().copied().fold(0.0, f32::max)
    }
}

// ============================================================================
// ANALYZER
// ============================================================================

/// Hann window -> magnitude FFT -> nearest-index downsampling
pub struct SpectrumAnalyzer {
    bins: usize,
    fft: Option<Arc<dyn Fft<f32>>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new(bins: usize) -> Self {
        Self {
            bins: bins.max(1),
            fft: None,
            window: Vec::new(),
            buffer: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Analyze an interleaved block, averaging channels to mono first
    pub fn analyze(&mut self, block: &[f32], channels: usize) -> Result<SpectrumSnapshot> {
        if channels == 0 {
            return Err(EngineError::Spectrum("zero channels".to_string()));
        }
        let mono: Vec<f32> = block
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();
        self.analyze_mono(&mono)
    }

    /// Analyze a mono block
    ///
    /// # Errors
    /// `Spectrum` if the block yields no more frequency bins than the
    /// requested visual resolution.
    pub fn analyze_mono(&mut self, mono: &[f32]) -> Result<SpectrumSnapshot> {
        let len = mono.len();
        let spectrum_len = len / 2 + 1;
        if len == 0 || spectrum_len <= self.bins {
            return Err(EngineError::Spectrum(format!(
                "block of {len} samples is too short for {} bins",
                self.bins
            )));
        }

        let fft = self.prepare(len);
        for ((slot, &sample), &w) in self.buffer.iter_mut().zip(mono).zip(&self.window) {
            *slot = Complex::new(sample * w, 0.0);
        }
        fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        // Evenly spaced picks over [0, spectrum_len - 1], both ends included
        let last = spectrum_len - 1;
        let span = (self.bins - 1).max(1);
        let magnitudes = (0..self.bins)
            .map(|k| self.buffer[k * last / span].norm())
            .collect();

        Ok(SpectrumSnapshot {
            sequence: 0,
            magnitudes,
        })
    }

    /// Plan (or reuse) the transform and size the work buffers for `len`
    fn prepare(&mut self, len: usize) -> Arc<dyn Fft<f32>> {
        if let Some(fft) = self.fft.as_ref().filter(|fft| fft.len() == len) {
            return Arc::clone(fft);
        }

        debug!(len, "Planning spectrum FFT");
        let fft = FftPlanner::<f32>::new().plan_fft_forward(len);
        self.window = hann_window(len);
        self.buffer = vec![Complex::new(0.0, 0.0); len];
        self.scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        self.fft = Some(Arc::clone(&fft));
        fft
    }
}

/// Symmetric Hann window
fn hann_window(size: usize) -> Vec<f32> {
    if size == 1 {
        return vec![1.0];
    }
    let denom = (size - 1) as f32;
    (0..size)
        .map(|n| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * n as f32 / denom).cos())
        .collect()
}

// ============================================================================
// FEED
// ============================================================================

#[derive(Debug)]
struct FeedInner {
    latest: RwLock<Arc<SpectrumSnapshot>>,
    sequence: AtomicU64,
    dropped: AtomicU64,
}

/// Read side of the spectrum pipeline. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SpectrumFeed {
    inner: Arc<FeedInner>,
}

impl SpectrumFeed {
    fn new(bins: usize) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                latest: RwLock::new(Arc::new(SpectrumSnapshot::silent(bins))),
                sequence: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Most recent complete snapshot
    pub fn latest(&self) -> Arc<SpectrumSnapshot> {
        let guard = self.inner.latest.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Sequence number of the latest snapshot
    pub fn sequence(&self) -> u64 {
        self.inner.sequence.load(Ordering::Acquire)
    }

    /// Blocks whose spectrum update was skipped
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    fn publish(&self, mut snapshot: SpectrumSnapshot) {
        let sequence = self.inner.sequence.load(Ordering::Relaxed) + 1;
        snapshot.sequence = sequence;
        let snapshot = Arc::new(snapshot);
        {
            let mut guard = self.inner.latest.write().unwrap_or_else(PoisonError::into_inner);
            *guard = snapshot;
        }
        self.inner.sequence.store(sequence, Ordering::Release);
    }

    fn record_drop(&self) {
        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// TAP / WORKER
// ============================================================================

/// Audio-thread side: hands mono copies of processed blocks to the worker
pub struct SpectrumTap {
    max_frames: usize,
    free_rx: Receiver<Vec<f32>>,
    free_tx: Sender<Vec<f32>>,
    work_tx: Sender<Vec<f32>>,
    feed: SpectrumFeed,
}

impl SpectrumTap {
    /// Queue `block` (interleaved, `channels` wide) for analysis.
    ///
    /// Returns `false` if the update was dropped. Never blocks.
    pub fn publish(&self, block: &[f32], channels: usize) -> bool {
        let Ok(mut buffer) = self.free_rx.try_recv() else {
            self.feed.record_drop();
            return false;
        };

        let frames = block.len() / channels.max(1);
        if channels == 0 || frames > self.max_frames {
            self.recycle(buffer);
            self.feed.record_drop();
            return false;
        }

        buffer.clear();
        buffer.extend(
            block
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
        );

        match self.work_tx.try_send(buffer) {
            Ok(()) => true,
            Err(TrySendError::Full(buffer)) | Err(TrySendError::Disconnected(buffer)) => {
                self.recycle(buffer);
                self.feed.record_drop();
                false
            }
        }
    }

    fn recycle(&self, buffer: Vec<f32>) {
        // The pool holds every buffer ever created, so this cannot be full
        let _ = self.free_tx.try_send(buffer);
    }
}

/// Runs the FFT off the audio thread and publishes snapshots
pub struct SpectrumWorker {
    analyzer: SpectrumAnalyzer,
    work_rx: Receiver<Vec<f32>>,
    free_tx: Sender<Vec<f32>>,
    feed: SpectrumFeed,
}

impl SpectrumWorker {
    /// Analyze every queued block without waiting. Returns how many were handled.
    pub fn run_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(buffer) = self.work_rx.try_recv() {
            self.handle(buffer);
            handled += 1;
        }
        handled
    }

    /// Block until the tap is dropped, analyzing as blocks arrive
    pub fn run(mut self) {
        while let Ok(buffer) = self.work_rx.recv() {
            self.handle(buffer);
        }
        debug!("Spectrum worker stopped");
    }

    /// Run on a dedicated thread
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        info!(bins = self.analyzer.bins(), "Starting spectrum worker");
        thread::Builder::new()
            .name("spectrum".to_string())
            .spawn(move || self.run())
    }

    fn handle(&mut self, buffer: Vec<f32>) {
        match self.analyzer.analyze_mono(&buffer) {
            Ok(snapshot) => self.feed.publish(snapshot),
            Err(e) => {
                self.feed.record_drop();
                debug!(error = %e, "Spectrum update dropped");
            }
        }
        let _ = self.free_tx.try_send(buffer);
    }
}

/// Build the tap, worker and feed of one spectrum pipeline.
///
/// `pool_size` buffers of `block_frames` samples are allocated up front.
pub fn spectrum_pipeline(
    bins: usize,
    block_frames: usize,
    pool_size: usize,
) -> (SpectrumTap, SpectrumWorker, SpectrumFeed) {
    let pool_size = pool_size.max(1);
    let (free_tx, free_rx) = bounded(pool_size);
    let (work_tx, work_rx) = bounded(pool_size);
    for _ in 0..pool_size {
        let _ = free_tx.try_send(Vec::with_capacity(block_frames));
    }

    let feed = SpectrumFeed::new(bins.max(1));
    let tap = SpectrumTap {
        max_frames: block_frames,
        free_rx,
        free_tx: free_tx.clone(),
        work_tx,
        feed: feed.clone(),
    };
    let worker = SpectrumWorker {
        analyzer: SpectrumAnalyzer::new(bins),
        work_rx,
        free_tx,
        feed: feed.clone(),
    };
    (tap, worker, feed)
}
