//! Playback engine
//!
//! The engine is split in two halves that share nothing but atomics and
//! bounded channels:
//!
//! - [`EngineHandle`] is the control surface. It loads tracks, starts and
//!   pauses playback and writes equalizer parameters. Cheap to clone.
//! - [`BlockProcessor`] is moved into the device callback. It is the only
//!   owner of the loaded track and its filter bank, never blocks and never
//!   allocates.
//!
//! A load builds the complete track (samples, filter bank for its sample
//! rate, scratch buffers) on the control side and ships it to the audio
//! thread in one command, so samples and filters always change together.
//! The replaced track travels back through a retirement queue and is freed
//! on the control side.

use crate::domain::audio::{EngineError, Result, SampleBuffer, SampleRate};
use crate::domain::config::EngineConfig;
use crate::domain::dsp::{added_gain, FilterBank, BAND_COUNT};
use crate::domain::equalizer::{EqualizerParams, EqualizerState};
use crate::domain::preset::{PresetBank, PresetGains};
use crate::domain::spectrum::{spectrum_pipeline, SpectrumFeed, SpectrumTap, SpectrumWorker};
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Everything the audio thread needs to play one track
struct Track {
    buffer: SampleBuffer,
    filters: FilterBank,
    /// Pre-amp scaled input block
    dry: Vec<f32>,
    /// Dry signal plus every band's added energy
    wet: Vec<f32>,
}

impl Track {
    fn new(buffer: SampleBuffer, block_size: usize) -> Self {
        let channels = buffer.channels().count();
        let filters = FilterBank::new(buffer.sample_rate(), channels);
        let scratch = block_size * usize::from(channels);
        Self {
            buffer,
            filters,
            dry: vec![0.0; scratch],
            wet: vec![0.0; scratch],
        }
    }
}

/// Control → audio thread messages, applied at the next block boundary
enum Command {
    /// Boxed so the queue slots stay pointer-sized
    Load(Box<Track>),
    Restart,
}

// ============================================================================
// CURSOR
// ============================================================================

/// Playback position and state shared by both halves of the engine
///
/// `position` is only written by the audio thread. Loads and restarts still
/// in the command queue are counted in `pending_rewinds` so queries report
/// the rewound position before the audio thread gets to them.
#[derive(Debug, Default)]
pub struct PlaybackCursor {
    playing: AtomicBool,
    loaded: AtomicBool,
    position: AtomicUsize,
    pending_rewinds: AtomicUsize,
    total_frames: AtomicUsize,
    sample_rate: AtomicU32,
    oversized_blocks: AtomicU64,
}

impl PlaybackCursor {
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Relaxed)
    }

    /// Frames played since the last load or restart
    pub fn position_frames(&self) -> usize {
        if self.pending_rewinds.load(Ordering::Acquire) > 0 {
            return 0;
        }
        self.position.load(Ordering::Relaxed)
    }

    /// Called by the audio thread when it applies a load or restart
    fn rewind(&self) {
        self.position.store(0, Ordering::Relaxed);
        self.pending_rewinds.fetch_sub(1, Ordering::Release);
    }

    /// Length of the loaded track in frames (0 when nothing is loaded)
    pub fn duration_frames(&self) -> usize {
        self.total_frames.load(Ordering::Relaxed)
    }

    /// Sample rate of the loaded track
    pub fn sample_rate(&self) -> Option<SampleRate> {
        match self.sample_rate.load(Ordering::Relaxed) {
            0 => None,
            hz => Some(SampleRate::from_hz(hz)),
        }
    }

    pub fn position_seconds(&self) -> f64 {
        self.sample_rate()
            .map(|rate| self.position_frames() as f64 / f64::from(rate.hz()))
            .unwrap_or(0.0)
    }

    /// Device callbacks that asked for more frames than the block size
    pub fn oversized_blocks(&self) -> u64 {
        self.oversized_blocks.load(Ordering::Relaxed)
    }
}

// ============================================================================
// BLOCK PROCESSOR
// ============================================================================

/// Real-time half of the engine, driven by the output device
pub struct BlockProcessor {
    block_size: usize,
    track: Option<Box<Track>>,
    commands: Receiver<Command>,
    retired: Sender<Box<Track>>,
    equalizer: Arc<EqualizerState>,
    cursor: Arc<PlaybackCursor>,
    tap: SpectrumTap,
}

impl BlockProcessor {
    /// Largest block `process` will fill, in frames
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Filter bank of the track currently owned by the audio thread
    pub fn filter_bank(&self) -> Option<&FilterBank> {
        self.track.as_deref().map(|track| &track.filters)
    }

    /// Fill `output` (interleaved, `channels` wide) with the next block.
    ///
    /// Writes silence when paused, when nothing is loaded, when the block
    /// would run past the end of the track (playback stops there) and when
    /// the device asks for more than `block_size` frames.
    pub fn process(&mut self, output: &mut [f32], channels: usize) {
        self.drain_commands();

        if channels == 0 || !self.cursor.is_playing() {
            output.fill(0.0);
            return;
        }
        let Some(track) = self.track.as_deref_mut() else {
            output.fill(0.0);
            return;
        };

        let frames = output.len() / channels;
        if frames > self.block_size {
            self.cursor.oversized_blocks.fetch_add(1, Ordering::Relaxed);
            output.fill(0.0);
            return;
        }

        let Track {
            buffer,
            filters,
            dry,
            wet,
        } = track;

        let start = self.cursor.position.load(Ordering::Relaxed);
        let Some(chunk) = buffer.frames_at(start, frames) else {
            // A final partial block is dropped, not played short
            self.cursor.playing.store(false, Ordering::Relaxed);
            output.fill(0.0);
            return;
        };

        let params = self.equalizer.snapshot();
        let source_channels = usize::from(buffer.channels().count());
        let dry = &mut dry[..chunk.len()];
        let wet = &mut wet[..chunk.len()];

        for (d, &x) in dry.iter_mut().zip(chunk) {
            *d = x * params.preamp;
        }
        wet.copy_from_slice(dry);

        for band in 0..BAND_COUNT {
            let total_db = params.total_gain_db(band);
            if total_db != 0.0 {
                filters.add_filtered(band, dry, added_gain(total_db), wet);
            }
        }

        let filled = frames * channels;
        for (out_frame, wet_frame) in output[..filled]
            .chunks_exact_mut(channels)
            .zip(wet.chunks_exact(source_channels))
        {
            for (c, y) in out_frame.iter_mut().enumerate() {
                *y = (wet_frame[c % source_channels] * params.master_volume).clamp(-1.0, 1.0);
            }
        }
        output[filled..].fill(0.0);

        self.tap.publish(&output[..filled], channels);
        self.cursor.position.store(start + frames, Ordering::Relaxed);
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Load(track) => {
                    self.cursor.rewind();
                    if let Some(old) = self.track.replace(track) {
                        // Freed here only if the control side stopped collecting
                        let _ = self.retired.try_send(old);
                    }
                }
                Command::Restart => {
                    self.cursor.rewind();
                    if let Some(track) = self.track.as_deref_mut() {
                        track.filters.reset();
                    }
                }
            }
        }
    }
}

// ============================================================================
// CONTROL HANDLE
// ============================================================================

/// Control surface of the engine
#[derive(Clone)]
pub struct EngineHandle {
    block_size: usize,
    max_channels: u16,
    commands: Sender<Command>,
    retired: Receiver<Box<Track>>,
    equalizer: Arc<EqualizerState>,
    cursor: Arc<PlaybackCursor>,
    presets: Arc<PresetBank>,
    spectrum: SpectrumFeed,
}

impl EngineHandle {
    /// Replace the loaded track. Position goes back to zero; play state is kept.
    ///
    /// # Errors
    /// `InvalidInput` if the track has more channels than the engine accepts,
    /// `QueueFull` if the audio thread has not consumed earlier commands.
    #[instrument(skip(self, buffer), fields(frames = buffer.frames(), sample_rate = buffer.sample_rate().hz()))]
    pub fn load(&self, buffer: SampleBuffer) -> Result<()> {
        self.collect_retired();

        let channels = buffer.channels().count();
        if channels > self.max_channels {
            return Err(EngineError::InvalidInput(format!(
                "{channels} channels exceeds the maximum of {}",
                self.max_channels
            )));
        }

        let frames = buffer.frames();
        let sample_rate = buffer.sample_rate();
        let track = Box::new(Track::new(buffer, self.block_size));
        self.send_rewind(Command::Load(track))?;

        self.cursor.total_frames.store(frames, Ordering::Relaxed);
        self.cursor.sample_rate.store(sample_rate.hz(), Ordering::Relaxed);
        self.cursor.loaded.store(true, Ordering::Relaxed);

        info!(
            channels,
            duration_secs = frames as f64 / f64::from(sample_rate.hz()),
            "Track loaded"
        );
        Ok(())
    }

    /// Start playback. Returns `false` (and stays paused) if nothing is loaded.
    pub fn play(&self) -> bool {
        self.collect_retired();
        if !self.cursor.is_loaded() {
            debug!("Play ignored, no track loaded");
            return false;
        }
        self.cursor.playing.store(true, Ordering::Relaxed);
        debug!(position = self.cursor.position_frames(), "Playback started");
        true
    }

    /// Pause at the next block boundary, keeping the position
    pub fn pause(&self) {
        self.cursor.playing.store(false, Ordering::Relaxed);
        debug!(position = self.cursor.position_frames(), "Playback paused");
    }

    /// Flip between playing and paused. Returns the new state.
    pub fn toggle(&self) -> bool {
        if self.cursor.is_playing() {
            self.pause();
            false
        } else {
            self.play()
        }
    }

    /// Rewind to the first frame and clear filter history
    pub fn restart(&self) -> Result<()> {
        self.collect_retired();
        self.send_rewind(Command::Restart)?;
        debug!("Playback rewound");
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.cursor.is_playing()
    }

    pub fn is_loaded(&self) -> bool {
        self.cursor.is_loaded()
    }

    pub fn position_frames(&self) -> usize {
        self.cursor.position_frames()
    }

    pub fn position_seconds(&self) -> f64 {
        self.cursor.position_seconds()
    }

    pub fn duration_frames(&self) -> usize {
        self.cursor.duration_frames()
    }

    pub fn sample_rate(&self) -> Option<SampleRate> {
        self.cursor.sample_rate()
    }

    pub fn cursor(&self) -> &PlaybackCursor {
        &self.cursor
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Set the gain of band `index` (0-9) in dB
    pub fn set_band_gain(&self, index: usize, db: f32) -> Result<()> {
        self.equalizer.set_band_gain(index, db)
    }

    pub fn set_preamp(&self, factor: f32) {
        self.equalizer.set_preamp(factor);
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.equalizer.set_master_volume(volume);
    }

    pub fn set_bass_boost(&self, db: f32) {
        self.equalizer.set_bass_boost(db);
    }

    pub fn set_treble_boost(&self, db: f32) {
        self.equalizer.set_treble_boost(db);
    }

    pub fn set_booster_active(&self, active: bool) {
        self.equalizer.set_booster_active(active);
    }

    /// Set all ten band gains from a named preset
    ///
    /// # Errors
    /// `PresetNotFound` if no preset has that name.
    #[instrument(skip(self))]
    pub fn apply_preset(&self, name: &str) -> Result<PresetGains> {
        let gains = *self.presets.get(name)?;
        self.equalizer.apply_gains(&gains);
        info!("Preset applied");
        Ok(gains)
    }

    /// Set all ten band gains at once
    pub fn apply_gains(&self, gains_db: &PresetGains) {
        self.equalizer.apply_gains(gains_db);
    }

    /// Current value of every parameter
    pub fn params(&self) -> EqualizerParams {
        self.equalizer.snapshot()
    }

    pub fn equalizer(&self) -> &EqualizerState {
        &self.equalizer
    }

    pub fn presets(&self) -> &PresetBank {
        &self.presets
    }

    /// Latest spectrum published by the worker
    pub fn spectrum(&self) -> &SpectrumFeed {
        &self.spectrum
    }

    /// Queue a command that rewinds the cursor once the audio thread applies it
    fn send_rewind(&self, command: Command) -> Result<()> {
        // Counted before the send so the audio thread never sees it uncounted
        self.cursor.pending_rewinds.fetch_add(1, Ordering::Relaxed);
        self.commands.try_send(command).map_err(|e| {
            self.cursor.pending_rewinds.fetch_sub(1, Ordering::Relaxed);
            let reason = match e {
                TrySendError::Full(_) => "audio thread has not drained earlier commands",
                TrySendError::Disconnected(_) => "block processor has been dropped",
            };
            EngineError::QueueFull(reason.to_string())
        })
    }

    /// Free tracks the audio thread has swapped out
    fn collect_retired(&self) {
        let freed = self.retired.try_iter().count();
        if freed > 0 {
            debug!(freed, "Released retired tracks");
        }
    }
}

// ============================================================================
// CONSTRUCTION
// ============================================================================

/// The three pieces of a freshly built engine
///
/// `processor` goes to the device callback, `spectrum` to its own thread
/// (or is polled with `run_pending`), `handle` stays with the caller.
pub struct EngineParts {
    pub handle: EngineHandle,
    pub processor: BlockProcessor,
    pub spectrum: SpectrumWorker,
}

impl EngineParts {
    /// Build an engine from `config`, applying its initial preset
    ///
    /// # Errors
    /// `InvalidInput` for an unusable configuration, `PresetNotFound` if the
    /// initial preset does not exist.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

        let presets = config
            .preset_bank()
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

        let mut initial = EqualizerParams {
            preamp: config.equalizer.preamp,
            master_volume: config.equalizer.master_volume,
            booster_gain_db: config.equalizer.booster_gain_db,
            ..EqualizerParams::default()
        };
        if let Some(name) = &config.equalizer.preset {
            initial.band_gains_db = *presets.get(name)?;
        }

        let block_size = config.engine.block_size;
        let capacity = config.engine.command_queue_capacity;
        let (command_tx, command_rx) = bounded(capacity);
        let (retired_tx, retired_rx) = bounded(capacity);
        let (tap, worker, feed) =
            spectrum_pipeline(config.spectrum.bins, block_size, config.spectrum.pool_size);

        let equalizer = Arc::new(EqualizerState::new(initial));
        let cursor = Arc::new(PlaybackCursor::default());

        info!(
            block_size,
            presets = presets.len(),
            bins = config.spectrum.bins,
            "Engine built"
        );

        Ok(Self {
            handle: EngineHandle {
                block_size,
                max_channels: config.engine.max_channels,
                commands: command_tx,
                retired: retired_rx,
                equalizer: Arc::clone(&equalizer),
                cursor: Arc::clone(&cursor),
                presets: Arc::new(presets),
                spectrum: feed,
            },
            processor: BlockProcessor {
                block_size,
                track: None,
                commands: command_rx,
                retired: retired_tx,
                equalizer,
                cursor,
                tap,
            },
            spectrum: worker,
        })
    }
}
