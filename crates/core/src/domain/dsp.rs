//! Filter bank for the ten-band equalizer
//!
//! Each band owns an order-2 Bessel band-pass filter (phase-normalized
//! analog prototype, band-pass transformed, then bilinear-transformed with
//! pre-warping). The resulting 4th-order digital filter is realized as two
//! cascaded second-order sections.
//!
//! All of this is designed for:
//! - Coefficients computed once per sample rate, on the control thread
//! - Zero allocations when filtering
//! - Filter history carried across blocks, never reset mid-stream

use crate::domain::audio::SampleRate;
use num_complex::Complex64;
use std::f64::consts::PI;
use tracing::{debug, warn};

/// Number of equalizer bands
pub const BAND_COUNT: usize = 10;

/// Nominal center frequencies in Hz, lowest band first
pub const BAND_CENTERS_HZ: [f64; BAND_COUNT] = [
    32.0, 64.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];

/// Low cutoff = center * LOW_CUTOFF_RATIO
pub const LOW_CUTOFF_RATIO: f64 = 0.707;
/// High cutoff = center * HIGH_CUTOFF_RATIO (clamped below Nyquist)
pub const HIGH_CUTOFF_RATIO: f64 = 1.414;

/// Sections per band filter (order 2 band-pass = 4 poles = 2 biquads)
pub const SECTIONS_PER_BAND: usize = 2;

/// Convert a band gain in dB into the multiplier applied to that band's
/// filtered signal before it is added to the dry path.
///
/// `0 dB -> 0.0`, so a flat band adds nothing.
#[inline]
pub fn added_gain(db: f32) -> f32 {
    (10.0_f64.powf(f64::from(db) / 20.0) - 1.0) as f32
}

// ============================================================================
// SECOND-ORDER SECTIONS
// ============================================================================

/// Coefficients of one second-order section (a0 normalized to 1.0)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SosCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Default for SosCoeffs {
    fn default() -> Self {
        // Unity gain (no filtering)
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }
}

impl SosCoeffs {
    /// Complex frequency response at `omega` radians/sample
    pub fn response(&self, omega: f64) -> Complex64 {
        let z1 = Complex64::from_polar(1.0, -omega);
        let z2 = z1 * z1;
        let num = self.b0 + z1 * self.b1 + z2 * self.b2;
        let den = 1.0 + z1 * self.a1 + z2 * self.a2;
        num / den
    }
}

/// Stateful second-order section, Direct Form I
///
/// Runs in `f64`: the 32 Hz band has poles very close to the unit circle
/// and is not stable enough in single precision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Section {
    coeffs: SosCoeffs,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Section {
    pub fn new(coeffs: SosCoeffs) -> Self {
        Self {
            coeffs,
            ..Self::default()
        }
    }

    #[inline]
    pub fn process_sample(&mut self, x: f64) -> f64 {
        let c = &self.coeffs;
        let y = c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;

        y
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

/// Design an order-2 Bessel band-pass filter as two second-order sections.
///
/// Returns `None` when the band collapses (`low >= high`) or either edge
/// falls outside `(0, nyquist)`.
pub fn bessel_bandpass(
    low_hz: f64,
    high_hz: f64,
    sample_rate: f64,
) -> Option<[SosCoeffs; SECTIONS_PER_BAND]> {
    let nyquist = sample_rate / 2.0;
    if !(low_hz > 0.0 && low_hz < high_hz && high_hz < nyquist) {
        return None;
    }

    // Bilinear transform constant; analog edges are pre-warped against it
    const K: f64 = 4.0;
    let warp = |f: f64| K * (PI * f / sample_rate).tan();
    let w1 = warp(low_hz);
    let w2 = warp(high_hz);
    let bw = w2 - w1;
    let w0_sq = w1 * w2;

    // Phase-normalized order-2 Bessel prototype: 1 / (s^2 + sqrt(3) s + 1).
    // Only the upper pole is needed, the other is its conjugate.
    let proto = Complex64::new(-(3.0_f64.sqrt()) / 2.0, 0.5);

    // Low-pass to band-pass: each prototype pole p yields the roots of
    // s^2 - p*bw*s + w0^2 = 0
    let half = proto * (bw / 2.0);
    let disc = (half * half - w0_sq).sqrt();
    let analog = [half + disc, half - disc];

    // Two zeros at s = 0 map to z = 1, two zeros at infinity map to z = -1.
    // Gain: bw^2 * K^2 / prod(K - p) over all four poles.
    let mut denom = 1.0;
    let mut sections = [SosCoeffs::default(); SECTIONS_PER_BAND];
    for (section, &pole) in sections.iter_mut().zip(analog.iter()) {
        denom *= (K - pole).norm_sqr();
        let q = (K + pole) / (K - pole);
        *section = SosCoeffs {
            b0: 1.0,
            b1: 0.0,
            b2: -1.0,
            a1: -2.0 * q.re,
            a2: q.norm_sqr(),
        };
    }

    let gain = bw * bw * K * K / denom;
    if !gain.is_finite() {
        return None;
    }
    sections[0].b0 *= gain;
    sections[0].b2 *= gain;

    Some(sections)
}

// ============================================================================
// BANDS
// ============================================================================

/// One equalizer band and its pass-band for a given sample rate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub index: usize,
    pub center_hz: f64,
    pub low_hz: f64,
    pub high_hz: f64,
}

impl Band {
    /// Derive the pass-band of band `index` for `sample_rate`.
    ///
    /// # Panics
    /// If `index >= BAND_COUNT`.
    pub fn new(index: usize, sample_rate: SampleRate) -> Self {
        let center_hz = BAND_CENTERS_HZ[index];
        Self {
            index,
            center_hz,
            low_hz: center_hz * LOW_CUTOFF_RATIO,
            high_hz: (center_hz * HIGH_CUTOFF_RATIO).min(sample_rate.nyquist() - 1.0),
        }
    }

    /// True if the cutoff math collapsed for this sample rate
    pub fn is_degenerate(&self) -> bool {
        self.low_hz >= self.high_hz
    }

    /// Short display label ("32", "1K", "16K")
    pub fn label(&self) -> String {
        if self.center_hz < 1000.0 {
            format!("{}", self.center_hz as u32)
        } else {
            format!("{}K", self.center_hz as u32 / 1000)
        }
    }
}

/// Band filter: design plus per-channel section history
#[derive(Debug, Clone)]
struct BandFilter {
    band: Band,
    design: Option<[SosCoeffs; SECTIONS_PER_BAND]>,
    history: Vec<[Section; SECTIONS_PER_BAND]>,
}

impl BandFilter {
    fn new(band: Band, sample_rate: SampleRate, channels: usize) -> Self {
        let design = bessel_bandpass(band.low_hz, band.high_hz, f64::from(sample_rate.hz()));
        let history = match design {
            Some(coeffs) => vec![coeffs.map(Section::new); channels],
            None => Vec::new(),
        };
        Self {
            band,
            design,
            history,
        }
    }
}

/// One band-pass filter per band, built for a single sample rate
///
/// Coefficients and the per-channel history live together, so a band's
/// filter can never run against a sample rate it was not designed for.
#[derive(Debug, Clone)]
pub struct FilterBank {
    sample_rate: SampleRate,
    channels: usize,
    filters: Vec<BandFilter>,
}

impl FilterBank {
    /// Build the filter bank for `sample_rate` with history for `channels`
    pub fn new(sample_rate: SampleRate, channels: u16) -> Self {
        let mut bank = Self {
            sample_rate,
            channels: usize::from(channels.max(1)),
            filters: Vec::with_capacity(BAND_COUNT),
        };
        bank.rebuild(sample_rate);
        bank
    }

    /// Recompute every band for a new sample rate. Clears all history.
    pub fn rebuild(&mut self, sample_rate: SampleRate) {
        self.sample_rate = sample_rate;
        self.filters.clear();

        for index in 0..BAND_COUNT {
            let band = Band::new(index, sample_rate);
            let filter = BandFilter::new(band, sample_rate, self.channels);

            if filter.design.is_none() {
                warn!(
                    band = %band.label(),
                    low_hz = band.low_hz,
                    high_hz = band.high_hz,
                    sample_rate = sample_rate.hz(),
                    "Degenerate band, bypassing its filter"
                );
            }
            self.filters.push(filter);
        }

        debug!(
            sample_rate = sample_rate.hz(),
            channels = self.channels,
            active = self.active_bands(),
            "Filter bank rebuilt"
        );
    }

    /// Clear filter history without touching coefficients
    pub fn reset(&mut self) {
        for filter in &mut self.filters {
            for sections in &mut filter.history {
                sections.iter_mut().for_each(Section::reset);
            }
        }
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn bands(&self) -> impl Iterator<Item = &Band> {
        self.filters.iter().map(|f| &f.band)
    }

    pub fn band(&self, index: usize) -> Option<&Band> {
        self.filters.get(index).map(|f| &f.band)
    }

    /// Second-order sections of a band, `None` if the band is bypassed
    pub fn coefficients(&self, index: usize) -> Option<&[SosCoeffs; SECTIONS_PER_BAND]> {
        self.filters.get(index).and_then(|f| f.design.as_ref())
    }

    /// Whether band `index` has a usable filter
    pub fn is_active(&self, index: usize) -> bool {
        self.coefficients(index).is_some()
    }

    pub fn active_bands(&self) -> usize {
        self.filters.iter().filter(|f| f.design.is_some()).count()
    }

    /// Magnitude response of band `index` at `freq_hz`; 0.0 for a bypassed band
    pub fn magnitude_at(&self, index: usize, freq_hz: f64) -> f64 {
        let omega = 2.0 * PI * freq_hz / f64::from(self.sample_rate.hz());
        self.coefficients(index)
            .map(|sections| {
                sections
                    .iter()
                    .map(|s| s.response(omega))
                    .product::<Complex64>()
                    .norm()
            })
            .unwrap_or(0.0)
    }

    /// Filter interleaved `input` through band `index` and add the result,
    /// scaled by `gain`, into `output`.
    ///
    /// `input` and `output` share the bank's channel layout. A bypassed band
    /// adds nothing.
    pub fn add_filtered(&mut self, index: usize, input: &[f32], gain: f32, output: &mut [f32]) {
        let channels = self.channels;
        let Some(filter) = self.filters.get_mut(index) else {
            return;
        };
        if filter.design.is_none() {
            return;
        }

        let gain = f64::from(gain);
        for (in_frame, out_frame) in input
            .chunks_exact(channels)
            .zip(output.chunks_exact_mut(channels))
        {
            for ((&x, y), sections) in in_frame
                .iter()
                .zip(out_frame.iter_mut())
                .zip(filter.history.iter_mut())
            {
                let mut v = f64::from(x);
                for section in sections.iter_mut() {
                    v = section.process_sample(v);
                }
                *y += (v * gain) as f32;
            }
        }
    }
}
