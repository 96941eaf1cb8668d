//! Shared signal generators for the CyberTune integration tests

use std::f32::consts::PI;

/// Interleaved sine at `frequency`, identical on every channel
pub fn generate_sine_wave(
    frequency: f32,
    sample_rate: u32,
    frames: usize,
    channels: usize,
    amplitude: f32,
) -> Vec<f32> {
    (0..frames)
        .map(|i| amplitude * (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin())
        .flat_map(|x| std::iter::repeat(x).take(channels))
        .collect()
}

/// Sum of sines in the bass, mid and treble range, peak `amplitude`
pub fn generate_program(sample_rate: u32, frames: usize, channels: usize, amplitude: f32) -> Vec<f32> {
    let parts = [60.0, 1000.0, 9000.0].map(|f| generate_sine_wave(f, sample_rate, frames, 1, 1.0));
    (0..frames)
        .map(|i| amplitude * parts.iter().map(|p| p[i]).sum::<f32>() / parts.len() as f32)
        .flat_map(|x| std::iter::repeat(x).take(channels))
        .collect()
}

pub fn generate_silence(num_samples: usize) -> Vec<f32> {
    vec![0.0; num_samples]
}

/// Largest absolute sample value
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0, |acc, x| acc.max(x.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_layout() {
        let wave = generate_sine_wave(1000.0, 48000, 12, 2, 0.5);
        assert_eq!(wave.len(), 24);
        assert_eq!(wave[0], 0.0);
        assert_eq!(wave[2], wave[3]);
        assert!(peak(&wave) <= 0.5);
    }

    #[test]
    fn test_program_bounded() {
        let program = generate_program(44100, 4096, 1, 0.9);
        assert!(peak(&program) <= 0.9 + 1e-6);
        assert_eq!(generate_silence(8), vec![0.0; 8]);
    }
}
