//! Feature extraction
//!
//! This module reduces one fixed-size audio window to a small feature vector:
//! - RMS energy and peak amplitude
//! - Zero-crossing rate
//! - Smoothed energy and energy delta carried across windows
//!
//! Only these derived numbers leave the extractor; the sample buffer is borrowed
//! for the duration of the call and never retained.

use serde::{Deserialize, Serialize};

/// Default EMA weight of the newest window in the smoothed energy
pub const DEFAULT_SMOOTHING_ALPHA: f64 = 0.3;

/// Features of one audio window
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Root-mean-square amplitude (>= 0, full scale = 1.0)
    pub rms_energy: f64,
    /// Fraction of adjacent sample pairs that change sign (0-1)
    pub zero_crossing_rate: f64,
    /// Largest absolute sample value (0-1)
    pub peak_amplitude: f64,
    /// Exponentially smoothed RMS across windows
    pub smoothed_rms: f64,
    /// RMS change against the previous window
    pub energy_delta: f64,
}

/// Extractor tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Weight of the newest window in `smoothed_rms` (clamped to 0.01-1.0)
    pub smoothing_alpha: f64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: DEFAULT_SMOOTHING_ALPHA,
        }
    }
}

impl ExtractorConfig {
    pub fn clamped(mut self) -> Self {
        self.smoothing_alpha = if self.smoothing_alpha.is_finite() {
            self.smoothing_alpha.clamp(0.01, 1.0)
        } else {
            DEFAULT_SMOOTHING_ALPHA
        };
        self
    }
}

/// Stateful extractor; keeps only the smoothing state between windows
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: ExtractorConfig,
    smoothed_rms: Option<f64>,
    previous_rms: Option<f64>,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(ExtractorConfig::default())
    }
}

impl FeatureExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self {
            config: config.clamped(),
            smoothed_rms: None,
            previous_rms: None,
        }
    }

    /// Extract features from a window of normalized float samples (-1.0..=1.0)
    pub fn extract(&mut self, samples: &[f32]) -> FeatureVector {
        let rms_energy = compute_rms(samples);
        let zero_crossing_rate = compute_zero_crossing_rate(samples);
        let peak_amplitude = samples
            .iter()
            .map(|s| (*s as f64).abs())
            .filter(|s| s.is_finite())
            .fold(0.0, f64::max)
            .min(1.0);

        let alpha = self.config.smoothing_alpha;
        let smoothed_rms = match self.smoothed_rms {
            Some(previous) => previous + alpha * (rms_energy - previous),
            None => rms_energy,
        };
        let energy_delta = self
            .previous_rms
            .map(|previous| rms_energy - previous)
            .unwrap_or(0.0);

        self.smoothed_rms = Some(smoothed_rms);
        self.previous_rms = Some(rms_energy);

        FeatureVector {
            rms_energy,
            zero_crossing_rate,
            peak_amplitude,
            smoothed_rms,
            energy_delta,
        }
    }

    /// Extract features from signed 16-bit PCM samples
    pub fn extract_pcm16(&mut self, samples: &[i16]) -> FeatureVector {
        let normalized: Vec<f32> = samples
            .iter()
            .map(|s| *s as f32 / i16::MAX as f32)
            .collect();
        self.extract(&normalized)
    }

    /// Clear smoothing state (between sessions)
    pub fn reset(&mut self) {
        self.smoothed_rms = None;
        self.previous_rms = None;
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }
}

fn compute_rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples
        .iter()
        .map(|s| *s as f64)
        .filter(|s| s.is_finite())
        .map(|s| s * s)
        .sum();
    (sum_squares / samples.len() as f64).sqrt()
}

/// Sign changes between adjacent samples; exact zeros count as non-negative
fn compute_zero_crossing_rate(samples: &[f32]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
        .count();
    crossings as f64 / (samples.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq_hz: f32, amplitude: f32, len: usize) -> Vec<f32> {
        let sample_rate = 16_000.0;
        (0..len)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq_hz * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn test_all_zero_buffer() {
        let mut extractor = FeatureExtractor::default();
        let features = extractor.extract(&vec![0.0; 1024]);

        assert_eq!(features.rms_energy, 0.0);
        assert_eq!(features.zero_crossing_rate, 0.0);
        assert_eq!(features.peak_amplitude, 0.0);
    }

    #[test]
    fn test_empty_buffer() {
        let mut extractor = FeatureExtractor::default();
        let features = extractor.extract(&[]);

        assert_eq!(features.rms_energy, 0.0);
        assert_eq!(features.zero_crossing_rate, 0.0);
    }

    #[test]
    fn test_rms_of_constant_signal() {
        let mut extractor = FeatureExtractor::default();
        let features = extractor.extract(&vec![0.5; 100]);

        assert!((features.rms_energy - 0.5).abs() < 1e-9);
        assert_eq!(features.zero_crossing_rate, 0.0);
    }

    #[test]
    fn test_zero_crossing_rate_alternating() {
        let mut extractor = FeatureExtractor::default();
        let samples: Vec<f32> = (0..101).map(|i| if i % 2 == 0 { 0.1 } else { -0.1 }).collect();
        let features = extractor.extract(&samples);

        assert!((features.zero_crossing_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_sine_features() {
        let mut extractor = FeatureExtractor::default();
        // 400 Hz at 16 kHz: 800 crossings per second
        let features = extractor.extract(&sine(400.0, 0.5, 16_000));

        assert!((features.rms_energy - 0.5 / 2f64.sqrt()).abs() < 0.01);
        assert!((features.zero_crossing_rate - 0.05).abs() < 0.005);
        assert!(features.peak_amplitude <= 0.5 + 1e-6);
    }

    #[test]
    fn test_deterministic_given_same_state() {
        let samples = sine(300.0, 0.3, 2048);
        let mut a = FeatureExtractor::default();
        let mut b = FeatureExtractor::default();

        assert_eq!(a.extract(&samples), b.extract(&samples));
        assert_eq!(a.extract(&samples), b.extract(&samples));
    }

    #[test]
    fn test_smoothing_and_reset() {
        let mut extractor = FeatureExtractor::new(ExtractorConfig {
            smoothing_alpha: 0.5,
        });
        extractor.extract(&vec![0.0; 64]);
        let features = extractor.extract(&vec![0.4; 64]);

        assert!((features.smoothed_rms - 0.2).abs() < 1e-9);
        assert!((features.energy_delta - 0.4).abs() < 1e-9);

        extractor.reset();
        let features = extractor.extract(&vec![0.4; 64]);
        assert!((features.smoothed_rms - 0.4).abs() < 1e-9);
        assert_eq!(features.energy_delta, 0.0);
    }

    #[test]
    fn test_pcm16_entry_point() {
        let mut extractor = FeatureExtractor::default();
        let features = extractor.extract_pcm16(&[i16::MAX; 32]);

        assert!((features.rms_energy - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_config_clamping() {
        let config = ExtractorConfig {
            smoothing_alpha: 7.0,
        }
        .clamped();
        assert_eq!(config.smoothing_alpha, 1.0);
    }
}
