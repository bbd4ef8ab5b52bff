//! Unrest scoring and trend detection
//!
//! Maps a feature vector to a single unrest value in [0, 100] and keeps a bounded
//! history of recent scores to estimate the rate of change (dZ/dt).
//!
//! Energy is converted to dBFS and mapped linearly between a floor and a ceiling.
//! Zero-crossing rate scales the energy term toward full weight for cry-like
//! voicing; it can never lift a quiet window on its own, so the transform stays
//! monotonic in energy.

use crate::features::FeatureVector;
use crate::types::{Trend, TrendReading, UnrestScore};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of scores kept for the gradient (10 s at one window per second)
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Gradient thresholds (score units per second) for trend buckets
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendThresholds {
    /// |gradient| at or above this is *_FAST
    pub fast: f64,
    /// |gradient| at or above this is plain RISING/FALLING
    pub normal: f64,
    /// |gradient| at or above this is *_SLOW; below is STABLE
    pub slow: f64,
}

impl Default for TrendThresholds {
    fn default() -> Self {
        Self {
            fast: 8.0,
            normal: 3.0,
            slow: 0.5,
        }
    }
}

impl TrendThresholds {
    /// Keep thresholds finite, non-negative and ordered slow <= normal <= fast
    pub fn clamped(self) -> Self {
        let defaults = Self::default();
        let sanitize = |value: f64, fallback: f64| {
            if value.is_finite() {
                value.clamp(0.0, 100.0)
            } else {
                fallback
            }
        };
        let slow = sanitize(self.slow, defaults.slow);
        let normal = sanitize(self.normal, defaults.normal).max(slow);
        let fast = sanitize(self.fast, defaults.fast).max(normal);
        Self { fast, normal, slow }
    }

    pub fn classify(&self, gradient: f64) -> Trend {
        if gradient >= self.fast {
            Trend::RisingFast
        } else if gradient >= self.normal {
            Trend::Rising
        } else if gradient >= self.slow && gradient > 0.0 {
            Trend::RisingSlow
        } else if gradient <= -self.fast {
            Trend::FallingFast
        } else if gradient <= -self.normal {
            Trend::Falling
        } else if gradient <= -self.slow && gradient < 0.0 {
            Trend::FallingSlow
        } else {
            Trend::Stable
        }
    }
}

/// Scorer tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// dBFS mapped to score 0 (-120..-20)
    pub floor_db: f64,
    /// dBFS mapped to full energy (floor+5..0)
    pub ceiling_db: f64,
    /// Share of the score carried by energy alone (0-1)
    pub energy_weight: f64,
    /// Zero-crossing rate treated as fully voiced (0.001-1)
    pub cry_zcr_reference: f64,
    /// Scores kept for the gradient (2-600)
    pub history_capacity: usize,
    pub trend: TrendThresholds,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            floor_db: -60.0,
            ceiling_db: -10.0,
            energy_weight: 0.8,
            cry_zcr_reference: 0.08,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            trend: TrendThresholds::default(),
        }
    }
}

impl ScorerConfig {
    pub fn clamped(self) -> Self {
        let defaults = Self::default();
        let floor_db = finite_or(self.floor_db, defaults.floor_db).clamp(-120.0, -20.0);
        let ceiling_db = finite_or(self.ceiling_db, defaults.ceiling_db).clamp(floor_db + 5.0, 0.0);
        Self {
            floor_db,
            ceiling_db,
            energy_weight: finite_or(self.energy_weight, defaults.energy_weight).clamp(0.0, 1.0),
            cry_zcr_reference: finite_or(self.cry_zcr_reference, defaults.cry_zcr_reference)
                .clamp(0.001, 1.0),
            history_capacity: self.history_capacity.clamp(2, 600),
            trend: self.trend.clamped(),
        }
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Scorer owning the score ring buffer
#[derive(Debug, Clone)]
pub struct UnrestScorer {
    config: ScorerConfig,
    history: VecDeque<UnrestScore>,
}

impl Default for UnrestScorer {
    fn default() -> Self {
        Self::new(ScorerConfig::default())
    }
}

impl UnrestScorer {
    pub fn new(config: ScorerConfig) -> Self {
        let config = config.clamped();
        Self {
            history: VecDeque::with_capacity(config.history_capacity),
            config,
        }
    }

    /// Score a feature vector and append it to the history
    pub fn score(&mut self, features: &FeatureVector, timestamp_millis: i64) -> UnrestScore {
        let score = UnrestScore::new(self.compute(features), timestamp_millis);
        self.record(score);
        score
    }

    /// Pure feature-to-score transform
    ///
    /// Reads the current window's energy only. Smoothed energy carries earlier
    /// windows and would keep a silent window scored as loud.
    pub fn compute(&self, features: &FeatureVector) -> f64 {
        let level = features.rms_energy;
        if !level.is_finite() || level <= 0.0 {
            return 0.0;
        }

        let db = 20.0 * level.log10();
        let span = self.config.ceiling_db - self.config.floor_db;
        let energy = ((db - self.config.floor_db) / span).clamp(0.0, 1.0);

        let voicing = (features.zero_crossing_rate / self.config.cry_zcr_reference).clamp(0.0, 1.0);
        let weight = self.config.energy_weight + (1.0 - self.config.energy_weight) * voicing;

        (100.0 * energy * weight).clamp(0.0, 100.0)
    }

    /// Append an externally computed score, evicting the oldest when full
    pub fn record(&mut self, score: UnrestScore) {
        self.history.push_back(score);
        while self.history.len() > self.config.history_capacity {
            self.history.pop_front();
        }
    }

    /// Least-squares gradient over the history and its trend bucket
    pub fn trend(&self) -> TrendReading {
        let gradient = compute_gradient(&self.history);
        TrendReading {
            gradient,
            trend: self.config.trend.classify(gradient),
        }
    }

    pub fn latest(&self) -> Option<UnrestScore> {
        self.history.back().copied()
    }

    pub fn history(&self) -> impl Iterator<Item = &UnrestScore> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

/// Slope of value over time in units per second; 0 with fewer than two samples
fn compute_gradient(history: &VecDeque<UnrestScore>) -> f64 {
    if history.len() < 2 {
        return 0.0;
    }

    let origin = history[0].timestamp_millis;
    let n = history.len() as f64;
    let (sum_t, sum_z) = history.iter().fold((0.0, 0.0), |(st, sz), s| {
        (st + (s.timestamp_millis - origin) as f64 / 1000.0, sz + s.value)
    });
    let mean_t = sum_t / n;
    let mean_z = sum_z / n;

    let (covariance, variance) = history.iter().fold((0.0, 0.0), |(cov, var), s| {
        let dt = (s.timestamp_millis - origin) as f64 / 1000.0 - mean_t;
        (cov + dt * (s.value - mean_z), var + dt * dt)
    });

    if variance <= f64::EPSILON {
        0.0
    } else {
        covariance / variance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureExtractor;

    fn features_with_rms(rms: f64, zcr: f64) -> FeatureVector {
        FeatureVector {
            rms_energy: rms,
            zero_crossing_rate: zcr,
            peak_amplitude: rms,
            smoothed_rms: rms,
            energy_delta: 0.0,
        }
    }

    #[test]
    fn test_silence_scores_low() {
        let mut extractor = FeatureExtractor::default();
        let features = extractor.extract(&vec![0.0; 1600]);
        let scorer = UnrestScorer::default();

        assert!(scorer.compute(&features) < 10.0);
    }

    #[test]
    fn test_silence_after_loud_windows_scores_low() {
        let mut extractor = FeatureExtractor::default();
        for _ in 0..5 {
            extractor.extract(&vec![0.5; 16_000]);
        }
        let features = extractor.extract(&vec![0.0; 16_000]);
        assert!(features.smoothed_rms > 0.0);

        let scorer = UnrestScorer::default();
        assert!(scorer.compute(&features) < 10.0);
    }

    #[test]
    fn test_quiet_room_scores_low() {
        let scorer = UnrestScorer::default();
        // roughly -66 dBFS with hiss-like zero crossings
        assert!(scorer.compute(&features_with_rms(0.0005, 0.4)) < 10.0);
    }

    #[test]
    fn test_monotonic_in_energy() {
        let scorer = UnrestScorer::default();
        let mut previous = -1.0;
        for step in 0..200 {
            let rms = 0.0001 * 1.05f64.powi(step);
            let value = scorer.compute(&features_with_rms(rms, 0.05));
            assert!(value >= previous);
            previous = value;
        }
        assert!(previous > 90.0);
    }

    #[test]
    fn test_voicing_never_exceeds_energy_envelope() {
        let scorer = UnrestScorer::default();
        let unvoiced = scorer.compute(&features_with_rms(0.05, 0.0));
        let voiced = scorer.compute(&features_with_rms(0.05, 0.08));

        assert!(voiced > unvoiced);
        assert!(voiced <= 100.0);
    }

    #[test]
    fn test_trend_requires_two_samples() {
        let mut scorer = UnrestScorer::default();
        assert_eq!(scorer.trend(), TrendReading::default());

        scorer.record(UnrestScore::new(50.0, 0));
        let reading = scorer.trend();
        assert_eq!(reading.gradient, 0.0);
        assert_eq!(reading.trend, Trend::Stable);
    }

    #[test]
    fn test_gradient_linear_rise() {
        let mut scorer = UnrestScorer::default();
        for i in 0..5 {
            scorer.record(UnrestScore::new(20.0 + 5.0 * i as f64, i * 1000));
        }
        let reading = scorer.trend();

        assert!((reading.gradient - 5.0).abs() < 1e-9);
        assert_eq!(reading.trend, Trend::Rising);
    }

    #[test]
    fn test_gradient_uses_wall_clock() {
        let mut scorer = UnrestScorer::default();
        // same values, half-second spacing: twice the slope
        for i in 0..5 {
            scorer.record(UnrestScore::new(20.0 + 5.0 * i as f64, i * 500));
        }
        assert!((scorer.trend().gradient - 10.0).abs() < 1e-9);
        assert_eq!(scorer.trend().trend, Trend::RisingFast);
    }

    #[test]
    fn test_default_trend_boundaries() {
        let t = TrendThresholds::default();
        assert_eq!(t.classify(8.0), Trend::RisingFast);
        assert_eq!(t.classify(7.99), Trend::Rising);
        assert_eq!(t.classify(3.0), Trend::Rising);
        assert_eq!(t.classify(2.99), Trend::RisingSlow);
        assert_eq!(t.classify(0.5), Trend::RisingSlow);
        assert_eq!(t.classify(0.49), Trend::Stable);
        assert_eq!(t.classify(0.0), Trend::Stable);
        assert_eq!(t.classify(-0.49), Trend::Stable);
        assert_eq!(t.classify(-0.5), Trend::FallingSlow);
        assert_eq!(t.classify(-3.0), Trend::Falling);
        assert_eq!(t.classify(-8.0), Trend::FallingFast);
    }

    #[test]
    fn test_zero_slow_threshold_keeps_zero_stable() {
        let t = TrendThresholds {
            fast: 8.0,
            normal: 3.0,
            slow: 0.0,
        };
        assert_eq!(t.classify(0.0), Trend::Stable);
        assert_eq!(t.classify(0.01), Trend::RisingSlow);
        assert_eq!(t.classify(-0.01), Trend::FallingSlow);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut scorer = UnrestScorer::new(ScorerConfig {
            history_capacity: 3,
            ..Default::default()
        });
        for i in 0..10 {
            scorer.record(UnrestScore::new(i as f64, i * 1000));
        }

        assert_eq!(scorer.len(), 3);
        let values: Vec<f64> = scorer.history().map(|s| s.value).collect();
        assert_eq!(values, vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_config_clamping() {
        let config = ScorerConfig {
            floor_db: -500.0,
            ceiling_db: -200.0,
            energy_weight: 3.0,
            cry_zcr_reference: 0.0,
            history_capacity: 0,
            trend: TrendThresholds {
                fast: 1.0,
                normal: 2.0,
                slow: f64::NAN,
            },
        }
        .clamped();

        assert_eq!(config.floor_db, -120.0);
        assert_eq!(config.ceiling_db, -115.0);
        assert_eq!(config.energy_weight, 1.0);
        assert_eq!(config.cry_zcr_reference, 0.001);
        assert_eq!(config.history_capacity, 2);
        assert_eq!(config.trend.slow, 0.5);
        assert!(config.trend.fast >= config.trend.normal);
    }
}
