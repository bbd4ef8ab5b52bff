//! Engine configuration
//!
//! One JSON document carries every tunable. Missing fields take their defaults
//! and out-of-range values are clamped when the document is loaded, so a session
//! never sees an invalid threshold.

use crate::error::{Result, SoomiError};
use crate::features::ExtractorConfig;
use crate::io::RetryPolicy;
use crate::learning::LearningConfig;
use crate::scorer::ScorerConfig;
use crate::state_machine::InterventionConfig;
use crate::types::BaselineSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default audio window length (ms)
pub const DEFAULT_WINDOW_MS: u32 = 1000;

/// Default input sample rate (Hz)
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 16_000;

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoomiConfig {
    /// Sample rate of raw windows, used to derive window length (8000-96000)
    pub sample_rate_hz: u32,
    /// Window length assumed for externally scored samples (100-10000)
    pub window_ms: u32,
    /// Local time offset from UTC for hour-of-day (minutes, -840..840)
    pub utc_offset_minutes: i32,
    pub baseline: BaselineSettings,
    pub extractor: ExtractorConfig,
    pub scorer: ScorerConfig,
    pub intervention: InterventionConfig,
    pub learning: LearningConfig,
    pub persistence_retry: RetryPolicy,
}

impl Default for SoomiConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            window_ms: DEFAULT_WINDOW_MS,
            utc_offset_minutes: 0,
            baseline: BaselineSettings::default(),
            extractor: ExtractorConfig::default(),
            scorer: ScorerConfig::default(),
            intervention: InterventionConfig::default(),
            learning: LearningConfig::default(),
            persistence_retry: RetryPolicy::default(),
        }
    }
}

impl SoomiConfig {
    /// Pull every value into its valid range
    pub fn clamped(self) -> Self {
        Self {
            sample_rate_hz: self.sample_rate_hz.clamp(8_000, 96_000),
            window_ms: self.window_ms.clamp(100, 10_000),
            utc_offset_minutes: self.utc_offset_minutes.clamp(-14 * 60, 14 * 60),
            baseline: self.baseline,
            extractor: self.extractor.clamped(),
            scorer: self.scorer.clamped(),
            intervention: self.intervention.clamped(),
            learning: self.learning.clamped(),
            persistence_retry: self.persistence_retry.clamped(),
        }
    }

    /// Parse and clamp a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.clamped())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SoomiError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Window length for a raw buffer at the configured sample rate
    pub fn window_ms_for(&self, sample_count: usize) -> u32 {
        let ms = sample_count as u64 * 1000 / u64::from(self.sample_rate_hz.max(1));
        ms.min(u64::from(u32::MAX)) as u32
    }
}
