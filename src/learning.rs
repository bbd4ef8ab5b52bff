//! Adaptive learning engine
//!
//! An epsilon-greedy contextual bandit over (sound type, level, baseline mode,
//! context tag) profiles. Selection runs once per intervention start; outcomes
//! are folded in once per intervention end.
//!
//! Selection:
//! - With probability epsilon, explore: a catalog arm for the current context that
//!   is still under-used, then any under-used profile in another context, then any
//!   catalog arm.
//! - Otherwise exploit the best trusted profile for (context, baseline mode), then
//!   for the context alone. With no trusted profile the call explores instead.
//! - With adaptation disabled, or an empty catalog, the fixed default profile.
//!
//! The profile table round-trips through JSON so hosts can persist it between
//! sessions.

use crate::types::{
    BaselineMode, ContextTag, InterventionEvent, InterventionLevel, ProfileKey, ProfileScore,
    ProfileSelection, SoundType,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Default exploration probability
pub const DEFAULT_EXPLORATION_RATE: f64 = 0.2;

/// Default weight of the previous score in the EMA update
pub const DEFAULT_DECAY: f64 = 0.8;

/// Uses required before a profile's score is trusted
pub const DEFAULT_MIN_USAGE_FOR_EXPLOITATION: u32 = 5;

/// Uses at which confidence saturates at 1.0
pub const DEFAULT_CONFIDENCE_SATURATION: u32 = 20;

/// Learning engine shared between the start and end of interventions
pub type SharedLearningEngine = Arc<Mutex<LearningEngine>>;

/// Bandit tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// When false, every selection returns the default profile
    pub adaptive_enabled: bool,
    /// Probability of exploring (0-1)
    pub exploration_rate: f64,
    /// Weight of the old score in the EMA update (0-1)
    pub decay: f64,
    /// Uses before a profile can be exploited (1-1000)
    pub min_usage_for_exploitation: u32,
    /// Uses at which confidence reaches 1.0 (1-1000)
    pub confidence_saturation: u32,
    /// Sounds the bandit may choose from
    pub sound_types: Vec<SoundType>,
    /// Levels the bandit may choose from
    pub levels: Vec<InterventionLevel>,
    pub default_sound_type: SoundType,
    pub default_level: InterventionLevel,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            adaptive_enabled: true,
            exploration_rate: DEFAULT_EXPLORATION_RATE,
            decay: DEFAULT_DECAY,
            min_usage_for_exploitation: DEFAULT_MIN_USAGE_FOR_EXPLOITATION,
            confidence_saturation: DEFAULT_CONFIDENCE_SATURATION,
            sound_types: vec![
                SoundType::WhiteNoise,
                SoundType::PinkNoise,
                SoundType::Heartbeat,
                SoundType::Shush,
            ],
            levels: InterventionLevel::PLAYABLE.to_vec(),
            default_sound_type: SoundType::WhiteNoise,
            default_level: InterventionLevel::Level1,
        }
    }
}

impl LearningConfig {
    pub fn clamped(mut self) -> Self {
        let defaults = Self::default();
        self.exploration_rate = if self.exploration_rate.is_finite() {
            self.exploration_rate.clamp(0.0, 1.0)
        } else {
            defaults.exploration_rate
        };
        self.decay = if self.decay.is_finite() {
            self.decay.clamp(0.0, 1.0)
        } else {
            defaults.decay
        };
        self.min_usage_for_exploitation = self.min_usage_for_exploitation.clamp(1, 1000);
        self.confidence_saturation = self.confidence_saturation.clamp(1, 1000);
        self.levels.retain(|level| *level != InterventionLevel::Off);
        dedup_in_order(&mut self.sound_types);
        dedup_in_order(&mut self.levels);
        if self.default_level == InterventionLevel::Off {
            self.default_level = InterventionLevel::Level1;
        }
        self
    }

    /// Every (sound, level) arm, in catalog order
    pub fn arms(&self) -> Vec<(SoundType, InterventionLevel)> {
        self.sound_types
            .iter()
            .flat_map(|sound| self.levels.iter().map(move |level| (*sound, *level)))
            .collect()
    }
}

fn dedup_in_order<T: PartialEq + Copy>(items: &mut Vec<T>) {
    let mut seen: Vec<T> = Vec::with_capacity(items.len());
    items.retain(|item| {
        if seen.contains(item) {
            false
        } else {
            seen.push(*item);
            true
        }
    });
}

/// Summary of what the engine has learned
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningStats {
    pub profile_count: usize,
    /// Profiles used often enough to be exploited
    pub trusted_profiles: usize,
    pub total_usage: u64,
    pub total_successes: u64,
    /// Successes over uses across all profiles
    pub success_rate: f64,
    pub best_profile: Option<ProfileScore>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProfileTable {
    profiles: Vec<ProfileScore>,
}

/// Epsilon-greedy bandit with an injectable random source
#[derive(Debug)]
pub struct LearningEngine<R = StdRng> {
    config: LearningConfig,
    profiles: Vec<ProfileScore>,
    index: HashMap<ProfileKey, usize>,
    rng: R,
}

impl Default for LearningEngine<StdRng> {
    fn default() -> Self {
        Self::new(LearningConfig::default())
    }
}

impl LearningEngine<StdRng> {
    /// Engine seeded from the operating system
    pub fn new(config: LearningConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Engine with a reproducible random source
    pub fn seeded(config: LearningConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    /// Wrap the engine for sharing across a session
    pub fn into_shared(self) -> SharedLearningEngine {
        Arc::new(Mutex::new(self))
    }
}

impl<R: Rng> LearningEngine<R> {
    pub fn with_rng(config: LearningConfig, rng: R) -> Self {
        Self {
            config: config.clamped(),
            profiles: Vec::new(),
            index: HashMap::new(),
            rng,
        }
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: LearningConfig) {
        self.config = config.clamped();
    }

    /// Choose the sound and level for the next intervention
    pub fn select_profile(
        &mut self,
        baseline_mode: BaselineMode,
        context_tag: ContextTag,
    ) -> ProfileSelection {
        if !self.config.adaptive_enabled {
            return self.default_selection(baseline_mode, context_tag);
        }

        let draw: f64 = self.rng.random();
        if draw >= self.config.exploration_rate {
            let best = self
                .best_trusted(context_tag, Some(baseline_mode))
                .or_else(|| self.best_trusted(context_tag, None));
            if let Some(profile) = best {
                let selection = ProfileSelection {
                    sound_type: profile.key.sound_type,
                    level: profile.key.level,
                    is_exploration: false,
                    confidence: self.confidence(profile.usage_count),
                };
                debug!(
                    sound = selection.sound_type.as_str(),
                    level = ?selection.level,
                    score = profile.effectiveness_score,
                    "exploiting profile"
                );
                return selection;
            }
            debug!(context = ?context_tag, "no trusted profile, exploring");
        }

        self.explore(baseline_mode, context_tag)
    }

    /// Fold a finished event into its profile's aggregate
    pub fn record_outcome(&mut self, event: &InterventionEvent) -> ProfileScore {
        let key = event.profile_key();
        let updated_at = event.start_timestamp + i64::from(event.duration_sec) * 1000;
        let decay = self.config.decay;

        let profile = match self.index.get(&key) {
            Some(&i) => {
                let profile = &mut self.profiles[i];
                if profile.usage_count == 0 {
                    *profile = seed_profile(key, event, updated_at);
                } else {
                    let old_count = f64::from(profile.usage_count);
                    profile.usage_count = profile.usage_count.saturating_add(1);
                    let new_count = f64::from(profile.usage_count);

                    profile.effectiveness_score = profile.effectiveness_score * decay
                        + event.effectiveness_score * (1.0 - decay);
                    if event.was_effective {
                        profile.success_count = profile.success_count.saturating_add(1);
                    }
                    if event.was_highly_effective {
                        profile.high_success_count = profile.high_success_count.saturating_add(1);
                    }
                    profile.avg_delta_z = (profile.avg_delta_z * old_count + event.delta_z) / new_count;
                    profile.avg_duration_sec = (profile.avg_duration_sec * old_count
                        + f64::from(event.duration_sec))
                        / new_count;
                    profile.last_used = profile.last_used.max(event.start_timestamp);
                    profile.last_updated = updated_at;
                }
                profile.clone()
            }
            None => {
                let profile = seed_profile(key, event, updated_at);
                self.index.insert(key, self.profiles.len());
                self.profiles.push(profile.clone());
                profile
            }
        };

        debug!(
            sound = key.sound_type.as_str(),
            level = ?key.level,
            context = ?key.context_tag,
            usage = profile.usage_count,
            score = profile.effectiveness_score,
            "profile updated"
        );
        profile
    }

    pub fn profile(&self, key: &ProfileKey) -> Option<&ProfileScore> {
        self.index.get(key).map(|&i| &self.profiles[i])
    }

    /// All profiles in first-seen order
    pub fn profiles(&self) -> &[ProfileScore] {
        &self.profiles
    }

    /// Replace the table with previously persisted profiles; later duplicates are dropped
    pub fn load_profiles(&mut self, profiles: Vec<ProfileScore>) {
        self.profiles.clear();
        self.index.clear();
        for profile in profiles {
            if self.index.contains_key(&profile.key) {
                continue;
            }
            self.index.insert(profile.key, self.profiles.len());
            self.profiles.push(profile);
        }
    }

    /// Load the profile table from JSON
    pub fn load_json(&mut self, json: &str) -> Result<(), serde_json::Error> {
        let table: ProfileTable = serde_json::from_str(json)?;
        self.load_profiles(table.profiles);
        Ok(())
    }

    /// Serialize the profile table to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&ProfileTable {
            profiles: self.profiles.clone(),
        })
    }

    pub fn stats(&self) -> LearningStats {
        let min_usage = self.config.min_usage_for_exploitation;
        let total_usage: u64 = self.profiles.iter().map(|p| u64::from(p.usage_count)).sum();
        let total_successes: u64 = self.profiles.iter().map(|p| u64::from(p.success_count)).sum();
        let best_profile = self
            .profiles
            .iter()
            .filter(|p| p.usage_count >= min_usage)
            .fold(None, |best: Option<&ProfileScore>, p| match best {
                Some(b) if b.effectiveness_score >= p.effectiveness_score => Some(b),
                _ => Some(p),
            })
            .cloned();

        LearningStats {
            profile_count: self.profiles.len(),
            trusted_profiles: self.profiles.iter().filter(|p| p.usage_count >= min_usage).count(),
            total_usage,
            total_successes,
            success_rate: if total_usage == 0 {
                0.0
            } else {
                total_successes as f64 / total_usage as f64
            },
            best_profile,
        }
    }

    /// Forget everything learned
    pub fn reset(&mut self) {
        self.profiles.clear();
        self.index.clear();
    }

    fn usage(&self, key: &ProfileKey) -> u32 {
        self.profile(key).map(|p| p.usage_count).unwrap_or(0)
    }

    fn confidence(&self, usage: u32) -> f64 {
        (f64::from(usage) / f64::from(self.config.confidence_saturation)).min(1.0)
    }

    fn in_catalog(&self, sound: SoundType, level: InterventionLevel) -> bool {
        self.config.sound_types.contains(&sound) && self.config.levels.contains(&level)
    }

    /// Highest score among trusted profiles; first seen wins ties
    fn best_trusted(
        &self,
        context_tag: ContextTag,
        baseline_mode: Option<BaselineMode>,
    ) -> Option<&ProfileScore> {
        let min_usage = self.config.min_usage_for_exploitation;
        self.profiles
            .iter()
            .filter(|p| p.key.context_tag == context_tag)
            .filter(|p| baseline_mode.map_or(true, |mode| p.key.baseline_mode == mode))
            .filter(|p| p.usage_count >= min_usage)
            .filter(|p| self.in_catalog(p.key.sound_type, p.key.level))
            .fold(None, |best: Option<&ProfileScore>, p| match best {
                Some(b) if b.effectiveness_score >= p.effectiveness_score => Some(b),
                _ => Some(p),
            })
    }

    fn explore(&mut self, baseline_mode: BaselineMode, context_tag: ContextTag) -> ProfileSelection {
        let min_usage = self.config.min_usage_for_exploitation;
        let arms = self.config.arms();
        let key_for = |(sound_type, level): (SoundType, InterventionLevel)| ProfileKey {
            sound_type,
            level,
            baseline_mode,
            context_tag,
        };

        let mut candidates: Vec<(SoundType, InterventionLevel)> = arms
            .iter()
            .copied()
            .filter(|arm| self.usage(&key_for(*arm)) < min_usage)
            .collect();

        if candidates.is_empty() {
            candidates = self
                .profiles
                .iter()
                .filter(|p| p.usage_count < min_usage)
                .filter(|p| self.in_catalog(p.key.sound_type, p.key.level))
                .map(|p| (p.key.sound_type, p.key.level))
                .collect();
        }

        if candidates.is_empty() {
            candidates = arms;
        }

        if candidates.is_empty() {
            return self.default_selection(baseline_mode, context_tag);
        }

        let arm = candidates[self.rng.random_range(0..candidates.len())];
        let selection = ProfileSelection {
            sound_type: arm.0,
            level: arm.1,
            is_exploration: true,
            confidence: self.confidence(self.usage(&key_for(arm))),
        };
        debug!(
            sound = selection.sound_type.as_str(),
            level = ?selection.level,
            candidates = candidates.len(),
            "exploring profile"
        );
        selection
    }

    fn default_selection(
        &self,
        baseline_mode: BaselineMode,
        context_tag: ContextTag,
    ) -> ProfileSelection {
        let key = ProfileKey {
            sound_type: self.config.default_sound_type,
            level: self.config.default_level,
            baseline_mode,
            context_tag,
        };
        ProfileSelection {
            sound_type: key.sound_type,
            level: key.level,
            is_exploration: false,
            confidence: self.confidence(self.usage(&key)),
        }
    }
}

fn seed_profile(key: ProfileKey, event: &InterventionEvent, updated_at: i64) -> ProfileScore {
    ProfileScore {
        key,
        effectiveness_score: event.effectiveness_score,
        usage_count: 1,
        success_count: u32::from(event.was_effective),
        high_success_count: u32::from(event.was_highly_effective),
        avg_delta_z: event.delta_z,
        avg_duration_sec: f64::from(event.duration_sec),
        last_used: event.start_timestamp,
        last_updated: updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TriggerType;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn make_event(
        sound_type: SoundType,
        level: InterventionLevel,
        context_tag: ContextTag,
        z_start: f64,
        z_end: f64,
        duration_sec: u32,
    ) -> InterventionEvent {
        let mut event = InterventionEvent {
            id: Uuid::new_v4(),
            session_id: "s".to_string(),
            start_timestamp: 1_000_000,
            z_start,
            z_peak: z_start,
            z_end: z_start,
            delta_z: 0.0,
            duration_sec: 0,
            effectiveness_score: 0.0,
            sound_type,
            level,
            final_level: level,
            baseline_mode: BaselineMode::Off,
            context_tag,
            hour_of_day: 2,
            index_in_session: 1,
            was_exploration: false,
            was_effective: false,
            was_highly_effective: false,
            trigger_type: TriggerType::Auto,
            gradient_at_trigger: 0.0,
        };
        event.finalize(z_end, duration_sec);
        event
    }

    fn train(
        engine: &mut LearningEngine,
        sound: SoundType,
        level: InterventionLevel,
        context: ContextTag,
        delta: f64,
        times: usize,
    ) {
        for _ in 0..times {
            engine.record_outcome(&make_event(sound, level, context, 70.0, 70.0 - delta, 60));
        }
    }

    #[test]
    fn test_first_outcome_seeds_profile() {
        let mut engine = LearningEngine::seeded(LearningConfig::default(), 1);
        let event = make_event(
            SoundType::Shush,
            InterventionLevel::Level2,
            ContextTag::Night,
            60.0,
            40.0,
            30,
        );
        let profile = engine.record_outcome(&event);

        assert_eq!(profile.usage_count, 1);
        assert_eq!(profile.success_count, 1);
        assert_eq!(profile.high_success_count, 0);
        assert!((profile.effectiveness_score - 40.0).abs() < 1e-9);
        assert_eq!(profile.avg_delta_z, 20.0);
        assert_eq!(profile.avg_duration_sec, 30.0);
        assert_eq!(profile.last_updated, 1_030_000);
    }

    #[test]
    fn test_ema_update() {
        let mut engine = LearningEngine::seeded(LearningConfig::default(), 1);
        let first = make_event(SoundType::Shush, InterventionLevel::Level1, ContextTag::Night, 60.0, 40.0, 30);
        let second = make_event(SoundType::Shush, InterventionLevel::Level1, ContextTag::Night, 60.0, 50.0, 60);
        engine.record_outcome(&first);
        let profile = engine.record_outcome(&second);

        // 40 * 0.8 + 10 * 0.2
        assert!((profile.effectiveness_score - 34.0).abs() < 1e-9);
        assert_eq!(profile.usage_count, 2);
        assert_eq!(profile.success_count, 1);
        assert!((profile.avg_delta_z - 15.0).abs() < 1e-9);
        assert!((profile.avg_duration_sec - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_identical_outcomes_converge() {
        let mut engine = LearningEngine::seeded(LearningConfig::default(), 1);
        let event = make_event(SoundType::Heartbeat, InterventionLevel::Level1, ContextTag::Evening, 70.0, 45.0, 50);
        for _ in 0..5 {
            engine.record_outcome(&event);
        }
        let profile = engine.profile(&event.profile_key()).unwrap();

        assert_eq!(profile.usage_count, 5);
        assert!((profile.effectiveness_score - event.effectiveness_score).abs() < 1e-9);
    }

    #[test]
    fn test_zero_usage_profile_is_reseeded() {
        let mut engine = LearningEngine::seeded(LearningConfig::default(), 1);
        let event = make_event(SoundType::Rain, InterventionLevel::Level1, ContextTag::Night, 60.0, 30.0, 60);
        engine.load_profiles(vec![ProfileScore {
            key: event.profile_key(),
            effectiveness_score: 99.0,
            usage_count: 0,
            success_count: 0,
            high_success_count: 0,
            avg_delta_z: 0.0,
            avg_duration_sec: 0.0,
            last_used: 0,
            last_updated: 0,
        }]);
        let profile = engine.record_outcome(&event);

        assert_eq!(profile.usage_count, 1);
        assert_eq!(profile.avg_delta_z, 30.0);
        assert_eq!(profile.effectiveness_score, 30.0);
    }

    #[test]
    fn test_no_data_explores() {
        let mut engine = LearningEngine::seeded(LearningConfig::default(), 7);
        for _ in 0..50 {
            let selection = engine.select_profile(BaselineMode::Off, ContextTag::Night);
            assert!(selection.is_exploration);
            assert_eq!(selection.confidence, 0.0);
        }
    }

    #[test]
    fn test_exploits_best_trusted_profile() {
        let config = LearningConfig {
            exploration_rate: 0.0,
            ..Default::default()
        };
        let mut engine = LearningEngine::seeded(config, 3);
        train(&mut engine, SoundType::WhiteNoise, InterventionLevel::Level1, ContextTag::Night, 10.0, 5);
        train(&mut engine, SoundType::Shush, InterventionLevel::Level2, ContextTag::Night, 30.0, 5);
        // better score but under-used
        train(&mut engine, SoundType::Heartbeat, InterventionLevel::Level1, ContextTag::Night, 50.0, 2);

        let selection = engine.select_profile(BaselineMode::Off, ContextTag::Night);
        assert_eq!(selection.sound_type, SoundType::Shush);
        assert_eq!(selection.level, InterventionLevel::Level2);
        assert!(!selection.is_exploration);
        assert!((selection.confidence - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_exploit_falls_back_to_context_only() {
        let config = LearningConfig {
            exploration_rate: 0.0,
            ..Default::default()
        };
        let mut engine = LearningEngine::seeded(config, 3);
        train(&mut engine, SoundType::PinkNoise, InterventionLevel::Level3, ContextTag::Daytime, 20.0, 6);

        let selection = engine.select_profile(BaselineMode::Medium, ContextTag::Daytime);
        assert_eq!(selection.sound_type, SoundType::PinkNoise);
        assert!(!selection.is_exploration);
    }

    #[test]
    fn test_tie_break_first_seen() {
        let config = LearningConfig {
            exploration_rate: 0.0,
            ..Default::default()
        };
        let mut engine = LearningEngine::seeded(config, 3);
        train(&mut engine, SoundType::Heartbeat, InterventionLevel::Level1, ContextTag::Night, 20.0, 5);
        train(&mut engine, SoundType::Shush, InterventionLevel::Level1, ContextTag::Night, 20.0, 5);

        for _ in 0..10 {
            let selection = engine.select_profile(BaselineMode::Off, ContextTag::Night);
            assert_eq!(selection.sound_type, SoundType::Heartbeat);
        }
    }

    #[test]
    fn test_exploration_prefers_under_used_arms() {
        let config = LearningConfig {
            exploration_rate: 1.0,
            sound_types: vec![SoundType::WhiteNoise, SoundType::Shush],
            levels: vec![InterventionLevel::Level1],
            ..Default::default()
        };
        let mut engine = LearningEngine::seeded(config, 11);
        train(&mut engine, SoundType::WhiteNoise, InterventionLevel::Level1, ContextTag::Night, 20.0, 5);

        for _ in 0..20 {
            let selection = engine.select_profile(BaselineMode::Off, ContextTag::Night);
            assert!(selection.is_exploration);
            assert_eq!(selection.sound_type, SoundType::Shush);
        }
    }

    #[test]
    fn test_exploration_rate_matches_epsilon() {
        let config = LearningConfig::default();
        let mut engine = LearningEngine::seeded(config.clone(), 2024);
        for (sound, level) in config.arms() {
            train(&mut engine, sound, level, ContextTag::Night, 20.0, 6);
        }

        let explorations = (0..1000)
            .filter(|_| {
                engine
                    .select_profile(BaselineMode::Off, ContextTag::Night)
                    .is_exploration
            })
            .count();
        assert!(
            (150..=250).contains(&explorations),
            "explorations = {explorations}"
        );
    }

    #[test]
    fn test_same_seed_same_choices() {
        let mut a = LearningEngine::seeded(LearningConfig::default(), 99);
        let mut b = LearningEngine::seeded(LearningConfig::default(), 99);
        for _ in 0..25 {
            assert_eq!(
                a.select_profile(BaselineMode::Low, ContextTag::DeepNight),
                b.select_profile(BaselineMode::Low, ContextTag::DeepNight)
            );
        }
    }

    #[test]
    fn test_adaptive_disabled_uses_default() {
        let config = LearningConfig {
            adaptive_enabled: false,
            default_sound_type: SoundType::Rain,
            default_level: InterventionLevel::Level2,
            ..Default::default()
        };
        let mut engine = LearningEngine::seeded(config, 5);
        let selection = engine.select_profile(BaselineMode::Off, ContextTag::Night);

        assert_eq!(selection.sound_type, SoundType::Rain);
        assert_eq!(selection.level, InterventionLevel::Level2);
        assert!(!selection.is_exploration);
    }

    #[test]
    fn test_empty_catalog_uses_default() {
        let config = LearningConfig {
            sound_types: Vec::new(),
            ..Default::default()
        };
        let mut engine = LearningEngine::seeded(config, 5);
        let selection = engine.select_profile(BaselineMode::Off, ContextTag::Night);
        assert_eq!(selection.sound_type, SoundType::WhiteNoise);
        assert_eq!(selection.level, InterventionLevel::Level1);
    }

    #[test]
    fn test_json_round_trip_preserves_order() {
        let mut engine = LearningEngine::seeded(LearningConfig::default(), 1);
        train(&mut engine, SoundType::Shush, InterventionLevel::Level1, ContextTag::Night, 20.0, 2);
        train(&mut engine, SoundType::Rain, InterventionLevel::Level2, ContextTag::Daytime, 25.0, 1);

        let json = engine.to_json().unwrap();
        let mut restored = LearningEngine::seeded(LearningConfig::default(), 2);
        restored.load_json(&json).unwrap();

        assert_eq!(restored.profiles(), engine.profiles());
    }

    #[test]
    fn test_stats_and_reset() {
        let mut engine = LearningEngine::seeded(LearningConfig::default(), 1);
        train(&mut engine, SoundType::Shush, InterventionLevel::Level1, ContextTag::Night, 20.0, 5);
        train(&mut engine, SoundType::Rain, InterventionLevel::Level1, ContextTag::Night, 5.0, 3);

        let stats = engine.stats();
        assert_eq!(stats.profile_count, 2);
        assert_eq!(stats.trusted_profiles, 1);
        assert_eq!(stats.total_usage, 8);
        assert_eq!(stats.total_successes, 5);
        assert_eq!(stats.best_profile.unwrap().key.sound_type, SoundType::Shush);

        engine.reset();
        assert_eq!(engine.stats(), LearningStats::default());
    }

    #[test]
    fn test_config_clamping() {
        let config = LearningConfig {
            exploration_rate: 1.5,
            decay: -0.2,
            min_usage_for_exploitation: 0,
            levels: vec![
                InterventionLevel::Off,
                InterventionLevel::Level2,
                InterventionLevel::Level2,
            ],
            default_level: InterventionLevel::Off,
            ..Default::default()
        }
        .clamped();

        assert_eq!(config.exploration_rate, 1.0);
        assert_eq!(config.decay, 0.0);
        assert_eq!(config.min_usage_for_exploitation, 1);
        assert_eq!(config.levels, vec![InterventionLevel::Level2]);
        assert_eq!(config.default_level, InterventionLevel::Level1);
    }
}
