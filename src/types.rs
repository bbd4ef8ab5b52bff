//! Core types for the Soomi engine
//!
//! This module defines the data that flows through the pipeline: unrest scores and
//! trends, controller states, intervention levels, bandit profile identities and
//! aggregates, and the per-intervention event record.
//!
//! Persisted shapes keep their historical units: unrest values are floats in
//! [0, 100], durations are whole seconds and timestamps are epoch milliseconds.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of one intervention event
pub type EventId = Uuid;

/// Lower bound of the ACTIVE zone
pub const ACTIVE_ZONE_START: f64 = 35.0;

/// Lower bound of the UNREST zone
pub const UNREST_ZONE_START: f64 = 70.0;

/// Minimum score drop for an event to count as effective
pub const EFFECTIVE_DELTA_Z: f64 = 15.0;

/// Minimum score drop for an event to count as highly effective
pub const HIGHLY_EFFECTIVE_DELTA_Z: f64 = 30.0;

/// Maximum duration of a highly effective event
pub const HIGHLY_EFFECTIVE_MAX_DURATION_SEC: u32 = 60;

/// One unrest reading derived from an audio window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnrestScore {
    /// Unrest value (0-100)
    pub value: f64,
    /// End of the window this score describes (epoch ms)
    pub timestamp_millis: i64,
}

impl UnrestScore {
    /// Create a score, clamping the value into [0, 100]
    pub fn new(value: f64, timestamp_millis: i64) -> Self {
        let value = if value.is_finite() {
            value.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            value,
            timestamp_millis,
        }
    }

    pub fn zone(&self) -> Zone {
        Zone::from_score(self.value)
    }
}

/// Coarse classification of an unrest value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Zone {
    Calm,
    Active,
    Unrest,
}

impl Zone {
    /// Half-open bins: [0, 35) calm, [35, 70) active, [70, 100] unrest
    pub fn from_score(value: f64) -> Self {
        if value < ACTIVE_ZONE_START {
            Zone::Calm
        } else if value < UNREST_ZONE_START {
            Zone::Active
        } else {
            Zone::Unrest
        }
    }
}

/// Discretized direction of the unrest score, fastest rise first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    RisingFast,
    Rising,
    RisingSlow,
    Stable,
    FallingSlow,
    Falling,
    FallingFast,
}

impl Trend {
    pub fn is_rising(&self) -> bool {
        matches!(self, Trend::RisingFast | Trend::Rising | Trend::RisingSlow)
    }

    pub fn is_falling(&self) -> bool {
        matches!(
            self,
            Trend::FallingSlow | Trend::Falling | Trend::FallingFast
        )
    }
}

/// Signed gradient of the score history plus its bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendReading {
    /// Score units per second
    pub gradient: f64,
    pub trend: Trend,
}

impl Default for TrendReading {
    fn default() -> Self {
        Self {
            gradient: 0.0,
            trend: Trend::Stable,
        }
    }
}

/// Controller states of one monitoring session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SoomiState {
    /// Session not running
    Stopped,
    /// Silent settle period right after start
    Idle,
    /// Settle period with ambient baseline sound
    Baseline,
    /// Resting monitoring state
    Listening,
    /// Soft pre-emptive intervention on a fast rise
    Predictive,
    /// Active intervention
    Soothing,
    /// Fading out after a calmed intervention
    Cooldown,
    /// Forced stop via panic; output silenced until resumed
    Paused,
}

impl SoomiState {
    /// Whether output may be audible in this state
    pub fn may_play_sound(&self) -> bool {
        !matches!(
            self,
            SoomiState::Stopped | SoomiState::Idle | SoomiState::Paused
        )
    }

    /// Whether the session is running (anything but STOPPED)
    pub fn is_active(&self) -> bool {
        !matches!(self, SoomiState::Stopped)
    }

    pub fn is_intervening(&self) -> bool {
        matches!(
            self,
            SoomiState::Predictive | SoomiState::Soothing | SoomiState::Cooldown
        )
    }
}

/// Intervention intensity, ordered from silent to loudest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterventionLevel {
    Off,
    #[serde(rename = "LEVEL_1")]
    Level1,
    #[serde(rename = "LEVEL_2")]
    Level2,
    #[serde(rename = "LEVEL_3")]
    Level3,
}

impl InterventionLevel {
    /// Levels that can be chosen for an intervention
    pub const PLAYABLE: [InterventionLevel; 3] = [
        InterventionLevel::Level1,
        InterventionLevel::Level2,
        InterventionLevel::Level3,
    ];

    /// Output volume multiplier (0-1)
    pub fn volume(&self) -> f64 {
        match self {
            InterventionLevel::Off => 0.0,
            InterventionLevel::Level1 => 0.4,
            InterventionLevel::Level2 => 0.65,
            InterventionLevel::Level3 => 0.9,
        }
    }

    /// One step up, clamped at LEVEL_3
    pub fn escalate(&self) -> Self {
        match self {
            InterventionLevel::Off => InterventionLevel::Level1,
            InterventionLevel::Level1 => InterventionLevel::Level2,
            InterventionLevel::Level2 | InterventionLevel::Level3 => InterventionLevel::Level3,
        }
    }

    /// One step down, clamped at OFF
    pub fn deescalate(&self) -> Self {
        match self {
            InterventionLevel::Off | InterventionLevel::Level1 => InterventionLevel::Off,
            InterventionLevel::Level2 => InterventionLevel::Level1,
            InterventionLevel::Level3 => InterventionLevel::Level2,
        }
    }

    /// Score above which this level is considered overwhelmed.
    /// LEVEL_3 has no ceiling.
    pub fn escalation_ceiling(&self) -> Option<f64> {
        match self {
            InterventionLevel::Off => Some(0.0),
            InterventionLevel::Level1 => Some(UNREST_ZONE_START),
            InterventionLevel::Level2 => Some(85.0),
            InterventionLevel::Level3 => None,
        }
    }
}

/// Soothing sound variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SoundType {
    WhiteNoise,
    PinkNoise,
    BrownNoise,
    Heartbeat,
    Shush,
    Rain,
}

impl SoundType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SoundType::WhiteNoise => "white_noise",
            SoundType::PinkNoise => "pink_noise",
            SoundType::BrownNoise => "brown_noise",
            SoundType::Heartbeat => "heartbeat",
            SoundType::Shush => "shush",
            SoundType::Rain => "rain",
        }
    }
}

/// Ambient background intensity, independent of intervention state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BaselineMode {
    #[default]
    Off,
    Low,
    Medium,
    High,
}

impl BaselineMode {
    /// Ambient volume (0-1)
    pub fn volume(&self) -> f64 {
        match self {
            BaselineMode::Off => 0.0,
            BaselineMode::Low => 0.1,
            BaselineMode::Medium => 0.2,
            BaselineMode::High => 0.3,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, BaselineMode::Off)
    }
}

/// Ambient sound configuration supplied with the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineSettings {
    pub mode: BaselineMode,
    pub sound_type: SoundType,
}

impl Default for BaselineSettings {
    fn default() -> Self {
        Self {
            mode: BaselineMode::Off,
            sound_type: SoundType::PinkNoise,
        }
    }
}

/// Situational label used to condition profile selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextTag {
    DeepNight,
    EarlyMorning,
    Daytime,
    Evening,
    Night,
    HighActivity,
    Settling,
    PostFeed,
}

/// What started an intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    Auto,
    Predictive,
    Retrigger,
    Manual,
}

/// Identity of one bandit arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileKey {
    pub sound_type: SoundType,
    pub level: InterventionLevel,
    pub baseline_mode: BaselineMode,
    pub context_tag: ContextTag,
}

/// Outcome of a profile selection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileSelection {
    pub sound_type: SoundType,
    pub level: InterventionLevel,
    pub is_exploration: bool,
    /// min(1, usage / 20) of the chosen profile
    pub confidence: f64,
}

/// Aggregated outcome statistics for one profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileScore {
    #[serde(flatten)]
    pub key: ProfileKey,
    /// EMA of per-event effectiveness (score drop per minute)
    pub effectiveness_score: f64,
    pub usage_count: u32,
    pub success_count: u32,
    pub high_success_count: u32,
    pub avg_delta_z: f64,
    pub avg_duration_sec: f64,
    /// Start of the most recent event using this profile (epoch ms)
    pub last_used: i64,
    /// When the aggregate last changed (epoch ms)
    pub last_updated: i64,
}

impl ProfileScore {
    pub fn success_rate(&self) -> f64 {
        if self.usage_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.usage_count as f64
        }
    }
}

/// Record of one intervention occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionEvent {
    pub id: EventId,
    pub session_id: String,
    /// Epoch ms
    pub start_timestamp: i64,
    pub z_start: f64,
    pub z_peak: f64,
    pub z_end: f64,
    /// `z_start - z_end`; positive means the baby calmed
    pub delta_z: f64,
    pub duration_sec: u32,
    /// Score drop per minute
    pub effectiveness_score: f64,
    pub sound_type: SoundType,
    /// Level chosen when the event opened; the outcome is learned under it
    pub level: InterventionLevel,
    /// Level playing when the event closed, after any escalation
    pub final_level: InterventionLevel,
    pub baseline_mode: BaselineMode,
    pub context_tag: ContextTag,
    pub hour_of_day: u8,
    /// 1-based position within the session
    pub index_in_session: u32,
    pub was_exploration: bool,
    pub was_effective: bool,
    pub was_highly_effective: bool,
    pub trigger_type: TriggerType,
    pub gradient_at_trigger: f64,
}

impl InterventionEvent {
    pub fn profile_key(&self) -> ProfileKey {
        ProfileKey {
            sound_type: self.sound_type,
            level: self.level,
            baseline_mode: self.baseline_mode,
            context_tag: self.context_tag,
        }
    }

    /// Fill the outcome fields from the closing score and elapsed time
    pub fn finalize(&mut self, z_end: f64, duration_sec: u32) {
        self.z_end = z_end;
        self.z_peak = self.z_peak.max(z_end);
        self.duration_sec = duration_sec;
        self.delta_z = self.z_start - z_end;
        self.effectiveness_score = if duration_sec > 0 {
            (self.delta_z / duration_sec as f64) * 60.0
        } else {
            0.0
        };
        self.was_effective = self.delta_z >= EFFECTIVE_DELTA_Z;
        self.was_highly_effective = self.delta_z >= HIGHLY_EFFECTIVE_DELTA_Z
            && duration_sec <= HIGHLY_EFFECTIVE_MAX_DURATION_SEC;
    }
}

/// Command issued to the audio output sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AudioCommand {
    /// Start or retarget playback
    Play { sound_type: SoundType, volume: f64 },
    /// Ramp volume over a duration
    Fade {
        sound_type: SoundType,
        from_volume: f64,
        to_volume: f64,
        duration_sec: u32,
    },
    /// Stop playback
    Silence,
    /// Unconditional hard stop
    ForceStop,
}

/// Why a state transition happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    Start,
    Stop,
    SettleComplete,
    StartConfirmed,
    PredictiveRise,
    PredictiveEscalation,
    PredictiveCalm,
    PredictiveTimeout,
    CalmConfirmed,
    SoothingTimeout,
    Retrigger,
    CooldownExpired,
    ManualOverride,
    Panic,
    Resume,
}

/// Log record of one state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from_state: SoomiState,
    pub to_state: SoomiState,
    pub reason: TransitionReason,
    pub score_at_transition: f64,
    pub timestamp_millis: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_event(z_start: f64) -> InterventionEvent {
        InterventionEvent {
            id: Uuid::new_v4(),
            session_id: "session-1".to_string(),
            start_timestamp: 0,
            z_start,
            z_peak: z_start,
            z_end: z_start,
            delta_z: 0.0,
            duration_sec: 0,
            effectiveness_score: 0.0,
            sound_type: SoundType::WhiteNoise,
            level: InterventionLevel::Level1,
            final_level: InterventionLevel::Level1,
            baseline_mode: BaselineMode::Off,
            context_tag: ContextTag::Night,
            hour_of_day: 22,
            index_in_session: 1,
            was_exploration: false,
            was_effective: false,
            was_highly_effective: false,
            trigger_type: TriggerType::Auto,
            gradient_at_trigger: 0.0,
        }
    }

    #[test]
    fn test_zone_boundaries() {
        assert_eq!(Zone::from_score(0.0), Zone::Calm);
        assert_eq!(Zone::from_score(34.999), Zone::Calm);
        assert_eq!(Zone::from_score(35.0), Zone::Active);
        assert_eq!(Zone::from_score(69.999), Zone::Active);
        assert_eq!(Zone::from_score(70.0), Zone::Unrest);
        assert_eq!(Zone::from_score(100.0), Zone::Unrest);
    }

    #[test]
    fn test_zone_partition_has_no_gaps() {
        let mut value = 0.0;
        let mut previous = Zone::Calm;
        while value <= 100.0 {
            let zone = Zone::from_score(value);
            // zones only ever move upward as the score increases
            assert!(zone as u8 >= previous as u8);
            previous = zone;
            value += 0.25;
        }
        assert_eq!(previous, Zone::Unrest);
    }

    #[test]
    fn test_level_round_trip_mid_range() {
        for level in [InterventionLevel::Level2, InterventionLevel::Level3] {
            assert_eq!(level.deescalate().escalate(), level);
        }
    }

    #[test]
    fn test_level_clamps() {
        assert_eq!(InterventionLevel::Off.deescalate(), InterventionLevel::Off);
        assert_eq!(
            InterventionLevel::Level3.escalate(),
            InterventionLevel::Level3
        );
        assert_eq!(InterventionLevel::Level1.deescalate(), InterventionLevel::Off);
        assert!(InterventionLevel::Level3.volume() > InterventionLevel::Level1.volume());
    }

    #[test]
    fn test_state_sound_mapping() {
        assert!(!SoomiState::Stopped.may_play_sound());
        assert!(!SoomiState::Idle.may_play_sound());
        assert!(!SoomiState::Paused.may_play_sound());
        assert!(SoomiState::Listening.may_play_sound());
        assert!(SoomiState::Soothing.may_play_sound());
        assert!(SoomiState::Cooldown.may_play_sound());
    }

    #[test]
    fn test_event_finalize() {
        let mut event = make_event(60.0);
        event.finalize(40.0, 30);

        assert_eq!(event.delta_z, 20.0);
        assert!((event.effectiveness_score - 40.0).abs() < 1e-9);
        assert!(event.was_effective);
        assert!(!event.was_highly_effective);
    }

    #[test]
    fn test_event_finalize_zero_duration() {
        let mut event = make_event(80.0);
        event.finalize(40.0, 0);

        assert_eq!(event.effectiveness_score, 0.0);
        assert!(event.was_effective);
        assert!(event.was_highly_effective);
    }

    #[test]
    fn test_score_clamps_value() {
        assert_eq!(UnrestScore::new(140.0, 0).value, 100.0);
        assert_eq!(UnrestScore::new(-3.0, 0).value, 0.0);
        assert_eq!(UnrestScore::new(f64::NAN, 0).value, 0.0);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&InterventionLevel::Level2).unwrap();
        assert_eq!(json, "\"LEVEL_2\"");
        let json = serde_json::to_string(&Trend::RisingFast).unwrap();
        assert_eq!(json, "\"RISING_FAST\"");
    }
}
