//! Intervention state machine
//!
//! The control core of a monitoring session. It consumes (score, trend) samples
//! and user commands, and answers each with a [`Step`]: at most one transition
//! record, at most one audio command and at most one intervention lifecycle
//! signal for the event recorder.
//!
//! ```text
//! STOPPED -> IDLE/BASELINE -> LISTENING <-> PREDICTIVE -> SOOTHING <-> COOLDOWN -> LISTENING
//!                 any running state --panic--> PAUSED --resume--> LISTENING
//! ```
//!
//! Confirmation timers measure wall-clock time since the condition first held,
//! counting from the start of the window in which it became true. A sample that
//! breaks the condition resets the timer immediately.

use crate::types::{
    AudioCommand, BaselineSettings, InterventionLevel, ProfileSelection, SoomiState, SoundType,
    TransitionReason, TransitionRecord, TrendReading, TriggerType, UnrestScore,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Thresholds and durations of the controller.
///
/// Durations are whole seconds. Values are clamped into their tolerable range
/// by [`InterventionConfig::clamped`], which every constructor and setter applies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterventionConfig {
    /// Score that must be exceeded to start soothing (0-100)
    pub start_threshold: f64,
    pub start_confirm_sec: u32,
    /// Score the baby must stay under to be considered calm (0-start_threshold)
    pub calm_threshold: f64,
    pub calm_confirm_sec: u32,
    /// Score that re-enters soothing during cooldown (calm_threshold-100)
    pub retrigger_threshold: f64,
    pub retrigger_confirm_sec: u32,
    /// Minimum soothing time before cooldown is allowed
    pub min_soothing_sec: u32,
    /// Soothing time after which cooldown is forced
    pub max_soothing_sec: u32,
    pub cooldown_sec: u32,
    /// Level increases allowed within one event (0-3)
    pub max_escalations_per_event: u32,
    /// How long the score must stay over the level ceiling while rising
    pub escalation_confirm_sec: u32,
    /// Score under which an escalated level steps back down
    pub deescalate_threshold: f64,
    pub deescalate_confirm_sec: u32,
    pub predictive_enabled: bool,
    /// Gradient (units/s) that enters PREDICTIVE
    pub predictive_dzdt_threshold: f64,
    pub predictive_confirm_sec: u32,
    /// Score that turns PREDICTIVE into SOOTHING
    pub predictive_z_threshold: f64,
    /// Gradient under which PREDICTIVE falls back to LISTENING
    pub predictive_dzdt_calm_threshold: f64,
    /// Longest PREDICTIVE stay before falling back to LISTENING
    pub predictive_max_sec: u32,
    /// Settle time in IDLE/BASELINE after start; 0 starts directly in LISTENING
    pub settle_sec: u32,
}

impl Default for InterventionConfig {
    fn default() -> Self {
        Self {
            start_threshold: 55.0,
            start_confirm_sec: 3,
            calm_threshold: 30.0,
            calm_confirm_sec: 10,
            retrigger_threshold: 50.0,
            retrigger_confirm_sec: 2,
            min_soothing_sec: 30,
            max_soothing_sec: 900,
            cooldown_sec: 30,
            max_escalations_per_event: 2,
            escalation_confirm_sec: 5,
            deescalate_threshold: 45.0,
            deescalate_confirm_sec: 10,
            predictive_enabled: true,
            predictive_dzdt_threshold: 4.0,
            predictive_confirm_sec: 2,
            predictive_z_threshold: 45.0,
            predictive_dzdt_calm_threshold: 0.5,
            predictive_max_sec: 60,
            settle_sec: 0,
        }
    }
}

fn clamp_score(value: f64, low: f64, high: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(low, high)
    } else {
        fallback.clamp(low, high)
    }
}

impl InterventionConfig {
    /// Clamp every field into its tolerable range
    pub fn clamped(self) -> Self {
        let d = Self::default();
        let start_threshold = clamp_score(self.start_threshold, 0.0, 100.0, d.start_threshold);
        let calm_threshold = clamp_score(self.calm_threshold, 0.0, start_threshold, d.calm_threshold);
        let retrigger_threshold =
            clamp_score(self.retrigger_threshold, calm_threshold, 100.0, d.retrigger_threshold);
        let min_soothing_sec = self.min_soothing_sec.min(3600);
        let predictive_dzdt_threshold =
            clamp_score(self.predictive_dzdt_threshold, 0.1, 50.0, d.predictive_dzdt_threshold);

        Self {
            start_threshold,
            start_confirm_sec: self.start_confirm_sec.min(600),
            calm_threshold,
            calm_confirm_sec: self.calm_confirm_sec.min(600),
            retrigger_threshold,
            retrigger_confirm_sec: self.retrigger_confirm_sec.min(600),
            min_soothing_sec,
            max_soothing_sec: self.max_soothing_sec.clamp(min_soothing_sec.max(60), 7200),
            cooldown_sec: self.cooldown_sec.min(3600),
            max_escalations_per_event: self.max_escalations_per_event.min(3),
            escalation_confirm_sec: self.escalation_confirm_sec.min(600),
            deescalate_threshold: clamp_score(
                self.deescalate_threshold,
                calm_threshold,
                100.0,
                d.deescalate_threshold,
            ),
            deescalate_confirm_sec: self.deescalate_confirm_sec.min(600),
            predictive_enabled: self.predictive_enabled,
            predictive_dzdt_threshold,
            predictive_confirm_sec: self.predictive_confirm_sec.min(600),
            predictive_z_threshold: clamp_score(
                self.predictive_z_threshold,
                0.0,
                100.0,
                d.predictive_z_threshold,
            ),
            predictive_dzdt_calm_threshold: clamp_score(
                self.predictive_dzdt_calm_threshold,
                -50.0,
                predictive_dzdt_threshold,
                d.predictive_dzdt_calm_threshold,
            ),
            predictive_max_sec: self.predictive_max_sec.clamp(1, 3600),
            settle_sec: self.settle_sec.min(600),
        }
    }
}

/// One scored window fed to the controller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreSample {
    pub score: UnrestScore,
    pub trend: TrendReading,
    /// Length of the audio window the score covers
    pub window_ms: u32,
}

/// Chooses the sound and level when an intervention starts
pub trait InterventionPlanner {
    fn plan(&mut self, trigger: TriggerType) -> ProfileSelection;
}

impl<F> InterventionPlanner for F
where
    F: FnMut(TriggerType) -> ProfileSelection,
{
    fn plan(&mut self, trigger: TriggerType) -> ProfileSelection {
        self(trigger)
    }
}

/// Lifecycle signal for the event recorder
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum InterventionSignal {
    Started {
        selection: ProfileSelection,
        trigger: TriggerType,
        z_start: f64,
        gradient: f64,
    },
    Escalated {
        from: InterventionLevel,
        to: InterventionLevel,
    },
    Deescalated {
        from: InterventionLevel,
        to: InterventionLevel,
    },
    Ended {
        z_end: f64,
    },
}

/// Everything the controller decided for one input
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub transition: Option<TransitionRecord>,
    pub command: Option<AudioCommand>,
    pub intervention: Option<InterventionSignal>,
}

impl Step {
    /// True when the input was a no-op
    pub fn is_empty(&self) -> bool {
        self.transition.is_none() && self.command.is_none() && self.intervention.is_none()
    }
}

/// Read-only view of the controller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub state: SoomiState,
    pub sound_type: Option<SoundType>,
    pub level: InterventionLevel,
    pub trigger: Option<TriggerType>,
    pub escalations_in_event: u32,
    pub escalations_in_session: u32,
    pub last_score: f64,
    pub last_gradient: f64,
    pub state_entered_at: i64,
}

#[derive(Debug, Clone, Copy, Default)]
struct ConfirmTimer {
    since_millis: Option<i64>,
}

impl ConfirmTimer {
    /// Feed the condition; true once it has held for `required_sec`
    fn update(&mut self, condition: bool, window_start: i64, now: i64, required_sec: u32) -> bool {
        if !condition {
            self.since_millis = None;
            return false;
        }
        let since = *self.since_millis.get_or_insert(window_start);
        now - since >= i64::from(required_sec) * 1000
    }

    fn reset(&mut self) {
        self.since_millis = None;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Timers {
    start: ConfirmTimer,
    predictive: ConfirmTimer,
    calm: ConfirmTimer,
    retrigger: ConfirmTimer,
    escalation: ConfirmTimer,
    deescalation: ConfirmTimer,
}

#[derive(Debug, Clone, Copy)]
struct ActiveIntervention {
    selection: ProfileSelection,
    trigger: TriggerType,
    level: InterventionLevel,
    initial_level: InterventionLevel,
    escalations: u32,
    started_at: i64,
}

/// Finite-state controller for one monitoring session
#[derive(Debug, Clone)]
pub struct StateMachine {
    config: InterventionConfig,
    baseline: BaselineSettings,
    state: SoomiState,
    state_entered_at: i64,
    session_started_at: i64,
    last_score: f64,
    last_gradient: f64,
    timers: Timers,
    pending: Option<ProfileSelection>,
    active: Option<ActiveIntervention>,
    session_escalations: u32,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new(InterventionConfig::default(), BaselineSettings::default())
    }
}

impl StateMachine {
    pub fn new(config: InterventionConfig, baseline: BaselineSettings) -> Self {
        Self {
            config: config.clamped(),
            baseline,
            state: SoomiState::Stopped,
            state_entered_at: 0,
            session_started_at: 0,
            last_score: 0.0,
            last_gradient: 0.0,
            timers: Timers::default(),
            pending: None,
            active: None,
            session_escalations: 0,
        }
    }

    pub fn state(&self) -> SoomiState {
        self.state
    }

    pub fn config(&self) -> &InterventionConfig {
        &self.config
    }

    /// Replace the configuration; running confirmation timers keep their start
    pub fn set_config(&mut self, config: InterventionConfig) {
        self.config = config.clamped();
    }

    /// Replace the ambient settings; applied on the next transition
    pub fn set_baseline(&mut self, baseline: BaselineSettings) {
        self.baseline = baseline;
    }

    pub fn baseline(&self) -> BaselineSettings {
        self.baseline
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state: self.state,
            sound_type: self.active.map(|a| a.selection.sound_type),
            level: self
                .active
                .map(|a| a.level)
                .unwrap_or(InterventionLevel::Off),
            trigger: self.active.map(|a| a.trigger),
            escalations_in_event: self.active.map(|a| a.escalations).unwrap_or(0),
            escalations_in_session: self.session_escalations,
            last_score: self.last_score,
            last_gradient: self.last_gradient,
            state_entered_at: self.state_entered_at,
        }
    }

    /// Begin a session: STOPPED -> BASELINE, IDLE or LISTENING
    pub fn start(&mut self, now: i64) -> Step {
        if self.state != SoomiState::Stopped {
            debug!(state = ?self.state, "start ignored, session already running");
            return Step::default();
        }

        self.session_started_at = now;
        self.session_escalations = 0;
        self.last_score = 0.0;
        self.last_gradient = 0.0;
        self.active = None;
        self.pending = None;

        let (target, command) = if self.config.settle_sec == 0 {
            (SoomiState::Listening, self.listening_command())
        } else if self.baseline.mode.is_enabled() {
            (SoomiState::Baseline, self.baseline_command())
        } else {
            (SoomiState::Idle, AudioCommand::Silence)
        };
        self.enter(target, TransitionReason::Start, now, Some(command), None)
    }

    /// End the session from any state, closing an open intervention
    pub fn stop(&mut self, now: i64) -> Step {
        if self.state == SoomiState::Stopped {
            debug!("stop ignored, session not running");
            return Step::default();
        }

        let signal = self.finish_intervention();
        let step = self.enter(
            SoomiState::Stopped,
            TransitionReason::Stop,
            now,
            Some(AudioCommand::Silence),
            signal,
        );
        self.session_escalations = 0;
        step
    }

    /// Panic: silence everything and park in PAUSED
    pub fn force_stop(&mut self, now: i64) -> Step {
        if matches!(self.state, SoomiState::Stopped | SoomiState::Paused) {
            debug!(state = ?self.state, "force stop ignored, output already silent");
            return Step::default();
        }

        let signal = self.finish_intervention();
        self.pending = None;
        self.enter(
            SoomiState::Paused,
            TransitionReason::Panic,
            now,
            Some(AudioCommand::ForceStop),
            signal,
        )
    }

    /// Leave PAUSED back to LISTENING
    pub fn resume(&mut self, now: i64) -> Step {
        if self.state != SoomiState::Paused {
            debug!(state = ?self.state, "resume ignored, session not paused");
            return Step::default();
        }
        let command = self.listening_command();
        self.enter(
            SoomiState::Listening,
            TransitionReason::Resume,
            now,
            Some(command),
            None,
        )
    }

    /// User-initiated "soothe now", bypassing confirmation timers
    pub fn manual_soothe(&mut self, now: i64, planner: &mut dyn InterventionPlanner) -> Step {
        match self.state {
            SoomiState::Stopped => {
                debug!("manual soothe ignored, session not running");
                Step::default()
            }
            SoomiState::Soothing => {
                debug!("manual soothe ignored, already soothing");
                Step::default()
            }
            _ => {
                self.pending = None;
                let selection = planner.plan(TriggerType::Manual);
                self.begin_soothing(
                    selection,
                    TriggerType::Manual,
                    TransitionReason::ManualOverride,
                    now,
                )
            }
        }
    }

    /// Evaluate one scored window
    pub fn on_sample(&mut self, sample: &ScoreSample, planner: &mut dyn InterventionPlanner) -> Step {
        let now = sample.score.timestamp_millis;
        let window_start = now - i64::from(sample.window_ms);
        self.last_score = sample.score.value;
        self.last_gradient = sample.trend.gradient;

        match self.state {
            SoomiState::Stopped | SoomiState::Paused => Step::default(),
            SoomiState::Idle | SoomiState::Baseline => self.evaluate_settle(now),
            SoomiState::Listening => self.evaluate_listening(window_start, now, planner),
            SoomiState::Predictive => self.evaluate_predictive(now, planner),
            SoomiState::Soothing => self.evaluate_soothing(window_start, now),
            SoomiState::Cooldown => self.evaluate_cooldown(window_start, now, planner),
        }
    }

    fn evaluate_settle(&mut self, now: i64) -> Step {
        if now - self.session_started_at < i64::from(self.config.settle_sec) * 1000 {
            return Step::default();
        }
        let command = self.listening_command();
        self.enter(
            SoomiState::Listening,
            TransitionReason::SettleComplete,
            now,
            Some(command),
            None,
        )
    }

    fn evaluate_listening(
        &mut self,
        window_start: i64,
        now: i64,
        planner: &mut dyn InterventionPlanner,
    ) -> Step {
        let config = self.config;
        let z = self.last_score;
        let gradient = self.last_gradient;

        let start_ready = self.timers.start.update(
            z > config.start_threshold,
            window_start,
            now,
            config.start_confirm_sec,
        );
        if start_ready {
            let selection = planner.plan(TriggerType::Auto);
            return self.begin_soothing(
                selection,
                TriggerType::Auto,
                TransitionReason::StartConfirmed,
                now,
            );
        }

        if !config.predictive_enabled {
            self.timers.predictive.reset();
            return Step::default();
        }

        let predictive_ready = self.timers.predictive.update(
            gradient > config.predictive_dzdt_threshold,
            window_start,
            now,
            config.predictive_confirm_sec,
        );
        if !predictive_ready {
            return Step::default();
        }

        let selection = planner.plan(TriggerType::Predictive);
        self.pending = Some(selection);
        let command = AudioCommand::Play {
            sound_type: selection.sound_type,
            volume: InterventionLevel::Level1.volume(),
        };
        self.enter(
            SoomiState::Predictive,
            TransitionReason::PredictiveRise,
            now,
            Some(command),
            None,
        )
    }

    fn evaluate_predictive(&mut self, now: i64, planner: &mut dyn InterventionPlanner) -> Step {
        let config = self.config;

        if self.last_score > config.predictive_z_threshold {
            let selection = match self.pending.take() {
                Some(selection) => selection,
                None => planner.plan(TriggerType::Predictive),
            };
            return self.begin_soothing(
                selection,
                TriggerType::Predictive,
                TransitionReason::PredictiveEscalation,
                now,
            );
        }

        let reason = if self.last_gradient < config.predictive_dzdt_calm_threshold {
            TransitionReason::PredictiveCalm
        } else if now - self.state_entered_at >= i64::from(config.predictive_max_sec) * 1000 {
            TransitionReason::PredictiveTimeout
        } else {
            return Step::default();
        };

        self.pending = None;
        let command = self.listening_command();
        self.enter(SoomiState::Listening, reason, now, Some(command), None)
    }

    fn evaluate_soothing(&mut self, window_start: i64, now: i64) -> Step {
        let config = self.config;
        let z = self.last_score;
        let Some(mut active) = self.active else {
            // soothing without an intervention cannot happen; recover to listening
            let command = self.listening_command();
            return self.enter(
                SoomiState::Listening,
                TransitionReason::CalmConfirmed,
                now,
                Some(command),
                None,
            );
        };
        let elapsed = now - active.started_at;

        let calm = self.timers.calm.update(
            z < config.calm_threshold,
            window_start,
            now,
            config.calm_confirm_sec,
        );
        let reason = if calm && elapsed >= i64::from(config.min_soothing_sec) * 1000 {
            Some(TransitionReason::CalmConfirmed)
        } else if elapsed >= i64::from(config.max_soothing_sec) * 1000 {
            Some(TransitionReason::SoothingTimeout)
        } else {
            None
        };
        if let Some(reason) = reason {
            return self.begin_cooldown(reason, now);
        }

        let overwhelmed = active
            .level
            .escalation_ceiling()
            .map(|ceiling| z >= ceiling && self.last_gradient > 0.0)
            .unwrap_or(false);
        let can_escalate = active.escalations < config.max_escalations_per_event;
        let escalate = self.timers.escalation.update(
            overwhelmed && can_escalate,
            window_start,
            now,
            config.escalation_confirm_sec,
        );
        if escalate {
            let from = active.level;
            active.level = from.escalate();
            active.escalations += 1;
            self.session_escalations += 1;
            self.active = Some(active);
            self.timers.escalation.reset();
            self.timers.deescalation.reset();
            info!(?from, to = ?active.level, score = z, "escalating intervention");
            return Step {
                transition: None,
                command: Some(AudioCommand::Play {
                    sound_type: active.selection.sound_type,
                    volume: active.level.volume(),
                }),
                intervention: Some(InterventionSignal::Escalated {
                    from,
                    to: active.level,
                }),
            };
        }

        let settled = z < config.deescalate_threshold && active.level > active.initial_level;
        let deescalate = self.timers.deescalation.update(
            settled,
            window_start,
            now,
            config.deescalate_confirm_sec,
        );
        if deescalate {
            let from = active.level;
            active.level = from.deescalate().max(active.initial_level);
            self.active = Some(active);
            self.timers.deescalation.reset();
            info!(?from, to = ?active.level, score = z, "de-escalating intervention");
            return Step {
                transition: None,
                command: Some(AudioCommand::Play {
                    sound_type: active.selection.sound_type,
                    volume: active.level.volume(),
                }),
                intervention: Some(InterventionSignal::Deescalated {
                    from,
                    to: active.level,
                }),
            };
        }

        Step::default()
    }

    fn evaluate_cooldown(
        &mut self,
        window_start: i64,
        now: i64,
        planner: &mut dyn InterventionPlanner,
    ) -> Step {
        let config = self.config;

        let retrigger = self.timers.retrigger.update(
            self.last_score > config.retrigger_threshold,
            window_start,
            now,
            config.retrigger_confirm_sec,
        );
        if retrigger {
            let selection = planner.plan(TriggerType::Retrigger);
            return self.begin_soothing(
                selection,
                TriggerType::Retrigger,
                TransitionReason::Retrigger,
                now,
            );
        }

        if now - self.state_entered_at >= i64::from(config.cooldown_sec) * 1000 {
            let command = self.listening_command();
            return self.enter(
                SoomiState::Listening,
                TransitionReason::CooldownExpired,
                now,
                Some(command),
                None,
            );
        }

        Step::default()
    }

    fn begin_soothing(
        &mut self,
        selection: ProfileSelection,
        trigger: TriggerType,
        reason: TransitionReason,
        now: i64,
    ) -> Step {
        let level = selection.level.max(InterventionLevel::Level1);
        let selection = ProfileSelection { level, ..selection };
        self.active = Some(ActiveIntervention {
            selection,
            trigger,
            level,
            initial_level: level,
            escalations: 0,
            started_at: now,
        });

        let command = AudioCommand::Play {
            sound_type: selection.sound_type,
            volume: level.volume(),
        };
        let signal = InterventionSignal::Started {
            selection,
            trigger,
            z_start: self.last_score,
            gradient: self.last_gradient,
        };
        self.enter(SoomiState::Soothing, reason, now, Some(command), Some(signal))
    }

    fn begin_cooldown(&mut self, reason: TransitionReason, now: i64) -> Step {
        let Some(active) = self.active else {
            return Step::default();
        };
        let command = AudioCommand::Fade {
            sound_type: active.selection.sound_type,
            from_volume: active.level.volume(),
            to_volume: self.baseline.mode.volume(),
            duration_sec: self.config.cooldown_sec,
        };
        let signal = self.finish_intervention();
        self.enter(SoomiState::Cooldown, reason, now, Some(command), signal)
    }

    /// Close the open intervention, if any, with the last known score
    fn finish_intervention(&mut self) -> Option<InterventionSignal> {
        self.active.take().map(|_| InterventionSignal::Ended {
            z_end: self.last_score,
        })
    }

    fn listening_command(&self) -> AudioCommand {
        if self.baseline.mode.is_enabled() {
            self.baseline_command()
        } else {
            AudioCommand::Silence
        }
    }

    fn baseline_command(&self) -> AudioCommand {
        AudioCommand::Play {
            sound_type: self.baseline.sound_type,
            volume: self.baseline.mode.volume(),
        }
    }

    /// Apply a transition; a same-state move is dropped along with its command
    fn enter(
        &mut self,
        to: SoomiState,
        reason: TransitionReason,
        now: i64,
        command: Option<AudioCommand>,
        intervention: Option<InterventionSignal>,
    ) -> Step {
        if to == self.state {
            return Step::default();
        }

        let record = TransitionRecord {
            from_state: self.state,
            to_state: to,
            reason,
            score_at_transition: self.last_score,
            timestamp_millis: now,
        };
        info!(
            from = ?record.from_state,
            to = ?record.to_state,
            ?reason,
            score = record.score_at_transition,
            "state transition"
        );

        self.state = to;
        self.state_entered_at = now;
        self.timers = Timers::default();

        Step {
            transition: Some(record),
            command,
            intervention,
        }
    }
}
