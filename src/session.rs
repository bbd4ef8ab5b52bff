//! Session orchestration
//!
//! [`SoomiSession`] owns one monitoring session and runs the full pipeline:
//!
//! 1. FeatureExtractor - RMS, zero-crossing rate and smoothing per audio window
//! 2. UnrestScorer - score, zone and trend from the score history
//! 3. StateMachine - transitions and audio commands
//! 4. LearningEngine - profile selection when an intervention starts
//! 5. EventRecorder - event lifecycle, closed events fed back to learning
//!
//! All mutable session state sits behind one lock, so audio callbacks and user
//! commands can arrive from different threads. Persistence writes are queued and
//! never block the pipeline.

use crate::clock::{Clock, SystemClock};
use crate::config::SoomiConfig;
use crate::error::Result;
use crate::features::FeatureExtractor;
use crate::io::{AudioOutput, NullAudioOutput, Persistence, PersistRecord, PersistenceDispatcher};
use crate::learning::{LearningEngine, LearningStats, SharedLearningEngine};
use crate::recorder::{EventRecorder, OpenRequest};
use crate::scorer::UnrestScorer;
use crate::state_machine::{InterventionSignal, ScoreSample, StateMachine, StateSnapshot, Step};
use crate::types::{
    AudioCommand, BaselineMode, BaselineSettings, EventId, InterventionEvent, ProfileScore,
    ProfileSelection, SoomiState, TrendReading, TriggerType, UnrestScore, Zone,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of feeding one window or score into the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTick {
    pub state: SoomiState,
    pub score: UnrestScore,
    pub zone: Zone,
    pub trend: TrendReading,
    #[serde(flatten)]
    pub step: Step,
    /// Event finalized by this tick, if any
    pub closed_event: Option<InterventionEvent>,
}

/// Result of a control command (start, stop, panic, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlOutcome {
    pub state: SoomiState,
    #[serde(flatten)]
    pub step: Step,
    pub closed_events: Vec<InterventionEvent>,
}

/// Read-only copy of the session for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub machine: StateSnapshot,
    pub latest_score: Option<UnrestScore>,
    pub trend: TrendReading,
    pub active_event: Option<InterventionEvent>,
    pub last_command: Option<AudioCommand>,
}

struct SessionInner {
    config: SoomiConfig,
    extractor: FeatureExtractor,
    scorer: UnrestScorer,
    machine: StateMachine,
    recorder: EventRecorder,
    active_event: Option<EventId>,
    audio: Box<dyn AudioOutput>,
    last_command: Option<AudioCommand>,
}

/// Builder for [`SoomiSession`]
pub struct SessionBuilder {
    config: SoomiConfig,
    clock: Arc<dyn Clock>,
    audio: Box<dyn AudioOutput>,
    persistence: Option<Arc<dyn Persistence>>,
    learning: Option<SharedLearningEngine>,
    seed: Option<u64>,
}

impl SessionBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn audio(mut self, audio: Box<dyn AudioOutput>) -> Self {
        self.audio = audio;
        self
    }

    /// Store for events, profiles and transitions; profiles are loaded at build
    pub fn persistence(mut self, store: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(store);
        self
    }

    /// Share an existing learning engine instead of creating one
    pub fn learning(mut self, learning: SharedLearningEngine) -> Self {
        self.learning = Some(learning);
        self
    }

    /// Seed the exploration draws for reproducible runs
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<SoomiSession> {
        let config = self.config.clamped();
        let learning = match self.learning {
            Some(learning) => learning,
            None => {
                let engine = match self.seed {
                    Some(seed) => LearningEngine::seeded(config.learning.clone(), seed),
                    None => LearningEngine::new(config.learning.clone()),
                };
                engine.into_shared()
            }
        };

        let persistence = match self.persistence {
            Some(store) => {
                let dispatcher = PersistenceDispatcher::new(store, config.persistence_retry)?;
                match dispatcher.load_profiles() {
                    Ok(profiles) if !profiles.is_empty() => {
                        let mut engine = learning.lock();
                        if engine.profiles().is_empty() {
                            info!(count = profiles.len(), "restored learned profiles");
                            engine.load_profiles(profiles);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "could not load profiles, starting fresh"),
                }
                Some(dispatcher)
            }
            None => None,
        };

        let inner = SessionInner {
            extractor: FeatureExtractor::new(config.extractor),
            scorer: UnrestScorer::new(config.scorer),
            machine: StateMachine::new(config.intervention, config.baseline),
            recorder: EventRecorder::new(Arc::clone(&learning), config.utc_offset_minutes),
            active_event: None,
            audio: self.audio,
            last_command: None,
            config,
        };

        Ok(SoomiSession {
            inner: Mutex::new(inner),
            learning,
            clock: self.clock,
            persistence,
        })
    }
}

/// One monitoring session
pub struct SoomiSession {
    inner: Mutex<SessionInner>,
    learning: SharedLearningEngine,
    clock: Arc<dyn Clock>,
    persistence: Option<PersistenceDispatcher>,
}

impl SoomiSession {
    pub fn builder(config: SoomiConfig) -> SessionBuilder {
        SessionBuilder {
            config,
            clock: Arc::new(SystemClock),
            audio: Box::new(NullAudioOutput),
            persistence: None,
            learning: None,
            seed: None,
        }
    }

    /// Session with the system clock, no audio sink and no persistence
    pub fn new(config: SoomiConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Shared learning engine
    ///
    /// Session methods take the session lock before the learning lock. Release
    /// any guard on the returned engine before calling back into the session,
    /// or the two threads can deadlock.
    pub fn learning(&self) -> SharedLearningEngine {
        Arc::clone(&self.learning)
    }

    /// Snapshot of the learning statistics without exposing the lock
    pub fn learning_stats(&self) -> LearningStats {
        self.learning.lock().stats()
    }

    pub fn state(&self) -> SoomiState {
        self.inner.lock().machine.state()
    }

    pub fn config(&self) -> SoomiConfig {
        self.inner.lock().config.clone()
    }

    /// Replace the configuration
    ///
    /// Controller, learning and context settings apply to the next evaluation.
    /// Extractor and scorer settings apply from the next `start`.
    pub fn set_config(&self, config: SoomiConfig) {
        let config = config.clamped();
        let mut inner = self.inner.lock();
        inner.machine.set_config(config.intervention);
        inner.machine.set_baseline(config.baseline);
        inner.recorder.set_utc_offset(config.utc_offset_minutes);
        self.learning.lock().set_config(config.learning.clone());
        inner.config = config;
    }

    /// Change the ambient sound; takes effect at the next transition
    pub fn set_baseline(&self, baseline: BaselineSettings) {
        let mut inner = self.inner.lock();
        inner.machine.set_baseline(baseline);
        inner.config.baseline = baseline;
    }

    /// Begin monitoring; a fresh session id and event index are assigned
    pub fn start(&self) -> ControlOutcome {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        if inner.machine.state() == SoomiState::Stopped {
            let extractor_config = inner.config.extractor;
            let scorer_config = inner.config.scorer;
            inner.extractor = FeatureExtractor::new(extractor_config);
            inner.scorer = UnrestScorer::new(scorer_config);
            inner.recorder.begin_session(Uuid::new_v4().to_string(), now);
            info!(session = %inner.recorder.session_id(), "session started");
        }
        let step = inner.machine.start(now);
        self.finish_control(&mut inner, step, now)
    }

    /// End monitoring; any open event is closed with the last score
    pub fn stop(&self) -> ControlOutcome {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let last_score = inner.machine.snapshot().last_score;
        let step = inner.machine.stop(now);
        let mut outcome = self.finish_control(&mut inner, step, now);

        for closed in inner.recorder.close_all(last_score, now) {
            self.persist_closed(&closed.event, &closed.profile);
            outcome.closed_events.push(closed.event);
        }
        inner.active_event = None;
        outcome
    }

    /// Panic: silence immediately and pause
    pub fn force_stop(&self) -> ControlOutcome {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let step = inner.machine.force_stop(now);
        self.finish_control(&mut inner, step, now)
    }

    pub fn resume(&self) -> ControlOutcome {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let step = inner.machine.resume(now);
        self.finish_control(&mut inner, step, now)
    }

    /// "Soothe now"
    pub fn manual_soothe(&self) -> ControlOutcome {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let baseline_mode = inner.machine.baseline().mode;
        let learning = &self.learning;
        let recorder = &mut inner.recorder;
        let mut planner =
            |trigger| plan_intervention(recorder, learning, baseline_mode, now, trigger);
        let step = inner.machine.manual_soothe(now, &mut planner);
        self.finish_control(inner, step, now)
    }

    /// Note a feed for the POST_FEED context
    pub fn mark_feed(&self) {
        let now = self.clock.now_millis();
        self.inner.lock().recorder.mark_feed(now);
    }

    /// Process one window of float samples at the current clock time
    pub fn process_window(&self, samples: &[f32]) -> SessionTick {
        self.process_window_at(samples, self.clock.now_millis())
    }

    pub fn process_window_at(&self, samples: &[f32], timestamp_millis: i64) -> SessionTick {
        let mut inner = self.inner.lock();
        let features = inner.extractor.extract(samples);
        let score = inner.scorer.score(&features, timestamp_millis);
        let window_ms = inner.config.window_ms_for(samples.len());
        self.evaluate(&mut inner, score, window_ms)
    }

    /// Process one window of 16-bit PCM at the current clock time
    pub fn process_pcm16(&self, samples: &[i16]) -> SessionTick {
        let timestamp_millis = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let features = inner.extractor.extract_pcm16(samples);
        let score = inner.scorer.score(&features, timestamp_millis);
        let window_ms = inner.config.window_ms_for(samples.len());
        self.evaluate(&mut inner, score, window_ms)
    }

    /// Feed a score computed elsewhere, stamped with the current clock time
    pub fn process_score(&self, value: f64) -> SessionTick {
        self.process_score_at(value, self.clock.now_millis())
    }

    pub fn process_score_at(&self, value: f64, timestamp_millis: i64) -> SessionTick {
        let mut inner = self.inner.lock();
        let score = UnrestScore::new(value, timestamp_millis);
        inner.scorer.record(score);
        let window_ms = inner.config.window_ms;
        self.evaluate(&mut inner, score, window_ms)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock();
        SessionSnapshot {
            session_id: inner.recorder.session_id().to_string(),
            machine: inner.machine.snapshot(),
            latest_score: inner.scorer.latest(),
            trend: inner.scorer.trend(),
            active_event: inner.active_event.and_then(|id| inner.recorder.get(id)),
            last_command: inner.last_command.clone(),
        }
    }

    /// Learned profile table as JSON
    pub fn export_profiles(&self) -> Result<String> {
        Ok(self.learning.lock().to_json()?)
    }

    pub fn import_profiles(&self, json: &str) -> Result<()> {
        Ok(self.learning.lock().load_json(json)?)
    }

    fn evaluate(&self, inner: &mut SessionInner, score: UnrestScore, window_ms: u32) -> SessionTick {
        let now = score.timestamp_millis;
        let trend = inner.scorer.trend();
        if let Some(id) = inner.active_event {
            if let Err(e) = inner.recorder.update_peak(id, score.value) {
                debug!(error = %e, "peak update for missing event");
            }
        }

        let sample = ScoreSample {
            score,
            trend,
            window_ms,
        };
        let baseline_mode = inner.machine.baseline().mode;
        let learning = &self.learning;
        let SessionInner {
            machine, recorder, ..
        } = &mut *inner;
        let mut planner =
            |trigger| plan_intervention(recorder, learning, baseline_mode, now, trigger);
        let step = machine.on_sample(&sample, &mut planner);

        let closed_event = self.apply_step(inner, &step, now);
        SessionTick {
            state: inner.machine.state(),
            score,
            zone: score.zone(),
            trend,
            step,
            closed_event,
        }
    }

    fn finish_control(&self, inner: &mut SessionInner, step: Step, now: i64) -> ControlOutcome {
        let closed = self.apply_step(inner, &step, now);
        ControlOutcome {
            state: inner.machine.state(),
            step,
            closed_events: closed.into_iter().collect(),
        }
    }

    /// Carry out a step's side effects; returns the event it closed
    fn apply_step(&self, inner: &mut SessionInner, step: &Step, now: i64) -> Option<InterventionEvent> {
        if let Some(transition) = &step.transition {
            self.dispatch(PersistRecord::Transition(transition.clone()));
        }

        if let Some(command) = &step.command {
            inner.audio.apply(command);
            inner.last_command = Some(command.clone());
        }

        match step.intervention? {
            InterventionSignal::Started {
                selection,
                trigger,
                z_start,
                gradient,
            } => {
                let mut closed = None;
                if let Some(previous) = inner.active_event.take() {
                    warn!(event = %previous, "intervention started while another was open");
                    closed = self.close_event(inner, previous, z_start, now);
                }
                let request = OpenRequest {
                    z_start,
                    sound_type: selection.sound_type,
                    level: selection.level,
                    baseline_mode: inner.machine.baseline().mode,
                    trigger_type: trigger,
                    gradient_at_trigger: gradient,
                    is_exploration: selection.is_exploration,
                };
                inner.active_event = Some(inner.recorder.open(&request, now));
                closed
            }
            InterventionSignal::Escalated { to, .. } | InterventionSignal::Deescalated { to, .. } => {
                if let Some(id) = inner.active_event {
                    if let Err(e) = inner.recorder.update_level(id, to) {
                        debug!(error = %e, "level change for missing event");
                    }
                }
                None
            }
            InterventionSignal::Ended { z_end } => {
                let id = inner.active_event.take()?;
                self.close_event(inner, id, z_end, now)
            }
        }
    }

    fn close_event(
        &self,
        inner: &mut SessionInner,
        id: EventId,
        z_end: f64,
        now: i64,
    ) -> Option<InterventionEvent> {
        match inner.recorder.close(id, z_end, now) {
            Ok(closed) => {
                self.persist_closed(&closed.event, &closed.profile);
                Some(closed.event)
            }
            Err(e) => {
                debug!(error = %e, "close ignored");
                None
            }
        }
    }

    fn persist_closed(&self, event: &InterventionEvent, profile: &ProfileScore) {
        self.dispatch(PersistRecord::Event(event.clone()));
        self.dispatch(PersistRecord::Profile(profile.clone()));
    }

    fn dispatch(&self, record: PersistRecord) {
        if let Some(persistence) = &self.persistence {
            persistence.dispatch(record);
        }
    }
}

fn plan_intervention(
    recorder: &mut EventRecorder,
    learning: &SharedLearningEngine,
    baseline_mode: BaselineMode,
    now: i64,
    trigger: TriggerType,
) -> ProfileSelection {
    let (context, _) = recorder.context_at(now);
    let selection = learning.lock().select_profile(baseline_mode, context);
    debug!(
        trigger = ?trigger,
        context = ?context,
        sound = selection.sound_type.as_str(),
        level = ?selection.level,
        exploration = selection.is_exploration,
        "intervention planned"
    );
    selection
}
