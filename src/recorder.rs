//! Intervention event recorder
//!
//! Tracks every intervention from open to close. Opening captures the local hour,
//! the derived context tag and the 1-based index within the session. Closing
//! finalizes the outcome fields and folds the event into the learning engine.

use crate::context::{local_hour, ContextSignals, ACTIVITY_WINDOW_MINUTES};
use crate::error::{Result, SoomiError};
use crate::learning::SharedLearningEngine;
use crate::types::{
    BaselineMode, ContextTag, EventId, InterventionEvent, InterventionLevel, ProfileScore,
    SoundType, TriggerType,
};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything known about an intervention when it starts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenRequest {
    pub z_start: f64,
    pub sound_type: SoundType,
    pub level: InterventionLevel,
    pub baseline_mode: BaselineMode,
    pub trigger_type: TriggerType,
    pub gradient_at_trigger: f64,
    pub is_exploration: bool,
}

/// A finished event together with the profile it updated
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedEvent {
    pub event: InterventionEvent,
    pub profile: ProfileScore,
}

#[derive(Debug, Clone)]
struct OpenEvent {
    event: InterventionEvent,
    opened_at: i64,
}

/// Owns the in-flight events of one monitoring session
pub struct EventRecorder {
    session_id: String,
    utc_offset_minutes: i32,
    session_started_at: Option<i64>,
    last_feed_at: Option<i64>,
    recent_starts: VecDeque<i64>,
    next_index: u32,
    open: HashMap<EventId, OpenEvent>,
    learning: SharedLearningEngine,
}

impl EventRecorder {
    pub fn new(learning: SharedLearningEngine, utc_offset_minutes: i32) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            utc_offset_minutes,
            session_started_at: None,
            last_feed_at: None,
            recent_starts: VecDeque::new(),
            next_index: 0,
            open: HashMap::new(),
            learning,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn learning(&self) -> &SharedLearningEngine {
        &self.learning
    }

    pub fn set_utc_offset(&mut self, utc_offset_minutes: i32) {
        self.utc_offset_minutes = utc_offset_minutes;
    }

    /// Start a fresh session; the event index restarts at 1
    pub fn begin_session(&mut self, session_id: impl Into<String>, now: i64) {
        self.session_id = session_id.into();
        self.session_started_at = Some(now);
        self.recent_starts.clear();
        self.next_index = 0;
        debug!(session = %self.session_id, "recorder session started");
    }

    /// Remember a feed for the POST_FEED context
    pub fn mark_feed(&mut self, now: i64) {
        self.last_feed_at = Some(now);
    }

    /// Context tag and local hour an event opened at `now` would carry
    pub fn context_at(&mut self, now: i64) -> (ContextTag, u8) {
        self.prune_recent(now);
        let hour = local_hour(now, self.utc_offset_minutes);
        let signals = ContextSignals {
            recent_event_count: self.recent_starts.len(),
            session_elapsed_sec: self.session_started_at.map(|t| (now - t) / 1000),
            since_feed_sec: self.last_feed_at.map(|t| (now - t) / 1000),
        };
        (ContextTag::derive(hour, &signals), hour)
    }

    /// Open an event and return its identifier
    pub fn open(&mut self, request: &OpenRequest, now: i64) -> EventId {
        let (context_tag, hour_of_day) = self.context_at(now);
        self.next_index = self.next_index.saturating_add(1);
        self.recent_starts.push_back(now);

        let id = Uuid::new_v4();
        let event = InterventionEvent {
            id,
            session_id: self.session_id.clone(),
            start_timestamp: now,
            z_start: request.z_start,
            z_peak: request.z_start,
            z_end: request.z_start,
            delta_z: 0.0,
            duration_sec: 0,
            effectiveness_score: 0.0,
            sound_type: request.sound_type,
            level: request.level,
            final_level: request.level,
            baseline_mode: request.baseline_mode,
            context_tag,
            hour_of_day,
            index_in_session: self.next_index,
            was_exploration: request.is_exploration,
            was_effective: false,
            was_highly_effective: false,
            trigger_type: request.trigger_type,
            gradient_at_trigger: request.gradient_at_trigger,
        };

        info!(
            event = %id,
            index = self.next_index,
            context = ?context_tag,
            sound = request.sound_type.as_str(),
            trigger = ?request.trigger_type,
            "intervention opened"
        );
        self.open.insert(id, OpenEvent { event, opened_at: now });
        id
    }

    /// Raise the event's peak if `z` exceeds it
    pub fn update_peak(&mut self, id: EventId, z: f64) -> Result<()> {
        let open = self.open.get_mut(&id).ok_or(SoomiError::EventNotFound(id))?;
        if z > open.event.z_peak {
            open.event.z_peak = z;
        }
        Ok(())
    }

    /// Level change mid-intervention; the chosen level stays the learning key
    pub fn update_level(&mut self, id: EventId, level: InterventionLevel) -> Result<()> {
        let open = self.open.get_mut(&id).ok_or(SoomiError::EventNotFound(id))?;
        open.event.final_level = level;
        Ok(())
    }

    /// Copy of an open event
    pub fn get(&self, id: EventId) -> Option<InterventionEvent> {
        self.open.get(&id).map(|open| open.event.clone())
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Finalize the event and hand it to the learning engine
    pub fn close(&mut self, id: EventId, z_end: f64, now: i64) -> Result<ClosedEvent> {
        let Some(OpenEvent { mut event, opened_at }) = self.open.remove(&id) else {
            warn!(event = %id, "close for unknown intervention");
            return Err(SoomiError::EventNotFound(id));
        };

        let duration_sec = ((now - opened_at).max(0) as f64 / 1000.0).round() as u32;
        event.finalize(z_end, duration_sec);
        let profile = self.learning.lock().record_outcome(&event);

        info!(
            event = %id,
            delta_z = event.delta_z,
            duration_sec,
            effective = event.was_effective,
            "intervention closed"
        );
        Ok(ClosedEvent { event, profile })
    }

    /// Close every open event with the same final score
    pub fn close_all(&mut self, z_end: f64, now: i64) -> Vec<ClosedEvent> {
        let mut ids: Vec<(i64, EventId)> = self
            .open
            .iter()
            .map(|(id, open)| (open.opened_at, *id))
            .collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|(_, id)| self.close(id, z_end, now).ok())
            .collect()
    }

    fn prune_recent(&mut self, now: i64) {
        let horizon = now - ACTIVITY_WINDOW_MINUTES * 60 * 1000;
        while self.recent_starts.front().is_some_and(|t| *t < horizon) {
            self.recent_starts.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::{LearningConfig, LearningEngine};
    use pretty_assertions::assert_eq;

    // 2024-01-15T02:00:00Z
    const T0: i64 = 1_705_284_000_000;

    fn recorder() -> EventRecorder {
        let learning = LearningEngine::seeded(LearningConfig::default(), 1).into_shared();
        let mut recorder = EventRecorder::new(learning, 0);
        recorder.begin_session("night-1", T0 - 60 * 60 * 1000);
        recorder
    }

    fn request(z_start: f64) -> OpenRequest {
        OpenRequest {
            z_start,
            sound_type: SoundType::Shush,
            level: InterventionLevel::Level1,
            baseline_mode: BaselineMode::Off,
            trigger_type: TriggerType::Auto,
            gradient_at_trigger: 2.5,
            is_exploration: true,
        }
    }

    #[test]
    fn test_open_captures_context() {
        let mut recorder = recorder();
        let id = recorder.open(&request(60.0), T0);
        let event = recorder.get(id).unwrap();

        assert_eq!(event.session_id, "night-1");
        assert_eq!(event.hour_of_day, 2);
        assert_eq!(event.context_tag, ContextTag::DeepNight);
        assert_eq!(event.index_in_session, 1);
        assert_eq!(event.z_end, 60.0);
        assert_eq!(event.delta_z, 0.0);
        assert!(event.was_exploration);
    }

    #[test]
    fn test_index_increments_and_resets() {
        let mut recorder = recorder();
        let a = recorder.open(&request(60.0), T0);
        let b = recorder.open(&request(60.0), T0 + 1000);
        assert_eq!(recorder.get(a).unwrap().index_in_session, 1);
        assert_eq!(recorder.get(b).unwrap().index_in_session, 2);

        recorder.begin_session("night-2", T0 + 2000);
        let c = recorder.open(&request(60.0), T0 + 3000);
        assert_eq!(recorder.get(c).unwrap().index_in_session, 1);
    }

    #[test]
    fn test_peak_is_monotonic() {
        let mut recorder = recorder();
        let id = recorder.open(&request(60.0), T0);
        recorder.update_peak(id, 72.0).unwrap();
        recorder.update_peak(id, 65.0).unwrap();
        recorder.update_peak(id, 72.0).unwrap();
        assert_eq!(recorder.get(id).unwrap().z_peak, 72.0);
    }

    #[test]
    fn test_close_finalizes_and_learns() {
        let mut recorder = recorder();
        let id = recorder.open(&request(60.0), T0);
        let closed = recorder.close(id, 40.0, T0 + 30_000).unwrap();

        assert_eq!(closed.event.delta_z, 20.0);
        assert_eq!(closed.event.duration_sec, 30);
        assert!((closed.event.effectiveness_score - 40.0).abs() < 1e-9);
        assert!(closed.event.was_effective);
        assert!(!closed.event.was_highly_effective);
        assert_eq!(closed.profile.usage_count, 1);

        let learning = recorder.learning().lock();
        let profile = learning.profile(&closed.event.profile_key()).unwrap();
        assert_eq!(profile.usage_count, 1);
    }

    #[test]
    fn test_escalated_event_learns_under_chosen_level() {
        let mut recorder = recorder();
        let id = recorder.open(&request(60.0), T0);
        recorder.update_level(id, InterventionLevel::Level3).unwrap();
        let closed = recorder.close(id, 30.0, T0 + 60_000).unwrap();

        assert_eq!(closed.event.level, InterventionLevel::Level1);
        assert_eq!(closed.event.final_level, InterventionLevel::Level3);
        assert_eq!(closed.profile.key.level, InterventionLevel::Level1);

        let learning = recorder.learning().lock();
        let mut escalated = closed.event.profile_key();
        escalated.level = InterventionLevel::Level3;
        assert!(learning.profile(&escalated).is_none());
    }

    #[test]
    fn test_close_unknown_is_not_found() {
        let mut recorder = recorder();
        let id = recorder.open(&request(60.0), T0);
        recorder.close(id, 40.0, T0 + 1000).unwrap();

        assert!(matches!(
            recorder.close(id, 40.0, T0 + 2000),
            Err(SoomiError::EventNotFound(missing)) if missing == id
        ));
        assert!(recorder.update_peak(id, 90.0).is_err());
    }

    #[test]
    fn test_duration_rounds_to_seconds() {
        let mut recorder = recorder();
        let id = recorder.open(&request(50.0), T0);
        let closed = recorder.close(id, 50.0, T0 + 44_600).unwrap();
        assert_eq!(closed.event.duration_sec, 45);
    }

    #[test]
    fn test_high_activity_context() {
        let mut recorder = recorder();
        for i in 0..3 {
            let id = recorder.open(&request(60.0), T0 + i * 60_000);
            recorder.close(id, 30.0, T0 + i * 60_000 + 30_000).unwrap();
        }
        let (tag, _) = recorder.context_at(T0 + 5 * 60_000);
        assert_eq!(tag, ContextTag::HighActivity);

        // starts older than the activity window no longer count
        let (tag, _) = recorder.context_at(T0 + 40 * 60_000);
        assert_eq!(tag, ContextTag::DeepNight);
    }

    #[test]
    fn test_post_feed_context() {
        let mut recorder = recorder();
        recorder.mark_feed(T0 - 10 * 60_000);
        let id = recorder.open(&request(60.0), T0);
        assert_eq!(recorder.get(id).unwrap().context_tag, ContextTag::PostFeed);
    }

    #[test]
    fn test_close_all() {
        let mut recorder = recorder();
        recorder.open(&request(60.0), T0);
        recorder.open(&request(70.0), T0 + 1000);
        let closed = recorder.close_all(35.0, T0 + 10_000);

        assert_eq!(closed.len(), 2);
        assert_eq!(closed[0].event.index_in_session, 1);
        assert_eq!(recorder.open_count(), 0);
    }
}
