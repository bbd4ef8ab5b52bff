//! Context tag derivation
//!
//! A context tag is never stored on its own; it is recomputed from the local hour
//! and a few session facts whenever an intervention is opened.
//!
//! Precedence, first match wins:
//! 1. POST_FEED when a feed was marked within the last 30 minutes
//! 2. HIGH_ACTIVITY when at least 3 interventions started in the last 30 minutes
//! 3. SETTLING during the first 20 minutes of a session
//! 4. time-of-day bucket

use crate::types::ContextTag;
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Window after a feed during which POST_FEED applies (minutes)
pub const POST_FEED_WINDOW_MINUTES: i64 = 30;

/// Window for counting recent interventions (minutes)
pub const ACTIVITY_WINDOW_MINUTES: i64 = 30;

/// Interventions inside the activity window that mark HIGH_ACTIVITY
pub const HIGH_ACTIVITY_EVENT_COUNT: usize = 3;

/// Session age below which SETTLING applies (minutes)
pub const SETTLING_WINDOW_MINUTES: i64 = 20;

/// Session facts that refine the time-of-day bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSignals {
    /// Interventions started within the activity window
    pub recent_event_count: usize,
    /// Time since the session started (seconds)
    pub session_elapsed_sec: Option<i64>,
    /// Time since the last marked feed (seconds)
    pub since_feed_sec: Option<i64>,
}

impl ContextTag {
    /// Pure time-of-day bucket for a local hour (0-23)
    pub fn from_hour(hour: u8) -> Self {
        match hour % 24 {
            0..=4 => ContextTag::DeepNight,
            5..=7 => ContextTag::EarlyMorning,
            8..=17 => ContextTag::Daytime,
            18..=20 => ContextTag::Evening,
            _ => ContextTag::Night,
        }
    }

    /// Derive the tag from the local hour and session signals
    pub fn derive(hour: u8, signals: &ContextSignals) -> Self {
        if let Some(since_feed) = signals.since_feed_sec {
            if (0..POST_FEED_WINDOW_MINUTES * 60).contains(&since_feed) {
                return ContextTag::PostFeed;
            }
        }

        if signals.recent_event_count >= HIGH_ACTIVITY_EVENT_COUNT {
            return ContextTag::HighActivity;
        }

        if let Some(elapsed) = signals.session_elapsed_sec {
            if (0..SETTLING_WINDOW_MINUTES * 60).contains(&elapsed) {
                return ContextTag::Settling;
            }
        }

        Self::from_hour(hour)
    }
}

/// Local hour of day for an epoch-ms timestamp at a fixed UTC offset
pub fn local_hour(timestamp_millis: i64, utc_offset_minutes: i32) -> u8 {
    let Some(utc) = DateTime::<Utc>::from_timestamp_millis(timestamp_millis) else {
        return 0;
    };
    match FixedOffset::east_opt(utc_offset_minutes.clamp(-14 * 60, 14 * 60) * 60) {
        Some(offset) => utc.with_timezone(&offset).hour() as u8,
        None => utc.hour() as u8,
    }
}
