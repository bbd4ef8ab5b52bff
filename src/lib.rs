//! Soomi Engine - On-device unrest detection and adaptive soothing
//!
//! Audio windows flow through a deterministic pipeline: feature extraction →
//! unrest scoring and trend detection → intervention state machine. When an
//! intervention starts, an epsilon-greedy bandit picks the sound and level;
//! when it ends, the recorded outcome feeds back into the bandit.
//!
//! ## Modules
//!
//! - **Signal path**: `features`, `scorer`
//! - **Control**: `state_machine`, `session`
//! - **Learning**: `learning`, `recorder`, `context`
//! - **Boundaries**: `io`, `clock`, `config`, `logging`, `ffi`

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod features;
pub mod io;
pub mod learning;
pub mod logging;
pub mod recorder;
pub mod scorer;
pub mod session;
pub mod state_machine;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::SoomiConfig;
pub use error::{Result, SoomiError};
pub use features::{FeatureExtractor, FeatureVector};
pub use learning::{LearningConfig, LearningEngine, LearningStats, SharedLearningEngine};
pub use recorder::EventRecorder;
pub use scorer::UnrestScorer;
pub use session::{ControlOutcome, SessionSnapshot, SessionTick, SoomiSession};
pub use state_machine::{InterventionConfig, StateMachine, Step};
pub use types::{
    AudioCommand, BaselineMode, ContextTag, InterventionEvent, InterventionLevel, ProfileKey,
    ProfileScore, SoomiState, SoundType, Trend, TriggerType, UnrestScore, Zone,
};

/// Engine version reported by the CLI and FFI
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name used in logs and diagnostics
pub const ENGINE_NAME: &str = "soomi-engine";
