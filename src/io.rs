//! Boundary collaborators: audio output and persistence
//!
//! The live pipeline never waits on storage. Records are queued to a
//! [`PersistenceDispatcher`] whose worker thread writes them with bounded retry;
//! a write that still fails after the last attempt is logged and dropped.

use crate::error::{Result, SoomiError};
use crate::types::{AudioCommand, InterventionEvent, ProfileKey, ProfileScore, TransitionRecord};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

// ============================================================================
// Audio output
// ============================================================================

/// Sink for audio commands; never queried back for playback state
pub trait AudioOutput: Send {
    fn apply(&mut self, command: &AudioCommand);
}

/// Discards every command
#[derive(Debug, Default)]
pub struct NullAudioOutput;

impl AudioOutput for NullAudioOutput {
    fn apply(&mut self, _command: &AudioCommand) {}
}

/// Keeps every command; the log handle can be read from another thread
#[derive(Debug, Default, Clone)]
pub struct RecordingAudioOutput {
    commands: Arc<Mutex<Vec<AudioCommand>>>,
}

impl RecordingAudioOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<AudioCommand> {
        self.commands.lock().clone()
    }

    pub fn clear(&self) {
        self.commands.lock().clear();
    }
}

impl AudioOutput for RecordingAudioOutput {
    fn apply(&mut self, command: &AudioCommand) {
        self.commands.lock().push(command.clone());
    }
}

// ============================================================================
// Persistence
// ============================================================================

/// Storage for finished events, profile scores and transition logs
pub trait Persistence: Send + Sync {
    fn save_event(&self, event: &InterventionEvent) -> Result<()>;
    fn upsert_profile(&self, profile: &ProfileScore) -> Result<()>;
    fn save_transition(&self, record: &TransitionRecord) -> Result<()>;
    fn load_profiles(&self) -> Result<Vec<ProfileScore>>;
}

/// In-memory store, mostly for tests and the simulator
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: Mutex<Vec<InterventionEvent>>,
    profiles: Mutex<Vec<ProfileScore>>,
    transitions: Mutex<Vec<TransitionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<InterventionEvent> {
        self.events.lock().clone()
    }

    pub fn transitions(&self) -> Vec<TransitionRecord> {
        self.transitions.lock().clone()
    }

    pub fn profile(&self, key: &ProfileKey) -> Option<ProfileScore> {
        self.profiles.lock().iter().find(|p| p.key == *key).cloned()
    }
}

impl Persistence for MemoryStore {
    fn save_event(&self, event: &InterventionEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn upsert_profile(&self, profile: &ProfileScore) -> Result<()> {
        upsert(&mut self.profiles.lock(), profile);
        Ok(())
    }

    fn save_transition(&self, record: &TransitionRecord) -> Result<()> {
        self.transitions.lock().push(record.clone());
        Ok(())
    }

    fn load_profiles(&self) -> Result<Vec<ProfileScore>> {
        Ok(self.profiles.lock().clone())
    }
}

fn upsert(profiles: &mut Vec<ProfileScore>, profile: &ProfileScore) {
    match profiles.iter_mut().find(|p| p.key == profile.key) {
        Some(existing) => *existing = profile.clone(),
        None => profiles.push(profile.clone()),
    }
}

const EVENTS_FILE: &str = "events.jsonl";
const TRANSITIONS_FILE: &str = "transitions.jsonl";
const PROFILES_FILE: &str = "profiles.json";

/// Directory-backed store: append-only JSON lines for events and transitions,
/// one JSON document for the profile table
#[derive(Debug)]
pub struct JsonlStore {
    dir: PathBuf,
    profiles: Mutex<Vec<ProfileScore>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfileFile {
    profiles: Vec<ProfileScore>,
}

impl JsonlStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let profiles = read_profile_file(&dir.join(PROFILES_FILE))?;
        Ok(Self {
            dir,
            profiles: Mutex::new(profiles),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every event written so far, in write order
    pub fn read_events(&self) -> Result<Vec<InterventionEvent>> {
        read_lines(&self.dir.join(EVENTS_FILE))
    }

    pub fn read_transitions(&self) -> Result<Vec<TransitionRecord>> {
        read_lines(&self.dir.join(TRANSITIONS_FILE))
    }

    fn append<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(name))?;
        let line = serde_json::to_string(value)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

impl Persistence for JsonlStore {
    fn save_event(&self, event: &InterventionEvent) -> Result<()> {
        self.append(EVENTS_FILE, event)
    }

    fn upsert_profile(&self, profile: &ProfileScore) -> Result<()> {
        let mut profiles = self.profiles.lock();
        upsert(&mut profiles, profile);
        let json = serde_json::to_string_pretty(&ProfileFile {
            profiles: profiles.clone(),
        })?;
        let path = self.dir.join(PROFILES_FILE);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn save_transition(&self, record: &TransitionRecord) -> Result<()> {
        self.append(TRANSITIONS_FILE, record)
    }

    fn load_profiles(&self) -> Result<Vec<ProfileScore>> {
        Ok(self.profiles.lock().clone())
    }
}

fn read_profile_file(path: &Path) -> Result<Vec<ProfileScore>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let json = fs::read_to_string(path)?;
    let file: ProfileFile = serde_json::from_str(&json)?;
    Ok(file.profiles)
}

fn read_lines<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}

// ============================================================================
// Dispatcher
// ============================================================================

/// One queued write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PersistRecord {
    Event(InterventionEvent),
    Profile(ProfileScore),
    Transition(TransitionRecord),
}

/// Bounded retry for failed writes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts per record, including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 25,
            max_backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn clamped(self) -> Self {
        Self {
            max_attempts: self.max_attempts.clamp(1, 20),
            initial_backoff_ms: self.initial_backoff_ms.min(10_000),
            max_backoff_ms: self.max_backoff_ms.clamp(self.initial_backoff_ms.min(10_000), 60_000),
        }
    }

    fn next_delay(&self, current: Duration) -> Duration {
        current
            .saturating_mul(2)
            .min(Duration::from_millis(self.max_backoff_ms))
    }
}

/// Queues writes to a background worker so callers never block on storage
pub struct PersistenceDispatcher {
    sender: Option<Sender<PersistRecord>>,
    worker: Option<JoinHandle<()>>,
    store: Arc<dyn Persistence>,
}

impl PersistenceDispatcher {
    pub fn new(store: Arc<dyn Persistence>, policy: RetryPolicy) -> Result<Self> {
        let (sender, receiver) = channel::unbounded();
        let worker_store = Arc::clone(&store);
        let policy = policy.clamped();
        let worker = thread::Builder::new()
            .name("soomi-persistence".to_string())
            .spawn(move || run_worker(receiver, worker_store, policy))
            .map_err(|e| SoomiError::PersistenceError(e.to_string()))?;
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            store,
        })
    }

    /// Queue a record; never blocks
    pub fn dispatch(&self, record: PersistRecord) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(record).is_err() {
            warn!("persistence worker is gone, record dropped");
        }
    }

    /// Direct read used once at session setup
    pub fn load_profiles(&self) -> Result<Vec<ProfileScore>> {
        self.store.load_profiles()
    }

    pub fn store(&self) -> &Arc<dyn Persistence> {
        &self.store
    }

    /// Drain the queue and stop the worker
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("persistence worker panicked");
            }
        }
    }
}

impl Drop for PersistenceDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(receiver: Receiver<PersistRecord>, store: Arc<dyn Persistence>, policy: RetryPolicy) {
    for record in receiver {
        write_with_retry(store.as_ref(), &record, &policy);
    }
    debug!("persistence worker stopped");
}

fn write_with_retry(store: &dyn Persistence, record: &PersistRecord, policy: &RetryPolicy) -> bool {
    let mut delay = Duration::from_millis(policy.initial_backoff_ms);
    for attempt in 1..=policy.max_attempts {
        let result = match record {
            PersistRecord::Event(event) => store.save_event(event),
            PersistRecord::Profile(profile) => store.upsert_profile(profile),
            PersistRecord::Transition(transition) => store.save_transition(transition),
        };
        match result {
            Ok(()) => return true,
            Err(e) if attempt < policy.max_attempts => {
                debug!(attempt, error = %e, "persistence write failed, retrying");
                thread::sleep(delay);
                delay = policy.next_delay(delay);
            }
            Err(e) => {
                warn!(attempts = attempt, error = %e, "persistence write abandoned");
            }
        }
    }
    false
}
