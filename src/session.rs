//! Explicit per-session state and the process-wide table of live sessions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::config::DEFAULT_SESSION_TTL_SECS;
use crate::playlist::Playlists;
use crate::registry::{ArtifactRecord, Registry};
use crate::review::Review;

pub const QUICK_PICKS: usize = 3;

#[derive(Debug, Default)]
pub struct Session {
    pub registry: Registry,
    pub playlists: Playlists,
    reviews: Vec<Review>,
    now_playing: Option<PathBuf>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn play(&mut self, path: impl Into<PathBuf>) {
        self.now_playing = Some(path.into());
    }

    pub fn stop(&mut self) {
        self.now_playing = None;
    }

    /// The selected track, provided its file still exists.
    pub fn now_playing(&self) -> Option<&Path> {
        self.now_playing
            .as_deref()
            .filter(|path| path.is_file())
    }

    pub fn quick_picks(&self) -> &[ArtifactRecord] {
        let history = self.registry.history();
        &history[..history.len().min(QUICK_PICKS)]
    }

    pub fn add_review(&mut self, review: Review) {
        self.reviews.push(review);
    }

    /// Newest first.
    pub fn reviews(&self) -> impl Iterator<Item = &Review> {
        self.reviews.iter().rev()
    }
}

pub type SessionHandle = Arc<Mutex<Session>>;

struct SessionEntry {
    handle: SessionHandle,
    last_access: Instant,
}

/// Sessions keyed by an opaque id. Ending a session, explicitly or by idling
/// past the TTL, drops its registries; downloaded files stay on disk.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_ttl(Duration::from_secs(DEFAULT_SESSION_TTL_SECS))
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: Arc::default(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn create(&self) -> (String, SessionHandle) {
        let id = Uuid::new_v4().to_string();
        let handle = Arc::new(Mutex::new(Session::new()));
        self.sessions.write().insert(
            id.clone(),
            SessionEntry {
                handle: handle.clone(),
                last_access: Instant::now(),
            },
        );
        (id, handle)
    }

    /// Looks a session up and marks it as used.
    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        let mut sessions = self.sessions.write();
        let entry = sessions.get_mut(id)?;
        entry.last_access = Instant::now();
        Some(entry.handle.clone())
    }

    pub fn end(&self, id: &str) -> bool {
        self.sessions.write().remove(id).is_some()
    }

    /// Drops every session idle for longer than the TTL and returns how many
    /// went.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, entry| now.saturating_duration_since(entry.last_access) <= self.ttl);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, live = sessions.len(), "expired idle sessions");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
