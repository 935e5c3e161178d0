//! Session registry: live sessions, the demoted cache and message histories.
//!
//! One registry is built at startup and shared through the application state.
//! Callers only see `create`/`get`/`cleanup`; whether a session is live or
//! sitting in the demoted cache is an internal detail.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use questforge_common::StatusMessage;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::history::{HistoryMap, HistoryStore, MessageHistory};
use super::session::Progress;
use crate::config::ServerSettings;
use crate::errors::{PersistError, SessionError};

struct Demoted {
    progress: Arc<Progress>,
    expires_at: Instant,
}

pub struct SessionRegistry {
    active: DashMap<String, Arc<Progress>>,
    demoted: DashMap<String, Demoted>,
    histories: DashMap<String, Arc<MessageHistory>>,
    store: HistoryStore,
    persisting: tokio::sync::Mutex<()>,
    cache_ttl: Duration,
    stale_after: Duration,
}

/// Reject anything that is not a UUID before it reaches a map or a log line.
pub fn validate_session_id(id: &str) -> Result<(), SessionError> {
    Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| SessionError::InvalidId(id.to_string()))
}

fn older_than(timestamp: DateTime<Utc>, age: Duration) -> bool {
    // A timestamp in the future has a negative age and is never stale.
    (Utc::now() - timestamp)
        .to_std()
        .map(|elapsed| elapsed > age)
        .unwrap_or(false)
}

impl SessionRegistry {
    pub fn new(store: HistoryStore, cache_ttl: Duration, stale_after: Duration) -> Self {
        Self {
            active: DashMap::new(),
            demoted: DashMap::new(),
            histories: DashMap::new(),
            store,
            persisting: tokio::sync::Mutex::new(()),
            cache_ttl,
            stale_after,
        }
    }

    pub fn from_settings(settings: &ServerSettings) -> Self {
        let store = HistoryStore::new(&settings.history_file, settings.cache_ttl());
        Self::new(store, settings.cache_ttl(), settings.stale_after())
    }

    /// Register a new live session. Its history is shared with any restored one.
    pub fn create(&self, id: &str) -> Result<Arc<Progress>, SessionError> {
        validate_session_id(id)?;
        // Never hold a lock on one map while locking another.
        let history = self
            .histories
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(MessageHistory::new()))
            .clone();
        let progress = match self.active.entry(id.to_string()) {
            Entry::Occupied(_) => return Err(SessionError::AlreadyActive(id.to_string())),
            Entry::Vacant(slot) => {
                let progress = Arc::new(Progress::new(id, history));
                slot.insert(progress.clone());
                progress
            }
        };
        // The active entry guard is released before the cache is touched.
        self.demoted.remove(id);
        info!(session_id = %id, "session created");
        Ok(progress)
    }

    /// Look a session up in the live map, then in the unexpired cache.
    pub fn get(&self, id: &str) -> Result<Arc<Progress>, SessionError> {
        validate_session_id(id)?;
        if let Some(progress) = self.active.get(id) {
            return Ok(progress.clone());
        }

        let now = Instant::now();
        if let Some(entry) = self.demoted.get(id)
            && entry.expires_at > now
        {
            return Ok(entry.progress.clone());
        }
        if self.demoted.remove_if(id, |_, e| e.expires_at <= now).is_some() {
            debug!(session_id = %id, "cached session expired");
        }
        Err(SessionError::NotFound(id.to_string()))
    }

    /// Full ordered history; unknown sessions have an empty one.
    pub fn messages(&self, id: &str) -> Result<Vec<StatusMessage>, SessionError> {
        validate_session_id(id)?;
        Ok(self
            .histories
            .get(id)
            .map(|history| history.snapshot())
            .unwrap_or_default())
    }

    /// Shut a live session down and move it to the demoted cache.
    ///
    /// Returns `false` when the session was not live, which makes a second
    /// call for the same id a no-op.
    pub fn cleanup(&self, id: &str) -> bool {
        let Some((id, progress)) = self.active.remove(id) else {
            debug!(session_id = %id, "cleanup skipped, session not active");
            return false;
        };
        progress.shutdown();
        info!(session_id = %id, state = %progress.state(), "session demoted to cache");
        self.demoted.insert(
            id,
            Demoted {
                progress,
                expires_at: Instant::now() + self.cache_ttl,
            },
        );
        true
    }

    /// How long a demoted session stays reachable.
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn cached_count(&self) -> usize {
        self.demoted.len()
    }

    /// Clean up idle live sessions, drop expired cache entries and orphaned
    /// histories, then persist. Returns the number of live sessions reaped.
    pub async fn reap_stale(&self) -> usize {
        let stale: Vec<String> = self
            .active
            .iter()
            .filter(|entry| {
                let progress = entry.value();
                let last = progress
                    .history()
                    .last_activity()
                    .unwrap_or_else(|| progress.created_at());
                older_than(last, self.stale_after)
            })
            .map(|entry| entry.key().clone())
            .collect();

        let reaped = stale.iter().filter(|id| self.cleanup(id)).count();

        let now = Instant::now();
        self.demoted.retain(|_, entry| entry.expires_at > now);

        let candidates: Vec<String> = self
            .histories
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .last_activity()
                    .is_none_or(|last| older_than(last, self.stale_after))
            })
            .map(|entry| entry.key().clone())
            .collect();
        let dropped = candidates
            .iter()
            .filter(|id| !self.active.contains_key(*id) && !self.demoted.contains_key(*id))
            .filter(|id| self.histories.remove(*id).is_some())
            .count();

        if reaped > 0 || dropped > 0 {
            info!(reaped, dropped_histories = dropped, "stale sessions reaped");
        }
        if let Err(e) = self.persist().await {
            warn!(error = %e, "failed to persist history after reaping");
        }
        reaped
    }

    /// Write every known history to the durable store.
    ///
    /// Concurrent calls are serialized so an older snapshot never lands on
    /// top of a newer one.
    pub async fn persist(&self) -> Result<(), PersistError> {
        let _writing = self.persisting.lock().await;
        let snapshot: HistoryMap = self
            .histories
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();
        self.store.save(snapshot).await
    }

    /// Load histories written by a previous process. Sessions already known
    /// in memory keep their current history. Returns how many were added.
    pub async fn restore(&self) -> Result<usize, PersistError> {
        let loaded = self.store.load().await?;
        let mut added = 0;
        for (id, messages) in loaded {
            if let Entry::Vacant(slot) = self.histories.entry(id) {
                slot.insert(Arc::new(MessageHistory::from_messages(messages)));
                added += 1;
            }
        }
        info!(sessions = added, path = %self.store.path().display(), "history restored");
        Ok(added)
    }
}
