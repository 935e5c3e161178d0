//! Per-session message history and its on-disk snapshot.
//!
//! The snapshot file is a JSON object mapping session id to that session's
//! ordered messages. Writes go to a temporary file that is renamed over the
//! target. The last written snapshot is also kept in memory for a bounded
//! time; [`HistoryStore::load`] reads the file first and then overlays any
//! cached session whose history is newer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use questforge_common::StatusMessage;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::PersistError;

pub type HistoryMap = HashMap<String, Vec<StatusMessage>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Append-only, ordered message log for one session.
#[derive(Debug, Default)]
pub struct MessageHistory {
    messages: Mutex<Vec<StatusMessage>>,
}

impl MessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<StatusMessage>) -> Self {
        Self {
            messages: Mutex::new(messages),
        }
    }

    pub fn push(&self, message: StatusMessage) {
        lock(&self.messages).push(message);
    }

    pub fn snapshot(&self) -> Vec<StatusMessage> {
        lock(&self.messages).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.messages).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Timestamp of the most recent message.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        lock(&self.messages).last().map(|m| m.timestamp)
    }
}

fn last_timestamp(messages: &[StatusMessage]) -> Option<DateTime<Utc>> {
    messages.last().map(|m| m.timestamp)
}

struct CachedSnapshot {
    written_at: Instant,
    histories: HistoryMap,
}

/// Durable history file plus a short-lived copy of the last write.
pub struct HistoryStore {
    path: PathBuf,
    cache_ttl: Duration,
    cache: Mutex<Option<CachedSnapshot>>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, cache_ttl: Duration) -> Self {
        Self {
            path: path.into(),
            cache_ttl,
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> PersistError {
        PersistError::Io {
            path: self.path.clone(),
            source,
        }
    }

    pub async fn save(&self, histories: HistoryMap) -> Result<(), PersistError> {
        let json = serde_json::to_vec_pretty(&histories).map_err(|source| PersistError::Format {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_err(e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await.map_err(|e| self.io_err(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_err(e))?;

        debug!(path = %self.path.display(), sessions = histories.len(), "history persisted");
        *lock(&self.cache) = Some(CachedSnapshot {
            written_at: Instant::now(),
            histories,
        });
        Ok(())
    }

    /// Read the file (missing means empty), then overlay newer cached entries.
    pub async fn load(&self) -> Result<HistoryMap, PersistError> {
        let mut histories: HistoryMap = match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| PersistError::Format {
                path: self.path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HistoryMap::new(),
            Err(e) => return Err(self.io_err(e)),
        };

        let mut cache = lock(&self.cache);
        match cache.as_ref() {
            Some(cached) if cached.written_at.elapsed() < self.cache_ttl => {
                for (id, messages) in &cached.histories {
                    let newer = match histories.get(id) {
                        Some(on_disk) => last_timestamp(messages) > last_timestamp(on_disk),
                        None => true,
                    };
                    if newer {
                        histories.insert(id.clone(), messages.clone());
                    }
                }
            }
            Some(_) => *cache = None,
            None => {}
        }
        Ok(histories)
    }
}

/// Escape text for inclusion in HTML element content or attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render messages as HTML fragments for the history endpoint.
pub fn render_html(messages: &[StatusMessage]) -> String {
    let mut html = String::new();
    for message in messages {
        let status = message.status.as_str();
        html.push_str(&format!(
            "<div class=\"message status-{status}\">\n  <span class=\"status\">{status}</span>\n  <span class=\"timestamp\">{}</span>\n  <p>{}</p>\n",
            message.timestamp.format("%H:%M:%S"),
            escape_html(&message.message),
        ));
        if !message.output.is_empty() {
            html.push_str(&format!("  <pre>{}</pre>\n", escape_html(&message.output)));
        }
        html.push_str("</div>\n");
    }
    html
}
