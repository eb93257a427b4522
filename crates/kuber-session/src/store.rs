//! In-memory session store with bounded capacity and auto-save.
//!
//! The store maps session ids to [`SessionRecord`]s. Sessions are created
//! lazily on first reference. When an unknown id arrives and the store is
//! already at capacity, exactly one existing session is evicted first,
//! chosen by the configured [`EvictionPolicy`].
//!
//! The map sits behind a `std::sync::Mutex`. Every critical section is a
//! short map operation that never spans an `.await`; persistence happens
//! after the guard is dropped, on the blocking thread pool.

use crate::error::SessionError;
use crate::persist::SessionWriter;
use kuber_types::{
    LoggedMessage, SessionRecord, Speaker, AUTO_SAVE_INTERVAL, DEFAULT_SESSION_CAPACITY,
    NO_HISTORY_SENTINEL,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// How the victim is chosen when the store is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Evict the session that was created first.
    #[default]
    OldestCreated,
    /// Evict the session with the smallest id in string order. This ignores
    /// usage and creation order entirely; kept for compatibility with stores
    /// that relied on it.
    MinimumId,
}

/// Tunables for a [`SessionStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    /// Maximum number of sessions kept in memory.
    pub capacity: usize,
    /// Save automatically after every this-many logged messages. Zero disables.
    pub auto_save_every: usize,
    pub eviction: EvictionPolicy,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_SESSION_CAPACITY,
            auto_save_every: AUTO_SAVE_INTERVAL,
            eviction: EvictionPolicy::default(),
        }
    }
}

/// Result of [`SessionStore::append_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The text was empty after trimming; nothing was stored.
    Rejected,
    /// The message was appended; `count` is the session's new total.
    Logged { count: usize },
}

/// Recent conversation history for a session.
#[derive(Debug, Clone, PartialEq)]
pub enum History {
    /// The session has no messages.
    Empty,
    /// The most recent messages, oldest first.
    Recent(Vec<LoggedMessage>),
}

impl History {
    /// The last `limit` messages of `record`. A zero limit is treated as one.
    fn of(record: &SessionRecord, limit: usize) -> Self {
        let log = &record.conversation_log;
        let recent = &log[log.len().saturating_sub(limit.max(1))..];
        if recent.is_empty() {
            Self::Empty
        } else {
            Self::Recent(recent.to_vec())
        }
    }
}

impl fmt::Display for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str(NO_HISTORY_SENTINEL),
            Self::Recent(messages) => {
                for (i, m) in messages.iter().enumerate() {
                    if i > 0 {
                        f.write_str("\n")?;
                    }
                    write!(f, "{}: {}", m.speaker, m.text)?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug)]
struct SessionEntry {
    record: SessionRecord,
    created_seq: u64,
}

#[derive(Debug, Default)]
struct Sessions {
    entries: HashMap<String, SessionEntry>,
    next_seq: u64,
}

/// A session that was removed to make room for a new one.
type Evicted = Option<(String, SessionRecord)>;

/// Process-wide owner of all in-memory sessions.
pub struct SessionStore {
    inner: Mutex<Sessions>,
    settings: StoreSettings,
    writer: Arc<dyn SessionWriter>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("settings", &self.settings)
            .field("len", &self.len())
            .finish()
    }
}

impl SessionStore {
    pub fn new(writer: Arc<dyn SessionWriter>, settings: StoreSettings) -> Self {
        Self {
            inner: Mutex::new(Sessions::default()),
            settings,
            writer,
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs `f` against the session, creating it (and evicting one victim if
    /// the store is full) when the id is unknown.
    fn with_session<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionRecord) -> R,
    ) -> (R, Evicted) {
        let mut sessions = self.lock();
        let mut evicted = None;

        if !sessions.entries.contains_key(session_id)
            && sessions.entries.len() >= self.settings.capacity.max(1)
        {
            evicted = self.evict_one(&mut sessions);
        }

        let Sessions { entries, next_seq } = &mut *sessions;
        let entry = entries.entry(session_id.to_string()).or_insert_with(|| {
            let created_seq = *next_seq;
            *next_seq += 1;
            tracing::debug!(session_id, "created session");
            SessionEntry {
                record: SessionRecord::new(),
                created_seq,
            }
        });

        (f(&mut entry.record), evicted)
    }

    fn evict_one(&self, sessions: &mut Sessions) -> Evicted {
        let victim = match self.settings.eviction {
            EvictionPolicy::OldestCreated => sessions
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.created_seq)
                .map(|(id, _)| id.clone()),
            EvictionPolicy::MinimumId => sessions.entries.keys().min().cloned(),
        }?;

        let entry = sessions.entries.remove(&victim)?;
        tracing::info!(
            session_id = %victim,
            policy = ?self.settings.eviction,
            messages = entry.record.len(),
            "evicted session from store"
        );
        Some((victim, entry.record))
    }

    /// Persists an evicted session so its transcript survives removal.
    async fn flush_evicted(&self, evicted: Evicted) {
        if let Some((session_id, record)) = evicted {
            if record.is_empty() {
                return;
            }
            if let Err(e) = self.persist(&session_id, record).await {
                tracing::error!(
                    session_id = %session_id,
                    error = %e,
                    "failed to persist evicted session"
                );
            }
        }
    }

    /// Returns a snapshot of the session, creating it if absent.
    pub async fn get_or_create(&self, session_id: &str) -> SessionRecord {
        let (record, evicted) = self.with_session(session_id, |record| record.clone());
        self.flush_evicted(evicted).await;
        record
    }

    /// Appends a message to the session.
    ///
    /// Empty or whitespace-only text is rejected without touching the store.
    /// Stored text is trimmed and stamped with the current UTC time. Every
    /// `auto_save_every`-th message saves the session before returning; a
    /// failed auto-save is logged and does not affect the outcome.
    pub async fn append_message(
        &self,
        session_id: &str,
        speaker: Speaker,
        text: &str,
    ) -> AppendOutcome {
        let text = text.trim();
        if text.is_empty() {
            tracing::debug!(session_id, %speaker, "rejected empty message");
            return AppendOutcome::Rejected;
        }

        let every = self.settings.auto_save_every;
        let ((count, snapshot), evicted) = self.with_session(session_id, |record| {
            record
                .conversation_log
                .push(LoggedMessage::now(speaker, text));
            let count = record.len();
            let snapshot = (every > 0 && count % every == 0).then(|| record.clone());
            (count, snapshot)
        });
        self.flush_evicted(evicted).await;

        tracing::info!(session_id, %speaker, count, "logged message");

        if let Some(record) = snapshot {
            tracing::info!(session_id, count, "auto-saving session");
            if let Err(e) = self.persist(session_id, record).await {
                tracing::error!(session_id, error = %e, "auto-save failed");
            }
        }

        AppendOutcome::Logged { count }
    }

    /// Returns up to `limit` of the most recent messages, oldest first.
    pub async fn history(&self, session_id: &str, limit: usize) -> History {
        let (history, evicted) =
            self.with_session(session_id, |record| History::of(record, limit));
        self.flush_evicted(evicted).await;
        history
    }

    /// Like [`history`](Self::history), but returns `None` for a session
    /// that is not held instead of creating it.
    pub fn peek_history(&self, session_id: &str, limit: usize) -> Option<History> {
        self.lock()
            .entries
            .get(session_id)
            .map(|entry| History::of(&entry.record, limit))
    }

    /// Writes the session's current snapshot, creating an empty session if
    /// the id is unknown.
    pub async fn save(&self, session_id: &str) -> Result<PathBuf, SessionError> {
        let record = self.get_or_create(session_id).await;
        match self.persist(session_id, record).await {
            Ok(path) => {
                tracing::info!(session_id, path = %path.display(), "session saved");
                Ok(path)
            }
            Err(e) => {
                tracing::error!(session_id, error = %e, "failed to save session");
                Err(e)
            }
        }
    }

    async fn persist(
        &self,
        session_id: &str,
        record: SessionRecord,
    ) -> Result<PathBuf, SessionError> {
        let writer = Arc::clone(&self.writer);
        let id = session_id.to_string();
        tokio::task::spawn_blocking(move || writer.write(&id, &record))
            .await
            .map_err(|e| SessionError::Task(e.to_string()))?
    }

    /// Number of sessions currently held in memory.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the session is held in memory. Does not create it.
    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().entries.contains_key(session_id)
    }

    /// Message count for the session, or zero if it is not held. Does not
    /// create it.
    pub fn message_count(&self, session_id: &str) -> usize {
        self.lock()
            .entries
            .get(session_id)
            .map_or(0, |entry| entry.record.len())
    }
}
