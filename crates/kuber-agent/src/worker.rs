//! Tracks running sessions so they can be ended, and awaited, on demand.

use crate::entrypoint::{run_session_until, SessionLaunch};
use crate::tools::FinanceTools;
use kuber_voice::ConversationRuntime;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct RunningSession {
    room_name: String,
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// The set of live conversations, keyed by session id.
///
/// Ending a session waits for its terminal save, so once
/// [`shutdown`](Self::shutdown) returns every transcript is on disk.
pub struct SessionRegistry {
    runtime: Arc<dyn ConversationRuntime>,
    tools: Arc<FinanceTools>,
    sessions: Mutex<HashMap<String, RunningSession>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    pub fn new(runtime: Arc<dyn ConversationRuntime>, tools: Arc<FinanceTools>) -> Self {
        Self {
            runtime,
            tools,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RunningSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts the conversation on its own task.
    pub fn launch(&self, launch: SessionLaunch) {
        let (cancel, cancel_rx) = oneshot::channel::<()>();
        let session_id = launch.session_id.clone();
        let room_name = launch.room_name.clone();

        let runtime = Arc::clone(&self.runtime);
        let tools = Arc::clone(&self.tools);
        let task_id = session_id.clone();
        let handle = tokio::spawn(async move {
            let cancelled = async move {
                let _ = cancel_rx.await;
            };
            if let Err(e) = run_session_until(runtime, tools, launch, cancelled).await {
                tracing::warn!(session_id = %task_id, error = %e, "session ended with error");
            }
        });

        let mut sessions = self.lock();
        sessions.retain(|_, s| !s.handle.is_finished());
        sessions.insert(
            session_id,
            RunningSession {
                room_name,
                cancel,
                handle,
            },
        );
    }

    /// Room of a session that has not been ended.
    pub fn room_for(&self, session_id: &str) -> Option<String> {
        self.lock().get(session_id).map(|s| s.room_name.clone())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    pub fn active_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|s| !s.handle.is_finished())
            .count()
    }

    /// Hangs up `session_id` and waits for its task, including the terminal
    /// save. Returns `false` for unknown sessions.
    pub async fn end(&self, session_id: &str) -> bool {
        let Some(session) = self.lock().remove(session_id) else {
            return false;
        };
        self.stop(session_id, session).await;
        true
    }

    /// Ends every session and waits for all terminal saves.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, RunningSession)> = self.lock().drain().collect();
        if drained.is_empty() {
            return;
        }
        tracing::info!(count = drained.len(), "ending active sessions");

        for (id, session) in drained {
            self.stop(&id, session).await;
        }
    }

    async fn stop(&self, session_id: &str, session: RunningSession) {
        let RunningSession {
            room_name,
            cancel,
            handle,
        } = session;

        if let Err(e) = self.runtime.hang_up(&room_name).await {
            // Not connected yet, or already gone: stop waiting on the runtime.
            tracing::debug!(session_id, error = %e, "hang up failed, cancelling session");
            let _ = cancel.send(());
        }

        if let Err(e) = handle.await {
            tracing::error!(session_id, error = %e, "session task failed");
        }
        tracing::info!(session_id, "session ended");
    }
}
