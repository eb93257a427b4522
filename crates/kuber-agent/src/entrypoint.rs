//! Per-conversation entrypoint.

use crate::instructions::{opening_instructions, AGENT_INSTRUCTIONS, GREETING};
use crate::tools::FinanceTools;
use kuber_voice::{AgentSession, ConversationRuntime, VoiceError};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Identifies the conversation to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLaunch {
    pub session_id: String,
    pub room_name: String,
}

impl SessionLaunch {
    /// A launch for `session_id` in room `kuber-<session_id>`.
    pub fn for_session(session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        Self {
            room_name: format!("kuber-{session_id}"),
            session_id,
        }
    }
}

/// Performs the terminal save of a session exactly once.
///
/// [`finish`](Self::finish) is idempotent. A guard dropped without finishing
/// (e.g. its task was aborted) schedules the save on the current runtime.
#[derive(Debug)]
pub struct SessionGuard {
    tools: Arc<FinanceTools>,
    session_id: String,
    finished: AtomicBool,
}

impl SessionGuard {
    pub fn new(tools: Arc<FinanceTools>, session_id: impl Into<String>) -> Self {
        Self {
            tools,
            session_id: session_id.into(),
            finished: AtomicBool::new(false),
        }
    }

    /// Saves the session if no terminal save has happened yet. Returns the
    /// save result, or `None` when already finished.
    pub async fn finish(&self) -> Option<String> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return None;
        }
        info!(session_id = %self.session_id, "session ending, performing final save");
        Some(self.tools.save_session(&self.session_id).await)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(session_id = %self.session_id, "session dropped before final save");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let tools = Arc::clone(&self.tools);
                let session_id = std::mem::take(&mut self.session_id);
                handle.spawn(async move {
                    tools.save_session(&session_id).await;
                });
            }
            Err(_) => {
                error!(session_id = %self.session_id, "no runtime available for final save");
            }
        }
    }
}

/// Runs one conversation to completion and saves it exactly once.
///
/// Logs the greeting, hands the session to `runtime`, then performs the
/// terminal save whatever the outcome. A runtime error is returned after the
/// save.
pub async fn run_session(
    runtime: Arc<dyn ConversationRuntime>,
    tools: Arc<FinanceTools>,
    launch: SessionLaunch,
) -> Result<(), VoiceError> {
    run_session_until(runtime, tools, launch, std::future::pending()).await
}

/// Like [`run_session`], but stops waiting on the runtime once `cancelled`
/// completes. The terminal save still happens.
pub async fn run_session_until(
    runtime: Arc<dyn ConversationRuntime>,
    tools: Arc<FinanceTools>,
    launch: SessionLaunch,
    cancelled: impl Future<Output = ()> + Send,
) -> Result<(), VoiceError> {
    let SessionLaunch {
        session_id,
        room_name,
    } = launch;
    info!(session_id = %session_id, room = %room_name, "starting finance bot session");

    let guard = SessionGuard::new(Arc::clone(&tools), session_id.clone());
    tools
        .log_message(&session_id, "assistant", GREETING)
        .await;

    let session = AgentSession {
        session_id: session_id.clone(),
        room_name,
        instructions: AGENT_INSTRUCTIONS.to_string(),
        opening_instructions: opening_instructions(&session_id),
        transcripts: Arc::new(tools.transcript(&session_id)),
        tools,
    };

    let result = tokio::select! {
        biased;
        result = runtime.run(session) => result,
        () = cancelled => {
            warn!(session_id = %session_id, "session cancelled before the room closed");
            Ok(())
        }
    };

    if let Err(e) = &result {
        error!(session_id = %session_id, error = %e, "session error");
    }
    guard.finish().await;

    result
}
