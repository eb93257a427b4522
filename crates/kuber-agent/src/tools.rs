//! The four tools exposed to the voice agent.
//!
//! Every tool returns a human-readable string. Failures are reported in that
//! string rather than as errors, so a misbehaving tool can never end a
//! conversation.

use async_trait::async_trait;
use kuber_search::SearchChain;
use kuber_session::{AppendOutcome, SessionStore};
use kuber_types::Speaker;
use kuber_voice::{ToolDefinition, ToolDispatcher, TranscriptSink};
use serde_json::{json, Value};
use std::sync::Arc;

pub const LOG_MESSAGE: &str = "log_message";
pub const SAVE_SESSION: &str = "save_session";
pub const GET_CONVERSATION_HISTORY: &str = "get_conversation_history";
pub const INTERNET_SEARCH: &str = "internet_search";

/// Session logging, persistence, history and search, shared by every
/// conversation.
#[derive(Debug, Clone)]
pub struct FinanceTools {
    store: Arc<SessionStore>,
    search: Arc<SearchChain>,
    history_limit: usize,
}

impl FinanceTools {
    pub fn new(store: Arc<SessionStore>, search: Arc<SearchChain>, history_limit: usize) -> Self {
        Self {
            store,
            search,
            history_limit,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub async fn log_message(&self, session_id: &str, speaker: &str, text: &str) -> String {
        if text.trim().is_empty() {
            return format!("Empty message not logged for {session_id}");
        }
        let Ok(parsed) = speaker.parse::<Speaker>() else {
            tracing::warn!(session_id, speaker, "unknown speaker");
            return format!("Unknown speaker '{speaker}', message not logged for {session_id}");
        };
        self.log_as(session_id, parsed, text).await
    }

    async fn log_as(&self, session_id: &str, speaker: Speaker, text: &str) -> String {
        match self.store.append_message(session_id, speaker, text).await {
            AppendOutcome::Rejected => format!("Empty message not logged for {session_id}"),
            AppendOutcome::Logged { count } => {
                format!("Logged {speaker} message for {session_id} (total messages: {count})")
            }
        }
    }

    pub async fn save_session(&self, session_id: &str) -> String {
        match self.store.save(session_id).await {
            Ok(_) => format!("Session {session_id} saved successfully"),
            Err(e) => format!("Failed to save: {e}"),
        }
    }

    pub async fn get_conversation_history(&self, session_id: &str) -> String {
        self.store
            .history(session_id, self.history_limit)
            .await
            .to_string()
    }

    /// History text for a session held in memory, without creating it.
    pub fn peek_conversation_history(&self, session_id: &str) -> Option<String> {
        self.store
            .peek_history(session_id, self.history_limit)
            .map(|history| history.to_string())
    }

    pub async fn internet_search(&self, query: &str) -> String {
        self.search.search(query).await.to_string()
    }

    /// A transcript sink that logs committed speech into `session_id`.
    pub fn transcript(self: &Arc<Self>, session_id: &str) -> SessionTranscript {
        SessionTranscript {
            tools: Arc::clone(self),
            session_id: session_id.to_string(),
        }
    }
}

/// Looks up a required string argument.
fn str_arg<'a>(tool: &str, arguments: &'a Value, key: &str) -> Result<&'a str, String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("Missing or invalid argument '{key}' for {tool}"))
}

fn session_id_schema() -> Value {
    json!({"type": "string", "description": "The current session ID."})
}

#[async_trait]
impl ToolDispatcher for FinanceTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                LOG_MESSAGE,
                "Log a message for a specific session.",
                json!({
                    "type": "object",
                    "properties": {
                        "session_id": session_id_schema(),
                        "speaker": {"type": "string", "enum": ["user", "assistant"]},
                        "text": {"type": "string"}
                    },
                    "required": ["session_id", "speaker", "text"]
                }),
            ),
            ToolDefinition::new(
                SAVE_SESSION,
                "Save the session's conversation log to disk.",
                json!({
                    "type": "object",
                    "properties": {"session_id": session_id_schema()},
                    "required": ["session_id"]
                }),
            ),
            ToolDefinition::new(
                GET_CONVERSATION_HISTORY,
                "Return the recent conversation history as text.",
                json!({
                    "type": "object",
                    "properties": {"session_id": session_id_schema()},
                    "required": ["session_id"]
                }),
            ),
            ToolDefinition::new(
                INTERNET_SEARCH,
                "Search the internet for current financial information such as \
                 gold rates, market news, or inflation figures.",
                json!({
                    "type": "object",
                    "properties": {"query": {"type": "string"}},
                    "required": ["query"]
                }),
            ),
        ]
    }

    async fn dispatch(&self, name: &str, arguments: Value) -> String {
        tracing::debug!(tool = name, "tool call");

        let result = match name {
            LOG_MESSAGE => match (
                str_arg(name, &arguments, "session_id"),
                str_arg(name, &arguments, "speaker"),
                str_arg(name, &arguments, "text"),
            ) {
                (Ok(id), Ok(speaker), Ok(text)) => Ok(self.log_message(id, speaker, text).await),
                (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => Err(e),
            },
            SAVE_SESSION => match str_arg(name, &arguments, "session_id") {
                Ok(id) => Ok(self.save_session(id).await),
                Err(e) => Err(e),
            },
            GET_CONVERSATION_HISTORY => match str_arg(name, &arguments, "session_id") {
                Ok(id) => Ok(self.get_conversation_history(id).await),
                Err(e) => Err(e),
            },
            INTERNET_SEARCH => match str_arg(name, &arguments, "query") {
                Ok(query) => Ok(self.internet_search(query).await),
                Err(e) => Err(e),
            },
            other => Err(format!("Unknown tool '{other}'")),
        };

        result.unwrap_or_else(|e| {
            tracing::warn!(tool = name, error = %e, "tool call rejected");
            e
        })
    }
}

/// Logs one session's finalised speech.
#[derive(Debug, Clone)]
pub struct SessionTranscript {
    tools: Arc<FinanceTools>,
    session_id: String,
}

#[async_trait]
impl TranscriptSink for SessionTranscript {
    async fn committed(&self, speaker: Speaker, text: &str) {
        let outcome = self.tools.log_as(&self.session_id, speaker, text).await;
        tracing::debug!(session_id = %self.session_id, %outcome, "transcript committed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kuber_search::{SearchBackend, SearchError};
    use kuber_session::{JsonFileWriter, StoreSettings};
    use std::time::Duration;

    struct CannedBackend;

    #[async_trait]
    impl SearchBackend for CannedBackend {
        fn name(&self) -> &str {
            "Canned"
        }

        async fn lookup(&self, query: &str) -> Result<Option<String>, SearchError> {
            if query.contains("gold") {
                Err(SearchError::Status(500))
            } else if query.contains("sip") {
                Ok(Some("A SIP invests a fixed amount monthly.".to_string()))
            } else {
                Ok(None)
            }
        }
    }

    fn tools_in(dir: &std::path::Path) -> Arc<FinanceTools> {
        let store = SessionStore::new(
            Arc::new(JsonFileWriter::new(dir)),
            StoreSettings::default(),
        );
        let search = SearchChain::new(Arc::new(CannedBackend), Duration::ZERO);
        Arc::new(FinanceTools::new(Arc::new(store), Arc::new(search), 20))
    }

    // ── log_message tests ──

    #[tokio::test]
    async fn log_message_reports_running_total() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools_in(dir.path());

        assert_eq!(
            tools.log_message("s1", "user", "What's the gold rate?").await,
            "Logged user message for s1 (total messages: 1)"
        );
        assert_eq!(
            tools.log_message("s1", "assistant", "  Let me check.  ").await,
            "Logged assistant message for s1 (total messages: 2)"
        );
        assert_eq!(
            tools.get_conversation_history("s1").await,
            "user: What's the gold rate?\nassistant: Let me check."
        );
    }

    #[tokio::test]
    async fn empty_message_is_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools_in(dir.path());

        assert_eq!(
            tools.log_message("s1", "user", "  ").await,
            "Empty message not logged for s1"
        );
        assert!(!tools.store().contains("s1"));
    }

    #[tokio::test]
    async fn unknown_speaker_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools_in(dir.path());

        assert_eq!(
            tools.log_message("s1", "narrator", "hello").await,
            "Unknown speaker 'narrator', message not logged for s1"
        );
        assert_eq!(tools.store().message_count("s1"), 0);
    }

    #[tokio::test]
    async fn fifth_message_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools_in(dir.path());

        for i in 0..4 {
            tools.log_message("s1", "user", &format!("m{i}")).await;
        }
        assert!(!dir.path().join("session_s1.json").exists());

        tools.log_message("s1", "assistant", "m4").await;
        assert!(dir.path().join("session_s1.json").exists());
    }

    // ── save / history tests ──

    #[tokio::test]
    async fn save_session_reports_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools_in(dir.path());
        assert_eq!(
            tools.save_session("s1").await,
            "Session s1 saved successfully"
        );

        // A regular file where the sessions directory should be.
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"x").unwrap();
        let broken = tools_in(&blocker);
        assert!(broken.save_session("s1").await.starts_with("Failed to save: "));
    }

    #[tokio::test]
    async fn history_of_new_session_is_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools_in(dir.path());
        assert_eq!(
            tools.get_conversation_history("fresh").await,
            "No conversation history yet"
        );
    }

    #[tokio::test]
    async fn peeking_history_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools_in(dir.path());

        assert_eq!(tools.peek_conversation_history("ghost"), None);
        assert!(tools.store().is_empty());

        tools.log_message("s1", "user", "hi").await;
        assert_eq!(
            tools.peek_conversation_history("s1").as_deref(),
            Some("user: hi")
        );
    }

    // ── internet_search tests ──

    #[tokio::test]
    async fn search_renders_each_tier() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools_in(dir.path());

        assert_eq!(
            tools.internet_search("what is a sip").await,
            "Source: Canned - A SIP invests a fixed amount monthly."
        );
        assert!(tools
            .internet_search("gold rate")
            .await
            .starts_with("General guidance: "));
        assert!(tools
            .internet_search("cricket score")
            .await
            .starts_with("I couldn't find current data for 'cricket score'."));
    }

    // ── dispatch tests ──

    #[tokio::test]
    async fn registers_exactly_four_tools() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools_in(dir.path());
        let names: Vec<String> = tools.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec![
                "log_message",
                "save_session",
                "get_conversation_history",
                "internet_search"
            ]
        );
    }

    #[tokio::test]
    async fn dispatch_routes_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools_in(dir.path());

        let out = tools
            .dispatch(
                "log_message",
                json!({"session_id": "s1", "speaker": "user", "text": "hi"}),
            )
            .await;
        assert_eq!(out, "Logged user message for s1 (total messages: 1)");

        let out = tools
            .dispatch("get_conversation_history", json!({"session_id": "s1"}))
            .await;
        assert_eq!(out, "user: hi");
    }

    #[tokio::test]
    async fn malformed_calls_return_explanations() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools_in(dir.path());

        assert_eq!(
            tools.dispatch("internet_search", json!({"q": "gold"})).await,
            "Missing or invalid argument 'query' for internet_search"
        );
        assert_eq!(
            tools.dispatch("save_session", Value::Null).await,
            "Missing or invalid argument 'session_id' for save_session"
        );
        assert_eq!(
            tools
                .dispatch("log_message", json!({"session_id": "s1", "speaker": 3, "text": "x"}))
                .await,
            "Missing or invalid argument 'speaker' for log_message"
        );
        assert_eq!(
            tools.dispatch("transfer_funds", json!({})).await,
            "Unknown tool 'transfer_funds'"
        );
        assert!(tools.store().is_empty());
    }

    // ── transcript tests ──

    #[tokio::test]
    async fn transcript_logs_into_its_session() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools_in(dir.path());
        let sink = tools.transcript("s9");

        sink.committed(Speaker::User, "How's the market?").await;
        sink.committed(Speaker::Assistant, "").await;
        sink.committed(Speaker::Assistant, "Markets are up today.").await;

        assert_eq!(tools.store().message_count("s9"), 2);
    }
}
