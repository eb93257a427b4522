use crate::error::VoiceError;
use crate::tools::{ToolDispatcher, TranscriptSink};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Everything a runtime needs to hold one conversation.
#[derive(Clone)]
pub struct AgentSession {
    pub session_id: String,
    pub room_name: String,
    /// Standing system prompt for the whole conversation.
    pub instructions: String,
    /// One-off instructions for the agent's opening reply.
    pub opening_instructions: String,
    pub tools: Arc<dyn ToolDispatcher>,
    pub transcripts: Arc<dyn TranscriptSink>,
}

impl fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentSession")
            .field("session_id", &self.session_id)
            .field("room_name", &self.room_name)
            .finish_non_exhaustive()
    }
}

/// A voice-agent runtime that can hold conversations in rooms.
#[async_trait]
pub trait ConversationRuntime: Send + Sync {
    /// Holds the conversation until the room disconnects.
    async fn run(&self, session: AgentSession) -> Result<(), VoiceError>;

    /// Delivers participant audio (16 kHz s16le mono PCM) to a room's agent.
    async fn hear(&self, room_name: &str, pcm: &[u8], speaker: &str) -> Result<(), VoiceError>;

    /// Asks the agent in `room_name` to leave, which ends its `run`.
    async fn hang_up(&self, room_name: &str) -> Result<(), VoiceError>;

    /// Subscribes to the agent's spoken replies in `room_name`, as raw PCM
    /// frames. The receiver closes when the agent leaves the room.
    ///
    /// Runtimes that deliver audio some other way keep the default, which
    /// reports the room as unknown.
    fn listen(&self, room_name: &str) -> Result<broadcast::Receiver<Arc<[u8]>>, VoiceError> {
        Err(VoiceError::RoomNotFound(room_name.to_string()))
    }
}
