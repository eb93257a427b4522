//! Voice runtime for the Kuber assistant.
//!
//! Integrates with LiveKit for rooms and join tokens, and with an
//! OpenAI-compatible API for STT (speech-to-text), chat completions with
//! tool calling, and TTS (text-to-speech).
//!
//! Callers depend only on [`ConversationRuntime`]: hand it an
//! [`AgentSession`] with a [`ToolDispatcher`] and a [`TranscriptSink`] and it
//! holds the conversation until the room disconnects. [`VoicePipeline`] is
//! the concrete runtime.

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod runtime;
pub mod service;
pub mod stt;
pub mod tools;
pub mod tts;

pub use agent::{AgentVoiceClient, TranscriptionEvent};
pub use config::{LiveKitConfig, OpenAiConfig};
pub use error::VoiceError;
pub use llm::{
    trim_to_recent_exchanges, ChatClient, ChatMessage, MAX_CONTEXT_EXCHANGES, MAX_TOOL_ROUNDS,
};
pub use pipeline::VoicePipeline;
pub use runtime::{AgentSession, ConversationRuntime};
pub use service::VoiceService;
pub use stt::SttService;
pub use tools::{ToolDefinition, ToolDispatcher, TranscriptSink};
pub use tts::TtsService;
