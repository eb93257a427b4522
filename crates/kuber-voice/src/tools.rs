//! The seam between a conversation and the application that hosts it.
//!
//! A conversation calls out through two traits: [`ToolDispatcher`] for
//! function calls the model decides to make, and [`TranscriptSink`] for every
//! finalised utterance on either side.

use async_trait::async_trait;
use kuber_types::Speaker;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description shown to the model.
    pub description: String,
    /// JSON schema for the arguments object.
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Renders the chat-completions `tools` entry.
    pub fn to_llm_format(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Executes tool calls on behalf of a conversation.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Runs `name` with `arguments` and returns text for the model.
    ///
    /// Unknown tools and malformed arguments produce an explanatory string
    /// rather than an error, so the model can recover.
    async fn dispatch(&self, name: &str, arguments: Value) -> String;
}

/// Receives finalised speech from a conversation.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn committed(&self, speaker: Speaker, text: &str);
}
