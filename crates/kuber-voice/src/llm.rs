use crate::config::{error_body, OpenAiConfig};
use crate::error::VoiceError;
use crate::tools::ToolDispatcher;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

/// Tool-call rounds allowed per reply before the model must answer in text.
pub const MAX_TOOL_ROUNDS: usize = 4;

/// User exchanges kept in the chat context, not counting the leading system
/// messages.
pub const MAX_CONTEXT_EXCHANGES: usize = 20;

/// Drops the oldest exchanges so at most `max_exchanges` user messages remain
/// after the leading system messages.
///
/// Cuts happen only at user messages, so an assistant tool call always stays
/// with its tool results.
pub fn trim_to_recent_exchanges(history: &mut Vec<ChatMessage>, max_exchanges: usize) {
    let preamble = history
        .iter()
        .take_while(|m| m.role == "system")
        .count();
    let users: Vec<usize> = history[preamble..]
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == "user")
        .map(|(i, _)| preamble + i)
        .collect();

    let keep = max_exchanges.max(1);
    if users.len() <= keep {
        return;
    }
    let cut = users[users.len() - keep];
    history.drain(preamble..cut);
}

/// One chat-completions message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text("assistant", content)
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::text("tool", content)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

// Some compatible servers send `"tool_calls": null`.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<ToolCall>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<ToolCall>>::deserialize(deserializer)?.unwrap_or_default())
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments object, exactly as the model produced it.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// Chat completions with tool calling.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl ChatClient {
    pub fn new(config: &OpenAiConfig) -> Result<Self, VoiceError> {
        Ok(Self {
            client: config.http_client()?,
            config: config.clone(),
        })
    }

    /// Produces the next assistant reply for `history`.
    ///
    /// Tool calls are dispatched through `tools` and their results fed back,
    /// for at most [`MAX_TOOL_ROUNDS`] rounds; after that the model is asked
    /// once more without tools. Every message exchanged, including the final
    /// reply, is appended to `history`.
    pub async fn reply(
        &self,
        history: &mut Vec<ChatMessage>,
        tools: &dyn ToolDispatcher,
    ) -> Result<String, VoiceError> {
        let definitions: Vec<Value> = tools
            .definitions()
            .iter()
            .map(|d| d.to_llm_format())
            .collect();

        for round in 0..=MAX_TOOL_ROUNDS {
            let offered = if round < MAX_TOOL_ROUNDS {
                definitions.clone()
            } else {
                Vec::new()
            };
            let message = self.complete(history, offered).await?;

            if message.tool_calls.is_empty() {
                let text = message.content.clone().unwrap_or_default().trim().to_string();
                history.push(message);
                return Ok(text);
            }

            if round == MAX_TOOL_ROUNDS {
                break;
            }

            let calls = message.tool_calls.clone();
            history.push(message);
            for call in calls {
                let arguments = match serde_json::from_str::<Value>(&call.function.arguments) {
                    Ok(value) => value,
                    Err(_) if call.function.arguments.trim().is_empty() => Value::Null,
                    Err(e) => {
                        debug!(tool = %call.function.name, error = %e, "unparseable tool arguments");
                        Value::String(call.function.arguments.clone())
                    }
                };
                info!(tool = %call.function.name, round, "dispatching tool call");
                let output = tools.dispatch(&call.function.name, arguments).await;
                history.push(ChatMessage::tool_result(call.id, output));
            }
        }

        Err(VoiceError::Llm(format!(
            "model kept calling tools after {MAX_TOOL_ROUNDS} rounds"
        )))
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Vec<Value>,
    ) -> Result<ChatMessage, VoiceError> {
        let body = CompletionRequest {
            model: &self.config.llm_model,
            messages,
            tools,
        };
        let request = self
            .client
            .post(self.config.endpoint("chat/completions"))
            .json(&body);
        let response = self
            .config
            .authorize(request)
            .send()
            .await
            .map_err(|e| VoiceError::Llm(format!("completion request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(VoiceError::Llm(error_body(response).await));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Llm(format!("invalid completion response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| VoiceError::Llm("completion returned no choices".to_string()))
    }
}
