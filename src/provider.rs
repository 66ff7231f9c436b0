//! Model-provider abstraction and the OpenAI-compatible client.
//!
//! The agent loop talks to "the model" through [`ChatProvider`], a capability
//! that takes a conversation plus tool schemas and returns a stream of text
//! and tool-call deltas. Swapping providers never touches loop logic; tests
//! drive the loop with a scripted implementation.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::LlmConfig;
use crate::error::ProviderError;

// ============ Conversation wire types ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One turn in the conversation, OpenAI chat-completions shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A completed tool-call request as the provider expects it echoed back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON string, exactly as assembled from stream fragments.
    pub arguments: String,
}

// ============ Streamed deltas ============

/// One increment of a streamed model response.
///
/// Tool-call arguments arrive in pieces keyed by `index`; callers buffer and
/// concatenate until the stream ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatDelta {
    Text(String),
    ToolCall {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
}

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatDelta, ProviderError>> + Send>>;

/// The model as a black-box capability: conversation in, delta stream out.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
    ) -> Result<ChatStream, ProviderError>;
}

// ============ OpenAI-compatible implementation ============

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!(
                "API key not found: set the {} environment variable",
                config.api_key_env
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
    ) -> Result<ChatStream, ProviderError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.to_vec());
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        // Re-chunk the SSE byte stream into deltas. Network chunks split
        // mid-line, so a line buffer carries over between chunks.
        let stream = response.bytes_stream().boxed();
        let delta_stream = futures::stream::unfold(
            (stream, String::new(), Vec::<ChatDelta>::new(), false),
            |(mut stream, mut buffer, mut queued, mut done)| async move {
                loop {
                    if !queued.is_empty() {
                        let delta = queued.remove(0);
                        return Some((Ok(delta), (stream, buffer, queued, done)));
                    }
                    if done {
                        return None;
                    }
                    match stream.next().await {
                        Some(Ok(bytes)) => {
                            buffer.push_str(&String::from_utf8_lossy(&bytes));
                            match drain_sse_lines(&mut buffer, &mut queued) {
                                Ok(finished) => done = finished,
                                Err(e) => return Some((Err(e), (stream, buffer, queued, true))),
                            }
                        }
                        Some(Err(e)) => {
                            return Some((Err(ProviderError::Http(e)), (stream, buffer, queued, true)));
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(Box::pin(delta_stream))
    }
}

/// Parse complete SSE lines out of `buffer`, pushing deltas onto `queued`.
/// Returns `true` once the `[DONE]` sentinel is seen.
fn drain_sse_lines(buffer: &mut String, queued: &mut Vec<ChatDelta>) -> Result<bool, ProviderError> {
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(payload) = line.strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();
        if payload == "[DONE]" {
            return Ok(true);
        }

        let chunk: StreamChunk = serde_json::from_str(payload)
            .map_err(|e| ProviderError::Stream(format!("bad chunk: {}", e)))?;

        let Some(choice) = chunk.choices.into_iter().next() else {
            continue;
        };
        if let Some(text) = choice.delta.content {
            if !text.is_empty() {
                queued.push(ChatDelta::Text(text));
            }
        }
        for tc in choice.delta.tool_calls.unwrap_or_default() {
            queued.push(ChatDelta::ToolCall {
                index: tc.index,
                id: tc.id,
                name: tc.function.as_ref().and_then(|f| f.name.clone()),
                arguments: tc
                    .function
                    .and_then(|f| f.arguments)
                    .unwrap_or_default(),
            });
        }
    }
    Ok(false)
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Deserialize)]
struct StreamToolCall {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunction>,
}

#[derive(Deserialize)]
struct StreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_text_deltas() {
        let mut buffer = String::from(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        );
        let mut queued = Vec::new();
        let done = drain_sse_lines(&mut buffer, &mut queued).unwrap();
        assert!(!done);
        assert_eq!(
            queued,
            vec![
                ChatDelta::Text("Hel".to_string()),
                ChatDelta::Text("lo".to_string())
            ]
        );
    }

    #[test]
    fn test_drain_handles_split_lines() {
        // A chunk boundary in the middle of a line must not lose data
        let mut buffer = String::from("data: {\"choices\":[{\"delta\":{\"con");
        let mut queued = Vec::new();
        assert!(!drain_sse_lines(&mut buffer, &mut queued).unwrap());
        assert!(queued.is_empty());

        buffer.push_str("tent\":\"hi\"}}]}\n");
        assert!(!drain_sse_lines(&mut buffer, &mut queued).unwrap());
        assert_eq!(queued, vec![ChatDelta::Text("hi".to_string())]);
    }

    #[test]
    fn test_drain_tool_call_fragments() {
        let mut buffer = String::from(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"search_code\",\"arguments\":\"\"}}]}}]}\n\
             data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"patt\"}}]}}]}\n\
             data: [DONE]\n",
        );
        let mut queued = Vec::new();
        let done = drain_sse_lines(&mut buffer, &mut queued).unwrap();
        assert!(done);
        assert_eq!(queued.len(), 2);
        match &queued[0] {
            ChatDelta::ToolCall { index, id, name, .. } => {
                assert_eq!(*index, 0);
                assert_eq!(id.as_deref(), Some("call_1"));
                assert_eq!(name.as_deref(), Some("search_code"));
            }
            other => panic!("unexpected delta: {:?}", other),
        }
        match &queued[1] {
            ChatDelta::ToolCall { arguments, .. } => assert_eq!(arguments, "{\"patt"),
            other => panic!("unexpected delta: {:?}", other),
        }
    }

    #[test]
    fn test_message_serialization_skips_empty_fields() {
        let msg = ChatMessage::user("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
    }
}
