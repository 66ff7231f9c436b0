//! The agent loop: dispatch → stream → execute tools → repeat.
//!
//! Drives one question-answering session against a repository. Each round
//! sends the conversation to the model provider, streams the response out as
//! events, and — when the model requests tools — executes them concurrently,
//! reassembles results in issuance order, and loops. A hard round cap bounds
//! the session.
//!
//! Output is a single ordered event sequence over an mpsc channel; the
//! caller (SSE handler, CLI, or a test collecting into a Vec) drains it.
//! Dropping the receiver cancels the session at the next suspension point.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ToolError;
use crate::provider::{ChatDelta, ChatMessage, ChatProvider, FunctionCall, ToolCallRequest};
use crate::tools::{ToolContext, ToolRegistry};

/// Kept short: the system prompt rides along on every dispatch, so every
/// extra token multiplies across the loop.
const SYSTEM_PROMPT: &str = "\
You are a code exploration assistant. You have access to a repository's codebase \
through the tools provided. Your job is to answer questions about the code \
accurately and thoroughly.

## How to explore

1. Start with `list_files` to understand the repo structure.
2. Use `search_code` to find where specific patterns, functions, or classes are defined or used.
3. Use `read_file` to read the actual code. Use `start_line`/`end_line` for large files.

## Rules

- NEVER guess. Always verify by reading the code before answering.
- Reference specific file paths and line numbers in your answers (e.g., `src/auth.py:42`).
- If a file is too large, read it in sections rather than all at once.
- When searching, start broad and narrow down. If a search returns too many results, add a glob filter.
- You can call multiple tools in parallel when they are independent.";

const ITERATION_CAP_NOTICE: &str = "\n\n---\nI've reached the maximum exploration depth. \
Here's my best answer based on what I've found so far.";

/// Why a session completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DoneReason {
    /// The model produced a final answer.
    Answered,
    /// The round cap was reached before convergence.
    IterationCap,
}

/// One event in a session's output stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    TextDelta { content: String },
    ToolStart { name: String, arguments: Value },
    ToolResult { name: String, is_error: bool },
    Done { reason: DoneReason },
    Error { message: String },
}

/// Prior conversation turn supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

/// A tool call assembled from stream fragments.
#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Spawn a session as a background task, returning its event stream.
pub fn spawn_session(
    provider: Arc<dyn ChatProvider>,
    registry: Arc<ToolRegistry>,
    ctx: ToolContext,
    question: String,
    history: Vec<HistoryMessage>,
    max_rounds: usize,
) -> mpsc::Receiver<AgentEvent> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        run_session(&*provider, &registry, &ctx, &question, &history, max_rounds, &tx).await;
    });
    rx
}

/// Run one session to completion, emitting events on `tx`.
///
/// Every outcome (answer, iteration cap, provider failure) ends with a
/// terminal `Done` or `Error` event. A closed channel means the caller went
/// away; the session stops silently.
pub async fn run_session(
    provider: &dyn ChatProvider,
    registry: &ToolRegistry,
    ctx: &ToolContext,
    question: &str,
    history: &[HistoryMessage],
    max_rounds: usize,
    tx: &mpsc::Sender<AgentEvent>,
) {
    let mut messages: Vec<ChatMessage> = vec![ChatMessage::system(SYSTEM_PROMPT)];
    for turn in history {
        match turn.role.as_str() {
            "assistant" => messages.push(ChatMessage::assistant(turn.content.clone())),
            _ => messages.push(ChatMessage::user(turn.content.clone())),
        }
    }
    messages.push(ChatMessage::user(question));

    let schemas = registry.schemas();

    for _round in 0..max_rounds {
        // ---- Dispatching → Streaming ----
        let mut stream = match provider.stream_chat(&messages, &schemas).await {
            Ok(s) => s,
            Err(e) => {
                let _ = tx.send(AgentEvent::Error { message: e.to_string() }).await;
                return;
            }
        };

        // Text goes out the moment it arrives; tool-call fragments are
        // buffered per stream index until the response ends. Partial
        // payloads are never dispatched.
        let mut pending: BTreeMap<usize, PendingCall> = BTreeMap::new();
        let mut text_content = String::new();

        while let Some(item) = stream.next().await {
            match item {
                Ok(ChatDelta::Text(text)) => {
                    text_content.push_str(&text);
                    if tx
                        .send(AgentEvent::TextDelta { content: text })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Ok(ChatDelta::ToolCall {
                    index,
                    id,
                    name,
                    arguments,
                }) => {
                    let call = pending.entry(index).or_default();
                    if let Some(id) = id {
                        call.id = id;
                    }
                    if let Some(name) = name {
                        call.name = name;
                    }
                    call.arguments.push_str(&arguments);
                }
                Err(e) => {
                    let _ = tx.send(AgentEvent::Error { message: e.to_string() }).await;
                    return;
                }
            }
        }

        // ---- Final answer: no tool calls requested ----
        if pending.is_empty() {
            let _ = tx
                .send(AgentEvent::Done {
                    reason: DoneReason::Answered,
                })
                .await;
            return;
        }

        // ---- ToolCallReady: echo the assistant turn into the transcript ----
        let calls: Vec<(usize, PendingCall)> = pending.into_iter().collect();
        let requests: Vec<ToolCallRequest> = calls
            .iter()
            .map(|(_, call)| ToolCallRequest {
                id: call.id.clone(),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            })
            .collect();
        let content = (!text_content.is_empty()).then_some(text_content);
        messages.push(ChatMessage::assistant_tool_calls(content, requests));

        // ---- ExecutingTools ----
        for (_, call) in &calls {
            let arguments = serde_json::from_str::<Value>(&call.arguments)
                .unwrap_or(Value::Null);
            if tx
                .send(AgentEvent::ToolStart {
                    name: call.name.clone(),
                    arguments,
                })
                .await
                .is_err()
            {
                return;
            }
        }

        // All calls from this turn run concurrently; join_all returns
        // results in issuance order, so the transcript does not depend on
        // completion timing.
        let results = futures::future::join_all(
            calls.iter().map(|(_, call)| execute_call(registry, ctx, call)),
        )
        .await;

        for ((_, call), result) in calls.iter().zip(results) {
            let (output, is_error) = match result {
                Ok(pair) => pair,
                Err(e) => {
                    // Store-level failure: fatal to the session
                    let _ = tx.send(AgentEvent::Error { message: e.to_string() }).await;
                    return;
                }
            };
            if tx
                .send(AgentEvent::ToolResult {
                    name: call.name.clone(),
                    is_error,
                })
                .await
                .is_err()
            {
                return;
            }
            messages.push(ChatMessage::tool_result(call.id.clone(), output));
        }
        // Loop: next round dispatches the extended transcript
    }

    // ---- Round cap reached ----
    let _ = tx
        .send(AgentEvent::TextDelta {
            content: ITERATION_CAP_NOTICE.to_string(),
        })
        .await;
    let _ = tx
        .send(AgentEvent::Done {
            reason: DoneReason::IterationCap,
        })
        .await;
}

/// Execute one assembled call. Recoverable failures become in-band error
/// results for the model; only store failures propagate.
async fn execute_call(
    registry: &ToolRegistry,
    ctx: &ToolContext,
    call: &PendingCall,
) -> Result<(String, bool), ToolError> {
    let params: Value = match serde_json::from_str(&call.arguments) {
        Ok(v) => v,
        Err(e) => {
            return Ok((format!("Error: invalid tool arguments: {}", e), true));
        }
    };

    match registry.execute(&call.name, params, ctx).await {
        Ok(output) => Ok((output, false)),
        Err(e) if e.is_recoverable() => Ok((format!("Error: {}", e), true)),
        Err(e) => Err(e),
    }
}
