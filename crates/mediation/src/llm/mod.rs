//! Conversational model runtime abstraction
//!
//! The orchestrator drives the model one step at a time. A step is either a
//! final reply or a batch of tool calls.

pub mod chat_completions;
pub mod scripted;

pub use chat_completions::ChatCompletionsRuntime;
pub use scripted::ScriptedRuntime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use warden_common::{ChatMessage, Role};

use crate::error::RuntimeError;
use crate::tools::ToolSpec;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelStep {
    Reply(String),
    ToolCalls {
        text: Option<String>,
        calls: Vec<ToolCall>,
    },
}

/// Persisted message body. Stored as the `content` column of chat messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    ToolCalls {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        calls: Vec<ToolCall>,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        output: Value,
    },
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ModelMessage {
    pub fn new(role: Role, content: MessageContent) -> Self {
        Self { role, content }
    }

    /// `None` for stored bodies this runtime does not understand
    pub fn from_chat(message: &ChatMessage) -> Option<Self> {
        match serde_json::from_value::<MessageContent>(message.content.clone()) {
            Ok(content) => Some(Self::new(message.role, content)),
            Err(err) => {
                tracing::debug!(message_id = %message.id, "skipping unreadable history entry: {}", err);
                None
            }
        }
    }
}

pub struct ModelRequest {
    pub system_prompt: String,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolSpec>,
}

#[async_trait]
pub trait ModelRuntime: Send + Sync {
    async fn next_step(&self, request: &ModelRequest) -> Result<ModelStep, RuntimeError>;
}

/// Drop tool calls without a result and results without a call. Interrupted
/// or cancelled turns leave such gaps in stored history.
pub fn repair_history(messages: Vec<ModelMessage>) -> Vec<ModelMessage> {
    let answered: HashSet<String> = messages
        .iter()
        .filter_map(|m| match &m.content {
            MessageContent::ToolResult { call_id, .. } => Some(call_id.clone()),
            _ => None,
        })
        .collect();
    let requested: HashSet<String> = messages
        .iter()
        .flat_map(|m| match &m.content {
            MessageContent::ToolCalls { calls, .. } => calls.iter().map(|c| c.id.clone()).collect(),
            _ => Vec::new(),
        })
        .collect();

    messages
        .into_iter()
        .filter_map(|message| match message.content {
            MessageContent::ToolCalls { text, calls } => {
                let calls: Vec<ToolCall> = calls.into_iter().filter(|c| answered.contains(&c.id)).collect();
                match (calls.is_empty(), text) {
                    (false, text) => Some(ModelMessage::new(message.role, MessageContent::ToolCalls { text, calls })),
                    (true, Some(text)) if !text.trim().is_empty() => {
                        Some(ModelMessage::new(message.role, MessageContent::Text { text }))
                    }
                    (true, _) => None,
                }
            }
            MessageContent::ToolResult { ref call_id, .. } if !requested.contains(call_id) => None,
            _ => Some(message),
        })
        .collect()
}
