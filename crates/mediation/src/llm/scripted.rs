//! Scripted runtime: replays prepared steps and records every request.
//! Used by tests and offline demos.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::Mutex;

use crate::error::RuntimeError;
use crate::llm::{ModelMessage, ModelRequest, ModelRuntime, ModelStep, ToolCall};

#[derive(Default)]
pub struct ScriptedRuntime {
    steps: Mutex<VecDeque<ModelStep>>,
    /// Replayed forever once the script runs out
    repeat: Option<ModelStep>,
    seen: Mutex<Vec<Vec<ModelMessage>>>,
}

impl ScriptedRuntime {
    pub fn new(steps: impl IntoIterator<Item = ModelStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn repeating(step: ModelStep) -> Self {
        Self {
            repeat: Some(step),
            ..Self::default()
        }
    }

    /// Message history of every request, in order
    pub async fn requests(&self) -> Vec<Vec<ModelMessage>> {
        self.seen.lock().await.clone()
    }

    pub async fn remaining(&self) -> usize {
        self.steps.lock().await.len()
    }
}

/// Single tool call step
pub fn call_tool(id: &str, name: &str, arguments: Value) -> ModelStep {
    ModelStep::ToolCalls {
        text: None,
        calls: vec![ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }],
    }
}

pub fn reply(text: &str) -> ModelStep {
    ModelStep::Reply(text.to_string())
}

#[async_trait]
impl ModelRuntime for ScriptedRuntime {
    async fn next_step(&self, request: &ModelRequest) -> Result<ModelStep, RuntimeError> {
        self.seen.lock().await.push(request.messages.clone());
        if let Some(step) = self.steps.lock().await.pop_front() {
            return Ok(step);
        }
        self.repeat
            .clone()
            .ok_or_else(|| RuntimeError::invalid_response("script exhausted"))
    }
}
