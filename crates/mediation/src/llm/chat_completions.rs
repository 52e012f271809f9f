//! OpenAI-compatible `/chat/completions` runtime

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use warden_common::{ModelConfig, Role};

use crate::error::RuntimeError;
use crate::llm::{MessageContent, ModelMessage, ModelRequest, ModelRuntime, ModelStep, ToolCall};

#[derive(Debug, Clone)]
pub struct ChatCompletionsRuntime {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl ChatCompletionsRuntime {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RuntimeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
        })
    }

    /// Reads the API key from the configured environment variable
    pub fn from_config(config: &ModelConfig) -> Result<Self, RuntimeError> {
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            warn!("{} is not set, model requests are sent without credentials", config.api_key_env);
        }
        Self::new(
            config.endpoint.clone(),
            config.model.clone(),
            api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    fn body(&self, request: &ModelRequest) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": request.system_prompt })];
        messages.extend(request.messages.iter().filter_map(wire_message));

        let mut body = json!({ "model": self.model, "messages": messages });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

fn wire_message(message: &ModelMessage) -> Option<Value> {
    match (&message.role, &message.content) {
        (Role::System, _) => None,
        (role, MessageContent::Text { text }) => Some(json!({ "role": role.as_str(), "content": text })),
        (_, MessageContent::ToolCalls { text, calls }) => {
            let calls: Vec<Value> = calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": { "name": call.name, "arguments": call.arguments.to_string() }
                    })
                })
                .collect();
            Some(json!({ "role": "assistant", "content": text, "tool_calls": calls }))
        }
        (_, MessageContent::ToolResult { call_id, tool_name, output }) => {
            let content = match output {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some(json!({ "role": "tool", "tool_call_id": call_id, "name": tool_name, "content": content }))
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    /// Absent or `null` on plain replies
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn parse_tool_call(call: WireToolCall) -> Result<ToolCall, RuntimeError> {
    let raw = call.function.arguments.trim();
    let arguments = if raw.is_empty() {
        json!({})
    } else {
        serde_json::from_str::<Value>(raw).map_err(|e| RuntimeError::MalformedToolCall {
            name: call.function.name.clone(),
            reason: e.to_string(),
        })?
    };
    if !arguments.is_object() {
        return Err(RuntimeError::MalformedToolCall {
            name: call.function.name,
            reason: "arguments must be a JSON object".to_string(),
        });
    }
    Ok(ToolCall {
        id: call.id,
        name: call.function.name,
        arguments,
    })
}

#[async_trait]
impl ModelRuntime for ChatCompletionsRuntime {
    #[instrument(skip_all, fields(model = %self.model, messages = request.messages.len()))]
    async fn next_step(&self, request: &ModelRequest) -> Result<ModelStep, RuntimeError> {
        let mut http = self.client.post(self.url()).json(&self.body(request));
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RuntimeError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let completion: CompletionResponse = response.json().await?;
        let message = completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| RuntimeError::invalid_response("no choices in completion"))?;

        let text = message.content.filter(|t| !t.trim().is_empty());
        let tool_calls = message.tool_calls.unwrap_or_default();
        if tool_calls.is_empty() {
            debug!("model replied");
            return Ok(ModelStep::Reply(text.unwrap_or_default()));
        }

        let calls = tool_calls
            .into_iter()
            .map(parse_tool_call)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(calls = calls.len(), "model requested tools");
        Ok(ModelStep::ToolCalls { text, calls })
    }
}
