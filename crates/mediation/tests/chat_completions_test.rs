use serde_json::json;
use std::time::Duration;
use warden_common::Role;
use warden_mediation::llm::{MessageContent, ModelMessage, ModelRequest};
use warden_mediation::tools::ToolSpec;
use warden_mediation::{ChatCompletionsRuntime, ModelRuntime, ModelStep, RuntimeError};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn runtime(server: &MockServer) -> ChatCompletionsRuntime {
    ChatCompletionsRuntime::new(
        format!("{}/v1/", server.uri()),
        "test-model",
        Some("sk-test".to_string()),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn request() -> ModelRequest {
    ModelRequest {
        system_prompt: "be helpful".to_string(),
        messages: vec![ModelMessage::new(Role::User, MessageContent::text("hello"))],
        tools: vec![ToolSpec {
            name: "searchDocuments".to_string(),
            description: "Search documents".to_string(),
            parameters: json!({ "type": "object" }),
        }],
    }
}

fn completion(message: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "choices": [{ "message": message }] }))
}

#[tokio::test]
async fn test_plain_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "messages": [
                { "role": "system", "content": "be helpful" },
                { "role": "user", "content": "hello" }
            ],
            "tools": [{ "type": "function", "function": { "name": "searchDocuments" } }]
        })))
        .respond_with(completion(json!({ "role": "assistant", "content": "Hi there" })))
        .expect(1)
        .mount(&server)
        .await;

    let step = runtime(&server).next_step(&request()).await.unwrap();
    assert_eq!(step, ModelStep::Reply("Hi there".to_string()));
}

#[tokio::test]
async fn test_null_tool_calls_is_a_plain_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(completion(json!({ "role": "assistant", "content": "Hi", "tool_calls": null })))
        .mount(&server)
        .await;

    let step = runtime(&server).next_step(&request()).await.unwrap();
    assert_eq!(step, ModelStep::Reply("Hi".to_string()));
}

#[tokio::test]
async fn test_tool_calls_are_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(completion(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [
                {
                    "id": "call_1",
                    "type": "function",
                    "function": { "name": "searchDocuments", "arguments": "{\"query\":\"meals\"}" }
                },
                {
                    "id": "call_2",
                    "type": "function",
                    "function": { "name": "getUserInfoTool", "arguments": "" }
                }
            ]
        })))
        .mount(&server)
        .await;

    let step = runtime(&server).next_step(&request()).await.unwrap();
    let ModelStep::ToolCalls { text, calls } = step else {
        panic!("expected tool calls");
    };
    assert_eq!(text, None);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].id, "call_1");
    assert_eq!(calls[0].arguments, json!({ "query": "meals" }));
    assert_eq!(calls[1].arguments, json!({}));
}

#[tokio::test]
async fn test_malformed_arguments_are_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion(json!({
            "role": "assistant",
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": { "name": "sendPayment", "arguments": "{\"amount\": 10" }
            }]
        })))
        .mount(&server)
        .await;

    let err = runtime(&server).next_step(&request()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::MalformedToolCall { ref name, .. } if name == "sendPayment"));
}

#[tokio::test]
async fn test_non_object_arguments_are_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion(json!({
            "role": "assistant",
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": { "name": "sendPayment", "arguments": "[1, 2]" }
            }]
        })))
        .mount(&server)
        .await;

    let err = runtime(&server).next_step(&request()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::MalformedToolCall { .. }));
}

#[tokio::test]
async fn test_api_errors_keep_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let err = runtime(&server).next_step(&request()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Api { status: 429, ref body } if body == "rate limited"));
}

#[tokio::test]
async fn test_empty_choices_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let err = runtime(&server).next_step(&request()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_tool_history_is_sent_in_wire_format() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "messages": [
                { "role": "system" },
                { "role": "user", "content": "hello" },
                {
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "c1",
                        "type": "function",
                        "function": { "name": "searchDocuments", "arguments": "{\"query\":\"q\"}" }
                    }]
                },
                { "role": "tool", "tool_call_id": "c1", "content": "{\"hits\":0}" }
            ]
        })))
        .respond_with(completion(json!({ "role": "assistant", "content": "Nothing found" })))
        .expect(1)
        .mount(&server)
        .await;

    let mut req = request();
    req.messages.push(ModelMessage::new(
        Role::Assistant,
        MessageContent::ToolCalls {
            text: None,
            calls: vec![warden_mediation::ToolCall {
                id: "c1".to_string(),
                name: "searchDocuments".to_string(),
                arguments: json!({ "query": "q" }),
            }],
        },
    ));
    req.messages.push(ModelMessage::new(
        Role::Tool,
        MessageContent::ToolResult {
            call_id: "c1".to_string(),
            tool_name: "searchDocuments".to_string(),
            output: json!({ "hits": 0 }),
        },
    ));

    let step = runtime(&server).next_step(&req).await.unwrap();
    assert_eq!(step, ModelStep::Reply("Nothing found".to_string()));
}
