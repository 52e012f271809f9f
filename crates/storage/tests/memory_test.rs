use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;
use warden_common::{
    ActorContext, AuditPhase, AuditRecord, AuditStatus, ChatMessage, InvocationId, Role,
};
use warden_storage::{AuditQuery, AuditStore, MessageStore, Persistence};

fn record(actor: &ActorContext, tool: &str, phase: AuditPhase) -> AuditRecord {
    AuditRecord {
        id: Uuid::new_v4(),
        invocation_id: InvocationId::new(),
        timestamp: Utc::now(),
        actor: actor.clone(),
        tool_name: tool.to_string(),
        agent_role: "knowledge-agent".to_string(),
        phase,
        status: AuditStatus::Started,
        risk_level: None,
        payload: json!({}),
    }
}

#[tokio::test]
async fn test_conversation_summaries() {
    let persistence = Persistence::in_memory();
    let actor = ActorContext::new("u1", "u1@example.com", "trip-planning");

    persistence
        .messages
        .append_message(&ChatMessage::new(&actor, Role::User, json!({ "type": "text", "text": "Plan my trip to Lisbon" })))
        .await
        .unwrap();
    persistence
        .messages
        .append_message(&ChatMessage::new(&actor, Role::Tool, json!({ "type": "tool_result", "output": {} })))
        .await
        .unwrap();
    persistence
        .messages
        .append_message(&ChatMessage::new(&actor, Role::Assistant, json!({ "type": "text", "text": "Here is a draft itinerary" })))
        .await
        .unwrap();

    let threads = persistence.messages.list_threads("u1", 20).await.unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].thread_id, "trip-planning");
    assert_eq!(threads[0].title, "Plan my trip to Lisbon");
    assert_eq!(threads[0].last_message, "Here is a draft itinerary");
    assert_eq!(threads[0].message_count, 3);
}

#[tokio::test]
async fn test_thread_without_text_gets_fallback_title() {
    let persistence = Persistence::in_memory();
    let actor = ActorContext::new("u1", "u1@example.com", "t-empty");
    persistence
        .messages
        .append_message(&ChatMessage::new(&actor, Role::Tool, json!({ "type": "tool_result" })))
        .await
        .unwrap();

    let threads = persistence.messages.list_threads("u1", 20).await.unwrap();
    assert!(threads[0].title.starts_with("Chat "));
    assert_eq!(threads[0].last_message, "New conversation");
}

#[tokio::test]
async fn test_delete_thread_keeps_audit_trail() {
    let persistence = Persistence::in_memory();
    let actor = ActorContext::new("u1", "u1@example.com", "t1");
    persistence
        .messages
        .append_message(&ChatMessage::new(&actor, Role::User, json!({ "text": "hello" })))
        .await
        .unwrap();
    persistence
        .audit
        .append_audit(&record(&actor, "searchDocuments", AuditPhase::Start))
        .await
        .unwrap();

    let removed = persistence.messages.delete_thread("u1", "t1").await.unwrap();
    assert_eq!(removed, 1);

    let audit = persistence
        .audit
        .query_audit(&AuditQuery::for_user("u1").thread("t1"))
        .await
        .unwrap();
    assert_eq!(audit.len(), 1);
}

#[tokio::test]
async fn test_audit_query_filters() {
    let persistence = Persistence::in_memory();
    let alice = ActorContext::new("alice", "alice@example.com", "t1");
    let bob = ActorContext::new("bob", "bob@example.com", "t1");

    for tool in ["searchDocuments", "gmailSendTool", "searchDocuments"] {
        persistence
            .audit
            .append_audit(&record(&alice, tool, AuditPhase::Start))
            .await
            .unwrap();
    }
    persistence
        .audit
        .append_audit(&record(&bob, "searchDocuments", AuditPhase::Start))
        .await
        .unwrap();

    let by_tool = persistence
        .audit
        .query_audit(&AuditQuery::for_user("alice").tool("searchDocuments"))
        .await
        .unwrap();
    assert_eq!(by_tool.len(), 2);
    assert!(by_tool.iter().all(|r| r.actor.user_id == "alice"));

    let limited = persistence
        .audit
        .query_audit(&AuditQuery::for_user("alice").limit(1))
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].tool_name, "searchDocuments");

    let future = persistence
        .audit
        .query_audit(&AuditQuery::for_user("alice").between(Some(Utc::now() + Duration::hours(1)), None))
        .await
        .unwrap();
    assert!(future.is_empty());
}
