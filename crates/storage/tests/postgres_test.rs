use serde_json::json;
use uuid::Uuid;
use warden_common::{
    ActorContext, AuditPhase, AuditRecord, AuditStatus, ChatMessage, InvocationId, RiskLevel, Role,
};
use warden_storage::{AuditQuery, AuditStore, MessageStore, PostgresClient};

// Helper to get ISOLATED test database URL
fn get_test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set")
}

async fn setup_test_db() -> PostgresClient {
    let client = PostgresClient::new(&get_test_db_url(), 5)
        .await
        .expect("Failed to connect to test database");

    client
        .run_migrations()
        .await
        .expect("Failed to run migrations");

    client
}

fn unique_actor() -> ActorContext {
    ActorContext::new(
        format!("user-{}", Uuid::new_v4()),
        "tester@example.com",
        format!("thread-{}", Uuid::new_v4()),
    )
}

fn audit(actor: &ActorContext, invocation: InvocationId, phase: AuditPhase, status: AuditStatus) -> AuditRecord {
    AuditRecord {
        id: Uuid::new_v4(),
        invocation_id: invocation,
        timestamp: chrono::Utc::now(),
        actor: actor.clone(),
        tool_name: "sendPayment".to_string(),
        agent_role: "finance-agent".to_string(),
        phase,
        status,
        risk_level: Some(RiskLevel::High),
        payload: json!({ "input": { "amount": 1000 } }),
    }
}

#[tokio::test]
#[ignore] // Run only when test services are available
async fn test_postgres_connection() {
    let client = setup_test_db().await;
    assert!(client.pool().acquire().await.is_ok());
}

#[tokio::test]
#[ignore]
async fn test_thread_messages_round_trip_in_order() {
    let client = setup_test_db().await;
    let actor = unique_actor();

    for text in ["first", "second", "third"] {
        let message = ChatMessage::new(&actor, Role::User, json!({ "type": "text", "text": text }));
        client.append_message(&message).await.expect("append failed");
    }

    let latest = client
        .thread_messages(&actor.user_id, &actor.thread_id, 2)
        .await
        .expect("query failed");
    let texts: Vec<String> = latest.iter().filter_map(|m| m.preview(20)).collect();
    assert_eq!(texts, vec!["second", "third"]);

    let threads = client.list_threads(&actor.user_id, 20).await.expect("list failed");
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].title, "first");
    assert_eq!(threads[0].last_message, "third");
    assert_eq!(threads[0].message_count, 3);

    let deleted = client
        .delete_thread(&actor.user_id, &actor.thread_id)
        .await
        .expect("delete failed");
    assert_eq!(deleted, 3);
}

#[tokio::test]
#[ignore]
async fn test_audit_records_survive_thread_deletion() {
    let client = setup_test_db().await;
    let actor = unique_actor();
    let invocation = InvocationId::new();

    client
        .append_audit(&audit(&actor, invocation, AuditPhase::Start, AuditStatus::Started))
        .await
        .expect("start write failed");
    let terminal = audit(&actor, invocation, AuditPhase::StepUpRequired, AuditStatus::Pending);
    client.append_audit(&terminal).await.expect("terminal write failed");
    // Re-sending the same record is accepted
    client.append_audit(&terminal).await.expect("retried write failed");

    client
        .delete_thread(&actor.user_id, &actor.thread_id)
        .await
        .expect("delete failed");

    let records = client
        .query_audit(&AuditQuery::for_user(&actor.user_id).invocation(invocation))
        .await
        .expect("audit query failed");
    let phases: Vec<AuditPhase> = records.iter().map(|r| r.phase).collect();
    assert_eq!(phases, vec![AuditPhase::Start, AuditPhase::StepUpRequired]);
    assert_eq!(records[1].risk_level, Some(RiskLevel::High));
}
