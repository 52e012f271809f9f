use async_trait::async_trait;
use chrono::Duration;
use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use warden_common::{ActorContext, AuditPhase, AuditRecord, InvocationId, RiskLevel};
use warden_mediation::hitl::{fingerprint, StepUpRequired};
use warden_mediation::{
    AuditSettings, InterruptKind, InterruptedCall, MediatedOutcome, MediatedTool, MediationContext,
    MediationError, RiskAssessor, SetupError, StepUpGrant, ToolContext, ToolDefinition, ToolExecutor,
    ToolFailure,
};
use warden_mediation::hitl::InterruptSignal;
use warden_storage::{AuditQuery, AuditStore, MemoryStore, StorageError, StorageResult};

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Echo,
    Fail,
    NeedsAuthorization,
}

/// Counts real executions
#[derive(Debug)]
struct RecordingTool {
    name: &'static str,
    behavior: Behavior,
    calls: AtomicUsize,
}

impl RecordingTool {
    fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolExecutor for RecordingTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> String {
        format!("{} test double", self.name)
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn call(&self, input: Value, _ctx: &ToolContext) -> Result<Value, ToolFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Echo => Ok(json!({ "echo": input })),
            Behavior::Fail => Err(ToolFailure::genuine("upstream returned 502")),
            Behavior::NeedsAuthorization => Err(ToolFailure::authorization_required(
                "google-oauth2",
                &["https://www.googleapis.com/auth/gmail.send"],
                "Authorize Google to send mail",
            )),
        }
    }
}

/// Rejects every write permanently
struct BrokenStore;

#[async_trait]
impl AuditStore for BrokenStore {
    async fn append_audit(&self, _record: &AuditRecord) -> StorageResult<()> {
        Err(StorageError::backend("disk full"))
    }

    async fn query_audit(&self, _query: &AuditQuery) -> StorageResult<Vec<AuditRecord>> {
        Ok(Vec::new())
    }
}

fn actor() -> ActorContext {
    ActorContext::new("user-1", "alex@acme.io", "thread-1")
}

fn context(store: Arc<dyn AuditStore>) -> MediationContext {
    MediationContext::new(
        actor(),
        Arc::new(RiskAssessor::default()),
        store,
        Arc::new(AuditSettings::default()),
    )
}

fn wrap(tool: &Arc<RecordingTool>, ctx: MediationContext) -> MediatedTool {
    let executor: Arc<dyn ToolExecutor> = tool.clone();
    MediatedTool::wrap(&ToolDefinition::from_executor(executor), Arc::new(ctx)).unwrap()
}

fn phases(records: &[AuditRecord]) -> Vec<AuditPhase> {
    records.iter().map(|r| r.phase).collect()
}

fn by_invocation(records: &[AuditRecord]) -> HashMap<InvocationId, Vec<AuditPhase>> {
    let mut grouped: HashMap<InvocationId, Vec<AuditPhase>> = HashMap::new();
    for record in records {
        grouped.entry(record.invocation_id).or_default().push(record.phase);
    }
    grouped
}

#[test]
fn test_unknown_tools_never_classified_low() {
    let assessor = RiskAssessor::default();
    for name in ["wireTransfer", "deleteAllFiles", "", "x", "listSecrets"] {
        let verdict = assessor.assess(name, &json!({}), &actor());
        assert!(verdict.level > RiskLevel::Low, "'{}' was classified LOW", name);
    }
}

#[tokio::test]
async fn test_large_payment_is_blocked_pending_step_up() {
    let store = Arc::new(MemoryStore::new());
    let payment = RecordingTool::new("sendPayment", Behavior::Echo);
    let tool = wrap(&payment, context(store.clone()));

    let outcome = tool
        .execute(json!({ "amount": 1000, "recipient": "x" }))
        .await
        .unwrap();

    match &outcome {
        MediatedOutcome::NeedsStepUp(step_up) => {
            assert_eq!(step_up.risk_level, RiskLevel::High);
            let result = step_up.to_tool_result();
            assert_eq!(result["status"], "requires_step_up");
            assert_eq!(result["riskLevel"], "HIGH");
        }
        other => panic!("expected step-up, got {:?}", other),
    }
    assert_eq!(outcome.interrupt().map(|s| s.kind), Some(InterruptKind::RequiresStepUp));
    assert_eq!(payment.calls(), 0);

    let records = store.audit_records().await;
    assert_eq!(phases(&records), vec![AuditPhase::Start, AuditPhase::StepUpRequired]);
    assert!(records.iter().all(|r| r.agent_role == "finance-agent"));
    assert_eq!(records[1].payload["inputs"]["amount"], 1000);
}

#[tokio::test]
async fn test_low_risk_call_returns_result_unchanged() {
    let store = Arc::new(MemoryStore::new());
    let search = RecordingTool::new("searchDocuments", Behavior::Echo);
    let tool = wrap(&search, context(store.clone()));

    let input = json!({ "query": "travel policy" });
    let outcome = tool.execute(input.clone()).await.unwrap();

    assert_eq!(outcome, MediatedOutcome::Completed(json!({ "echo": input })));
    assert_eq!(search.calls(), 1);
    let records = store.audit_records().await;
    assert_eq!(phases(&records), vec![AuditPhase::Start, AuditPhase::Success]);
    assert_eq!(records[0].invocation_id, records[1].invocation_id);
    assert_eq!(records[1].payload["result"]["echo"]["query"], "travel policy");
}

#[tokio::test]
async fn test_genuine_failure_is_audited_and_raised() {
    let store = Arc::new(MemoryStore::new());
    let search = RecordingTool::new("exaSearchTool", Behavior::Fail);
    let tool = wrap(&search, context(store.clone()));

    let err = tool.execute(json!({ "query": "rust" })).await.unwrap_err();
    assert!(matches!(err, MediationError::ToolFailed { ref message, .. } if message == "upstream returned 502"));

    let records = store.audit_records().await;
    assert_eq!(phases(&records), vec![AuditPhase::Start, AuditPhase::Error]);
    assert_eq!(records[1].payload["error"], "upstream returned 502");
    assert_eq!(records[1].payload["toolName"], "exaSearchTool");
}

#[tokio::test]
async fn test_authorization_interrupt_passes_through_unchanged() {
    let store = Arc::new(MemoryStore::new());
    let draft = RecordingTool::new("gmailDraftTool", Behavior::NeedsAuthorization);
    let tool = wrap(&draft, context(store.clone()));

    let outcome = tool.execute(json!({ "to": ["sam@acme.io"] })).await.unwrap();
    match &outcome {
        MediatedOutcome::NeedsAuthorization { fault, risk_level } => {
            assert_eq!(fault.connection, "google-oauth2");
            assert_eq!(fault.scopes, vec!["https://www.googleapis.com/auth/gmail.send".to_string()]);
            assert_eq!(fault.message, "Authorize Google to send mail");
            assert_eq!(*risk_level, RiskLevel::Medium);
        }
        other => panic!("expected authorization interrupt, got {:?}", other),
    }
    let signal = outcome.interrupt().unwrap();
    assert_eq!(signal.kind, InterruptKind::RequiresExternalAuthorization);
    assert_eq!(signal.connection.as_deref(), Some("google-oauth2"));

    let records = store.audit_records().await;
    assert!(records.iter().all(|r| r.phase != AuditPhase::Error));
    assert_eq!(phases(&records), vec![AuditPhase::Start, AuditPhase::AuthorizationRequired]);
    assert_eq!(records[1].payload["scopes"][0], "https://www.googleapis.com/auth/gmail.send");
}

#[tokio::test]
async fn test_resume_with_grant_creates_fresh_audit_pair() {
    let store = Arc::new(MemoryStore::new());
    let payment = RecordingTool::new("sendPayment", Behavior::Echo);
    let arguments = json!({ "amount": 1000, "recipient": "x" });

    let first = wrap(&payment, context(store.clone()))
        .execute(arguments.clone())
        .await
        .unwrap();
    let MediatedOutcome::NeedsStepUp(step_up) = first else {
        panic!("expected step-up");
    };
    let before = store.audit_records().await;

    let interrupted = InterruptedCall {
        call_id: "call-1".into(),
        tool_name: "sendPayment".into(),
        arguments: arguments.clone(),
        signal: InterruptSignal::step_up(&step_up),
    };
    let grant = StepUpGrant::for_call(&interrupted, Duration::seconds(60));
    let resumed = wrap(&payment, context(store.clone()).with_grants(vec![grant]))
        .execute(arguments.clone())
        .await
        .unwrap();

    assert_eq!(resumed, MediatedOutcome::Completed(json!({ "echo": arguments })));
    assert_eq!(payment.calls(), 1);

    let after = store.audit_records().await;
    // Earlier records are untouched
    assert_eq!(&after[..before.len()], &before[..]);
    let grouped = by_invocation(&after);
    assert_eq!(grouped.len(), 2);
    assert_eq!(
        grouped[&after[before.len()].invocation_id],
        vec![AuditPhase::Start, AuditPhase::StepUpSatisfied, AuditPhase::Success]
    );
    assert_ne!(after[0].invocation_id, after[before.len()].invocation_id);
}

#[tokio::test]
async fn test_grant_does_not_cover_different_arguments() {
    let store = Arc::new(MemoryStore::new());
    let payment = RecordingTool::new("sendPayment", Behavior::Echo);
    let interrupted = InterruptedCall {
        call_id: "call-1".into(),
        tool_name: "sendPayment".into(),
        arguments: json!({ "amount": 1000, "recipient": "x" }),
        signal: InterruptSignal::step_up(&StepUpRequired::new(RiskLevel::High, vec![])),
    };
    let grant = StepUpGrant::for_call(&interrupted, Duration::seconds(60));

    let outcome = wrap(&payment, context(store.clone()).with_grants(vec![grant]))
        .execute(json!({ "amount": 9000, "recipient": "x" }))
        .await
        .unwrap();
    assert!(matches!(outcome, MediatedOutcome::NeedsStepUp(_)));
    assert_eq!(payment.calls(), 0);
}

#[tokio::test]
async fn test_audit_start_failure_blocks_medium_risk() {
    let draft = RecordingTool::new("gmailDraftTool", Behavior::Echo);
    let err = wrap(&draft, context(Arc::new(BrokenStore)))
        .execute(json!({ "to": ["sam@acme.io"] }))
        .await
        .unwrap_err();
    assert!(matches!(err, MediationError::AuditUnavailable { .. }));
    assert_eq!(draft.calls(), 0);
}

#[tokio::test]
async fn test_audit_failure_does_not_block_low_risk() {
    let search = RecordingTool::new("searchDocuments", Behavior::Echo);
    let outcome = wrap(&search, context(Arc::new(BrokenStore)))
        .execute(json!({ "query": "q" }))
        .await
        .unwrap();
    assert!(matches!(outcome, MediatedOutcome::Completed(_)));
    assert_eq!(search.calls(), 1);
}

#[tokio::test]
async fn test_wrapping_declaration_without_executor_fails() {
    let definition = ToolDefinition::declared("sendPayment", "Send money", json!({}));
    let result = MediatedTool::wrap(&definition, Arc::new(context(Arc::new(MemoryStore::new()))));
    assert!(matches!(result, Err(SetupError::MissingExecutor(name)) if name == "sendPayment"));
}

#[tokio::test]
async fn test_concurrent_invocations_keep_records_paired() {
    let store = Arc::new(MemoryStore::new());
    let search = RecordingTool::new("searchDocuments", Behavior::Echo);
    let tool = wrap(&search, context(store.clone()));

    let runs = (0..10).map(|i| tool.execute(json!({ "query": format!("q{}", i) })));
    let outcomes = join_all(runs).await;
    assert!(outcomes.iter().all(|o| matches!(o, Ok(MediatedOutcome::Completed(_)))));

    let records = store.audit_records().await;
    assert_eq!(records.len(), 20);
    for (_, lifecycle) in by_invocation(&records) {
        assert_eq!(lifecycle, vec![AuditPhase::Start, AuditPhase::Success]);
    }
}

#[tokio::test]
async fn test_cancelled_context_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let search = RecordingTool::new("searchDocuments", Behavior::Echo);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let tool = wrap(&search, context(store.clone()).with_cancellation(cancel));

    let err = tool.execute(json!({ "query": "q" })).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(search.calls(), 0);
    assert!(store.audit_records().await.is_empty());
}

#[tokio::test]
async fn test_interrupt_records_carry_call_fingerprint() {
    let store = Arc::new(MemoryStore::new());
    let payment = RecordingTool::new("sendPayment", Behavior::Echo);
    let sender = RecordingTool::new("gmailSendTool", Behavior::NeedsAuthorization);
    let ctx = Arc::new(context(store.clone()));
    let payment_args = json!({ "amount": 1000, "recipient": "x" });
    let mail_args = json!({ "to": ["sam@acme.io"], "subject": "Hi" });

    let payment_exec: Arc<dyn ToolExecutor> = payment.clone();
    let sender_exec: Arc<dyn ToolExecutor> = sender.clone();
    MediatedTool::wrap(&ToolDefinition::from_executor(payment_exec), ctx.clone())
        .unwrap()
        .execute(payment_args.clone())
        .await
        .unwrap();

    // Step-up is granted so the send reaches the tool and hits the missing connection
    let grant_ctx = context(store.clone()).with_grants(vec![StepUpGrant {
        tool_name: "gmailSendTool".to_string(),
        fingerprint: fingerprint(&mail_args),
        expires_at: chrono::Utc::now() + Duration::minutes(5),
    }]);
    let outcome = MediatedTool::wrap(&ToolDefinition::from_executor(sender_exec), Arc::new(grant_ctx))
        .unwrap()
        .execute(mail_args.clone())
        .await
        .unwrap();
    assert!(matches!(outcome, MediatedOutcome::NeedsAuthorization { .. }));

    let records = store.audit_records().await;
    let step_up = records.iter().find(|r| r.phase == AuditPhase::StepUpRequired).unwrap();
    assert_eq!(step_up.payload["fingerprint"], fingerprint(&payment_args));
    let authorization = records
        .iter()
        .find(|r| r.phase == AuditPhase::AuthorizationRequired)
        .unwrap();
    assert_eq!(authorization.payload["fingerprint"], fingerprint(&mail_args));
}
