//! Structured audit logger
//!
//! One logger per tool invocation, bound to the actor and tool at
//! construction. Every call appends exactly one [`AuditRecord`] and reports
//! whether it became durable.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;
use warden_common::{
    ActorContext, AuditConfig, AuditPhase, AuditRecord, AuditStatus, InvocationId, RiskLevel,
};
use warden_storage::AuditStore;

use crate::error::{AuditError, AuditResult};
use crate::hitl::{RiskVerdict, Sanitizer};

/// Write policy shared by every logger of a process
#[derive(Debug, Clone)]
pub struct AuditSettings {
    pub max_attempts: u32,
    pub backoff: Duration,
    /// An audit-start failure blocks execution at or above this level
    pub fail_closed_at: RiskLevel,
    pub sanitizer: Sanitizer,
}

impl AuditSettings {
    pub fn from_config(config: &AuditConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
            fail_closed_at: config.fail_closed_at,
            sanitizer: Sanitizer::from_config(config),
        }
    }

    pub fn blocks_on_failure(&self, level: RiskLevel) -> bool {
        level >= self.fail_closed_at
    }
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self::from_config(&AuditConfig::default())
    }
}

pub struct AuditLogger {
    store: Arc<dyn AuditStore>,
    settings: Arc<AuditSettings>,
    actor: ActorContext,
    invocation_id: InvocationId,
    tool_name: String,
    agent_role: String,
    risk_level: Option<RiskLevel>,
}

impl AuditLogger {
    pub fn new(
        store: Arc<dyn AuditStore>,
        settings: Arc<AuditSettings>,
        actor: ActorContext,
        tool_name: impl Into<String>,
        agent_role: impl Into<String>,
    ) -> Self {
        Self {
            store,
            settings,
            actor,
            invocation_id: InvocationId::new(),
            tool_name: tool_name.into(),
            agent_role: agent_role.into(),
            risk_level: None,
        }
    }

    pub fn with_risk(mut self, level: RiskLevel) -> Self {
        self.risk_level = Some(level);
        self
    }

    pub fn invocation_id(&self) -> InvocationId {
        self.invocation_id
    }

    pub async fn log_tool_start(&self, input: &Value, verdict: &RiskVerdict) -> AuditResult<()> {
        let payload = json!({
            "input": self.settings.sanitizer.sanitize(input),
            "riskLevel": verdict.level,
            "requiresStepUp": verdict.requires_step_up,
            "category": verdict.category,
            "reasons": verdict.reasons,
        });
        self.append(AuditPhase::Start, AuditStatus::Started, payload).await
    }

    pub async fn log_tool_success(&self, result: &Value) -> AuditResult<()> {
        let payload = json!({ "result": self.settings.sanitizer.sanitize(result) });
        self.append(AuditPhase::Success, AuditStatus::Succeeded, payload).await
    }

    pub async fn log_tool_error(&self, message: &str) -> AuditResult<()> {
        let payload = json!({ "error": message, "toolName": self.tool_name });
        self.append(AuditPhase::Error, AuditStatus::Failed, payload).await
    }

    /// Generic phase/status/detail record. `detail` is sanitised.
    pub async fn log_action(
        &self,
        phase: AuditPhase,
        status: AuditStatus,
        detail: &Value,
    ) -> AuditResult<()> {
        let payload = self.settings.sanitizer.sanitize(detail);
        self.append(phase, status, payload).await
    }

    async fn append(&self, phase: AuditPhase, status: AuditStatus, payload: Value) -> AuditResult<()> {
        // The id is fixed before the first attempt so a retried write stays one record
        let record = AuditRecord {
            id: Uuid::new_v4(),
            invocation_id: self.invocation_id,
            timestamp: Utc::now(),
            actor: self.actor.clone(),
            tool_name: self.tool_name.clone(),
            agent_role: self.agent_role.clone(),
            phase,
            status,
            risk_level: self.risk_level,
            payload,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.append_audit(&record).await {
                Ok(()) => {
                    debug!(
                        target: "audit",
                        invocation = %self.invocation_id,
                        tool = %self.tool_name,
                        phase = %phase,
                        "audit record written"
                    );
                    return Ok(());
                }
                Err(err) if err.is_transient() && attempt < self.settings.max_attempts => {
                    warn!(
                        target: "audit",
                        invocation = %self.invocation_id,
                        phase = %phase,
                        attempt,
                        "transient audit write failure, retrying: {}",
                        err
                    );
                    tokio::time::sleep(self.settings.backoff * attempt).await;
                }
                Err(err) => {
                    error!(
                        target: "audit",
                        invocation = %self.invocation_id,
                        tool = %self.tool_name,
                        user = %self.actor.user_id,
                        thread = %self.actor.thread_id,
                        phase = %phase,
                        attempts = attempt,
                        "audit record lost: {}",
                        err
                    );
                    return Err(AuditError::WriteFailed {
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use warden_storage::{AuditQuery, MemoryStore, StorageError, StorageResult};

    /// Fails the first `failures` writes, then delegates
    struct FlakyStore {
        inner: MemoryStore,
        failures: AtomicU32,
        transient: bool,
    }

    #[async_trait]
    impl AuditStore for FlakyStore {
        async fn append_audit(&self, record: &AuditRecord) -> StorageResult<()> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(if self.transient {
                    StorageError::transient("connection reset")
                } else {
                    StorageError::backend("permission denied")
                });
            }
            self.inner.append_audit(record).await
        }

        async fn query_audit(&self, query: &AuditQuery) -> StorageResult<Vec<AuditRecord>> {
            self.inner.query_audit(query).await
        }
    }

    fn settings() -> Arc<AuditSettings> {
        Arc::new(AuditSettings {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
            ..AuditSettings::default()
        })
    }

    fn logger(store: Arc<dyn AuditStore>) -> AuditLogger {
        let actor = ActorContext::new("u1", "u1@example.com", "t1");
        AuditLogger::new(store, settings(), actor, "searchDocuments", "knowledge-agent")
            .with_risk(RiskLevel::Low)
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            failures: AtomicU32::new(2),
            transient: true,
        });
        let logger = logger(store.clone());

        logger.log_tool_success(&json!({ "hits": 3 })).await.unwrap();
        let records = store.inner.audit_records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].phase, AuditPhase::Success);
        assert_eq!(records[0].risk_level, Some(RiskLevel::Low));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_reported_without_retry() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            failures: AtomicU32::new(1),
            transient: false,
        });
        let logger = logger(store.clone());

        let err = logger.log_tool_error("boom").await.unwrap_err();
        assert!(matches!(err, AuditError::WriteFailed { attempts: 1, .. }));
        assert!(store.inner.audit_records().await.is_empty());
    }

    #[tokio::test]
    async fn test_records_share_invocation_id() {
        let store = Arc::new(MemoryStore::new());
        let logger = logger(store.clone());
        let verdict = crate::hitl::RiskAssessor::default().assess(
            "searchDocuments",
            &json!({ "query": "q", "api_key": "k" }),
            &ActorContext::new("u1", "u1@example.com", "t1"),
        );

        logger
            .log_tool_start(&json!({ "query": "q", "api_key": "k" }), &verdict)
            .await
            .unwrap();
        logger.log_tool_success(&json!("ok")).await.unwrap();

        let records = store.audit_records().await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.invocation_id == logger.invocation_id()));
        assert_eq!(records[0].payload["input"]["api_key"]["redacted"], true);
        assert_eq!(records[0].payload["riskLevel"], "LOW");
    }
}
