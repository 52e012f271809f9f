//! Tool mediation wrapper
//!
//! A [`MediatedTool`] keeps the wrapped tool's name, description and schema
//! but runs every call through: assess → audit start → block or execute →
//! audit result.

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use warden_common::{ActorContext, AuditPhase, AuditStatus, RiskLevel};
use warden_storage::AuditStore;

use crate::error::{AuditResult, AuthorizationRequired, MediationError, SetupError, ToolFailure};
use crate::hitl::{
    fingerprint, AuditLogger, AuditSettings, InterruptSignal, RiskAssessor, StepUpGrant,
    StepUpRequired,
};
use crate::tools::{
    CredentialVault, StaticVault, ToolContext, ToolDefinition, ToolExecutor, ToolSpec,
};

/// Non-fault results of a mediated call
#[derive(Debug, Clone, PartialEq)]
pub enum MediatedOutcome {
    /// The tool ran; its result is returned unchanged
    Completed(Value),
    /// Blocked before execution
    NeedsStepUp(StepUpRequired),
    /// Raised by the tool, passed through untouched
    NeedsAuthorization {
        fault: AuthorizationRequired,
        risk_level: RiskLevel,
    },
}

impl MediatedOutcome {
    pub fn interrupt(&self) -> Option<InterruptSignal> {
        match self {
            Self::Completed(_) => None,
            Self::NeedsStepUp(step_up) => Some(InterruptSignal::step_up(step_up)),
            Self::NeedsAuthorization { fault, risk_level } => {
                Some(InterruptSignal::authorization(fault, *risk_level))
            }
        }
    }
}

pub type MediatedResult = Result<MediatedOutcome, MediationError>;

/// Dependencies of one turn, shared by all of its mediated calls
pub struct MediationContext {
    pub actor: ActorContext,
    pub assessor: Arc<RiskAssessor>,
    pub audit_store: Arc<dyn AuditStore>,
    pub audit: Arc<AuditSettings>,
    pub vault: Arc<dyn CredentialVault>,
    pub grants: Vec<StepUpGrant>,
    pub cancel: CancellationToken,
}

impl MediationContext {
    pub fn new(
        actor: ActorContext,
        assessor: Arc<RiskAssessor>,
        audit_store: Arc<dyn AuditStore>,
        audit: Arc<AuditSettings>,
    ) -> Self {
        Self {
            actor,
            assessor,
            audit_store,
            audit,
            vault: Arc::new(StaticVault::new()),
            grants: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_vault(mut self, vault: Arc<dyn CredentialVault>) -> Self {
        self.vault = vault;
        self
    }

    pub fn with_grants(mut self, grants: Vec<StepUpGrant>) -> Self {
        self.grants = grants;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn grant_for(&self, tool_name: &str, input: &Value) -> Option<&StepUpGrant> {
        let now = Utc::now();
        self.grants.iter().find(|grant| grant.covers(tool_name, input, now))
    }
}

pub struct MediatedTool {
    name: String,
    description: String,
    input_schema: Value,
    agent_role: &'static str,
    executor: Arc<dyn ToolExecutor>,
    ctx: Arc<MediationContext>,
}

impl std::fmt::Debug for MediatedTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediatedTool")
            .field("name", &self.name)
            .field("agent_role", &self.agent_role)
            .finish()
    }
}

impl MediatedTool {
    /// Fails here, not at call time, when the definition has no executor
    pub fn wrap(definition: &ToolDefinition, ctx: Arc<MediationContext>) -> Result<Self, SetupError> {
        let executor = definition
            .executor()
            .cloned()
            .ok_or_else(|| SetupError::MissingExecutor(definition.name.clone()))?;
        Ok(Self {
            name: definition.name.clone(),
            description: definition.description.clone(),
            input_schema: definition.input_schema.clone(),
            agent_role: ctx.assessor.policy().agent_role(&definition.name),
            executor,
            ctx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn agent_role(&self) -> &'static str {
        self.agent_role
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }

    #[instrument(skip_all, fields(tool = %self.name, thread_id = %self.ctx.actor.thread_id))]
    pub async fn execute(&self, input: Value) -> MediatedResult {
        let ctx = &self.ctx;
        if ctx.cancel.is_cancelled() {
            return Err(MediationError::Cancelled {
                tool: self.name.clone(),
            });
        }

        let verdict = ctx.assessor.assess(&self.name, &input, &ctx.actor);
        let audit = AuditLogger::new(
            ctx.audit_store.clone(),
            ctx.audit.clone(),
            ctx.actor.clone(),
            &self.name,
            self.agent_role,
        )
        .with_risk(verdict.level);
        debug!(
            invocation = %audit.invocation_id(),
            level = %verdict.level,
            step_up = verdict.requires_step_up,
            "risk assessed"
        );

        if let Err(err) = audit.log_tool_start(&input, &verdict).await {
            if ctx.audit.blocks_on_failure(verdict.level) {
                return Err(MediationError::AuditUnavailable {
                    tool: self.name.clone(),
                    source: err,
                });
            }
            warn!(target: "audit", level = %verdict.level, "continuing without a start record");
        }

        if verdict.requires_step_up {
            match ctx.grant_for(&self.name, &input) {
                Some(grant) => {
                    let detail = json!({
                        "toolName": self.name,
                        "fingerprint": grant.fingerprint,
                        "expiresAt": grant.expires_at,
                    });
                    if let Err(err) = audit
                        .log_action(AuditPhase::StepUpSatisfied, AuditStatus::Approved, &detail)
                        .await
                    {
                        if ctx.audit.blocks_on_failure(verdict.level) {
                            return Err(MediationError::AuditUnavailable {
                                tool: self.name.clone(),
                                source: err,
                            });
                        }
                    }
                    info!(invocation = %audit.invocation_id(), "step-up grant accepted");
                }
                None => {
                    let step_up = StepUpRequired::new(verdict.level, verdict.reasons.clone());
                    let detail = json!({
                        "toolName": self.name,
                        "agentRole": self.agent_role,
                        "inputs": input,
                        "fingerprint": fingerprint(&input),
                        "riskScore": verdict.level,
                        "reasons": verdict.reasons,
                    });
                    // Nothing executes past this point
                    report_loss(
                        AuditPhase::StepUpRequired,
                        audit
                            .log_action(AuditPhase::StepUpRequired, AuditStatus::Pending, &detail)
                            .await,
                    );
                    info!(invocation = %audit.invocation_id(), "blocked pending step-up");
                    return Ok(MediatedOutcome::NeedsStepUp(step_up));
                }
            }
        }

        let call_fingerprint = fingerprint(&input);
        let tool_ctx = ToolContext::new(ctx.actor.clone(), ctx.vault.clone());
        let result = self.executor.call(input, &tool_ctx).await;

        if ctx.cancel.is_cancelled() {
            debug!(invocation = %audit.invocation_id(), "turn cancelled, discarding tool result");
            return Err(MediationError::Cancelled {
                tool: self.name.clone(),
            });
        }

        match result {
            Ok(value) => {
                // The action already happened; a lost success record does not undo it
                report_loss(AuditPhase::Success, audit.log_tool_success(&value).await);
                Ok(MediatedOutcome::Completed(value))
            }
            Err(ToolFailure::AuthorizationRequired(fault)) => {
                let detail = json!({
                    "connection": fault.connection,
                    "scopes": fault.scopes,
                    "message": fault.message,
                    "fingerprint": call_fingerprint,
                });
                report_loss(
                    AuditPhase::AuthorizationRequired,
                    audit
                        .log_action(
                            AuditPhase::AuthorizationRequired,
                            AuditStatus::Interrupted,
                            &detail,
                        )
                        .await,
                );
                info!(connection = %fault.connection, "tool requires delegated authorization");
                Ok(MediatedOutcome::NeedsAuthorization {
                    fault,
                    risk_level: verdict.level,
                })
            }
            Err(ToolFailure::Genuine(message)) => {
                report_loss(AuditPhase::Error, audit.log_tool_error(&message).await);
                warn!("tool failed: {}", message);
                Err(MediationError::tool_failed(&self.name, message))
            }
        }
    }
}

/// Records written once the outcome is fixed. A lost one is reported, the
/// outcome stands.
fn report_loss(phase: AuditPhase, result: AuditResult<()>) {
    if let Err(err) = result {
        warn!(target: "audit", %phase, "outcome kept without its audit record: {}", err);
    }
}

/// Mediated tools of one turn, by name
#[derive(Debug, Default)]
pub struct MediatedToolSet {
    tools: BTreeMap<String, MediatedTool>,
}

impl MediatedToolSet {
    pub fn new(tools: Vec<MediatedTool>) -> Self {
        Self {
            tools: tools.into_iter().map(|tool| (tool.name.clone(), tool)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&MediatedTool> {
        self.tools.get(name)
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(MediatedTool::spec).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Default lifetime of a grant issued on resume
pub fn grant_ttl() -> Duration {
    Duration::seconds(crate::hitl::STEP_UP_GRANT_TTL_SECS)
}
