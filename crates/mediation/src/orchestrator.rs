//! Conversation orchestrator
//!
//! Drives exactly one turn:
//! - persists the inbound user message before anything else
//! - binds the mediated tool set to the turn's actor
//! - steps the model, dispatching tool calls concurrently, until it replies
//!   or the step cap trips
//! - surfaces interrupts and tool faults as the turn's terminal status
//!
//! Resuming an interrupted call is a fresh turn that re-issues the call with
//! identical arguments.

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use warden_common::{ActorContext, AuditPhase, AuditRecord, ChatMessage, Role, SystemConfig};
use warden_storage::{AuditQuery, Persistence};

use crate::error::{MediationError, TurnError};
use crate::hitl::{
    AuditSettings, CallState, Confirmation, InterruptKind, InterruptSignal, InterruptedCall,
    RiskAssessor, StepUpGrant,
};
use crate::llm::{
    repair_history, MessageContent, ModelMessage, ModelRequest, ModelRuntime, ModelStep, ToolCall,
};
use crate::tools::wrapper::grant_ttl;
use crate::tools::{
    CredentialVault, MediatedOutcome, MediatedResult, MediatedToolSet, MediationContext, StaticVault,
    ToolRegistry,
};

/// Messages of a thread replayed to the model
pub const HISTORY_LIMIT: usize = 100;

/// Per-request inputs of a turn
pub struct TurnContext {
    pub actor: ActorContext,
    pub vault: Arc<dyn CredentialVault>,
    pub cancel: CancellationToken,
}

impl TurnContext {
    pub fn new(actor: ActorContext) -> Self {
        Self {
            actor,
            vault: Arc::new(StaticVault::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_vault(mut self, vault: Arc<dyn CredentialVault>) -> Self {
        self.vault = vault;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRecord {
    pub call_id: String,
    pub tool_name: String,
    pub state: CallState,
}

#[derive(Debug)]
pub enum TurnStatus {
    Completed {
        reply: String,
    },
    /// The model answered, but some calls wait for step-up confirmation
    StepUpPending {
        reply: String,
        pending: Vec<InterruptedCall>,
    },
    AuthorizationRequired {
        interrupted: InterruptedCall,
    },
    Failed(TurnError),
    Cancelled,
}

impl TurnStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::StepUpPending { .. } => "step_up_pending",
            Self::AuthorizationRequired { .. } => "authorization_required",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug)]
pub struct TurnOutcome {
    pub thread_id: String,
    pub status: TurnStatus,
    pub calls: Vec<CallRecord>,
    /// Model steps taken
    pub steps: usize,
}

/// Mutable state of one turn
struct Turn {
    history: Vec<ModelMessage>,
    pending: Vec<InterruptedCall>,
    calls: Vec<CallRecord>,
    steps: usize,
}

impl Turn {
    fn new() -> Self {
        Self {
            history: Vec::new(),
            pending: Vec::new(),
            calls: Vec::new(),
            steps: 0,
        }
    }
}

enum Dispatched {
    /// Same call already awaiting step-up in this turn, not re-run
    Replayed(InterruptedCall),
    Ran(MediatedResult),
}

pub struct Orchestrator {
    runtime: Arc<dyn ModelRuntime>,
    registry: Arc<ToolRegistry>,
    assessor: Arc<RiskAssessor>,
    persistence: Persistence,
    audit: Arc<AuditSettings>,
    max_steps: usize,
    system_prompt: String,
}

impl Orchestrator {
    pub fn new(
        runtime: Arc<dyn ModelRuntime>,
        registry: Arc<ToolRegistry>,
        assessor: Arc<RiskAssessor>,
        persistence: Persistence,
        config: &SystemConfig,
    ) -> Self {
        Self {
            runtime,
            registry,
            assessor,
            persistence,
            audit: Arc::new(AuditSettings::from_config(&config.audit)),
            max_steps: config.model.max_steps.max(1),
            system_prompt: config
                .model
                .system_prompt
                .clone()
                .unwrap_or_else(default_system_prompt),
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_audit_settings(mut self, audit: AuditSettings) -> Self {
        self.audit = Arc::new(audit);
        self
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    #[instrument(skip_all, fields(thread_id = %ctx.actor.thread_id, user = %ctx.actor.user_id))]
    pub async fn run_turn(&self, ctx: TurnContext, message: &str) -> TurnOutcome {
        info!("Starting turn");
        let mut turn = Turn::new();
        let status = self
            .run_turn_inner(&ctx, message, &mut turn)
            .await
            .unwrap_or_else(TurnStatus::Failed);
        self.finish(&ctx, turn, status)
    }

    /// Re-issue an interrupted call once the user has completed the
    /// out-of-band action, then let the model continue
    #[instrument(skip_all, fields(thread_id = %ctx.actor.thread_id, tool = %interrupted.tool_name))]
    pub async fn resume_turn(
        &self,
        ctx: TurnContext,
        interrupted: InterruptedCall,
        confirmation: Confirmation,
    ) -> TurnOutcome {
        info!(?confirmation, "Resuming interrupted call");
        let mut turn = Turn::new();
        let status = self
            .resume_turn_inner(&ctx, interrupted, confirmation, &mut turn)
            .await
            .unwrap_or_else(TurnStatus::Failed);
        self.finish(&ctx, turn, status)
    }

    fn finish(&self, ctx: &TurnContext, turn: Turn, status: TurnStatus) -> TurnOutcome {
        match &status {
            TurnStatus::Failed(err) => warn!(steps = turn.steps, "Turn failed: {}", err),
            other => info!(steps = turn.steps, status = other.label(), "Turn finished"),
        }
        TurnOutcome {
            thread_id: ctx.actor.thread_id.clone(),
            status,
            calls: turn.calls,
            steps: turn.steps,
        }
    }

    async fn run_turn_inner(
        &self,
        ctx: &TurnContext,
        message: &str,
        turn: &mut Turn,
    ) -> Result<TurnStatus, TurnError> {
        let tools = self.mediated_tools(ctx, Vec::new())?;
        turn.history = self.load_history(&ctx.actor).await?;
        if ctx.cancel.is_cancelled() {
            return Ok(TurnStatus::Cancelled);
        }

        self.record(ctx, turn, Role::User, MessageContent::text(message)).await?;
        self.drive(ctx, &tools, turn).await
    }

    async fn resume_turn_inner(
        &self,
        ctx: &TurnContext,
        interrupted: InterruptedCall,
        confirmation: Confirmation,
        turn: &mut Turn,
    ) -> Result<TurnStatus, TurnError> {
        if !confirmation.resolves(interrupted.kind()) {
            return Err(TurnError::ConfirmationMismatch(format!(
                "{:?} cannot resolve {:?}",
                confirmation,
                interrupted.kind()
            )));
        }
        self.verify_interrupt(&ctx.actor, &interrupted).await?;

        let grants = match confirmation {
            Confirmation::StepUpConfirmed => vec![StepUpGrant::for_call(&interrupted, grant_ttl())],
            Confirmation::AuthorizationGranted => Vec::new(),
        };
        let tools = self.mediated_tools(ctx, grants)?;
        turn.history = self.load_history(&ctx.actor).await?;
        if ctx.cancel.is_cancelled() {
            return Ok(TurnStatus::Cancelled);
        }

        let call = ToolCall {
            id: format!("resume-{}", Uuid::new_v4().simple()),
            name: interrupted.tool_name,
            arguments: interrupted.arguments,
        };
        self.record(
            ctx,
            turn,
            Role::Assistant,
            MessageContent::ToolCalls {
                text: None,
                calls: vec![call.clone()],
            },
        )
        .await?;
        if let Some(status) = self.dispatch(ctx, &tools, turn, vec![call]).await? {
            return Ok(status);
        }
        self.drive(ctx, &tools, turn).await
    }

    /// The resumed call must match an interrupt recorded for the same actor,
    /// thread, tool and arguments. A step-up is redeemable once.
    async fn verify_interrupt(
        &self,
        actor: &ActorContext,
        interrupted: &InterruptedCall,
    ) -> Result<(), TurnError> {
        let (raised, redeemed) = match interrupted.kind() {
            InterruptKind::RequiresStepUp => {
                (AuditPhase::StepUpRequired, Some(AuditPhase::StepUpSatisfied))
            }
            InterruptKind::RequiresExternalAuthorization => (AuditPhase::AuthorizationRequired, None),
        };
        let query = AuditQuery::for_user(&actor.user_id)
            .thread(&actor.thread_id)
            .tool(&interrupted.tool_name);
        let records = self.persistence.audit.query_audit(&query).await?;

        let expected = interrupted.fingerprint();
        let same_call = |record: &AuditRecord| {
            record.payload.get("fingerprint").and_then(Value::as_str) == Some(expected.as_str())
        };
        let Some(last_raised) = records
            .iter()
            .rposition(|r| r.phase == raised && same_call(r))
        else {
            warn!(tool = %interrupted.tool_name, "Resume does not match any recorded interrupt");
            return Err(TurnError::InterruptNotFound(interrupted.tool_name.clone()));
        };
        if let Some(redeemed) = redeemed {
            if records[last_raised + 1..]
                .iter()
                .any(|r| r.phase == redeemed && same_call(r))
            {
                warn!(tool = %interrupted.tool_name, "Step-up already redeemed");
                return Err(TurnError::InterruptNotFound(interrupted.tool_name.clone()));
            }
        }
        Ok(())
    }

    fn mediated_tools(
        &self,
        ctx: &TurnContext,
        grants: Vec<StepUpGrant>,
    ) -> Result<MediatedToolSet, TurnError> {
        let mediation = MediationContext::new(
            ctx.actor.clone(),
            self.assessor.clone(),
            self.persistence.audit.clone(),
            self.audit.clone(),
        )
        .with_vault(ctx.vault.clone())
        .with_grants(grants)
        .with_cancellation(ctx.cancel.clone());
        Ok(self.registry.mediate(Arc::new(mediation))?)
    }

    async fn load_history(&self, actor: &ActorContext) -> Result<Vec<ModelMessage>, TurnError> {
        let stored = self
            .persistence
            .messages
            .thread_messages(&actor.user_id, &actor.thread_id, HISTORY_LIMIT)
            .await?;
        debug!(messages = stored.len(), "Loaded thread history");
        Ok(repair_history(stored.iter().filter_map(ModelMessage::from_chat).collect()))
    }

    /// Persist and append to the model history. Skipped once cancelled.
    async fn record(
        &self,
        ctx: &TurnContext,
        turn: &mut Turn,
        role: Role,
        content: MessageContent,
    ) -> Result<(), TurnError> {
        if ctx.cancel.is_cancelled() {
            return Ok(());
        }
        let message = ChatMessage::new(&ctx.actor, role, content.to_value()?);
        self.persistence.messages.append_message(&message).await?;
        turn.history.push(ModelMessage::new(role, content));
        Ok(())
    }

    async fn drive(
        &self,
        ctx: &TurnContext,
        tools: &MediatedToolSet,
        turn: &mut Turn,
    ) -> Result<TurnStatus, TurnError> {
        let specs = tools.specs();
        loop {
            if turn.steps >= self.max_steps {
                // Interrupts already raised still reach the client
                if let Some(first) = turn.pending.first() {
                    warn!(steps = turn.steps, "Step limit reached with step-up pending");
                    return Ok(TurnStatus::StepUpPending {
                        reply: first.signal.message.clone(),
                        pending: turn.pending.clone(),
                    });
                }
                return Err(TurnError::StepLimitExceeded(self.max_steps));
            }
            if ctx.cancel.is_cancelled() {
                return Ok(TurnStatus::Cancelled);
            }

            let request = ModelRequest {
                system_prompt: self.system_prompt.clone(),
                messages: turn.history.clone(),
                tools: specs.clone(),
            };
            turn.steps += 1;
            let step = tokio::select! {
                _ = ctx.cancel.cancelled() => return Ok(TurnStatus::Cancelled),
                step = self.runtime.next_step(&request) => step?,
            };

            match step {
                ModelStep::Reply(reply) => {
                    self.record(ctx, turn, Role::Assistant, MessageContent::text(reply.clone()))
                        .await?;
                    if ctx.cancel.is_cancelled() {
                        return Ok(TurnStatus::Cancelled);
                    }
                    return Ok(if turn.pending.is_empty() {
                        TurnStatus::Completed { reply }
                    } else {
                        TurnStatus::StepUpPending {
                            reply,
                            pending: turn.pending.clone(),
                        }
                    });
                }
                ModelStep::ToolCalls { text, calls } => {
                    debug!(step = turn.steps, calls = calls.len(), "Model requested tools");
                    self.record(
                        ctx,
                        turn,
                        Role::Assistant,
                        MessageContent::ToolCalls {
                            text,
                            calls: calls.clone(),
                        },
                    )
                    .await?;
                    if let Some(status) = self.dispatch(ctx, tools, turn, calls).await? {
                        return Ok(status);
                    }
                }
            }
        }
    }

    /// Run one batch of tool calls concurrently. `Some` ends the turn.
    async fn dispatch(
        &self,
        ctx: &TurnContext,
        tools: &MediatedToolSet,
        turn: &mut Turn,
        calls: Vec<ToolCall>,
    ) -> Result<Option<TurnStatus>, TurnError> {
        let mut resolved = Vec::with_capacity(calls.len());
        for call in &calls {
            let tool = tools
                .get(&call.name)
                .ok_or_else(|| TurnError::UnknownTool(call.name.clone()))?;
            resolved.push(tool);
        }

        let pending = &turn.pending;
        let runs = calls.iter().zip(resolved).map(|(call, tool)| async move {
            if let Some(earlier) = pending
                .iter()
                .find(|p| p.is_same_call(&call.name, &call.arguments))
            {
                return Dispatched::Replayed(earlier.clone());
            }
            Dispatched::Ran(tool.execute(call.arguments.clone()).await)
        });
        let results = tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(Some(TurnStatus::Cancelled)),
            results = join_all(runs) => results,
        };

        let mut outputs: Vec<(String, String, Value)> = Vec::new();
        let mut authorization: Option<InterruptedCall> = None;
        let mut failure: Option<MediationError> = None;

        for (call, result) in calls.into_iter().zip(results) {
            let state = match result {
                Dispatched::Replayed(earlier) => {
                    debug!(tool = %call.name, "Call already awaiting step-up, not re-dispatched");
                    outputs.push((
                        call.id.clone(),
                        call.name.clone(),
                        json!({
                            "status": "requires_step_up",
                            "message": earlier.signal.message,
                            "riskLevel": earlier.signal.risk_level,
                        }),
                    ));
                    CallState::Interrupted(InterruptKind::RequiresStepUp)
                }
                Dispatched::Ran(Ok(MediatedOutcome::Completed(value))) => {
                    outputs.push((call.id.clone(), call.name.clone(), value));
                    CallState::Completed
                }
                Dispatched::Ran(Ok(MediatedOutcome::NeedsStepUp(step_up))) => {
                    outputs.push((call.id.clone(), call.name.clone(), step_up.to_tool_result()));
                    turn.pending.push(InterruptedCall {
                        call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        arguments: call.arguments.clone(),
                        signal: InterruptSignal::step_up(&step_up),
                    });
                    CallState::Interrupted(InterruptKind::RequiresStepUp)
                }
                Dispatched::Ran(Ok(MediatedOutcome::NeedsAuthorization { fault, risk_level })) => {
                    if authorization.is_none() {
                        authorization = Some(InterruptedCall {
                            call_id: call.id.clone(),
                            tool_name: call.name.clone(),
                            arguments: call.arguments.clone(),
                            signal: InterruptSignal::authorization(&fault, risk_level),
                        });
                    }
                    CallState::Interrupted(InterruptKind::RequiresExternalAuthorization)
                }
                Dispatched::Ran(Err(err)) if err.is_cancelled() => return Ok(Some(TurnStatus::Cancelled)),
                Dispatched::Ran(Err(err)) => {
                    failure.get_or_insert(err);
                    CallState::Failed
                }
            };
            turn.calls.push(CallRecord {
                call_id: call.id,
                tool_name: call.name,
                state,
            });
        }

        if ctx.cancel.is_cancelled() {
            return Ok(Some(TurnStatus::Cancelled));
        }
        for (call_id, tool_name, output) in outputs {
            self.record(
                ctx,
                turn,
                Role::Tool,
                MessageContent::ToolResult {
                    call_id,
                    tool_name,
                    output,
                },
            )
            .await?;
        }

        if let Some(interrupted) = authorization {
            return Ok(Some(TurnStatus::AuthorizationRequired { interrupted }));
        }
        if let Some(err) = failure {
            return Err(err.into());
        }
        Ok(None)
    }
}

pub fn default_system_prompt() -> String {
    format!(
        "You are a personal assistant that answers questions and completes tasks for the user.\n\
\n\
Tool usage:\n\
- Always pass tool arguments as a valid JSON object.\n\
- To read or find emails use gmailSearchTool. To write an email use gmailDraftTool and tell the user the draft is ready for review.\n\
- To check the calendar use getCalendarEventsTool. To create or schedule an event use createCalendarEventTool.\n\
- After using tools, always explain what you found or did. Chain tool calls when a task needs it.\n\
\n\
Security:\n\
- If a tool result contains {{\"status\": \"requires_step_up\"}}, tell the user the action needs step-up verification, ask them to approve it, and wait for their confirmation. Never call that tool again on your own.\n\
- If a tool needs a connected account, the user will be asked to authorize it. Do not retry the call; wait until they have connected the account.\n\
- Every tool action is recorded in the audit log; mention this when relevant.\n\
\n\
Today is {}.",
        chrono::Utc::now().to_rfc3339()
    )
}
