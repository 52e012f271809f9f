//! Warden mediation layer
//!
//! Every tool call an assistant makes goes through this crate:
//! - risk assessment of the call (`hitl::assessor`)
//! - an append-only audit trail (`hitl::audit`)
//! - the mediation wrapper that blocks, executes or interrupts (`tools::wrapper`)
//! - the interrupt/resume protocol (`hitl::interrupt`)
//! - one conversation turn at a time (`orchestrator`)

pub mod error;
pub mod hitl;
pub mod llm;
pub mod orchestrator;
pub mod tools;

// Re-exports
pub use error::{
    AuditError, AuthorizationRequired, MediationError, RuntimeError, SetupError, ToolFailure, TurnError,
};
pub use hitl::{
    AuditLogger, AuditSettings, Confirmation, InterruptKind, InterruptSignal, InterruptedCall, RiskAssessor,
    RiskPolicy, RiskVerdict, StepUpGrant,
};
pub use llm::{ChatCompletionsRuntime, ModelRuntime, ModelStep, ScriptedRuntime, ToolCall};
pub use orchestrator::{CallRecord, Orchestrator, TurnContext, TurnOutcome, TurnStatus};
pub use tools::{
    CredentialVault, DelegatedToken, MediatedOutcome, MediatedTool, MediationContext, StaticVault, ToolContext,
    ToolDefinition, ToolExecutor, ToolRegistry,
};
