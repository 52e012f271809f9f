//! Request and response bodies of the HTTP API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_common::{AuditRecord, ChatMessage, RiskLevel, ThreadSummary, DEFAULT_THREAD_ID};
use warden_mediation::{CallRecord, Confirmation, InterruptedCall, TurnError, TurnOutcome, TurnStatus};

/// Messages returned by the history route when no limit is given
pub const DEFAULT_HISTORY_LIMIT: usize = 100;
/// Threads listed by the conversations route
pub const CONVERSATION_LIST_LIMIT: usize = 20;
pub const DEFAULT_AUDIT_LIMIT: usize = 200;

fn default_thread() -> String {
    DEFAULT_THREAD_ID.to_string()
}

/// Run one conversation turn
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default = "default_thread")]
    pub thread_id: String,
    pub message: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

/// Resume a call interrupted by an earlier turn
#[derive(Debug, Clone, Deserialize)]
pub struct ResumeRequest {
    #[serde(default = "default_thread")]
    pub thread_id: String,
    pub interrupted: InterruptedCall,
    pub confirmation: Confirmation,
}

/// Terminal state of a turn as rendered to the client. The three
/// interrupt-relevant outcomes are distinct variants so a client never has
/// to parse error text to tell them apart.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnResponse {
    Completed {
        thread_id: String,
        reply: String,
        calls: Vec<CallRecord>,
    },
    RequiresStepUp {
        thread_id: String,
        reply: String,
        message: String,
        #[serde(rename = "riskLevel")]
        risk_level: RiskLevel,
        pending: Vec<InterruptedCall>,
        calls: Vec<CallRecord>,
    },
    RequiresExternalAuthorization {
        thread_id: String,
        connection: Option<String>,
        scopes: Vec<String>,
        message: String,
        interrupted: InterruptedCall,
    },
    Error {
        thread_id: String,
        code: String,
        error: String,
        calls: Vec<CallRecord>,
    },
    Cancelled {
        thread_id: String,
    },
}

fn error_code(err: &TurnError) -> &'static str {
    match err {
        TurnError::StepLimitExceeded(_) => "STEP_LIMIT_EXCEEDED",
        TurnError::UnknownTool(_) => "UNKNOWN_TOOL",
        TurnError::ConfirmationMismatch(_) => "CONFIRMATION_MISMATCH",
        TurnError::InterruptNotFound(_) => "INTERRUPT_NOT_FOUND",
        TurnError::Mediation(_) => "TOOL_FAILED",
        TurnError::Runtime(_) => "MODEL_ERROR",
        TurnError::Storage(_) => "STORAGE_ERROR",
        TurnError::Setup(_) => "SETUP_ERROR",
        TurnError::Serialization(_) => "SERIALIZATION_ERROR",
        _ => "TURN_FAILED",
    }
}

impl From<TurnOutcome> for TurnResponse {
    fn from(outcome: TurnOutcome) -> Self {
        let TurnOutcome {
            thread_id,
            status,
            calls,
            ..
        } = outcome;
        match status {
            TurnStatus::Completed { reply } => Self::Completed {
                thread_id,
                reply,
                calls,
            },
            TurnStatus::StepUpPending { reply, pending } => {
                let risk_level = pending
                    .iter()
                    .map(|p| p.signal.risk_level)
                    .max()
                    .unwrap_or(RiskLevel::High);
                let message = pending
                    .first()
                    .map(|p| p.signal.message.clone())
                    .unwrap_or_default();
                Self::RequiresStepUp {
                    thread_id,
                    reply,
                    message,
                    risk_level,
                    pending,
                    calls,
                }
            }
            TurnStatus::AuthorizationRequired { interrupted } => Self::RequiresExternalAuthorization {
                thread_id,
                connection: interrupted.signal.connection.clone(),
                scopes: interrupted.signal.scopes.clone(),
                message: interrupted.signal.message.clone(),
                interrupted,
            },
            TurnStatus::Failed(err) => Self::Error {
                thread_id,
                code: error_code(&err).to_string(),
                error: err.to_string(),
                calls,
            },
            TurnStatus::Cancelled => Self::Cancelled { thread_id },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_thread")]
    pub thread: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub thread_id: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<ThreadSummary>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub thread_id: String,
    pub deleted: u64,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub thread_id: String,
    pub stopped: bool,
}

/// Filters of the audit route. Always scoped to the caller.
#[derive(Debug, Default, Deserialize)]
pub struct AuditParams {
    pub thread: Option<String>,
    pub tool: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct AuditResponse {
    pub records: Vec<AuditRecord>,
    pub count: usize,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub tools: usize,
    pub timestamp: DateTime<Utc>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TurnResponse {
    pub fn http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Error { code, .. } if code == "CONFIRMATION_MISMATCH" => StatusCode::BAD_REQUEST,
            Self::Error { code, .. } if code == "INTERRUPT_NOT_FOUND" => StatusCode::NOT_FOUND,
            Self::Error { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::OK,
        }
    }
}
