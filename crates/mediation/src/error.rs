use serde::{Deserialize, Serialize};
use thiserror::Error;
use warden_common::ConfigError;
use warden_storage::StorageError;

/// A delegated credential the user has not granted yet.
///
/// Raised by tool back-ends, passed through the mediation layer unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Authorization required for connection '{connection}': {message}")]
pub struct AuthorizationRequired {
    pub connection: String,
    pub scopes: Vec<String>,
    pub message: String,
}

/// Failure raised by an underlying tool
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolFailure {
    #[error("{0}")]
    Genuine(String),

    #[error(transparent)]
    AuthorizationRequired(AuthorizationRequired),
}

impl ToolFailure {
    pub fn genuine(msg: impl Into<String>) -> Self {
        Self::Genuine(msg.into())
    }

    pub fn authorization_required(
        connection: impl Into<String>,
        scopes: &[&str],
        message: impl Into<String>,
    ) -> Self {
        Self::AuthorizationRequired(AuthorizationRequired {
            connection: connection.into(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            message: message.into(),
        })
    }

    /// Interrupts are control flow, not errors
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::AuthorizationRequired(_))
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit write failed after {attempts} attempt(s): {source}")]
    WriteFailed {
        attempts: u32,
        #[source]
        source: StorageError,
    },
}

/// Faults of a mediated invocation. Interrupts are not represented here.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MediationError {
    #[error("Tool '{tool}' failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("Audit trail unavailable for '{tool}', refusing to execute")]
    AuditUnavailable {
        tool: String,
        #[source]
        source: AuditError,
    },

    #[error("Invocation of '{tool}' was cancelled")]
    Cancelled { tool: String },
}

impl MediationError {
    pub fn tool_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Configuration faults detected while assembling the tool set
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Tool '{0}' has no executor")]
    MissingExecutor(String),

    #[error("Tool '{0}' is registered more than once")]
    DuplicateTool(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Model request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed arguments for tool call '{name}': {reason}")]
    MalformedToolCall { name: String, reason: String },

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),
}

impl RuntimeError {
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }
}

/// Turn-level failure surfaced to the caller
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TurnError {
    #[error("Step limit of {0} reached before the model finished")]
    StepLimitExceeded(usize),

    #[error("Model requested unknown tool '{0}'")]
    UnknownTool(String),

    #[error("Confirmation does not match the interrupted call: {0}")]
    ConfirmationMismatch(String),

    #[error("No open interrupt matches the resumed call to '{0}'")]
    InterruptNotFound(String),

    #[error(transparent)]
    Mediation(#[from] MediationError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type MediationResult<T> = std::result::Result<T, MediationError>;
pub type AuditResult<T> = std::result::Result<T, AuditError>;
