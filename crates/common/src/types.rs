use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use chrono::{DateTime, Utc};

/// Thread used when a client does not name one
pub const DEFAULT_THREAD_ID: &str = "assistant0-chat";

/// Agent role used for tools missing from the policy table
pub const GENERALIST_AGENT_ROLE: &str = "generalist-agent";

/// Identifies one logical tool invocation across its audit records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationId(pub Uuid);

impl InvocationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The acting identity and conversation context of a tool call.
///
/// Immutable once a turn starts; shared by every invocation of that turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub user_id: String,
    pub user_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    pub thread_id: String,
}

impl ActorContext {
    pub fn new(user_id: impl Into<String>, user_email: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_email: user_email.into(),
            workspace_id: None,
            thread_id: thread_id.into(),
        }
    }

    pub fn with_workspace(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = Some(workspace_id.into());
        self
    }

    /// Domain part of the actor's e-mail, lowercased
    pub fn email_domain(&self) -> Option<String> {
        email_domain(&self.user_email)
    }
}

/// Lowercased domain of an e-mail address, if it has one
pub fn email_domain(address: &str) -> Option<String> {
    let (_, domain) = address.trim().rsplit_once('@')?;
    let domain = domain.trim_end_matches('>').trim();
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_ascii_lowercase())
    }
}

/// Risk level of a tool invocation. Ordered, `High` is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            other => Err(format!("unknown risk level '{}'", other)),
        }
    }
}

/// Kind of capability a tool grants; drives both risk policy and audit grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Knowledge,
    Profile,
    Communication,
    Scheduling,
    Commerce,
    Payment,
}

impl ToolCategory {
    /// Agent role label recorded in audit records
    pub fn agent_role(&self) -> &'static str {
        match self {
            Self::Knowledge => "knowledge-agent",
            Self::Profile => "profile-agent",
            Self::Communication => "communication-agent",
            Self::Scheduling => "scheduler-agent",
            Self::Commerce => "commerce-agent",
            Self::Payment => "finance-agent",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Knowledge => "knowledge",
            Self::Profile => "profile",
            Self::Communication => "communication",
            Self::Scheduling => "scheduling",
            Self::Commerce => "commerce",
            Self::Payment => "payment",
        }
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle phase recorded by an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditPhase {
    Start,
    Success,
    Error,
    StepUpRequired,
    StepUpSatisfied,
    AuthorizationRequired,
}

impl AuditPhase {
    /// Terminal phases close the invocation opened by a `Start` record
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Error | Self::StepUpRequired | Self::AuthorizationRequired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Success => "success",
            Self::Error => "error",
            Self::StepUpRequired => "step_up_required",
            Self::StepUpSatisfied => "step_up_satisfied",
            Self::AuthorizationRequired => "authorization_required",
        }
    }
}

impl fmt::Display for AuditPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            "step_up_required" => Ok(Self::StepUpRequired),
            "step_up_satisfied" => Ok(Self::StepUpSatisfied),
            "authorization_required" => Ok(Self::AuthorizationRequired),
            other => Err(format!("unknown audit phase '{}'", other)),
        }
    }
}

/// Outcome status attached to an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Started,
    Succeeded,
    Failed,
    Pending,
    Approved,
    Interrupted,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(Self::Started),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "interrupted" => Ok(Self::Interrupted),
            other => Err(format!("unknown audit status '{}'", other)),
        }
    }
}

/// Durable, append-only audit entry. Never updated after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub invocation_id: InvocationId,
    pub timestamp: DateTime<Utc>,
    pub actor: ActorContext,
    pub tool_name: String,
    pub agent_role: String,
    pub phase: AuditPhase,
    pub status: AuditStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    pub payload: serde_json::Value,
}

/// Author of a persisted chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            "system" => Ok(Self::System),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Persisted chat message. `content` holds the full structured message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub user_id: String,
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    pub role: Role,
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(actor: &ActorContext, role: Role, content: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: actor.user_id.clone(),
            thread_id: actor.thread_id.clone(),
            workspace_id: actor.workspace_id.clone(),
            role,
            content,
            created_at: Utc::now(),
        }
    }

    /// First textual fragment of the message, if any
    pub fn preview(&self, max_chars: usize) -> Option<String> {
        content_preview(&self.content, max_chars)
    }
}

/// Leading text of a structured message body (`"..."` or `{"text": "..."}`)
pub fn content_preview(content: &serde_json::Value, max_chars: usize) -> Option<String> {
    let text = match content {
        serde_json::Value::String(s) => s.as_str(),
        serde_json::Value::Object(map) => map.get("text").and_then(|v| v.as_str())?,
        _ => return None,
    };
    if text.trim().is_empty() {
        return None;
    }
    Some(text.chars().take(max_chars).collect())
}

/// Per-thread summary shown in the conversation list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub title: String,
    pub message_count: usize,
    pub last_message: String,
    pub last_activity: DateTime<Utc>,
}
