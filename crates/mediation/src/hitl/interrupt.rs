//! Interrupt / resume protocol
//!
//! A blocked call surfaces an [`InterruptSignal`] instead of a result. The
//! orchestrator keeps an [`InterruptedCall`] holding everything needed to
//! replay the exact same call once the user confirms.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use warden_common::RiskLevel;

use crate::error::AuthorizationRequired;

pub const STEP_UP_MESSAGE: &str = "This action was flagged as high risk and requires step-up verification. \
Approve the request on your enrolled device and ask me to continue once you are done.";

/// Grants outlive the resume request only briefly
pub const STEP_UP_GRANT_TTL_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    RequiresStepUp,
    RequiresExternalAuthorization,
}

/// Step-up verdict returned in place of a tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepUpRequired {
    pub message: String,
    pub risk_level: RiskLevel,
    pub reasons: Vec<String>,
}

impl StepUpRequired {
    pub fn new(risk_level: RiskLevel, reasons: Vec<String>) -> Self {
        Self {
            message: STEP_UP_MESSAGE.to_string(),
            risk_level,
            reasons,
        }
    }

    /// Shape handed to the model as the tool result
    pub fn to_tool_result(&self) -> Value {
        json!({
            "status": "requires_step_up",
            "message": self.message,
            "riskLevel": self.risk_level,
        })
    }
}

/// Boundary shape of an interrupt, as rendered to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptSignal {
    pub kind: InterruptKind,
    pub message: String,
    pub risk_level: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl InterruptSignal {
    pub fn step_up(step_up: &StepUpRequired) -> Self {
        Self {
            kind: InterruptKind::RequiresStepUp,
            message: step_up.message.clone(),
            risk_level: step_up.risk_level,
            connection: None,
            scopes: Vec::new(),
        }
    }

    pub fn authorization(fault: &AuthorizationRequired, risk_level: RiskLevel) -> Self {
        Self {
            kind: InterruptKind::RequiresExternalAuthorization,
            message: fault.message.clone(),
            risk_level,
            connection: Some(fault.connection.clone()),
            scopes: fault.scopes.clone(),
        }
    }
}

/// Per-call state. `Interrupted` is terminal for the attempt; a resume
/// starts again from `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "kind", rename_all = "snake_case")]
pub enum CallState {
    Pending,
    Completed,
    Failed,
    Interrupted(InterruptKind),
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A call blocked by an interrupt, replayable with identical arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptedCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub signal: InterruptSignal,
}

impl InterruptedCall {
    pub fn kind(&self) -> InterruptKind {
        self.signal.kind
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.arguments)
    }

    pub fn is_same_call(&self, tool_name: &str, arguments: &Value) -> bool {
        self.tool_name == tool_name && self.fingerprint() == fingerprint(arguments)
    }
}

/// User action completing an interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    StepUpConfirmed,
    AuthorizationGranted,
}

impl Confirmation {
    pub fn resolves(&self, kind: InterruptKind) -> bool {
        matches!(
            (self, kind),
            (Self::StepUpConfirmed, InterruptKind::RequiresStepUp)
                | (Self::AuthorizationGranted, InterruptKind::RequiresExternalAuthorization)
        )
    }
}

/// Confirmed step-up for exactly one `(tool, arguments)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepUpGrant {
    pub tool_name: String,
    pub fingerprint: String,
    pub expires_at: DateTime<Utc>,
}

impl StepUpGrant {
    pub fn for_call(call: &InterruptedCall, ttl: Duration) -> Self {
        Self {
            tool_name: call.tool_name.clone(),
            fingerprint: call.fingerprint(),
            expires_at: Utc::now() + ttl,
        }
    }

    pub fn covers(&self, tool_name: &str, arguments: &Value, now: DateTime<Utc>) -> bool {
        now < self.expires_at && self.tool_name == tool_name && self.fingerprint == fingerprint(arguments)
    }
}

/// SHA-256 over the canonical JSON form (object keys sorted)
pub fn fingerprint(arguments: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(arguments, &mut canonical);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(field) = map.get(key) {
                    write_canonical(field, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interrupted(arguments: Value) -> InterruptedCall {
        InterruptedCall {
            call_id: "call-1".to_string(),
            tool_name: "sendPayment".to_string(),
            arguments,
            signal: InterruptSignal::step_up(&StepUpRequired::new(RiskLevel::High, vec![])),
        }
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"amount":1000,"recipient":"x","meta":{"b":1,"a":2}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"meta":{"a":2,"b":1},"recipient":"x","amount":1000}"#).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&json!({ "amount": 1001, "recipient": "x" })));
    }

    #[test]
    fn test_grant_covers_only_the_confirmed_call() {
        let call = interrupted(json!({ "amount": 1000, "recipient": "x" }));
        let grant = StepUpGrant::for_call(&call, Duration::seconds(60));
        let now = Utc::now();

        assert!(grant.covers("sendPayment", &json!({ "recipient": "x", "amount": 1000 }), now));
        assert!(!grant.covers("sendPayment", &json!({ "recipient": "y", "amount": 1000 }), now));
        assert!(!grant.covers("shopOnlineTool", &call.arguments, now));
        assert!(!grant.covers("sendPayment", &call.arguments, now + Duration::seconds(61)));
    }

    #[test]
    fn test_confirmation_must_match_interrupt_kind() {
        assert!(Confirmation::StepUpConfirmed.resolves(InterruptKind::RequiresStepUp));
        assert!(!Confirmation::StepUpConfirmed.resolves(InterruptKind::RequiresExternalAuthorization));
        assert!(Confirmation::AuthorizationGranted.resolves(InterruptKind::RequiresExternalAuthorization));
    }

    #[test]
    fn test_step_up_tool_result_shape() {
        let result = StepUpRequired::new(RiskLevel::High, vec!["large payment".into()]).to_tool_result();
        assert_eq!(result["status"], "requires_step_up");
        assert_eq!(result["riskLevel"], "HIGH");
        assert!(result.get("reasons").is_none());
    }
}
