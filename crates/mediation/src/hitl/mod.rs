//! Human-in-the-loop layer: risk assessment, audit trail and the
//! interrupt/resume protocol

pub mod assessor;
pub mod audit;
pub mod interrupt;
pub mod sanitize;

pub use assessor::{ActionKind, RiskAssessor, RiskPolicy, RiskVerdict};
pub use audit::{AuditLogger, AuditSettings};
pub use interrupt::{
    fingerprint, CallState, Confirmation, InterruptKind, InterruptSignal, InterruptedCall,
    StepUpGrant, StepUpRequired, STEP_UP_GRANT_TTL_SECS,
};
pub use sanitize::Sanitizer;
