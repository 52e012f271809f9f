//! Risk assessor
//!
//! Maps `(tool name, input, actor)` to a [`RiskVerdict`]. Pure and
//! deterministic: no I/O, no state carried between calls.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use warden_common::{email_domain, ActorContext, RiskConfig, RiskLevel, ToolCategory, GENERALIST_AGENT_ROLE};

/// Built-in tool catalogue; configuration may add entries
const DEFAULT_TOOL_CATEGORIES: &[(&str, ToolCategory)] = &[
    ("exaSearchTool", ToolCategory::Knowledge),
    ("getContextDocumentsTool", ToolCategory::Knowledge),
    ("searchDocuments", ToolCategory::Knowledge),
    ("getUserInfoTool", ToolCategory::Profile),
    ("gmailSearchTool", ToolCategory::Communication),
    ("gmailDraftTool", ToolCategory::Communication),
    ("gmailSendTool", ToolCategory::Communication),
    ("getCalendarEventsTool", ToolCategory::Scheduling),
    ("createCalendarEventTool", ToolCategory::Scheduling),
    ("shopOnlineTool", ToolCategory::Commerce),
    ("sendPayment", ToolCategory::Payment),
];

const READ_VERBS: &[&str] = &["search", "get", "list", "read", "fetch", "find", "check", "lookup", "query"];
const DRAFT_VERBS: &[&str] = &["draft"];

/// What a tool does to the outside world, derived from its name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Read,
    Draft,
    Write,
}

impl ActionKind {
    /// First recognised verb of a camelCase or snake_case name wins.
    /// Names without a read or draft verb are writes.
    pub fn from_tool_name(name: &str) -> Self {
        for word in split_words(name) {
            if READ_VERBS.contains(&word.as_str()) {
                return Self::Read;
            }
            if DRAFT_VERBS.contains(&word.as_str()) {
                return Self::Draft;
            }
        }
        Self::Write
    }
}

fn split_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for ch in name.chars() {
        if ch == '_' || ch == '-' || ch == ' ' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        if ch.is_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Outcome of one assessment. Computed fresh for every invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskVerdict {
    pub level: RiskLevel,
    pub requires_step_up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ToolCategory>,
    pub action: ActionKind,
    pub reasons: Vec<String>,
}

impl RiskVerdict {
    fn new(level: RiskLevel, category: Option<ToolCategory>, action: ActionKind) -> Self {
        Self {
            level,
            requires_step_up: false,
            category,
            action,
            reasons: Vec::new(),
        }
    }

    fn because(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    fn high_with_step_up(mut self, reason: impl Into<String>) -> Self {
        self.level = RiskLevel::High;
        self.requires_step_up = true;
        self.because(reason)
    }
}

/// Policy table and thresholds
#[derive(Debug, Clone)]
pub struct RiskPolicy {
    tools: HashMap<String, ToolCategory>,
    purchase_step_up_threshold: f64,
    step_up_categories: HashSet<ToolCategory>,
    unknown_tool_level: RiskLevel,
    unknown_tool_step_up: bool,
}

impl RiskPolicy {
    pub fn from_config(config: &RiskConfig) -> Self {
        let mut tools: HashMap<String, ToolCategory> = DEFAULT_TOOL_CATEGORIES
            .iter()
            .map(|(name, category)| (name.to_string(), *category))
            .collect();
        tools.extend(config.tools.iter().map(|(name, category)| (name.clone(), *category)));

        Self {
            tools,
            purchase_step_up_threshold: config.purchase_step_up_threshold,
            step_up_categories: config.step_up_categories.iter().copied().collect(),
            // Unknown tools never drop to LOW, whatever the configuration says
            unknown_tool_level: config.unknown_tool_level.max(RiskLevel::Medium),
            unknown_tool_step_up: config.unknown_tool_step_up,
        }
    }

    pub fn category_of(&self, tool_name: &str) -> Option<ToolCategory> {
        self.tools.get(tool_name).copied()
    }

    pub fn agent_role(&self, tool_name: &str) -> &'static str {
        self.category_of(tool_name)
            .map_or(GENERALIST_AGENT_ROLE, |category| category.agent_role())
    }

    pub fn purchase_step_up_threshold(&self) -> f64 {
        self.purchase_step_up_threshold
    }
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self::from_config(&RiskConfig::default())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RiskAssessor {
    policy: RiskPolicy,
}

impl RiskAssessor {
    pub fn new(policy: RiskPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    /// Total over well-formed input: every call yields exactly one verdict
    pub fn assess(&self, tool_name: &str, input: &Value, actor: &ActorContext) -> RiskVerdict {
        let action = ActionKind::from_tool_name(tool_name);

        let Some(category) = self.policy.category_of(tool_name) else {
            let mut verdict = RiskVerdict::new(self.policy.unknown_tool_level, None, action)
                .because(format!("'{}' is not in the tool policy table", tool_name));
            verdict.requires_step_up = self.policy.unknown_tool_step_up;
            return verdict;
        };

        let mut verdict = match category {
            ToolCategory::Knowledge | ToolCategory::Profile => {
                RiskVerdict::new(RiskLevel::Low, Some(category), action)
                    .because("read-only information retrieval")
            }
            ToolCategory::Communication => self.assess_communication(action),
            ToolCategory::Scheduling => self.assess_scheduling(action, input, actor),
            ToolCategory::Commerce => self.assess_purchase(action, input),
            ToolCategory::Payment => self.assess_payment(action, input),
        };

        if !verdict.requires_step_up
            && verdict.level >= RiskLevel::Medium
            && self.policy.step_up_categories.contains(&category)
        {
            verdict.requires_step_up = true;
            verdict.reasons.push(format!("step-up is required for {} tools", category));
        }

        verdict
    }

    fn assess_communication(&self, action: ActionKind) -> RiskVerdict {
        let base = RiskVerdict::new(RiskLevel::Low, Some(ToolCategory::Communication), action);
        match action {
            ActionKind::Read => base.because("reads the user's mailbox"),
            ActionKind::Draft => {
                let mut verdict = base.because("creates a draft that is not sent");
                verdict.level = RiskLevel::Medium;
                verdict
            }
            ActionKind::Write => base.high_with_step_up("sends a message on the user's behalf"),
        }
    }

    fn assess_scheduling(&self, action: ActionKind, input: &Value, actor: &ActorContext) -> RiskVerdict {
        let base = RiskVerdict::new(RiskLevel::Low, Some(ToolCategory::Scheduling), action);
        if action != ActionKind::Write {
            return base.because("reads calendar events");
        }

        let external = external_attendees(input, actor);
        if external.is_empty() {
            let mut verdict = base.because("creates an event without external attendees");
            verdict.level = RiskLevel::Medium;
            verdict
        } else {
            base.high_with_step_up(format!(
                "sends invitations outside the user's domain: {}",
                external.join(", ")
            ))
        }
    }

    fn assess_purchase(&self, action: ActionKind, input: &Value) -> RiskVerdict {
        let mut verdict = RiskVerdict::new(RiskLevel::Medium, Some(ToolCategory::Commerce), action);
        match purchase_amount(input) {
            Some(amount) if amount > self.policy.purchase_step_up_threshold => verdict
                .high_with_step_up(format!(
                    "purchase of {:.2} exceeds the {:.2} threshold",
                    amount, self.policy.purchase_step_up_threshold
                )),
            Some(amount) => verdict.because(format!("purchase of {:.2} is within the threshold", amount)),
            None => {
                verdict.reasons.push("purchase amount not stated".to_string());
                verdict
            }
        }
    }

    fn assess_payment(&self, action: ActionKind, input: &Value) -> RiskVerdict {
        let verdict = RiskVerdict::new(RiskLevel::Medium, Some(ToolCategory::Payment), action);
        match purchase_amount(input) {
            Some(amount) if amount > self.policy.purchase_step_up_threshold => verdict
                .high_with_step_up(format!(
                    "payment of {:.2} exceeds the {:.2} threshold",
                    amount, self.policy.purchase_step_up_threshold
                )),
            Some(amount) => verdict.because(format!("payment of {:.2} is within the threshold", amount)),
            None => verdict.high_with_step_up("payment amount missing or unreadable"),
        }
    }
}

/// `priceLimit × qty`, else `amount` or `price`
fn purchase_amount(input: &Value) -> Option<f64> {
    let quantity = number_field(input, "qty")
        .or_else(|| number_field(input, "quantity"))
        .unwrap_or(1.0);
    if let Some(limit) = number_field(input, "priceLimit") {
        return Some(limit * quantity);
    }
    number_field(input, "amount").or_else(|| number_field(input, "price").map(|p| p * quantity))
}

/// Numbers or numeric strings such as `"$1,250.00"`. Negative and
/// non-finite values are rejected.
fn number_field(input: &Value, key: &str) -> Option<f64> {
    let value = match input.get(key)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !matches!(c, '$' | '€' | '£' | ',' | ' '))
                .collect();
            cleaned.parse::<f64>().ok()?
        }
        _ => return None,
    };
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Attendee addresses whose domain differs from the actor's. An actor
/// without a usable domain treats every attendee as external.
fn external_attendees(input: &Value, actor: &ActorContext) -> Vec<String> {
    let Some(attendees) = input.get("attendees") else {
        return Vec::new();
    };
    let addresses: Vec<String> = match attendees {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(map) => map.get("email").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect(),
        Value::String(s) => s.split(',').map(|part| part.trim().to_string()).collect(),
        _ => Vec::new(),
    };

    let own_domain = actor.email_domain();
    addresses
        .into_iter()
        .filter(|address| !address.is_empty())
        .filter(|address| match (&own_domain, email_domain(address)) {
            (Some(own), Some(theirs)) => own != &theirs,
            _ => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn actor() -> ActorContext {
        ActorContext::new("u1", "alex@acme.io", "t1")
    }

    #[test]
    fn test_action_kind_from_names() {
        assert_eq!(ActionKind::from_tool_name("gmailSearchTool"), ActionKind::Read);
        assert_eq!(ActionKind::from_tool_name("getCalendarEventsTool"), ActionKind::Read);
        assert_eq!(ActionKind::from_tool_name("gmailDraftTool"), ActionKind::Draft);
        assert_eq!(ActionKind::from_tool_name("gmailSendTool"), ActionKind::Write);
        assert_eq!(ActionKind::from_tool_name("shop_online"), ActionKind::Write);
        assert_eq!(ActionKind::from_tool_name("frobnicate"), ActionKind::Write);
    }

    #[test]
    fn test_read_only_tools_are_low() {
        let assessor = RiskAssessor::default();
        for tool in ["exaSearchTool", "getUserInfoTool", "gmailSearchTool", "getCalendarEventsTool"] {
            let verdict = assessor.assess(tool, &json!({ "query": "x" }), &actor());
            assert_eq!(verdict.level, RiskLevel::Low, "{}", tool);
            assert!(!verdict.requires_step_up, "{}", tool);
        }
    }

    #[test]
    fn test_unknown_tool_is_never_low() {
        let mut config = RiskConfig::default();
        config.unknown_tool_level = RiskLevel::Low;
        let assessor = RiskAssessor::new(RiskPolicy::from_config(&config));

        let verdict = assessor.assess("deleteEverything", &json!({}), &actor());
        assert_eq!(verdict.level, RiskLevel::Medium);
        assert_eq!(verdict.category, None);
        assert_eq!(assessor.policy().agent_role("deleteEverything"), GENERALIST_AGENT_ROLE);
    }

    #[test]
    fn test_email_send_needs_step_up_but_draft_does_not() {
        let assessor = RiskAssessor::default();
        let send = assessor.assess("gmailSendTool", &json!({ "to": ["a@b.com"] }), &actor());
        assert_eq!(send.level, RiskLevel::High);
        assert!(send.requires_step_up);

        let draft = assessor.assess("gmailDraftTool", &json!({ "to": ["a@b.com"] }), &actor());
        assert_eq!(draft.level, RiskLevel::Medium);
        assert!(!draft.requires_step_up);
    }

    #[test]
    fn test_calendar_invites_outside_domain() {
        let assessor = RiskAssessor::default();
        let internal = json!({ "summary": "Sync", "attendees": ["sam@acme.io", "Jo@ACME.io"] });
        let verdict = assessor.assess("createCalendarEventTool", &internal, &actor());
        assert_eq!(verdict.level, RiskLevel::Medium);
        assert!(!verdict.requires_step_up);

        let external = json!({ "summary": "Pitch", "attendees": ["sam@acme.io", "judge@hackathon.com"] });
        let verdict = assessor.assess("createCalendarEventTool", &external, &actor());
        assert_eq!(verdict.level, RiskLevel::High);
        assert!(verdict.requires_step_up);
        assert!(verdict.reasons[0].contains("judge@hackathon.com"));
    }

    #[test]
    fn test_purchase_threshold() {
        let assessor = RiskAssessor::default();
        let cheap = json!({ "product": "cable", "qty": 2, "priceLimit": 20 });
        assert_eq!(assessor.assess("shopOnlineTool", &cheap, &actor()).level, RiskLevel::Medium);

        let pricey = json!({ "product": "iPhone", "qty": 1, "priceLimit": 1000 });
        let verdict = assessor.assess("shopOnlineTool", &pricey, &actor());
        assert_eq!(verdict.level, RiskLevel::High);
        assert!(verdict.requires_step_up);

        // 3 × 200 crosses the threshold even though each unit does not
        let bulk = json!({ "product": "chair", "qty": "3", "priceLimit": "$200" });
        assert!(assessor.assess("shopOnlineTool", &bulk, &actor()).requires_step_up);

        let exact = json!({ "product": "desk", "priceLimit": 500 });
        assert!(!assessor.assess("shopOnlineTool", &exact, &actor()).requires_step_up);
    }

    #[test]
    fn test_payment_without_amount_fails_safe() {
        let assessor = RiskAssessor::default();
        let verdict = assessor.assess("sendPayment", &json!({ "recipient": "x", "amount": "lots" }), &actor());
        assert_eq!(verdict.level, RiskLevel::High);
        assert!(verdict.requires_step_up);

        let small = assessor.assess("sendPayment", &json!({ "recipient": "x", "amount": 20 }), &actor());
        assert_eq!(small.level, RiskLevel::Medium);
        assert!(!small.requires_step_up);
    }

    #[test]
    fn test_step_up_categories_apply_at_medium() {
        let mut config = RiskConfig::default();
        config.step_up_categories = vec![ToolCategory::Commerce];
        config.tools.insert("bookFlight".to_string(), ToolCategory::Commerce);
        let assessor = RiskAssessor::new(RiskPolicy::from_config(&config));

        let verdict = assessor.assess("bookFlight", &json!({ "price": 120 }), &actor());
        assert_eq!(verdict.level, RiskLevel::Medium);
        assert!(verdict.requires_step_up);
        assert_eq!(assessor.policy().agent_role("bookFlight"), "commerce-agent");
    }

    #[test]
    fn test_assessment_is_deterministic() {
        let assessor = RiskAssessor::default();
        let input = json!({ "amount": 1000, "recipient": "x" });
        assert_eq!(
            assessor.assess("sendPayment", &input, &actor()),
            assessor.assess("sendPayment", &input, &actor())
        );
    }
}
