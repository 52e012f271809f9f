//! In-process demo back-ends
//!
//! Realistic canned data, no network. Google-backed tools still demand a
//! delegated `google-oauth2` credential so the authorization interrupt path
//! can be exercised end to end.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ToolFailure;
use crate::tools::{ToolContext, ToolDefinition, ToolExecutor, GOOGLE_CONNECTION};

const GMAIL_READ_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";
const GMAIL_COMPOSE_SCOPE: &str = "https://www.googleapis.com/auth/gmail.compose";
const GMAIL_SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";
const CALENDAR_READ_SCOPE: &str = "https://www.googleapis.com/auth/calendar.events.readonly";
const CALENDAR_WRITE_SCOPE: &str = "https://www.googleapis.com/auth/calendar.events";

/// Every demo tool, ready for registration
pub fn demo_tools() -> Vec<ToolDefinition> {
    let executors: Vec<Arc<dyn ToolExecutor>> = vec![
        Arc::new(WebSearchDemo),
        Arc::new(UserInfoDemo),
        Arc::new(GmailSearchDemo),
        Arc::new(GmailDraftDemo),
        Arc::new(GmailSendDemo),
        Arc::new(CalendarEventsDemo),
        Arc::new(CreateCalendarEventDemo),
        Arc::new(ShopOnlineDemo),
        Arc::new(ContextDocumentsDemo::default()),
    ];
    executors.into_iter().map(ToolDefinition::from_executor).collect()
}

fn required_str<'a>(input: &'a Value, key: &str) -> Result<&'a str, ToolFailure> {
    input
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolFailure::genuine(format!("missing required argument '{}'", key)))
}

fn string_list(input: &Value, key: &str) -> Vec<String> {
    input
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

#[derive(Debug)]
pub struct WebSearchDemo;

#[async_trait]
impl ToolExecutor for WebSearchDemo {
    fn name(&self) -> &str {
        "exaSearchTool"
    }

    fn description(&self) -> String {
        "Search the web for news, research, company information or documentation. \
         The query should be a natural language question or statement."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The search query in natural language" },
                "numResults": { "type": "integer", "description": "Number of results to return (default: 5)" }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, input: Value, _ctx: &ToolContext) -> Result<Value, ToolFailure> {
        let query = required_str(&input, "query")?;
        let count = input.get("numResults").and_then(Value::as_u64).unwrap_or(5).clamp(1, 10);
        let results: Vec<Value> = (1..=count)
            .map(|rank| {
                json!({
                    "title": format!("{} - result {}", query, rank),
                    "url": format!("https://example.com/search/{}", rank),
                    "publishedDate": "N/A",
                    "text": format!("Background material about {}.", query),
                    "score": 1.0 / rank as f64,
                })
            })
            .collect();
        Ok(json!({
            "query": query,
            "numResults": results.len(),
            "results": results,
            "summary": format!("Found {} results for: \"{}\"", count, query),
        }))
    }
}

#[derive(Debug)]
pub struct UserInfoDemo;

#[async_trait]
impl ToolExecutor for UserInfoDemo {
    fn name(&self) -> &str {
        "getUserInfoTool"
    }

    fn description(&self) -> String {
        "Get information about the current logged in user.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn call(&self, _input: Value, ctx: &ToolContext) -> Result<Value, ToolFailure> {
        let actor = ctx.actor();
        Ok(json!({
            "userId": actor.user_id,
            "email": actor.user_email,
            "workspaceId": actor.workspace_id,
        }))
    }
}

#[derive(Debug)]
pub struct GmailSearchDemo;

#[async_trait]
impl ToolExecutor for GmailSearchDemo {
    fn name(&self) -> &str {
        "gmailSearchTool"
    }

    fn description(&self) -> String {
        "Search Gmail messages. Use this when the user asks to read, search or find emails.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "maxResults": { "type": "integer" }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolFailure> {
        ctx.require_connection(GOOGLE_CONNECTION, &[GMAIL_READ_SCOPE]).await?;
        let query = required_str(&input, "query")?;
        let senders = [
            ("john.doe@example.com", "Project Update"),
            ("sarah.smith@company.com", "Meeting Notes"),
            ("notifications@github.com", "New Pull Request"),
            ("team@slack.com", "You were mentioned"),
            ("support@service.com", "Your request has been processed"),
        ];
        let limit = input.get("maxResults").and_then(Value::as_u64).unwrap_or(5) as usize;
        let messages: Vec<Value> = senders
            .iter()
            .take(limit)
            .map(|(from, subject)| {
                json!({
                    "from": from,
                    "subject": format!("{}: {}", query, subject),
                    "preview": format!("Following up on {}...", query),
                })
            })
            .collect();
        Ok(json!({ "query": query, "messages": messages }))
    }
}

#[derive(Debug)]
pub struct GmailDraftDemo;

#[async_trait]
impl ToolExecutor for GmailDraftDemo {
    fn name(&self) -> &str {
        "gmailDraftTool"
    }

    fn description(&self) -> String {
        "Create a draft email in Gmail. The user reviews and sends it themselves.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "to": { "type": "array", "items": { "type": "string" } },
                "subject": { "type": "string" },
                "message": { "type": "string" },
                "cc": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["to", "subject", "message"]
        })
    }

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolFailure> {
        ctx.require_connection(GOOGLE_CONNECTION, &[GMAIL_COMPOSE_SCOPE]).await?;
        let subject = required_str(&input, "subject")?;
        let message = required_str(&input, "message")?;
        let to = string_list(&input, "to");
        if to.is_empty() {
            return Err(ToolFailure::genuine("a draft needs at least one recipient"));
        }
        Ok(json!({
            "draftId": format!("draft-{}", Utc::now().timestamp_millis()),
            "to": to,
            "subject": subject,
            "preview": message.chars().take(200).collect::<String>(),
        }))
    }
}

#[derive(Debug)]
pub struct GmailSendDemo;

#[async_trait]
impl ToolExecutor for GmailSendDemo {
    fn name(&self) -> &str {
        "gmailSendTool"
    }

    fn description(&self) -> String {
        "Send an email from the user's Gmail account.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "to": { "type": "array", "items": { "type": "string" } },
                "subject": { "type": "string" },
                "message": { "type": "string" }
            },
            "required": ["to", "subject", "message"]
        })
    }

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolFailure> {
        ctx.require_connection(GOOGLE_CONNECTION, &[GMAIL_SEND_SCOPE]).await?;
        let subject = required_str(&input, "subject")?;
        let to = string_list(&input, "to");
        if to.is_empty() {
            return Err(ToolFailure::genuine("an email needs at least one recipient"));
        }
        Ok(json!({
            "messageId": format!("sent-{}", Utc::now().timestamp_millis()),
            "to": to,
            "subject": subject,
            "status": "sent",
        }))
    }
}

#[derive(Debug)]
pub struct CalendarEventsDemo;

#[async_trait]
impl ToolExecutor for CalendarEventsDemo {
    fn name(&self) -> &str {
        "getCalendarEventsTool"
    }

    fn description(&self) -> String {
        "Check calendar events for a date. This only reads events.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "date": { "type": "string", "description": "The date to check, YYYY-MM-DD" } },
            "required": ["date"]
        })
    }

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolFailure> {
        ctx.require_connection(GOOGLE_CONNECTION, &[CALENDAR_READ_SCOPE]).await?;
        let raw = required_str(&input, "date")?;
        let date = NaiveDate::parse_from_str(raw.get(..10).unwrap_or(raw), "%Y-%m-%d")
            .map_err(|e| ToolFailure::genuine(format!("invalid date '{}': {}", raw, e)))?;
        let day = date.format("%Y-%m-%d");
        Ok(json!({
            "date": day.to_string(),
            "eventsCount": 3,
            "events": [
                {
                    "summary": "Team Standup",
                    "startTime": format!("{}T09:00:00-08:00", day),
                    "endTime": format!("{}T09:30:00-08:00", day),
                    "location": "Zoom",
                    "attendees": ["john@example.com", "sarah@example.com"]
                },
                {
                    "summary": "Product Presentation",
                    "startTime": format!("{}T14:00:00-08:00", day),
                    "endTime": format!("{}T15:00:00-08:00", day),
                    "location": "Conference Room A",
                    "attendees": ["judge1@hackathon.com", "judge2@hackathon.com"]
                },
                {
                    "summary": "Code Review Session",
                    "startTime": format!("{}T16:30:00-08:00", day),
                    "endTime": format!("{}T17:30:00-08:00", day),
                    "location": "Virtual",
                    "attendees": []
                }
            ]
        }))
    }
}

#[derive(Debug)]
pub struct CreateCalendarEventDemo;

#[async_trait]
impl ToolExecutor for CreateCalendarEventDemo {
    fn name(&self) -> &str {
        "createCalendarEventTool"
    }

    fn description(&self) -> String {
        "Create or schedule a calendar event. Invitations are sent to attendees.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": { "type": "string" },
                "description": { "type": "string" },
                "startTime": { "type": "string" },
                "endTime": { "type": "string" },
                "location": { "type": "string" },
                "attendees": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["summary", "startTime", "endTime"]
        })
    }

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolFailure> {
        ctx.require_connection(GOOGLE_CONNECTION, &[CALENDAR_WRITE_SCOPE]).await?;
        let summary = required_str(&input, "summary")?;
        let start = required_str(&input, "startTime")?;
        let end = required_str(&input, "endTime")?;
        let attendees: Vec<Value> = string_list(&input, "attendees")
            .into_iter()
            .map(|email| json!({ "email": email, "status": "invited" }))
            .collect();
        Ok(json!({
            "success": true,
            "eventId": format!("event-{}", Utc::now().timestamp_millis()),
            "summary": summary,
            "startTime": start,
            "endTime": end,
            "location": input.get("location"),
            "attendees": attendees,
        }))
    }
}

#[derive(Debug)]
pub struct ShopOnlineDemo;

#[async_trait]
impl ToolExecutor for ShopOnlineDemo {
    fn name(&self) -> &str {
        "shopOnlineTool"
    }

    fn description(&self) -> String {
        "Buy a product online within a price limit.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "product": { "type": "string" },
                "qty": { "type": "integer" },
                "priceLimit": { "type": "number" }
            },
            "required": ["product", "qty"]
        })
    }

    async fn call(&self, input: Value, _ctx: &ToolContext) -> Result<Value, ToolFailure> {
        let product = required_str(&input, "product")?;
        let qty = input.get("qty").and_then(Value::as_u64).unwrap_or(1);
        if qty == 0 {
            return Err(ToolFailure::genuine("quantity must be at least 1"));
        }
        let unit_price = input.get("priceLimit").and_then(Value::as_f64).unwrap_or(25.0);
        Ok(json!({
            "orderId": format!("order-{}", Utc::now().timestamp_millis()),
            "product": product,
            "qty": qty,
            "unitPrice": unit_price,
            "total": unit_price * qty as f64,
            "status": "placed",
        }))
    }
}

/// Keyword search over a small in-memory corpus
#[derive(Debug)]
pub struct ContextDocumentsDemo {
    documents: Vec<(&'static str, &'static str)>,
}

impl Default for ContextDocumentsDemo {
    fn default() -> Self {
        Self {
            documents: vec![
                ("travel-policy.md", "Flights above 500 USD need manager approval. Economy class for trips under six hours."),
                ("onboarding.md", "New hires receive laptop and accounts on day one. Security training is due within a week."),
                ("expenses.md", "Submit receipts within 30 days. Meals are reimbursed up to 60 USD per day."),
            ],
        }
    }
}

#[async_trait]
impl ToolExecutor for ContextDocumentsDemo {
    fn name(&self) -> &str {
        "getContextDocumentsTool"
    }

    fn description(&self) -> String {
        "Search the user's uploaded documents for relevant passages.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "question": { "type": "string" } },
            "required": ["question"]
        })
    }

    async fn call(&self, input: Value, _ctx: &ToolContext) -> Result<Value, ToolFailure> {
        let question = required_str(&input, "question")?.to_lowercase();
        let terms: Vec<&str> = question
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 3)
            .collect();
        let matches: Vec<Value> = self
            .documents
            .iter()
            .filter(|(_, text)| {
                let text = text.to_lowercase();
                terms.iter().any(|term| text.contains(term))
            })
            .map(|(name, text)| json!({ "document": name, "passage": text }))
            .collect();
        Ok(json!({ "matches": matches }))
    }
}
