//! Durable storage for chat messages and audit records
//!
//! Two backends share the same traits:
//! - `MemoryStore` for tests and single-process demos
//! - `PostgresClient` for production, through sqlx

pub mod error;
pub mod memory;
pub mod postgres;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use postgres::PostgresClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use warden_common::{AuditRecord, ChatMessage, InvocationId, StorageConfig, ThreadSummary};

/// Ordered, per-thread chat history
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append one message. Messages of a thread keep their append order.
    async fn append_message(&self, message: &ChatMessage) -> StorageResult<()>;

    /// The latest `limit` messages of a thread, oldest first
    async fn thread_messages(
        &self,
        user_id: &str,
        thread_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<ChatMessage>>;

    /// Most recently active threads first
    async fn list_threads(&self, user_id: &str, limit: usize) -> StorageResult<Vec<ThreadSummary>>;

    /// Remove a thread's chat messages. Audit records are never touched.
    async fn delete_thread(&self, user_id: &str, thread_id: &str) -> StorageResult<u64>;
}

/// Append-only audit trail
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Single atomic write. Returns once the record is durable.
    async fn append_audit(&self, record: &AuditRecord) -> StorageResult<()>;

    async fn query_audit(&self, query: &AuditQuery) -> StorageResult<Vec<AuditRecord>>;
}

/// Filter for the audit query surface. Results are oldest first; `limit`
/// keeps the most recent matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditQuery {
    pub user_id: Option<String>,
    pub thread_id: Option<String>,
    pub tool_name: Option<String>,
    pub invocation_id: Option<InvocationId>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn invocation(mut self, invocation_id: InvocationId) -> Self {
        self.invocation_id = Some(invocation_id);
        self
    }

    pub fn between(mut self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.user_id.as_deref().map_or(true, |u| record.actor.user_id == u)
            && self.thread_id.as_deref().map_or(true, |t| record.actor.thread_id == t)
            && self.tool_name.as_deref().map_or(true, |n| record.tool_name == n)
            && self.invocation_id.map_or(true, |id| record.invocation_id == id)
            && self.since.map_or(true, |s| record.timestamp >= s)
            && self.until.map_or(true, |u| record.timestamp <= u)
    }
}

/// Message and audit handles of one configured backend
#[derive(Clone)]
pub struct Persistence {
    pub messages: Arc<dyn MessageStore>,
    pub audit: Arc<dyn AuditStore>,
}

impl Persistence {
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            messages: store.clone(),
            audit: store,
        }
    }
}

/// Open the backend named by the configuration
pub async fn initialize_storage(config: &StorageConfig) -> StorageResult<Persistence> {
    match config.postgres_url.as_deref() {
        Some(url) => {
            let postgres = Arc::new(PostgresClient::new(url, config.max_connections).await?);
            postgres.run_migrations().await?;
            tracing::info!("PostgreSQL storage initialized");
            Ok(Persistence {
                messages: postgres.clone(),
                audit: postgres,
            })
        }
        None => {
            tracing::warn!("No postgres_url configured, using in-memory storage");
            Ok(Persistence::in_memory())
        }
    }
}

/// Title and preview of a thread from its first and latest message bodies
pub(crate) fn summarize_thread(
    thread_id: &str,
    message_count: usize,
    first: Option<&serde_json::Value>,
    latest: Option<&serde_json::Value>,
    last_activity: DateTime<Utc>,
) -> ThreadSummary {
    let title = first
        .and_then(|c| warden_common::content_preview(c, 60))
        .unwrap_or_else(|| format!("Chat {}", last_activity.format("%Y-%m-%d")));
    let last_message = latest
        .and_then(|c| warden_common::content_preview(c, 100))
        .unwrap_or_else(|| "New conversation".to_string());

    ThreadSummary {
        thread_id: thread_id.to_string(),
        title,
        message_count,
        last_message,
        last_activity,
    }
}
