use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use warden_common::{AuditRecord, ChatMessage, ThreadSummary};

use crate::{summarize_thread, AuditQuery, AuditStore, MessageStore, StorageResult};

/// Process-local store. Each write takes the lock once, so records never interleave.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Append order is the creation order
    messages: Vec<ChatMessage>,
    audit: Vec<AuditRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every audit record, oldest first
    pub async fn audit_records(&self) -> Vec<AuditRecord> {
        self.inner.read().await.audit.clone()
    }

    /// Every chat message, oldest first
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.inner.read().await.messages.clone()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append_message(&self, message: &ChatMessage) -> StorageResult<()> {
        self.inner.write().await.messages.push(message.clone());
        Ok(())
    }

    async fn thread_messages(
        &self,
        user_id: &str,
        thread_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<ChatMessage>> {
        let inner = self.inner.read().await;
        let matching: Vec<&ChatMessage> = inner
            .messages
            .iter()
            .filter(|m| m.user_id == user_id && m.thread_id == thread_id)
            .collect();
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).cloned().collect())
    }

    async fn list_threads(&self, user_id: &str, limit: usize) -> StorageResult<Vec<ThreadSummary>> {
        let inner = self.inner.read().await;
        let mut threads: HashMap<&str, Vec<&ChatMessage>> = HashMap::new();
        for message in inner.messages.iter().filter(|m| m.user_id == user_id) {
            threads.entry(message.thread_id.as_str()).or_default().push(message);
        }

        let mut summaries: Vec<ThreadSummary> = threads
            .into_iter()
            .filter_map(|(thread_id, messages)| {
                let last = messages.last()?;
                let first_text = messages
                    .iter()
                    .find(|m| m.preview(1).is_some())
                    .map(|m| &m.content);
                let latest_text = messages
                    .iter()
                    .rev()
                    .find(|m| m.preview(1).is_some())
                    .map(|m| &m.content);
                Some(summarize_thread(
                    thread_id,
                    messages.len(),
                    first_text,
                    latest_text,
                    last.created_at,
                ))
            })
            .collect();

        summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        summaries.truncate(limit);
        Ok(summaries)
    }

    async fn delete_thread(&self, user_id: &str, thread_id: &str) -> StorageResult<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.messages.len();
        inner
            .messages
            .retain(|m| !(m.user_id == user_id && m.thread_id == thread_id));
        Ok((before - inner.messages.len()) as u64)
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_audit(&self, record: &AuditRecord) -> StorageResult<()> {
        self.inner.write().await.audit.push(record.clone());
        Ok(())
    }

    async fn query_audit(&self, query: &AuditQuery) -> StorageResult<Vec<AuditRecord>> {
        let inner = self.inner.read().await;
        let matching: Vec<&AuditRecord> = inner.audit.iter().filter(|r| query.matches(r)).collect();
        let skip = query
            .limit
            .map_or(0, |limit| matching.len().saturating_sub(limit));
        Ok(matching.into_iter().skip(skip).cloned().collect())
    }
}
