use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use uuid::Uuid;
use warden_common::{
    ActorContext, AuditPhase, AuditRecord, AuditStatus, ChatMessage, InvocationId, RiskLevel,
    Role, ThreadSummary,
};

use crate::{summarize_thread, AuditQuery, AuditStore, MessageStore, StorageError, StorageResult};

const MIGRATIONS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS chat_messages (
        id UUID PRIMARY KEY,
        seq BIGSERIAL NOT NULL,
        user_id VARCHAR(255) NOT NULL,
        thread_id VARCHAR(255) NOT NULL,
        workspace_id VARCHAR(255),
        role VARCHAR(50) NOT NULL,
        content JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    "CREATE INDEX IF NOT EXISTS chat_messages_thread_idx ON chat_messages (user_id, thread_id, seq)",
    r#"CREATE TABLE IF NOT EXISTS audit_records (
        id UUID PRIMARY KEY,
        seq BIGSERIAL NOT NULL,
        invocation_id UUID NOT NULL,
        user_id VARCHAR(255) NOT NULL,
        user_email VARCHAR(255) NOT NULL,
        workspace_id VARCHAR(255),
        thread_id VARCHAR(255) NOT NULL,
        tool_name VARCHAR(255) NOT NULL,
        agent_role VARCHAR(100) NOT NULL,
        phase VARCHAR(50) NOT NULL,
        status VARCHAR(50) NOT NULL,
        risk_level VARCHAR(20),
        payload JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS audit_records_actor_idx ON audit_records (user_id, thread_id, created_at)",
    "CREATE INDEX IF NOT EXISTS audit_records_invocation_idx ON audit_records (invocation_id)",
];

pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    pub async fn new(database_url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> StorageResult<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::debug!("Applied {} schema statements", MIGRATIONS.len());
        Ok(())
    }
}

fn parse_column<T: std::str::FromStr<Err = String>>(row: &PgRow, column: &str) -> StorageResult<T> {
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(StorageError::invalid_record)
}

fn message_from_row(row: &PgRow) -> StorageResult<ChatMessage> {
    Ok(ChatMessage {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        thread_id: row.try_get("thread_id")?,
        workspace_id: row.try_get("workspace_id")?,
        role: parse_column::<Role>(row, "role")?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> StorageResult<AuditRecord> {
    let risk_level: Option<String> = row.try_get("risk_level")?;
    let risk_level = risk_level
        .map(|raw| raw.parse::<RiskLevel>().map_err(StorageError::invalid_record))
        .transpose()?;
    let invocation_id: Uuid = row.try_get("invocation_id")?;

    Ok(AuditRecord {
        id: row.try_get("id")?,
        invocation_id: InvocationId(invocation_id),
        timestamp: row.try_get("created_at")?,
        actor: ActorContext {
            user_id: row.try_get("user_id")?,
            user_email: row.try_get("user_email")?,
            workspace_id: row.try_get("workspace_id")?,
            thread_id: row.try_get("thread_id")?,
        },
        tool_name: row.try_get("tool_name")?,
        agent_role: row.try_get("agent_role")?,
        phase: parse_column::<AuditPhase>(row, "phase")?,
        status: parse_column::<AuditStatus>(row, "status")?,
        risk_level,
        payload: row.try_get("payload")?,
    })
}

fn as_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl MessageStore for PostgresClient {
    async fn append_message(&self, message: &ChatMessage) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO chat_messages (id, user_id, thread_id, workspace_id, role, content, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(message.id)
        .bind(&message.user_id)
        .bind(&message.thread_id)
        .bind(&message.workspace_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn thread_messages(
        &self,
        user_id: &str,
        thread_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM ( \
                SELECT id, seq, user_id, thread_id, workspace_id, role, content, created_at \
                FROM chat_messages WHERE user_id = $1 AND thread_id = $2 \
                ORDER BY seq DESC LIMIT $3 \
             ) latest ORDER BY seq ASC",
        )
        .bind(user_id)
        .bind(thread_id)
        .bind(as_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn list_threads(&self, user_id: &str, limit: usize) -> StorageResult<Vec<ThreadSummary>> {
        let rows = sqlx::query(
            "SELECT thread_id, COUNT(*) AS message_count, MAX(created_at) AS last_activity, \
                (ARRAY_AGG(content ORDER BY seq ASC) FILTER (WHERE content ? 'text'))[1] AS first_content, \
                (ARRAY_AGG(content ORDER BY seq DESC) FILTER (WHERE content ? 'text'))[1] AS latest_content \
             FROM chat_messages WHERE user_id = $1 \
             GROUP BY thread_id ORDER BY last_activity DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(as_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let thread_id: String = row.try_get("thread_id")?;
                let count: i64 = row.try_get("message_count")?;
                let last_activity: DateTime<Utc> = row.try_get("last_activity")?;
                let first: Option<serde_json::Value> = row.try_get("first_content")?;
                let latest: Option<serde_json::Value> = row.try_get("latest_content")?;
                Ok(summarize_thread(
                    &thread_id,
                    usize::try_from(count).unwrap_or(0),
                    first.as_ref(),
                    latest.as_ref(),
                    last_activity,
                ))
            })
            .collect()
    }

    async fn delete_thread(&self, user_id: &str, thread_id: &str) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM chat_messages WHERE user_id = $1 AND thread_id = $2")
            .bind(user_id)
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AuditStore for PostgresClient {
    async fn append_audit(&self, record: &AuditRecord) -> StorageResult<()> {
        // A retried write of the same record is a no-op
        sqlx::query(
            "INSERT INTO audit_records (id, invocation_id, user_id, user_email, workspace_id, thread_id, \
                tool_name, agent_role, phase, status, risk_level, payload, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(record.id)
        .bind(record.invocation_id.0)
        .bind(&record.actor.user_id)
        .bind(&record.actor.user_email)
        .bind(&record.actor.workspace_id)
        .bind(&record.actor.thread_id)
        .bind(&record.tool_name)
        .bind(&record.agent_role)
        .bind(record.phase.as_str())
        .bind(record.status.as_str())
        .bind(record.risk_level.map(|level| level.as_str()))
        .bind(&record.payload)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query_audit(&self, query: &AuditQuery) -> StorageResult<Vec<AuditRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM ( \
                SELECT * FROM audit_records \
                WHERE ($1::TEXT IS NULL OR user_id = $1) \
                  AND ($2::TEXT IS NULL OR thread_id = $2) \
                  AND ($3::TEXT IS NULL OR tool_name = $3) \
                  AND ($4::UUID IS NULL OR invocation_id = $4) \
                  AND ($5::TIMESTAMPTZ IS NULL OR created_at >= $5) \
                  AND ($6::TIMESTAMPTZ IS NULL OR created_at <= $6) \
                ORDER BY seq DESC LIMIT $7 \
             ) latest ORDER BY seq ASC",
        )
        .bind(&query.user_id)
        .bind(&query.thread_id)
        .bind(&query.tool_name)
        .bind(query.invocation_id.map(|id| id.0))
        .bind(query.since)
        .bind(query.until)
        .bind(query.limit.map(as_limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(audit_from_row).collect()
    }
}
