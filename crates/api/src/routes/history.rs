//! Thread history and conversation list

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use tracing::{debug, info};

use crate::error::ApiResult;
use crate::server::AppState;
use crate::types::{
    ConversationsResponse, DeleteResponse, HistoryParams, HistoryResponse, CONVERSATION_LIST_LIMIT,
    DEFAULT_HISTORY_LIMIT,
};

pub async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<HistoryResponse>> {
    let identity = state.identify(&headers)?;
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, DEFAULT_HISTORY_LIMIT);
    let messages = state
        .persistence()
        .messages
        .thread_messages(&identity.user_id, &params.thread, limit)
        .await?;
    debug!(thread_id = %params.thread, count = messages.len(), "Loaded history");
    Ok(Json(HistoryResponse {
        thread_id: params.thread,
        messages,
    }))
}

pub async fn conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ConversationsResponse>> {
    let identity = state.identify(&headers)?;
    let conversations = state
        .persistence()
        .messages
        .list_threads(&identity.user_id, CONVERSATION_LIST_LIMIT)
        .await?;
    Ok(Json(ConversationsResponse { conversations }))
}

/// Deletes chat messages only; the audit trail of the thread stays
pub async fn delete_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    let identity = state.identify(&headers)?;
    let deleted = state
        .persistence()
        .messages
        .delete_thread(&identity.user_id, &thread_id)
        .await?;
    info!(thread_id = %thread_id, deleted, "Conversation deleted");
    Ok(Json(DeleteResponse { thread_id, deleted }))
}
