//! Read-only audit query surface, scoped to the calling user

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use warden_storage::AuditQuery;

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::types::{AuditParams, AuditResponse, DEFAULT_AUDIT_LIMIT};

pub async fn query_audit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<AuditParams>,
) -> ApiResult<Json<AuditResponse>> {
    let identity = state.identify(&headers)?;
    if let (Some(since), Some(until)) = (params.since, params.until) {
        if since > until {
            return Err(ApiError::BadRequest("since must not be after until".to_string()));
        }
    }

    let mut query = AuditQuery::for_user(&identity.user_id)
        .between(params.since, params.until)
        .limit(params.limit.unwrap_or(DEFAULT_AUDIT_LIMIT).clamp(1, DEFAULT_AUDIT_LIMIT));
    if let Some(thread) = params.thread {
        query = query.thread(thread);
    }
    if let Some(tool) = params.tool {
        query = query.tool(tool);
    }

    let records = state.persistence().audit.query_audit(&query).await?;
    Ok(Json(AuditResponse {
        count: records.len(),
        records,
    }))
}
