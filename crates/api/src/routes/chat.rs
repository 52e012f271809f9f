//! Conversation turn routes
//!
//! `POST /chat` runs one turn, `POST /chat/resume` re-issues an interrupted
//! call after the user completed step-up or connected an account, and
//! `POST /chat/:thread_id/stop` cancels whatever turn is running.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{info, instrument, warn};
use warden_mediation::{Confirmation, TurnContext, TurnOutcome};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::types::{ChatRequest, ResumeRequest, StopResponse, TurnResponse};

fn render(outcome: TurnOutcome) -> Response {
    let response = TurnResponse::from(outcome);
    (response.http_status(), Json(response)).into_response()
}

fn require_thread(thread_id: &str) -> ApiResult<()> {
    if thread_id.trim().is_empty() {
        return Err(ApiError::BadRequest("thread_id must not be empty".to_string()));
    }
    Ok(())
}

#[instrument(skip_all, fields(thread_id = %request.thread_id))]
pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Response> {
    let identity = state.identify(&headers)?;
    require_thread(&request.thread_id)?;
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }

    let mut actor = identity.actor(&request.thread_id);
    if let Some(workspace) = request.workspace_id {
        actor = actor.with_workspace(workspace);
    }

    let turn = state.begin_turn(&identity.user_id, &request.thread_id)?;
    let ctx = TurnContext::new(actor)
        .with_vault(identity.vault())
        .with_cancellation(turn.token());

    let outcome = state.orchestrator.run_turn(ctx, &request.message).await;
    info!(status = outcome.status.label(), steps = outcome.steps, "Chat turn finished");
    Ok(render(outcome))
}

#[instrument(skip_all, fields(thread_id = %request.thread_id, tool = %request.interrupted.tool_name))]
pub async fn resume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ResumeRequest>,
) -> ApiResult<Response> {
    let identity = state.identify(&headers)?;
    require_thread(&request.thread_id)?;
    if request.confirmation == Confirmation::StepUpConfirmed && !identity.step_up_verified {
        warn!("Step-up confirmation without a verified step-up");
        return Err(ApiError::Forbidden(
            "step-up verification has not been completed for this request".to_string(),
        ));
    }

    let turn = state.begin_turn(&identity.user_id, &request.thread_id)?;
    let ctx = TurnContext::new(identity.actor(&request.thread_id))
        .with_vault(identity.vault())
        .with_cancellation(turn.token());

    let outcome = state
        .orchestrator
        .resume_turn(ctx, request.interrupted, request.confirmation)
        .await;
    info!(status = outcome.status.label(), steps = outcome.steps, "Resumed turn finished");
    Ok(render(outcome))
}

pub async fn stop(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<StopResponse>> {
    let identity = state.identify(&headers)?;
    let stopped = state.stop_turn(&identity.user_id, &thread_id);
    info!(thread_id = %thread_id, stopped, "Stop requested");
    Ok(Json(StopResponse { thread_id, stopped }))
}
