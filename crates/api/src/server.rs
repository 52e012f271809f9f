use anyhow::Result;
use axum::{
    extract::State,
    http::HeaderMap,
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};
use warden_common::ServerConfig;
use warden_mediation::Orchestrator;
use warden_storage::Persistence;

use crate::auth::{AuthProvider, Identity};
use crate::error::{ApiError, ApiResult};
use crate::middleware::logging::{get_tracing_layer, logging_middleware};
use crate::routes::{audit, chat, history};
use crate::types::HealthResponse;

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub auth: Arc<dyn AuthProvider>,
    /// Cancellation handles of running turns, keyed by user and thread
    in_flight: Arc<DashMap<String, CancellationToken>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            orchestrator,
            auth,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn persistence(&self) -> &Persistence {
        self.orchestrator.persistence()
    }

    pub fn identify(&self, headers: &HeaderMap) -> ApiResult<Identity> {
        self.auth.authenticate(headers)
    }

    /// Register a turn on a thread. One turn per thread at a time.
    pub(crate) fn begin_turn(&self, user_id: &str, thread_id: &str) -> ApiResult<InFlightTurn> {
        let key = turn_key(user_id, thread_id);
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => Err(ApiError::TurnInProgress(thread_id.to_string())),
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                slot.insert(token.clone());
                Ok(InFlightTurn {
                    in_flight: self.in_flight.clone(),
                    key,
                    token,
                })
            }
        }
    }

    /// Cancel the running turn of a thread, if any
    pub(crate) fn stop_turn(&self, user_id: &str, thread_id: &str) -> bool {
        match self.in_flight.get(&turn_key(user_id, thread_id)) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn running_turns(&self) -> usize {
        self.in_flight.len()
    }
}

fn turn_key(user_id: &str, thread_id: &str) -> String {
    format!("{}/{}", user_id, thread_id)
}

/// Registration of a running turn, released on drop
pub(crate) struct InFlightTurn {
    in_flight: Arc<DashMap<String, CancellationToken>>,
    key: String,
    token: CancellationToken,
}

impl InFlightTurn {
    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for InFlightTurn {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
        debug!(turn = %self.key, "Turn released");
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/chat", post(chat::chat))
        .route("/chat/resume", post(chat::resume))
        .route("/chat/history", get(history::history))
        .route("/chat/conversations", get(history::conversations))
        .route("/chat/conversations/:thread_id", delete(history::delete_conversation))
        .route("/chat/:thread_id/stop", post(chat::stop))
        .route("/audit", get(audit::query_audit))
        .layer(middleware::from_fn(logging_middleware))
        .layer(get_tracing_layer())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        tools: state.orchestrator.registry().len(),
        timestamp: Utc::now(),
    })
}

pub struct WardenServer {
    config: ServerConfig,
    state: AppState,
}

impl WardenServer {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("Warden server listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
