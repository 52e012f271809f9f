//! # Warden HTTP API
//!
//! axum boundary in front of the mediation layer.
//!
//! ```text
//! ┌─────────────────────┐
//! │   REST Endpoints    │ <- /chat, /chat/resume, /chat/history, /audit, /health
//! ├─────────────────────┤
//! │   AuthProvider      │ <- caller identity and delegated tokens
//! ├─────────────────────┤
//! │   Orchestrator      │ <- one turn per request, cancellable per thread
//! ├─────────────────────┤
//! │   Mediated tools    │ <- risk, audit, step-up, authorization
//! └─────────────────────┘
//! ```
//!
//! Every turn response carries a `status` tag. Clients render
//! `requires_step_up` as a confirmation prompt and
//! `requires_external_authorization` as a consent redirect; neither is an
//! error.

pub mod auth;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod types;

pub use auth::{AuthProvider, HeaderAuthProvider, Identity};
pub use error::{ApiError, ApiResult};
pub use server::{build_router, AppState, WardenServer};
pub use types::*;
