//! Caller identity
//!
//! The server never authenticates users itself. An `AuthProvider` turns the
//! request headers into an `Identity`; the shipped `HeaderAuthProvider`
//! trusts an upstream gateway that has already done the login.

use axum::http::HeaderMap;
use std::sync::Arc;
use warden_common::ActorContext;
use warden_mediation::{CredentialVault, DelegatedToken, StaticVault};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const WORKSPACE_HEADER: &str = "x-workspace-id";
pub const STEP_UP_HEADER: &str = "x-step-up-verified";
/// Followed by the connection name, e.g. `x-connection-token-google-oauth2`
pub const CONNECTION_TOKEN_PREFIX: &str = "x-connection-token-";

/// Authenticated caller of one request
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    pub workspace_id: Option<String>,
    /// The gateway confirmed a fresh step-up for this request
    pub step_up_verified: bool,
    pub tokens: Vec<DelegatedToken>,
}

impl Identity {
    pub fn actor(&self, thread_id: &str) -> ActorContext {
        let actor = ActorContext::new(&self.user_id, &self.email, thread_id);
        match &self.workspace_id {
            Some(workspace) => actor.with_workspace(workspace),
            None => actor,
        }
    }

    pub fn vault(&self) -> Arc<dyn CredentialVault> {
        let vault = self
            .tokens
            .iter()
            .cloned()
            .fold(StaticVault::new(), StaticVault::with_token);
        Arc::new(vault)
    }
}

pub trait AuthProvider: Send + Sync {
    fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, ApiError>;
}

#[derive(Debug, Clone, Default)]
pub struct HeaderAuthProvider;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl AuthProvider for HeaderAuthProvider {
    fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, ApiError> {
        let user_id = header(headers, USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("{} header is required", USER_ID_HEADER)))?;
        let email = header(headers, USER_EMAIL_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("{} header is required", USER_EMAIL_HEADER)))?;

        let tokens = headers
            .iter()
            .filter_map(|(name, value)| {
                let connection = name.as_str().strip_prefix(CONNECTION_TOKEN_PREFIX)?;
                let token = value.to_str().ok()?.trim();
                (!connection.is_empty() && !token.is_empty()).then(|| DelegatedToken::new(connection, token))
            })
            .collect();

        let step_up_verified = header(headers, STEP_UP_HEADER)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        Ok(Identity {
            user_id: user_id.to_string(),
            email: email.to_string(),
            workspace_id: header(headers, WORKSPACE_HEADER).map(str::to_string),
            step_up_verified,
            tokens,
        })
    }
}
