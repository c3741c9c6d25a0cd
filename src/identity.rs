//! Authenticated identity as reported by the external sign-in service.
//!
//! Every request is resolved afresh by forwarding the caller's credentials to
//! the session endpoint; nothing about an identity is cached locally.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, COOKIE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const MAX_IDENTITY_ID_LEN: usize = 64;
pub const MAX_HANDLE_LEN: usize = 64;

/// Provider-issued account id plus display handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Identity {
    id: String,
    handle: String,
}

impl Identity {
    /// Validates the raw session fields. `None` when the id is unusable.
    pub fn new(id: &str, handle: &str) -> Option<Self> {
        let id = id.trim();
        if id.is_empty() || id.len() > MAX_IDENTITY_ID_LEN {
            return None;
        }
        if id.chars().any(|c| c.is_whitespace() || c.is_control() || c == ':') {
            return None;
        }
        let handle: String = handle.trim().chars().take(MAX_HANDLE_LEN).collect();
        Some(Self {
            id: id.to_string(),
            handle,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Not authenticated.")]
    Unauthenticated,

    #[error("session provider unavailable: {0}")]
    Provider(String),
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Identity, AuthError>;
}

/// Session document as emitted by the sign-in service. Absent fields mean
/// the caller is not signed in.
#[derive(Debug, Default, Deserialize)]
struct SessionPayload {
    #[serde(default)]
    twitter_id: Option<SessionId>,
    #[serde(default)]
    twitter_handle: Option<String>,
}

/// Twitter ids arrive as strings, older sessions carry them as numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SessionId {
    Text(String),
    Number(u64),
}

impl SessionId {
    fn into_string(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Number(number) => number.to_string(),
        }
    }
}

impl SessionPayload {
    fn into_identity(self) -> Option<Identity> {
        let id = self.twitter_id?.into_string();
        Identity::new(&id, self.twitter_handle.as_deref().unwrap_or_default())
    }
}

pub struct RemoteSessionResolver {
    http: reqwest::Client,
    session_url: String,
}

impl RemoteSessionResolver {
    pub fn new(session_url: &str, timeout: Duration) -> Result<Self> {
        assert!(!session_url.is_empty(), "Session URL must be provided");
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build session HTTP client")?;
        Ok(Self {
            http,
            session_url: session_url.to_string(),
        })
    }
}

#[async_trait]
impl IdentityResolver for RemoteSessionResolver {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let cookie = headers.get(COOKIE);
        let authorization = headers.get(AUTHORIZATION);
        if cookie.is_none() && authorization.is_none() {
            return Err(AuthError::Unauthenticated);
        }

        let mut request = self.http.get(&self.session_url);
        if let Some(value) = cookie {
            request = request.header(reqwest::header::COOKIE, value.as_bytes());
        }
        if let Some(value) = authorization {
            request = request.header(reqwest::header::AUTHORIZATION, value.as_bytes());
        }

        let response = request
            .send()
            .await
            .map_err(|err| AuthError::Provider(err.to_string()))?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AuthError::Unauthenticated);
        }
        if !status.is_success() {
            return Err(AuthError::Provider(format!(
                "session endpoint returned {status}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| AuthError::Provider(err.to_string()))?;
        let identity = parse_session(&body).ok_or(AuthError::Unauthenticated)?;
        debug!(identity = identity.id(), "Resolved session identity");
        Ok(identity)
    }
}

/// Empty bodies, `null`, `{}` and sessions without a Twitter id all mean
/// "not signed in".
fn parse_session(body: &[u8]) -> Option<Identity> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    let payload: Option<SessionPayload> = serde_json::from_slice(body).ok()?;
    payload?.into_identity()
}
