use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRequestParts, Request},
    http::{HeaderValue, StatusCode, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use super::SessionCheck;
use super::helpers::{SESSION_TOKEN_HEADER, client_ip, extract_bearer_token, is_secure_transport};
use crate::server::AppState;
use crate::types::Session;

/// A part of the site a token may be scoped to.
pub trait Module: Send + Sync + 'static {
    const NAME: &'static str;
    /// Validate without rotating the token.
    const HOLDOVER: bool = false;
    /// The handler ends the session, so no token is handed back.
    const ENDS_SESSION: bool = false;
}

pub struct FileManager;

impl Module for FileManager {
    const NAME: &'static str = "file_manager";
}

/// File downloads are started by the browser and cannot pick up a
/// rotated token.
pub struct Download;

impl Module for Download {
    const NAME: &'static str = "file_manager";
    const HOLDOVER: bool = true;
}

pub struct Profile;

impl Module for Profile {
    const NAME: &'static str = "profile";
}

pub struct Logout;

impl Module for Logout {
    const NAME: &'static str = "logout";
    const ENDS_SESSION: bool = true;
}

/// Per-request slot for the token the client must present next.
///
/// Validation may rotate the presented token away, so the replacement
/// has to reach the client whatever the handler answers.
#[derive(Clone, Default)]
pub struct NextToken(Arc<Mutex<Option<String>>>);

impl NextToken {
    fn set(&self, token: &str) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(token.to_string());
        }
    }

    fn take(&self) -> Option<String> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Adds `X-Session-Token` to every response that validated a session,
/// error responses included.
pub async fn carry_session_token(mut request: Request, next: Next) -> Response {
    let slot = NextToken::default();
    request.extensions_mut().insert(slot.clone());

    let mut response = next.run(request).await;

    if let Some(token) = slot.take() {
        if !response.headers().contains_key(SESSION_TOKEN_HEADER) {
            if let Ok(value) = HeaderValue::from_str(&token) {
                response.headers_mut().insert(SESSION_TOKEN_HEADER, value);
            }
        }
    }

    response
}

/// Extractor that requires a session opening module `M`.
pub struct RequireSession<M: Module> {
    pub session: Session,
    _module: PhantomData<M>,
}

#[derive(Debug)]
pub enum AuthError {
    MissingAuth,
    InsecureTransport,
    InvalidSession,
    InternalError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InsecureTransport => (StatusCode::FORBIDDEN, "Secure transport required"),
            AuthError::InvalidSession => (StatusCode::UNAUTHORIZED, "No valid session"),
            AuthError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = json!({ "data": null, "error": message });

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                "WWW-Authenticate",
                HeaderValue::from_static("Bearer realm=\"kbasix\""),
            );
        }

        response
    }
}

impl<M: Module> FromRequestParts<Arc<AppState>> for RequireSession<M> {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if state.cms.config().server.require_secure_transport
            && !is_secure_transport(&parts.headers)
        {
            return Err(AuthError::InsecureTransport);
        }

        let raw = extract_bearer_token(&parts.headers).ok_or(AuthError::MissingAuth)?;

        let mut check = SessionCheck::new(M::NAME, client_ip(parts));
        check.holdover = M::HOLDOVER;

        let session = state
            .cms
            .sessions()
            .validate(&raw, &check)
            .map_err(|e| {
                error!("Session storage failure: {e}");
                AuthError::InternalError
            })?
            .ok_or(AuthError::InvalidSession)?;

        if !M::ENDS_SESSION {
            if let Some(slot) = parts.extensions.get::<NextToken>() {
                slot.set(&session.token);
            }
        }

        Ok(RequireSession {
            session,
            _module: PhantomData,
        })
    }
}
