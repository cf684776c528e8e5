use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tracing::debug;

use crate::auth::helpers::{ClientAddr, is_secure_transport};
use crate::auth::{AuthFailure, Logout, Profile, RequireSession};
use crate::cms::{ProfileUpdate, Registration};
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::{
    AccountResponse, ConfirmRequest, LoginRequest, LoginResponse, PasswordResetRequest,
    PasswordResetResponse, RegisterResponse,
};
use crate::server::response::{ApiError, ApiResponse, with_session};
use crate::server::validation::validate_login_name;

pub fn account_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/confirm", post(confirm))
        .route("/login", post(login))
        .route("/password-reset", post(request_password_reset))
        .route("/logout", post(logout))
        .route("/profile", get(get_profile).patch(update_profile))
}

/// Credentials only travel over TLS when the deployment asks for it.
fn require_secure(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    if state.cms.config().server.require_secure_transport && !is_secure_transport(headers) {
        return Err(ApiError::forbidden("Secure transport required"));
    }
    Ok(())
}

/// POST /register
pub async fn register(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<Registration>,
) -> Result<Response, ApiError> {
    require_secure(&state, &headers)?;
    let registered = state.cms.register(req)?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(RegisterResponse {
            account: AccountResponse::from(registered.account),
            email_sent: registered.email_sent,
        })),
    )
        .into_response())
}

/// POST /confirm
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ConfirmRequest>,
) -> Result<Response, ApiError> {
    require_secure(&state, &headers)?;
    let account = state.cms.confirm(&req.token).map_err(|e| match e {
        Error::Unauthorized => {
            ApiError::unauthorized("Invalid or expired confirmation token")
        }
        other => other.into(),
    })?;
    Ok(Json(ApiResponse::success(AccountResponse::from(account))).into_response())
}

/// POST /login
pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ClientAddr(client_ip): ClientAddr,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    require_secure(&state, &headers)?;
    validate_login_name(&req.login_name)?;

    match state.cms.login(&req.login_name, &req.password, client_ip)? {
        Ok(success) => Ok(Json(ApiResponse::success(LoginResponse {
            token: success.token,
            uid: success.account.uid,
            user_name: success.account.user_name,
        }))
        .into_response()),
        Err(failure) => {
            debug!("Login of {} refused: {failure}", req.login_name);
            Err(login_refusal(failure))
        }
    }
}

/// Credential failures share one message so they cannot be told apart.
fn login_refusal(failure: AuthFailure) -> ApiError {
    match failure {
        AuthFailure::NoSuchUser | AuthFailure::BadPassword | AuthFailure::BackendUnavailable => {
            ApiError::unauthorized("Invalid user name or password")
        }
        AuthFailure::Locked => ApiError::forbidden("This account is locked or not yet confirmed"),
        AuthFailure::MethodDisallowed => {
            ApiError::forbidden("This login method is not allowed for this account")
        }
        AuthFailure::Banned => ApiError::forbidden("This account has been banned"),
    }
}

/// POST /password-reset
pub async fn request_password_reset(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<PasswordResetRequest>,
) -> Result<Response, ApiError> {
    require_secure(&state, &headers)?;
    validate_login_name(&req.login_name)?;

    let email_sent = state
        .cms
        .request_password_reset(&req.login_name)
        .map_err(|e| match e {
            Error::Forbidden => {
                ApiError::forbidden("A password reset is not possible for that account")
            }
            other => other.into(),
        })?;
    Ok(Json(ApiResponse::success(PasswordResetResponse { email_sent })).into_response())
}

/// POST /logout
pub async fn logout(
    auth: RequireSession<Logout>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    state.cms.logout(&auth.session)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /profile
pub async fn get_profile(
    auth: RequireSession<Profile>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let profile = state.cms.profile(&auth.session)?;
    Ok(with_session(&auth.session, StatusCode::OK, profile))
}

/// PATCH /profile
pub async fn update_profile(
    auth: RequireSession<Profile>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProfileUpdate>,
) -> Result<Response, ApiError> {
    let outcome = state.cms.update_profile(&auth.session, req)?;
    Ok(with_session(&auth.session, StatusCode::OK, outcome))
}
