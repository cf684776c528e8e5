use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::auth::helpers::SESSION_TOKEN_HEADER;
use crate::error::Error;
use crate::types::Session;

const STORAGE_APOLOGY: &str = "Sorry, something went wrong on our side. Please try again later.";

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    #[must_use]
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }
}

/// A successful response that also hands the client the token to use
/// next, which differs from the presented one after rotation.
pub fn with_session<T: Serialize>(session: &Session, status: StatusCode, data: T) -> Response {
    (
        status,
        [(SESSION_TOKEN_HEADER, session.token.clone())],
        Json(ApiResponse::success(data)),
    )
        .into_response()
}

/// API error that converts to a proper HTTP response
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        if err.is_storage() {
            error!("Storage failure: {err}");
            return ApiError::internal(STORAGE_APOLOGY);
        }
        match err {
            Error::Validation(problems) => ApiError::unprocessable(problems.join("; ")),
            Error::InvalidField(message) => ApiError::bad_request(message),
            Error::InvalidFileTag => ApiError::bad_request("Invalid file tag"),
            Error::InvalidToken => ApiError::bad_request("Invalid token"),
            Error::NotFound => ApiError::not_found("Not found"),
            Error::AlreadyExists(_) | Error::UidInUse(_) => {
                ApiError::conflict("That name is already taken")
            }
            Error::Unauthorized => ApiError::unauthorized("No valid session"),
            Error::Forbidden => ApiError::forbidden("Request refused"),
            Error::OverQuota { usage, quota } => ApiError::payload_too_large(format!(
                "You are using {usage} of your {quota} bytes; delete some files first"
            )),
            other => {
                error!("Internal failure: {other}");
                ApiError::internal(STORAGE_APOLOGY)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "data": null, "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_are_generic() {
        let err = ApiError::from(Error::LockTimeout("/data/users/1/1.prefs".into()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("prefs"));
    }

    #[test]
    fn test_validation_lists_problems() {
        let err = ApiError::from(Error::Validation(vec!["a".into(), "b".into()]));
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.message, "a; b");
    }
}
