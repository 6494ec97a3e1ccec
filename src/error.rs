use std::collections::BTreeMap;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::utils::{error_codes, error_to_api_response, error_with_details};

const SERVER_ERROR_MESSAGE: &str =
    "the server encountered a problem and could not process your request";

/// Errors surfaced to API clients.
#[derive(Debug)]
pub enum AppError {
    NotFound,
    EditConflict,
    RateLimitExceeded,
    BadRequest(String),
    FailedValidation(BTreeMap<String, String>),
    MethodNotAllowed(Method),
    Internal(String),
}

impl AppError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        AppError::Internal(err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::EditConflict => StatusCode::CONFLICT,
            AppError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::FailedValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Response extension marking a server error that has already been logged.
#[derive(Debug, Clone, Copy)]
pub struct ErrorLogged;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            AppError::NotFound => (
                status,
                error_to_api_response::<()>(
                    error_codes::NOT_FOUND,
                    "the requested resource could not be found".to_string(),
                ),
            )
                .into_response(),
            AppError::EditConflict => {
                tracing::debug!("edit conflict reported to client");
                (
                    status,
                    error_to_api_response::<()>(
                        error_codes::EDIT_CONFLICT,
                        "unable to update the record due to an edit conflict, please try again"
                            .to_string(),
                    ),
                )
                    .into_response()
            }
            AppError::RateLimitExceeded => (
                status,
                error_to_api_response::<()>(
                    error_codes::RATE_LIMIT,
                    "rate limit exceeded".to_string(),
                ),
            )
                .into_response(),
            AppError::BadRequest(message) => (
                status,
                error_to_api_response::<()>(error_codes::BAD_REQUEST, message),
            )
                .into_response(),
            AppError::FailedValidation(errors) => (
                status,
                error_with_details(
                    error_codes::VALIDATION_ERROR,
                    "failed validation".to_string(),
                    errors,
                ),
            )
                .into_response(),
            AppError::MethodNotAllowed(method) => (
                status,
                error_to_api_response::<()>(
                    error_codes::METHOD_NOT_ALLOWED,
                    format!("the {} method is not supported for this resource", method),
                ),
            )
                .into_response(),
            AppError::Internal(detail) => {
                tracing::error!(error = %detail, "internal server error");
                let mut response = (
                    status,
                    error_to_api_response::<()>(
                        error_codes::INTERNAL_ERROR,
                        SERVER_ERROR_MESSAGE.to_string(),
                    ),
                )
                    .into_response();
                response.extensions_mut().insert(ErrorLogged);
                response
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::NotFound,
            StoreError::EditConflict => AppError::EditConflict,
            other => AppError::internal(other),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(err) => AppError::BadRequest(err.body_text()),
            JsonRejection::JsonSyntaxError(err) => AppError::BadRequest(err.body_text()),
            JsonRejection::MissingJsonContentType(_) => AppError::BadRequest(
                "request must have a Content-Type of application/json".to_string(),
            ),
            JsonRejection::BytesRejection(_) => AppError::BadRequest(
                "body must not be larger than 1048576 bytes".to_string(),
            ),
            other => AppError::BadRequest(other.body_text()),
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// Storage failures. Not-found and edit conflicts are expected outcomes that
/// callers report to clients; the rest are internal.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("edit conflict")]
    EditConflict,
    #[error("duplicate email")]
    DuplicateEmail,
    #[error("storage operation timed out")]
    Timeout,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },
}

impl ConfigError {
    pub(crate) fn invalid(var: &'static str, value: &str) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
        }
    }
}
