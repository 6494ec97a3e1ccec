use axum::http::Method;

use crate::error::AppError;

pub mod healthcheck;
pub mod movie;
pub mod user;

/// Parses a positive record id from a path segment. Anything else cannot name
/// a record and is reported as not found.
pub(crate) fn parse_id(raw: &str) -> Result<i64, AppError> {
    match raw.parse::<i64>() {
        Ok(id) if id >= 1 => Ok(id),
        _ => Err(AppError::NotFound),
    }
}

pub async fn not_found() -> AppError {
    AppError::NotFound
}

pub async fn method_not_allowed(method: Method) -> AppError {
    AppError::MethodNotAllowed(method)
}
