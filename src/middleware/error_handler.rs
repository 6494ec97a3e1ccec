use axum::{extract::Request, middleware::Next, response::Response};
use tracing::error;

use crate::error::ErrorLogged;

/// Logs server errors with the request line that produced them. Errors
/// already logged where they were raised are skipped. The response body is
/// passed through untouched.
pub async fn log_errors(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();

    let response = next.run(req).await;

    if needs_logging(&response) {
        error!(
            request_method = %method,
            request_url = %uri,
            status = response.status().as_u16(),
            "server error response"
        );
    }

    response
}

fn needs_logging(response: &Response) -> bool {
    response.status().is_server_error() && response.extensions().get::<ErrorLogged>().is_none()
}
