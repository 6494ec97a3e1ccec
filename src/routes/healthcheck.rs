use axum::{extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use crate::{AppState, utils::success_to_api_response};

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub environment: String,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthcheckResponse {
    pub status: &'static str,
    pub system_info: SystemInfo,
}

pub async fn healthcheck(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        success_to_api_response(HealthcheckResponse {
            status: "available",
            system_info: SystemInfo {
                environment: state.config.env.clone(),
                version: env!("CARGO_PKG_VERSION"),
            },
        }),
    )
}
