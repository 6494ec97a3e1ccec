use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};

use background::BackgroundRunner;
use config::Config;
use mailer::Mailer;
use middleware::{RateLimiter, log_errors, rate_limit, recover_panic};
use storage::{MovieRepository, TokenRepository, UserRepository};

pub mod background;
pub mod config;
pub mod error;
pub mod mailer;
pub mod middleware;
pub mod models;
pub mod result;
pub mod routes;
pub mod storage;
pub mod utils;

pub const MAX_BODY_BYTES: usize = 1_048_576;
/// Requests still running after this answer 408.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub movies: Arc<dyn MovieRepository>,
    pub users: Arc<dyn UserRepository>,
    pub tokens: Arc<dyn TokenRepository>,
    pub mailer: Arc<dyn Mailer>,
    pub limiter: Arc<RateLimiter>,
    pub background: BackgroundRunner,
}

impl AppState {
    /// Wires one store into every repository slot and starts the rate
    /// limiter's eviction sweep. Must run inside a Tokio runtime.
    pub fn new<S>(config: Config, store: Arc<S>, mailer: Arc<dyn Mailer>) -> Self
    where
        S: MovieRepository + UserRepository + TokenRepository + 'static,
    {
        let limiter = RateLimiter::start(config.rate_limiter());
        Self {
            config,
            movies: store.clone(),
            users: store.clone(),
            tokens: store,
            mailer,
            limiter,
            background: BackgroundRunner::new(),
        }
    }
}

pub fn app(state: AppState) -> Router {
    let limiter = state.limiter.clone();

    Router::new()
        .route("/v1/healthcheck", get(routes::healthcheck::healthcheck))
        .route(
            "/v1/movies",
            get(routes::movie::list_movies).post(routes::movie::create_movie),
        )
        .route(
            "/v1/movies/{id}",
            get(routes::movie::show_movie)
                .patch(routes::movie::update_movie)
                .delete(routes::movie::delete_movie),
        )
        .route("/v1/users", post(routes::user::register_user))
        .route("/v1/users/activated", put(routes::user::activate_user))
        .fallback(routes::not_found)
        .method_not_allowed_fallback(routes::method_not_allowed)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(axum::middleware::from_fn_with_state(limiter, rate_limit))
        .layer(axum::middleware::from_fn(log_errors))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(recover_panic))
        .with_state(state)
}
