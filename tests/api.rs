use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use marquee::{
    AppState, app,
    config::{Config, StorageBackend},
    error::StoreError,
    mailer::{Email, MailError, Mailer},
    models::{Metadata, Movie, MovieFilter, NewMovie},
    storage::{MemoryStore, MovieRepository, VersionedStore},
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tower::ServiceExt;

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<Email>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        self.sent.lock().push(email);
        Ok(())
    }
}

fn test_config() -> Config {
    Config {
        storage: StorageBackend::Memory,
        limiter_enabled: false,
        env: "test".to_string(),
        ..Config::default()
    }
}

fn test_app(config: Config) -> (Router, AppState, Arc<RecordingMailer>) {
    let mailer = Arc::new(RecordingMailer::default());
    let state = AppState::new(config, Arc::new(MemoryStore::new()), mailer.clone());
    let router = app(state.clone()).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
    (router, state, mailer)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn create_casablanca(router: &Router) -> Value {
    let (status, body) = send(
        router,
        json_request(
            "POST",
            "/v1/movies",
            json!({
                "title": "Casablanca",
                "year": 1942,
                "runtime": "102 mins",
                "genres": ["drama", "romance", "war"]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["resp_data"]["movie"].clone()
}

#[tokio::test]
async fn test_healthcheck() {
    let (router, _, _) = test_app(test_config());
    let (status, body) = send(&router, get("/v1/healthcheck")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resp_data"]["status"], "available");
    assert_eq!(body["resp_data"]["system_info"]["environment"], "test");
}

#[tokio::test]
async fn test_movie_lifecycle() {
    let (router, _, _) = test_app(test_config());

    let movie = create_casablanca(&router).await;
    assert_eq!(movie["id"], 1);
    assert_eq!(movie["version"], 1);
    assert_eq!(movie["runtime"], "102 mins");

    let (status, body) = send(&router, get("/v1/movies/1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resp_data"]["movie"]["title"], "Casablanca");

    let (status, body) = send(
        &router,
        json_request("PATCH", "/v1/movies/1", json!({ "year": 1943 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resp_data"]["movie"]["year"], 1943);
    assert_eq!(body["resp_data"]["movie"]["version"], 2);

    let (status, _) = send(
        &router,
        Request::builder()
            .method("DELETE")
            .uri("/v1/movies/1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&router, get("/v1/movies/1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 1004);
}

#[tokio::test]
async fn test_create_movie_location_and_validation() {
    let (router, _, _) = test_app(test_config());

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/movies",
            json!({ "title": "Moana", "year": 2016, "runtime": "107 mins", "genres": ["animation"] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()[header::LOCATION], "/v1/movies/1");

    let (status, body) = send(
        &router,
        json_request("POST", "/v1/movies", json!({ "title": "", "year": 1500 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["resp_data"]["title"], "must be provided");
    assert_eq!(body["resp_data"]["runtime"], "must be provided");
    assert_eq!(body["resp_data"]["genres"], "must contain at least 1 genre");
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let (router, _, _) = test_app(test_config());

    let (status, _) = send(
        &router,
        Request::builder()
            .method("POST")
            .uri("/v1/movies")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"title\": "))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &router,
        json_request("POST", "/v1/movies", json!({ "title": "X", "rating": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_ids_are_not_found() {
    let (router, _, _) = test_app(test_config());
    for uri in ["/v1/movies/0", "/v1/movies/-1", "/v1/movies/abc", "/v1/movies/99"] {
        let (status, _) = send(&router, get(uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn test_expected_version_header_guards_update() {
    let (router, _, _) = test_app(test_config());
    create_casablanca(&router).await;

    let stale = Request::builder()
        .method("PATCH")
        .uri("/v1/movies/1")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Expected-Version", "7")
        .body(Body::from(json!({ "title": "Stale" }).to_string()))
        .unwrap();
    let (status, body) = send(&router, stale).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 1006);

    let fresh = Request::builder()
        .method("PATCH")
        .uri("/v1/movies/1")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Expected-Version", "1")
        .body(Body::from(json!({ "title": "Fresh" }).to_string()))
        .unwrap();
    let (status, body) = send(&router, fresh).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resp_data"]["movie"]["title"], "Fresh");
    assert_eq!(body["resp_data"]["movie"]["version"], 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_patches_never_lose_updates() {
    let (router, state, _) = test_app(test_config());
    create_casablanca(&router).await;

    let writers = 16;
    let handles: Vec<_> = (0..writers)
        .map(|i| {
            let router = router.clone();
            tokio::spawn(async move {
                send(
                    &router,
                    json_request("PATCH", "/v1/movies/1", json!({ "title": format!("writer {i}") })),
                )
                .await
                .0
            })
        })
        .collect();

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::CONFLICT => {}
            other => panic!("unexpected status {other}"),
        }
    }

    let movie = state.movies.get(1).await.unwrap();
    assert!(ok >= 1);
    assert_eq!(movie.version, 1 + ok);
}

#[tokio::test]
async fn test_list_movies_with_filters() {
    let (router, _, _) = test_app(test_config());
    create_casablanca(&router).await;
    send(
        &router,
        json_request(
            "POST",
            "/v1/movies",
            json!({ "title": "Moana", "year": 2016, "runtime": "107 mins", "genres": ["animation", "adventure"] }),
        ),
    )
    .await;

    let (status, body) = send(&router, get("/v1/movies?genres=adventure&sort=-year")).await;
    assert_eq!(status, StatusCode::OK);
    let movies = body["resp_data"]["movies"].as_array().unwrap();
    assert_eq!(movies.len(), 1);
    assert_eq!(movies[0]["title"], "Moana");
    assert_eq!(body["resp_data"]["metadata"]["total_records"], 1);

    let (status, body) = send(&router, get("/v1/movies?page=abc&sort=rating")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["resp_data"]["page"], "must be an integer value");
    assert_eq!(body["resp_data"]["sort"], "invalid sort value");
}

#[tokio::test]
async fn test_register_and_activate_user() {
    let (router, state, mailer) = test_app(test_config());

    let (status, body) = send(
        &router,
        json_request(
            "POST",
            "/v1/users",
            json!({ "name": "Alice", "email": "alice@example.com", "password": "pa55word" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["resp_data"]["user"]["activated"], false);
    assert!(body["resp_data"]["user"].get("password_hash").is_none());

    state.background.wait().await;
    let email = mailer.sent.lock().pop().expect("welcome email sent");
    assert_eq!(email.to, "alice@example.com");
    let start = email.text_body.find("{\"token\": \"").unwrap() + "{\"token\": \"".len();
    let token = email.text_body[start..start + 32].to_string();

    let (status, body) = send(
        &router,
        json_request("PUT", "/v1/users/activated", json!({ "token": token })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resp_data"]["user"]["activated"], true);

    // Tokens are single use.
    let (status, body) = send(
        &router,
        json_request("PUT", "/v1/users/activated", json!({ "token": token })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["resp_data"]["token"], "invalid or expired activation token");
}

#[tokio::test]
async fn test_duplicate_email_is_validation_error() {
    let (router, _, _) = test_app(test_config());
    let payload = json!({ "name": "Bob", "email": "bob@example.com", "password": "pa55word" });

    let (status, _) = send(&router, json_request("POST", "/v1/users", payload.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = send(&router, json_request("POST", "/v1/users", payload)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body["resp_data"]["email"],
        "a user with this email address already exists"
    );
}

#[tokio::test]
async fn test_rate_limit_rejects_after_burst() {
    let (router, _, _) = test_app(Config {
        limiter_enabled: true,
        limiter_burst: 4,
        limiter_rps: 0.01,
        ..test_config()
    });

    for _ in 0..4 {
        let (status, _) = send(&router, get("/v1/healthcheck")).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = send(&router, get("/v1/healthcheck")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], 1005);
}

#[tokio::test]
async fn test_missing_client_address_is_internal_error() {
    let state = AppState::new(
        Config {
            limiter_enabled: true,
            ..test_config()
        },
        Arc::new(MemoryStore::new()),
        Arc::new(RecordingMailer::default()),
    );
    let router = app(state);

    let (status, body) = send(&router, get("/v1/healthcheck")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], 5000);
}

#[tokio::test]
async fn test_fallbacks() {
    let (router, _, _) = test_app(test_config());

    let (status, _) = send(&router, get("/v1/nothing-here")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &router,
        Request::builder()
            .method("DELETE")
            .uri("/v1/healthcheck")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(
        body["msg"],
        "the DELETE method is not supported for this resource"
    );
}

struct StalledMovies;

#[async_trait]
impl VersionedStore<Movie> for StalledMovies {
    async fn get(&self, _id: i64) -> Result<Movie, StoreError> {
        tokio::time::sleep(Duration::from_secs(120)).await;
        Err(StoreError::NotFound)
    }

    async fn update(&self, _movie: &Movie) -> Result<i32, StoreError> {
        Err(StoreError::EditConflict)
    }
}

#[async_trait]
impl MovieRepository for StalledMovies {
    async fn insert(&self, _movie: NewMovie) -> Result<Movie, StoreError> {
        Err(StoreError::Timeout)
    }

    async fn delete(&self, _id: i64) -> Result<(), StoreError> {
        Err(StoreError::NotFound)
    }

    async fn list(&self, _filter: &MovieFilter) -> Result<(Vec<Movie>, Metadata), StoreError> {
        Err(StoreError::Timeout)
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_request_times_out() {
    let (_, state, _) = test_app(test_config());
    let state = AppState {
        movies: Arc::new(StalledMovies),
        ..state
    };
    let router = app(state).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));

    let (status, _) = send(&router, get("/v1/movies/1")).await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
}
