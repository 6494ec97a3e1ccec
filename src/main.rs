use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use marquee::{
    AppState, app,
    config::{Config, StorageBackend},
    mailer::{LogMailer, Mailer, SmtpMailer},
    storage::{MemoryStore, PgStore},
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
#[cfg(debug_assertions)]
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().expect("Failed to load configuration");

    let mailer: Arc<dyn Mailer> = match config.smtp() {
        Some(smtp) => {
            tracing::info!(host = %smtp.host, port = smtp.port, "using smtp mailer");
            Arc::new(SmtpMailer::new(smtp).expect("Failed to configure SMTP transport"))
        }
        None => {
            tracing::warn!("SMTP_HOST not set, emails will only be logged");
            Arc::new(LogMailer)
        }
    };

    let state = match config.storage {
        StorageBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .expect("DATABASE_URL is required for postgres storage");
            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_open_conns)
                .idle_timeout(config.db_max_idle_time())
                .acquire_timeout(Duration::from_secs(5))
                .after_connect(|conn, _meta| {
                    Box::pin(async move {
                        conn.execute("SET application_name = 'marquee';").await?;
                        Ok(())
                    })
                })
                .connect(database_url)
                .await
                .expect("Failed to connect to Postgres");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("database connection pool established");

            AppState::new(config.clone(), Arc::new(PgStore::new(pool)), mailer)
        }
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage, data will not survive a restart");
            AppState::new(config.clone(), Arc::new(MemoryStore::new()), mailer)
        }
    };

    let router = app(state.clone());

    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(CorsLayer::permissive())
    };

    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );
    tracing::info!(addr = %addr, env = %config.env, "starting server");

    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    state.limiter.shutdown().await;

    tracing::info!(
        pending = state.background.pending(),
        "completing background tasks"
    );
    match config.shutdown_grace() {
        Some(grace) => {
            if !state.background.wait_timeout(grace).await {
                tracing::warn!(
                    pending = state.background.pending(),
                    "background tasks still running after shutdown grace period"
                );
            }
        }
        None => state.background.wait().await,
    }

    tracing::info!("stopped server");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!(signal = "SIGINT", "shutting down server"),
        _ = terminate => tracing::info!(signal = "SIGTERM", "shutting down server"),
    }
}
