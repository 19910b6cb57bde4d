//! Tablegate entry point.

use std::net::SocketAddr;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use tablegate::AppState;
use tablegate::config::Config;
use tablegate::gateway::Gateway;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    // TLS first: an unreadable key or chain must abort before anything binds.
    let tls_config = if config.tls_enabled() {
        let loaded = tablegate::tls::load_tls_config(
            config.ssl_chain_path.as_ref().unwrap(),
            config.ssl_key_path.as_ref().unwrap(),
        )
        .expect("failed to load TLS configuration");
        Some(loaded)
    } else {
        None
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .connect_with(config.pg_connect_options())
        .await
        .expect("failed to connect to database");

    let gateway = Gateway::connect(pool, config.gateway_options())
        .await
        .expect("failed to generate GraphQL schema");

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        schema = %config.schema,
        tls = config.tls_enabled(),
        jwt = gateway.options().jwt_secret.is_some(),
        jwt_type = gateway.options().jwt_type.as_deref().unwrap_or("-"),
        "Tablegate starting",
    );

    // Schema watch: poll for DDL changes and hot-swap the generated API.
    if gateway.options().watch {
        let watcher = gateway.clone();
        let interval = Duration::from_secs(config.schema_watch_interval.max(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = watcher.reload().await {
                    tracing::warn!("schema watch poll failed: {e}");
                }
            }
        });
    }

    let state = AppState::new(gateway, config.environment.clone());
    let app = tablegate::router(state);

    let addr = SocketAddr::new(config.host.parse().expect("invalid host"), config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");

    if let Some(tls_config) = tls_config {
        tracing::info!(%addr, "Tablegate ready (HTTPS)");
        tablegate::tls::serve_tls(listener, tls_config, app, shutdown_signal()).await;
        tracing::info!("Tablegate shut down");
        return;
    }

    tracing::info!(%addr, "Tablegate ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("Tablegate shut down");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install signal handler");
    tracing::info!("Shutdown signal received");
}
