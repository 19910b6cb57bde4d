//! Shared application state: the gateway handle and server metadata.

use std::sync::Arc;
use std::time::Instant;

use crate::error::ApiError;
use crate::gateway::Gateway;

/// Shared application state, cloneable across handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    gateway: Gateway,
    environment: String,
    start_time: Instant,
}

impl AppState {
    /// Creates the application state around a connected gateway.
    pub fn new(gateway: Gateway, environment: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                gateway,
                environment: environment.into(),
                start_time: Instant::now(),
            }),
        }
    }

    /// Returns the gateway handle.
    pub fn gateway(&self) -> &Gateway {
        &self.inner.gateway
    }

    /// True in the development environment, where error responses carry
    /// full detail.
    pub fn development(&self) -> bool {
        self.inner.environment == "development"
    }

    /// Returns the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }

    /// Wraps an internal failure, redacting detail outside development.
    pub fn internal_error(&self, detail: impl Into<String>) -> ApiError {
        let detail = detail.into();
        if self.development() {
            ApiError::Internal(Some(detail))
        } else {
            tracing::error!(%detail, "internal error (detail redacted in response)");
            ApiError::Internal(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

    use super::*;
    use crate::gateway::{Catalog, Gateway, GatewayOptions};

    fn test_state(environment: &str) -> AppState {
        let pool = PgPoolOptions::new().connect_lazy_with(PgConnectOptions::new());
        let catalog = Catalog {
            schema: "public".into(),
            tables: vec![],
        };
        let gateway =
            Gateway::with_catalog(pool, catalog, GatewayOptions::default_for("public")).unwrap();
        AppState::new(gateway, environment)
    }

    #[tokio::test]
    async fn development_errors_keep_detail() {
        let state = test_state("development");
        match state.internal_error("boom") {
            ApiError::Internal(detail) => assert_eq!(detail.as_deref(), Some("boom")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn production_errors_are_redacted() {
        let state = test_state("production");
        match state.internal_error("boom") {
            ApiError::Internal(detail) => assert!(detail.is_none()),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
