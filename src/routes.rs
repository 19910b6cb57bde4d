//! HTTP routes and middleware composition.
//!
//! Every request flows CORS -> request ID -> trace -> router; paths the
//! gateway does not serve fall through to the 404 envelope.

use async_graphql::http::GraphiQLSource;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::Router;
use axum::extract::State;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, ORIGIN};
use axum::http::{HeaderMap, HeaderName, Method, Uri};
use axum::middleware;
use axum::response::Html;
use axum::routing::get;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::gateway::{GatewayError, authenticate};
use crate::request_id::request_id_middleware;
use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    /// Server status ("ok").
    status: String,
    /// Server version.
    version: String,
    /// Schema exposed through GraphQL.
    schema: String,
    /// Number of tables currently exposed.
    tables: usize,
    /// Server uptime in seconds.
    uptime_seconds: u64,
}

/// Builds the complete middleware-wrapped router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/graphql", get(graphiql).post(graphql))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors_layer())
        .with_state(state)
}

/// Permissive CORS: any origin, the classic XHR header allow-list plus
/// `Authorization` for the JWT path.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            ORIGIN,
            HeaderName::from_static("x-requested-with"),
            CONTENT_TYPE,
            ACCEPT,
            AUTHORIZATION,
        ])
}

/// Execute a GraphQL request against the current generated schema.
///
/// Client-side problems (unknown fields, bad arguments) stay in the GraphQL
/// `errors` array. Server-side gateway failures become the terminal 500
/// envelope, with detail redacted outside development.
async fn graphql(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: GraphQLRequest,
) -> Result<GraphQLResponse, ApiError> {
    let options = state.gateway().options();
    let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let session = authenticate(
        authorization,
        options.jwt_secret.as_deref(),
        options.default_role.as_deref(),
    )
    .map_err(|e| ApiError::Unauthorized(e.to_string()))?;

    let schema = state.gateway().schema();
    let request = req.into_inner().data(session);
    let response = schema.execute(request).await;

    if let Some(failure) = response
        .errors
        .iter()
        .find_map(|e| e.source::<GatewayError>())
    {
        return Err(state.internal_error(failure.to_string()));
    }

    Ok(response.into())
}

/// Serve the interactive explorer, when enabled.
async fn graphiql(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    if !state.gateway().options().graphiql {
        return Err(ApiError::NotFound("graphiql is disabled".to_string()));
    }
    Ok(Html(
        GraphiQLSource::build().endpoint("/graphql").finish(),
    ))
}

async fn health(State(state): State<AppState>) -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        schema: state.gateway().options().schema.clone(),
        tables: state.gateway().table_count(),
        uptime_seconds: state.uptime_secs(),
    })
}

/// Catch-all for paths the gateway does not serve.
async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("no route for {}", uri.path()))
}
