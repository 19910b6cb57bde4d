//! Integration tests for the HTTP surface.
//!
//! Each test starts a server on an ephemeral port and exercises it with
//! reqwest. The gateway is built over a hand-made catalog snapshot and a
//! lazily-connecting pool, so no live database is required for the routing,
//! CORS, auth, and fallback behavior under test here.

use jsonwebtoken::{EncodingKey, Header, encode};
use reqwest::Client;
use serde_json::{Value, json};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use tablegate::AppState;
use tablegate::gateway::catalog::{ColumnInfo, TableInfo, TableKind, map_udt};
use tablegate::gateway::{Catalog, Gateway, GatewayOptions};

const JWT_SECRET: &str = "integration-secret";

fn test_options(graphiql: bool) -> GatewayOptions {
    GatewayOptions {
        schema: "app_public".to_string(),
        graphiql,
        watch: false,
        jwt_secret: Some(JWT_SECRET.to_string()),
        jwt_type: Some("app_public.jwt".to_string()),
        default_role: Some("anonymous".to_string()),
    }
}

/// Catalog with one `book` table, for tests that need resolvers which
/// actually touch the (unreachable) database.
fn book_catalog(schema: &str) -> Catalog {
    Catalog {
        schema: schema.to_string(),
        tables: vec![TableInfo {
            name: "book".to_string(),
            kind: TableKind::Table,
            columns: vec![
                ColumnInfo {
                    name: "id".to_string(),
                    udt: "int4".to_string(),
                    scalar: map_udt("int4"),
                    nullable: false,
                    has_default: true,
                },
                ColumnInfo {
                    name: "title".to_string(),
                    udt: "text".to_string(),
                    scalar: map_udt("text"),
                    nullable: false,
                    has_default: false,
                },
            ],
            primary_key: vec!["id".to_string()],
        }],
    }
}

/// Boots a server over the given catalog on an OS-assigned port.
/// Returns the base URL (e.g. "http://127.0.0.1:12345").
async fn spawn_server_over(catalog: Catalog, options: GatewayOptions, environment: &str) -> String {
    let pool = PgPoolOptions::new()
        .connect_lazy_with(PgConnectOptions::new().host("127.0.0.1").port(1));
    let gateway = Gateway::with_catalog(pool, catalog, options).unwrap();
    let state = AppState::new(gateway, environment);
    let app = tablegate::router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

async fn spawn_server(options: GatewayOptions, environment: &str) -> String {
    let catalog = Catalog {
        schema: options.schema.clone(),
        tables: vec![],
    };
    spawn_server_over(catalog, options, environment).await
}

async fn default_server() -> String {
    spawn_server(test_options(true), "development").await
}

// ---------------------------------------------------------------------------
// Health and CORS
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_ok() {
    let base = default_server().await;
    let client = Client::new();

    let resp = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["schema"], "app_public");
    assert_eq!(body["tables"], 0);
    assert!(body["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn every_response_allows_any_origin() {
    let base = default_server().await;
    let client = Client::new();

    for path in ["/health", "/graphql", "/does-not-exist"] {
        let resp = client.get(format!("{base}{path}")).send().await.unwrap();
        let cors = resp
            .headers()
            .get("access-control-allow-origin")
            .unwrap_or_else(|| panic!("missing CORS header on {path}"));
        assert_eq!(cors.to_str().unwrap(), "*");
    }
}

#[tokio::test]
async fn preflight_lists_allowed_headers() {
    let base = default_server().await;
    let client = Client::new();

    let resp = client
        .request(reqwest::Method::OPTIONS, format!("{base}/graphql"))
        .header("origin", "https://example.com")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type")
        .send()
        .await
        .unwrap();

    let allowed = resp
        .headers()
        .get("access-control-allow-headers")
        .expect("missing allow-headers")
        .to_str()
        .unwrap()
        .to_lowercase();
    assert!(allowed.contains("content-type"));
    assert!(allowed.contains("x-requested-with"));
    assert!(allowed.contains("authorization"));
}

// ---------------------------------------------------------------------------
// Fallback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_route_produces_404_envelope() {
    let base = default_server().await;
    let client = Client::new();

    let resp = client
        .get(format!("{base}/does-not-exist"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
    assert!(
        body["detail"]
            .as_str()
            .unwrap()
            .contains("/does-not-exist")
    );
}

// ---------------------------------------------------------------------------
// Request ID
// ---------------------------------------------------------------------------

#[tokio::test]
async fn request_id_generated_when_absent() {
    let base = default_server().await;
    let client = Client::new();

    let resp = client.get(format!("{base}/health")).send().await.unwrap();
    let request_id = resp
        .headers()
        .get("x-request-id")
        .expect("missing x-request-id");
    // UUID format: 8-4-4-4-12
    assert_eq!(request_id.to_str().unwrap().len(), 36);
}

#[tokio::test]
async fn oversized_request_id_is_replaced() {
    let base = default_server().await;
    let client = Client::new();

    let resp = client
        .get(format!("{base}/health"))
        .header("x-request-id", "x".repeat(300))
        .send()
        .await
        .unwrap();
    let echoed = resp
        .headers()
        .get("x-request-id")
        .expect("missing x-request-id")
        .to_str()
        .unwrap();
    // Replaced with a generated UUID (8-4-4-4-12).
    assert_eq!(echoed.len(), 36);
}

#[tokio::test]
async fn request_id_preserved_when_provided() {
    let base = default_server().await;
    let client = Client::new();

    let resp = client
        .get(format!("{base}/health"))
        .header("x-request-id", "my-custom-id-123")
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.headers().get("x-request-id").unwrap().to_str().unwrap(),
        "my-custom-id-123"
    );
}

// ---------------------------------------------------------------------------
// GraphQL endpoint
// ---------------------------------------------------------------------------

#[tokio::test]
async fn graphiql_explorer_is_served() {
    let base = default_server().await;
    let client = Client::new();

    let resp = client.get(format!("{base}/graphql")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.to_lowercase().contains("graphiql"));
}

#[tokio::test]
async fn graphiql_can_be_disabled() {
    let base = spawn_server(test_options(false), "development").await;
    let client = Client::new();

    let resp = client.get(format!("{base}/graphql")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn current_schema_query_executes() {
    let base = default_server().await;
    let client = Client::new();

    let resp = client
        .post(format!("{base}/graphql"))
        .json(&json!({"query": "{ currentSchema }"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["currentSchema"], "app_public");
}

#[tokio::test]
async fn resolver_failure_keeps_detail_in_development() {
    let base = spawn_server_over(
        book_catalog("app_public"),
        test_options(true),
        "development",
    )
    .await;
    let client = Client::new();

    // The pool points at an unreachable port, so any field that opens a
    // transaction fails server-side.
    let resp = client
        .post(format!("{base}/graphql"))
        .json(&json!({"query": "{ allBooks { id } }"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "internal_error");
    assert!(body["detail"].as_str().unwrap().contains("database error"));
}

#[tokio::test]
async fn resolver_failure_is_redacted_in_production() {
    let base = spawn_server_over(
        book_catalog("app_public"),
        test_options(true),
        "production",
    )
    .await;
    let client = Client::new();

    let resp = client
        .post(format!("{base}/graphql"))
        .json(&json!({"query": "{ allBooks { id } }"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "internal_error");
    assert!(body["detail"].is_null());
}

#[tokio::test]
async fn unknown_field_reports_graphql_error() {
    let base = default_server().await;
    let client = Client::new();

    let resp = client
        .post(format!("{base}/graphql"))
        .json(&json!({"query": "{ nope }"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert!(!body["errors"].as_array().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// JWT handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_token_is_rejected() {
    let base = default_server().await;
    let client = Client::new();

    let resp = client
        .post(format!("{base}/graphql"))
        .header("authorization", "Bearer not-a-token")
        .json(&json!({"query": "{ currentSchema }"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn valid_token_is_accepted() {
    let base = default_server().await;
    let client = Client::new();

    let token = encode(
        &Header::default(),
        &json!({
            "aud": "postgraphile",
            "exp": 4_102_444_800_i64,
            "role": "member",
        }),
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap();

    let resp = client
        .post(format!("{base}/graphql"))
        .header("authorization", format!("Bearer {token}"))
        .json(&json!({"query": "{ currentSchema }"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["currentSchema"], "app_public");
}
