//! Request correlation middleware.

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Longest client-supplied ID echoed back; anything longer is replaced.
const MAX_ID_LEN: usize = 128;

fn usable_id(value: &HeaderValue) -> Option<String> {
    let id = value.to_str().ok()?;
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return None;
    }
    Some(id.to_string())
}

/// Tags every request with an `X-Request-Id`, preserved from the client when
/// it carries a usable value and generated otherwise. The ID and the request
/// line go on a tracing span, and the ID is echoed on the response.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(usable_id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    // Both the preserved and the generated form are valid header values.
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(X_REQUEST_ID.clone(), value.clone());
        let mut response = next.run(req).instrument(span).await;
        response.headers_mut().insert(X_REQUEST_ID.clone(), value);
        return response;
    }

    next.run(req).instrument(span).await
}
