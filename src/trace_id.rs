//! Per-request identity.
//!
//! Every inbound call is tagged with a UUIDv7. The id travels three ways:
//! as a request extension (settlement receipts embed it), as a field on the
//! tracing span wrapping the request (so verify/submit/reconcile log lines
//! correlate under one id), and as the `X-x402-Request-Id` header stamped on
//! every response, including gate rejections and error paths that never
//! reach a handler body.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the request id back to the caller.
pub const REQUEST_ID_HEADER: &str = "X-x402-Request-Id";

/// The id assigned to the current request, extractable by handlers.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Middleware assigning the request id; apply with
/// `axum::middleware::from_fn(request_id)`.
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let id = Uuid::now_v7().to_string();
    request.extensions_mut().insert(RequestId(id.clone()));

    let span = tracing::info_span!(
        "request",
        request_id = %id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
