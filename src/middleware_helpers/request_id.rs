use crate::tracing::RequestId;
use axum::{
    extract::Request,
    http::{header::HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;

/// Header name for the request ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Middleware to add a request ID to every request and its response
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    // Reuse the caller's id only when it can be echoed back as a header value
    let (request_id, header_value) = match request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .and_then(|v| HeaderValue::from_str(v).ok().map(|hv| (RequestId::new(v), hv)))
    {
        Some(pair) => pair,
        None => fresh_request_id(),
    };

    request.headers_mut().insert(
        HeaderName::from_static(REQUEST_ID_HEADER),
        header_value.clone(),
    );
    request.extensions_mut().insert(request_id.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id.as_str(),
        method = %request.method(),
        uri = %request.uri(),
    );

    let mut response = crate::tracing::scope_request_id(request_id, next.run(request))
        .instrument(span)
        .await;

    response
        .headers_mut()
        .insert(HeaderName::from_static(REQUEST_ID_HEADER), header_value);

    response
}

fn fresh_request_id() -> (RequestId, HeaderValue) {
    let uuid = uuid::Uuid::new_v4();
    // Hyphenated UUIDs are always valid header values
    let value = HeaderValue::from_str(&uuid.to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("unknown"));
    (RequestId::new(uuid.to_string()), value)
}
