use axum::body::Body;
use axum::http::HeaderMap;
use axum::response::Response;

use super::upstream::UpstreamResult;

/// Upstream response headers passed back to the caller. Everything else is dropped.
pub const ALLOWED_HEADERS: [&str; 6] = [
    "content-type",
    "expires",
    "x-esi-error-limit-remain",
    "x-esi-error-limit-reset",
    "x-pages",
    "warning",
];

/// Copies the allow-listed headers, keeping every value of repeated headers.
pub fn filter_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in ALLOWED_HEADERS {
        for value in upstream.get_all(name) {
            headers.append(name, value.clone());
        }
    }
    headers
}

/// Builds the caller response: upstream status, filtered headers, body as received.
/// An interrupted body is replaced by an empty one.
pub fn relay(result: UpstreamResult) -> Response {
    let body = match &result.body_error {
        Some(e) => {
            tracing::error!(
                status = result.status.as_u16(),
                received = result.body.len(),
                "Dropping incomplete ESI response body: {}",
                e
            );
            Body::empty()
        }
        None => Body::from(result.body),
    };

    let mut response = Response::new(body);
    *response.status_mut() = result.status;
    *response.headers_mut() = filter_headers(&result.headers);
    response
}
