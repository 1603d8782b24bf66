use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use super::csrf::TOKEN_HEADER;

/// Grants cross-origin reads to exactly one origin, with credentials.
/// Every other origin gets no CORS headers; the request itself still runs.
pub fn cors_layer(allowed_origin: &str) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            TOKEN_HEADER,
            HeaderName::from_static("x-xsrf-token"),
            HeaderName::from_static("csrf-token"),
        ])
        .expose_headers([TOKEN_HEADER])
        .allow_credentials(true);

    match HeaderValue::from_str(allowed_origin) {
        Ok(origin) => base.allow_origin(AllowOrigin::list([origin])),
        Err(e) => {
            warn!(error = %e, origin = allowed_origin, "invalid CORS origin; cross-origin reads disabled");
            base
        }
    }
}
