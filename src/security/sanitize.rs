use axum::{
    body::Body,
    extract::Request,
    http::{header, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::error::ApiError;

/// Contact fields that carry free text from the client.
pub const TEXT_FIELDS: [&str; 7] = [
    "firstname", "lastname", "email", "homephone", "mobile", "address", "birthday",
];

const MAX_BODY_BYTES: usize = 1024 * 1024;

lazy_static! {
    static ref SCRIPT_BLOCK: Regex =
        Regex::new(r"(?is)<\s*(script|style)\b[^>]*>.*?<\s*/\s*(script|style)\s*>").unwrap();
    static ref TAG: Regex = Regex::new(r"<[a-zA-Z/!?][^<>]*>").unwrap();
    // A `<` that would open a tag; a bare `<` before a space or digit is text.
    static ref TAG_OPEN: Regex = Regex::new(r"<([a-zA-Z/!?])").unwrap();
    static ref SCRIPT_SCHEME: Regex = Regex::new(r"(?i)(javascript|vbscript)\s*:").unwrap();
    static ref EVENT_HANDLER: Regex = Regex::new(r"(?i)\bon[a-z]+\s*=").unwrap();
}

fn strip_once(input: &str) -> String {
    let mut out = input.to_string();
    for re in [&*SCRIPT_BLOCK, &*TAG, &*SCRIPT_SCHEME, &*EVENT_HANDLER] {
        let replaced = re.replace_all(&out, "").into_owned();
        out = replaced;
    }
    TAG_OPEN.replace_all(&out, "$1").into_owned()
}

/// Removes markup and script vectors from `input`.
///
/// Every pass only deletes characters, so iterating to a fixpoint terminates
/// and makes the transform idempotent. Text without hazardous constructs is
/// returned unchanged.
pub fn sanitize(input: &str) -> String {
    let mut current = input.to_string();
    loop {
        let next = strip_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Sanitizes each known text field of a JSON object in place.
pub fn sanitize_fields(value: &mut serde_json::Value) {
    let Some(object) = value.as_object_mut() else {
        return;
    };
    for field in TEXT_FIELDS {
        if let Some(serde_json::Value::String(s)) = object.get_mut(field) {
            let clean = sanitize(s);
            if clean != *s {
                debug!(field, "sanitized input field");
                *s = clean;
            }
        }
    }
}

/// Rewrites POST/PUT JSON bodies with sanitized text fields. Bodies that are
/// not JSON objects pass through untouched and fail later in the handler.
pub async fn sanitize_body(req: Request, next: Next) -> Response {
    if !matches!(*req.method(), Method::POST | Method::PUT) {
        return next.run(req).await;
    }

    let (mut parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => return ApiError::BadBody(e.to_string()).into_response(),
    };

    let body = match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(mut value) if value.is_object() => {
            sanitize_fields(&mut value);
            parts.headers.remove(header::CONTENT_LENGTH);
            Body::from(serde_json::to_vec(&value).unwrap_or_else(|_| bytes.to_vec()))
        }
        _ => Body::from(bytes),
    };
    next.run(Request::from_parts(parts, body)).await
}
