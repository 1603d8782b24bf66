//! Anti-forgery tokens.
//!
//! Each client holds a random secret in the HTTP-only `_csrf` cookie. Tokens
//! handed to the client have the form `<salt>.<mac>` where `mac` is
//! HMAC-SHA256 over `salt "." secret`, keyed with the server key. A
//! state-changing request must echo a token that verifies against the secret
//! in its own cookie, so a cross-site page (which can neither read nor set
//! that cookie) cannot produce one.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::{error::ApiError, state::AppState};

type HmacSha256 = Hmac<Sha256>;

pub const SECRET_COOKIE: &str = "_csrf";
pub const TOKEN_COOKIE: &str = "XSRF-TOKEN";
pub const TOKEN_HEADER: HeaderName = HeaderName::from_static("x-csrf-token");
pub const BODY_FIELD: &str = "_csrf";

/// Request headers a client may use to submit the token.
const SUBMIT_HEADERS: [&str; 3] = ["x-csrf-token", "x-xsrf-token", "csrf-token"];

const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct CsrfKeys {
    key: Arc<[u8]>,
}

impl CsrfKeys {
    pub fn new(key: &[u8]) -> Self {
        Self { key: key.into() }
    }

    pub fn new_secret(&self) -> String {
        Base64UrlUnpadded::encode_string(&rand::random::<[u8; 18]>())
    }

    /// Issues a fresh token bound to `secret`. Every call uses a new salt.
    pub fn issue(&self, secret: &str) -> String {
        let salt = Base64UrlUnpadded::encode_string(&rand::random::<[u8; 12]>());
        let mac = self.mac(&salt, secret).finalize().into_bytes();
        format!("{salt}.{}", Base64UrlUnpadded::encode_string(&mac))
    }

    pub fn verify(&self, secret: &str, token: &str) -> bool {
        let Some((salt, mac)) = token.split_once('.') else {
            return false;
        };
        let Ok(mac) = Base64UrlUnpadded::decode_vec(mac) else {
            return false;
        };
        self.mac(salt, secret).verify_slice(&mac).is_ok()
    }

    fn mac(&self, salt: &str, secret: &str) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(salt.as_bytes());
        mac.update(b".");
        mac.update(secret.as_bytes());
        mac
    }
}

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn header_token(headers: &HeaderMap) -> Option<String> {
    SUBMIT_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .next()
}

fn body_token(bytes: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    value.get(BODY_FIELD)?.as_str().map(str::to_string)
}

/// Rejects state-changing requests whose token does not verify against the
/// cookie secret. Runs inside the CORS layer.
pub async fn csrf_protect(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if is_safe(req.method()) {
        return next.run(req).await;
    }
    let cookie_secret = read_cookie(req.headers(), SECRET_COOKIE);
    match check_request(&state.csrf, cookie_secret.as_deref(), req).await {
        Ok(req) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

/// Attaches a fresh token to every response, preflights and rejections
/// included. Sets the secret cookie when the client has none.
pub async fn issue_csrf_token(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let cookie_secret = read_cookie(req.headers(), SECRET_COOKIE);
    let mut res = next.run(req).await;

    let (secret, new_secret) = match cookie_secret {
        Some(s) => (s, false),
        None => (state.csrf.new_secret(), true),
    };
    attach_token(&state, &mut res, &secret, new_secret);
    res
}

async fn check_request(keys: &CsrfKeys, secret: Option<&str>, req: Request) -> Result<Request, ApiError> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if let Some(token) = header_token(req.headers()) {
        return match secret {
            Some(secret) if keys.verify(secret, &token) => Ok(req),
            _ => {
                warn!(%method, %path, "csrf check failed");
                Err(ApiError::Csrf)
            }
        };
    }

    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES).await.map_err(|e| {
        debug!(error = %e, "reading body for csrf token failed");
        ApiError::Csrf
    })?;
    match (secret, body_token(&bytes)) {
        (Some(secret), Some(token)) if keys.verify(secret, &token) => {
            Ok(Request::from_parts(parts, Body::from(bytes)))
        }
        _ => {
            warn!(%method, %path, "csrf check failed");
            Err(ApiError::Csrf)
        }
    }
}

fn attach_token(state: &AppState, res: &mut Response, secret: &str, new_secret: bool) {
    let secure = state.config.is_production();
    let token = state.csrf.issue(secret);

    let headers = res.headers_mut();
    if new_secret {
        if let Ok(v) = HeaderValue::from_str(&cookie(SECRET_COOKIE, secret, secure)) {
            headers.append(header::SET_COOKIE, v);
        }
    }
    if let Ok(v) = HeaderValue::from_str(&cookie(TOKEN_COOKIE, &token, secure)) {
        headers.append(header::SET_COOKIE, v);
    }
    if let Ok(v) = HeaderValue::from_str(&token) {
        headers.insert(TOKEN_HEADER, v);
    }
}

fn cookie(name: &str, value: &str, secure: bool) -> String {
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}
