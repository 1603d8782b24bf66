use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error};

use crate::{db::StorageError, state::AppState};

pub const GENERIC_FAILURE: &str = "Something went wrong!";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("Contact not found")]
    NotFound,
    #[error("Invalid CSRF token")]
    Csrf,
    #[error("Invalid request body")]
    BadBody(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: None,
        }
    }
}

/// Internal failure text, attached to 500 responses so the top-level
/// layer can decide whether the client may see it.
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) | ApiError::BadBody(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Csrf => StatusCode::FORBIDDEN,
            ApiError::Storage(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if !status.is_server_error() {
            if let ApiError::BadBody(detail) = &self {
                debug!(%detail, "unreadable request body");
            }
            return (status, Json(ErrorBody::new(self.to_string()))).into_response();
        }

        let detail = match &self {
            ApiError::Storage(StorageError(e)) => e.to_string(),
            other => format!("{other:#}"),
        };
        error!(error = %detail, "request failed");
        let mut res = (status, Json(ErrorBody::new(GENERIC_FAILURE))).into_response();
        res.extensions_mut().insert(ErrorDetail(detail));
        res
    }
}

/// Outermost error boundary: strips or exposes internal detail depending on
/// the configured environment.
pub async fn expose_error_detail(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let mut res = next.run(req).await;
    let Some(ErrorDetail(detail)) = res.extensions_mut().remove::<ErrorDetail>() else {
        return res;
    };
    if !state.config.is_development() {
        return res;
    }

    let body = ErrorBody {
        success: false,
        message: GENERIC_FAILURE.into(),
        error: Some(detail),
    };
    let (mut parts, _) = res.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    let json = serde_json::to_vec(&body).unwrap_or_default();
    Response::from_parts(parts, Body::from(json))
}

/// Renders a handler panic as the generic 500 body.
pub fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    ApiError::Internal(anyhow::anyhow!("handler panicked: {detail}")).into_response()
}
