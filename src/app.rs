use axum::{http::StatusCode, middleware, routing::get, Json, Router};
use serde::Serialize;
use time::OffsetDateTime;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::contacts;
use crate::error::{expose_error_detail, panic_response, ErrorBody};
use crate::security::{
    cors::cors_layer,
    csrf::{csrf_protect, issue_csrf_token},
    headers::with_security_headers,
    sanitize::sanitize_body,
};
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        timestamp: OffsetDateTime::now_utc(),
    })
}

async fn not_found() -> (StatusCode, Json<ErrorBody>) {
    (StatusCode::NOT_FOUND, Json(ErrorBody::new("Not found")))
}

/// Layers run outermost first: security headers, error-detail policy,
/// tracing, token issue, CORS, CSRF check, panic capture, body sanitization.
pub fn build_app(state: AppState) -> Router {
    let router = Router::new()
        .merge(contacts::router())
        .route("/health", get(health))
        .fallback(not_found)
        .layer(middleware::from_fn(sanitize_body))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn_with_state(state.clone(), csrf_protect))
        .layer(cors_layer(&state.config.cors_origin))
        .layer(middleware::from_fn_with_state(state.clone(), issue_csrf_token))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
        .layer(middleware::from_fn_with_state(state.clone(), expose_error_detail))
        .with_state(state);

    with_security_headers(router)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header, HeaderMap, Method, Request},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::config::{AppConfig, Environment};
    use crate::security::csrf::TOKEN_HEADER;

    struct Session {
        secret: String,
        token: String,
    }

    fn set_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
        headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|c| c.strip_prefix(&format!("{name}=")).map(str::to_string))
            .and_then(|c| c.split(';').next().map(str::to_string))
    }

    async fn session(app: &Router) -> Session {
        let res = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        Session {
            secret: set_cookie(res.headers(), "_csrf").expect("secret cookie"),
            token: res.headers()[TOKEN_HEADER].to_str().unwrap().to_string(),
        }
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
        session: Option<&Session>,
        extra: &[(&str, &str)],
    ) -> (StatusCode, HeaderMap, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(s) = session {
            req = req
                .header(header::COOKIE, format!("_csrf={}", s.secret))
                .header("x-csrf-token", &s.token);
        }
        for (k, v) in extra {
            req = req.header(*k, *v);
        }
        let body = match body {
            Some(v) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };
        let res = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, json)
    }

    async fn row_count(state: &AppState) -> i64 {
        let (n,): (i64,) = state
            .store
            .query_one("SELECT COUNT(*) FROM contacts", &[])
            .await
            .unwrap()
            .unwrap();
        n
    }

    async fn setup() -> (Router, AppState, Session) {
        let state = AppState::fake().await;
        let app = build_app(state.clone());
        let s = session(&app).await;
        (app, state, s)
    }

    fn ann() -> Value {
        json!({"firstname": "Ann", "lastname": "Lee", "email": "a@x.com"})
    }

    #[tokio::test]
    async fn health_reports_ok_with_timestamp() {
        let (app, _, _) = setup().await;
        let (status, headers, body) = send(&app, Method::GET, "/health", None, None, &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["timestamp"].is_string());
        assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
    }

    #[tokio::test]
    async fn create_then_get_returns_same_contact() {
        let (app, _, s) = setup().await;
        let (status, headers, created) =
            send(&app, Method::POST, "/contacts", Some(ann()), Some(&s), &[]).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_i64().unwrap();
        assert!(id > 0);
        assert_eq!(created["firstname"], "Ann");
        assert_eq!(created["lastname"], "Lee");
        assert_eq!(created["email"], "a@x.com");
        assert!(created["mobile"].is_null());
        assert_eq!(created["created_at"], created["updated_at"]);
        assert_eq!(headers[header::LOCATION], format!("/contacts/{id}").as_str());

        let (status, _, fetched) =
            send(&app, Method::GET, &format!("/contacts/{id}"), None, None, &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn list_is_sorted_by_lastname_then_firstname() {
        let (app, _, s) = setup().await;
        for (first, last) in [("Bob", "Smith"), ("Zoe", "Adams"), ("Amy", "Smith")] {
            let body = json!({"firstname": first, "lastname": last, "email": "e@x.com"});
            send(&app, Method::POST, "/contacts", Some(body), Some(&s), &[]).await;
        }
        let (status, _, list) = send(&app, Method::GET, "/contacts", None, None, &[]).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = list
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["firstname"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["Zoe", "Amy", "Bob"]);
    }

    #[tokio::test]
    async fn update_of_missing_contact_is_404() {
        let (app, _, s) = setup().await;
        let body = json!({"firstname": "X", "lastname": "Y", "email": "x@y.com"});
        let (status, _, json) =
            send(&app, Method::PUT, "/contacts/9999", Some(body), Some(&s), &[]).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json, json!({"success": false, "message": "Contact not found"}));
    }

    #[tokio::test]
    async fn update_replaces_fields() {
        let (app, _, s) = setup().await;
        let (_, _, created) = send(&app, Method::POST, "/contacts", Some(ann()), Some(&s), &[]).await;
        let id = created["id"].as_i64().unwrap();

        let body = json!({"firstname": "Anne", "lastname": "Lee", "email": "a@x.com", "mobile": "087"});
        let (status, _, updated) =
            send(&app, Method::PUT, &format!("/contacts/{id}"), Some(body), Some(&s), &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["id"], id);
        assert_eq!(updated["firstname"], "Anne");
        assert_eq!(updated["mobile"], "087");
        assert_eq!(updated["created_at"], created["created_at"]);
    }

    #[tokio::test]
    async fn delete_twice_is_200_then_404() {
        let (app, _, s) = setup().await;
        let (_, _, created) = send(&app, Method::POST, "/contacts", Some(ann()), Some(&s), &[]).await;
        let uri = format!("/contacts/{}", created["id"]);

        let (status, _, body) = send(&app, Method::DELETE, &uri, None, Some(&s), &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, _, body) = send(&app, Method::DELETE, &uri, None, Some(&s), &[]).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn absent_and_malformed_ids_are_404() {
        let (app, _, _) = setup().await;
        for uri in ["/contacts/9999", "/contacts/abc"] {
            let (status, _, body) = send(&app, Method::GET, uri, None, None, &[]).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["message"], "Contact not found");
        }
    }

    #[tokio::test]
    async fn missing_required_fields_are_rejected_without_store_writes() {
        let (app, state, s) = setup().await;
        for body in [
            json!({"lastname": "Lee", "email": "a@x.com"}),
            json!({"firstname": "Ann", "email": "a@x.com"}),
            json!({"firstname": "Ann", "lastname": "Lee", "email": ""}),
        ] {
            let (status, _, json) =
                send(&app, Method::POST, "/contacts", Some(body), Some(&s), &[]).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(json["message"], "First name, last name and email are required");
        }
        assert_eq!(row_count(&state).await, 0);
    }

    #[tokio::test]
    async fn field_that_sanitizes_to_empty_fails_validation() {
        let (app, state, s) = setup().await;
        let body = json!({"firstname": "<script>alert(1)</script>", "lastname": "Lee", "email": "a@x.com"});
        let (status, _, _) = send(&app, Method::POST, "/contacts", Some(body), Some(&s), &[]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(row_count(&state).await, 0);
    }

    #[tokio::test]
    async fn stored_fields_are_sanitized() {
        let (app, _, s) = setup().await;
        let body = json!({
            "firstname": "<b>Ann</b>",
            "lastname": "Lee",
            "email": "a@x.com",
            "address": "<img src=x onerror=alert(1)>1 Main St",
        });
        let (status, _, created) = send(&app, Method::POST, "/contacts", Some(body), Some(&s), &[]).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["firstname"], "Ann");
        assert_eq!(created["address"], "1 Main St");
    }

    #[tokio::test]
    async fn writes_without_valid_token_never_reach_the_store() {
        let (app, state, s) = setup().await;

        let (status, headers, missing) = send(&app, Method::POST, "/contacts", Some(ann()), None, &[]).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(headers.contains_key(TOKEN_HEADER));

        let forged = Session {
            secret: s.secret.clone(),
            token: "forged.AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".into(),
        };
        let (status, _, wrong) = send(&app, Method::POST, "/contacts", Some(ann()), Some(&forged), &[]).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(missing, wrong);
        assert_eq!(wrong, json!({"success": false, "message": "Invalid CSRF token"}));

        let other = session(&app).await;
        let mixed = Session {
            secret: s.secret.clone(),
            token: other.token,
        };
        let (status, _, _) = send(&app, Method::DELETE, "/contacts/1", None, Some(&mixed), &[]).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        assert_eq!(row_count(&state).await, 0);
    }

    #[tokio::test]
    async fn token_may_be_submitted_in_body() {
        let (app, state, s) = setup().await;
        let mut body = ann();
        body["_csrf"] = Value::String(s.token.clone());
        let req = Request::post("/contacts")
            .header(header::COOKIE, format!("_csrf={}", s.secret))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(row_count(&state).await, 1);
    }

    #[tokio::test]
    async fn every_response_carries_a_fresh_token() {
        let (app, _, s) = setup().await;
        let (_, first, _) = send(&app, Method::GET, "/contacts", None, Some(&s), &[]).await;
        let (_, second, _) = send(&app, Method::GET, "/contacts/404", None, Some(&s), &[]).await;
        let a = set_cookie(&first, "XSRF-TOKEN").unwrap();
        let b = set_cookie(&second, "XSRF-TOKEN").unwrap();
        assert_ne!(a, b);
        // an existing secret is not re-issued
        assert!(set_cookie(&first, "_csrf").is_none());

        let cookie = first
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .find(|c| c.starts_with("XSRF-TOKEN="))
            .unwrap();
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(!cookie.contains("Secure"));
    }

    #[tokio::test]
    async fn foreign_origin_gets_no_cors_grant_but_request_runs() {
        let (app, state, s) = setup().await;
        let (status, headers, _) = send(
            &app,
            Method::POST,
            "/contacts",
            Some(ann()),
            Some(&s),
            &[("origin", "https://evil.example")],
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(!headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
        assert_eq!(row_count(&state).await, 1);

        let (_, headers, _) = send(
            &app,
            Method::GET,
            "/contacts",
            None,
            None,
            &[("origin", "https://evil.example")],
        )
        .await;
        assert!(!headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
        assert!(!headers.contains_key(header::ACCESS_CONTROL_ALLOW_CREDENTIALS));
        assert!(!headers.contains_key(header::ACCESS_CONTROL_EXPOSE_HEADERS));
    }

    #[tokio::test]
    async fn configured_origin_gets_credentialed_cors_grant() {
        let (app, _, _) = setup().await;
        let (_, headers, _) = send(
            &app,
            Method::GET,
            "/contacts",
            None,
            None,
            &[("origin", "https://app.example.com")],
        )
        .await;
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.example.com");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    #[tokio::test]
    async fn security_headers_are_set_on_errors_too() {
        let (app, _, _) = setup().await;
        let (status, headers, _) = send(&app, Method::POST, "/contacts", Some(ann()), None, &[]).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(headers[header::CACHE_CONTROL], "no-store");
        assert!(headers.contains_key(header::STRICT_TRANSPORT_SECURITY));
        assert!(headers.contains_key(header::CONTENT_SECURITY_POLICY));
        assert_eq!(headers["cross-origin-opener-policy"], "same-origin");

        let (status, headers, body) = send(&app, Method::GET, "/nope", None, None, &[]).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let (app, _, s) = setup().await;
        let req = Request::post("/contacts")
            .header(header::COOKIE, format!("_csrf={}", s.secret))
            .header("x-csrf-token", &s.token)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    async fn broken_store_response(environment: Environment) -> (StatusCode, Value) {
        let mut config = AppConfig::for_tests();
        config.environment = environment;
        let store = crate::db::memory_store().await;
        store.execute("DROP TABLE contacts", &[]).await.unwrap();
        let app = build_app(AppState::from_parts(store, Arc::new(config)));
        let (status, _, body) = send(&app, Method::GET, "/contacts", None, None, &[]).await;
        (status, body)
    }

    #[tokio::test]
    async fn storage_failures_are_generic_500s() {
        let (status, body) = broken_store_response(Environment::Production).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"success": false, "message": "Something went wrong!"}));
    }

    #[tokio::test]
    async fn development_mode_exposes_error_detail() {
        let (status, body) = broken_store_response(Environment::Development).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Something went wrong!");
        assert!(body["error"].as_str().unwrap().contains("contacts"));
    }

    #[tokio::test]
    async fn unrecognised_environment_hides_error_detail() {
        let (status, body) = broken_store_response(Environment::parse("staging")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"success": false, "message": "Something went wrong!"}));

        let (_, body) = broken_store_response(Environment::Unspecified).await;
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn preflight_carries_a_fresh_token() {
        let (app, _, _) = setup().await;
        let (status, headers, _) = send(
            &app,
            Method::OPTIONS,
            "/contacts",
            None,
            None,
            &[
                ("origin", "https://app.example.com"),
                ("access-control-request-method", "POST"),
                ("access-control-request-headers", "content-type,x-csrf-token"),
            ],
        )
        .await;
        assert!(status.is_success());
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.example.com");
        assert!(headers.contains_key(TOKEN_HEADER));
        assert!(set_cookie(&headers, "XSRF-TOKEN").is_some());
        assert!(set_cookie(&headers, "_csrf").is_some());
        assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
    }
}
