//! HTTP surface: route table, shared state and middleware.

mod ai;
mod docs;
mod frida;
mod redis;

use crate::ai::Dispatcher;
use crate::config::RedisConfig;
use crate::employee::EmployeeDirectory;
use crate::error::{Error, Result};
use crate::store::{FridaStore, JsonStore};
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

const CORS_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
const CORS_MAX_AGE: &str = "600";

/// Paths reachable without a bearer token.
const PUBLIC_PATHS: &[&str] = &["/", "/health", "/health/ready", "/docs", "/redoc", "/openapi.json"];

#[derive(Clone)]
pub struct AppState {
    pub json_store: Arc<dyn JsonStore>,
    pub frida_store: Arc<dyn FridaStore>,
    pub employees: Arc<EmployeeDirectory>,
    pub dispatcher: Arc<Dispatcher>,
    pub redis: Arc<RedisConfig>,
    pub export_dir: PathBuf,
    pub api_token: Option<String>,
}

/// Error response rendered as `{"detail": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: Value,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<Value>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<Value>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound(msg) => Self::new(StatusCode::NOT_FOUND, msg),
            other => Self::internal(other.to_string()),
        }
    }
}

macro_rules! unprocessable_from {
    ($($rejection:ty),+) => {$(
        impl From<$rejection> for ApiError {
            fn from(r: $rejection) -> Self {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, r.body_text())
            }
        }
    )+};
}

unprocessable_from!(JsonRejection, PathRejection, QueryRejection);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// `Json` body whose rejection renders as a `{"detail": ...}` 422.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub(crate) struct JsonBody<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub(crate) struct QueryParams<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub(crate) struct PathParam<T>(pub T);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        .route("/docs", get(docs::swagger_ui))
        .route("/redoc", get(docs::redoc))
        .route("/openapi.json", get(docs::openapi))
        .route("/all_users_from_redis", get(redis::all_users))
        .route("/redis_addresses", get(redis::addresses))
        .route("/redis_address_by_id", get(redis::address_by_id))
        .route("/redis_tariffs", get(redis::tariffs))
        .route("/v1/auth", post(frida::auth))
        .route("/v1/admins", get(frida::admins))
        .route("/v1/users/{user_id}/admin", get(frida::is_admin))
        .route("/v1/log", post(frida::log))
        .route("/v1/history/{user_id}", get(frida::history))
        .route("/v1/topics", post(frida::add_topic))
        .route("/v1/topics/count", get(frida::topic_count))
        .route("/v1/topics/lookup", post(frida::lookup_topics))
        .route("/v1/topics/delete", post(frida::delete_topics))
        .route("/v1/ai", post(ai::answer))
        .layer(middleware::from_fn_with_state(state.clone(), require_token))
        .layer(middleware::from_fn(log_requests))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Core API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn cors(req: Request, next: Next) -> Response {
    let requested_headers = req
        .headers()
        .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned();

    let mut resp = if *req.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(req).await
    };

    let headers = resp.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(CORS_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        requested_headers.unwrap_or_else(|| HeaderValue::from_static("*")),
    );
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(CORS_MAX_AGE));
    resp
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let started = Instant::now();

    let resp = next.run(req).await;

    let status = resp.status().as_u16();
    let latency_ms = started.elapsed().as_millis() as u64;
    if resp.status().is_server_error() {
        warn!(%method, path = %path, status, latency_ms, "request failed");
    } else {
        info!(%method, path = %path, status, latency_ms, "request");
    }
    resp
}

/// Token of an `Authorization: Bearer <token>` header; the scheme is
/// case-insensitive.
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim_start())
        .filter(|t| !t.is_empty())
}

async fn require_token(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.api_token.as_deref() else {
        return next.run(req).await;
    };
    if PUBLIC_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token);
    if presented == Some(expected) {
        return next.run(req).await;
    }

    debug!(path = req.uri().path(), "rejected request without valid token");
    ApiError::new(StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}

async fn root() -> Json<Value> {
    debug!("root endpoint accessed");
    Json(json!({
        "message": "Core API is running",
        "version": env!("CARGO_PKG_VERSION"),
        "services": {"redis": "/redis", "telegram": "/telegram", "ai": "/ai"},
        "docs": "/docs",
    }))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy", "message": "API is working normally"}))
}

fn backend_status(result: &Result<()>) -> Value {
    match result {
        Ok(()) => json!("ok"),
        Err(e) => json!(e.to_string()),
    }
}

async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let (redis, postgres) = tokio::join!(state.json_store.ping(), state.frida_store.ping());
    let ok = redis.is_ok() && postgres.is_ok();
    if !ok {
        warn!(redis = ?redis.as_ref().err(), postgres = ?postgres.as_ref().err(), "not ready");
    }
    let (status, label) = if ok {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    (
        status,
        Json(json!({
            "status": label,
            "redis": backend_status(&redis),
            "postgres": backend_status(&postgres),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn not_found_keeps_its_message() {
        let resp = ApiError::from(Error::not_found("Address not found")).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn other_errors_are_internal() {
        let err = ApiError::from(Error::Redis("down".into()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.detail, json!("Redis error: down"));
    }

    #[test]
    fn bearer_scheme_ignores_case() {
        assert_eq!(bearer_token("Bearer s3cret"), Some("s3cret"));
        assert_eq!(bearer_token("bearer s3cret"), Some("s3cret"));
        assert_eq!(bearer_token("BEARER   s3cret "), Some("s3cret"));
        assert_eq!(bearer_token("Basic s3cret"), None);
        assert_eq!(bearer_token("Bearer"), None);
        assert_eq!(bearer_token("Bearer  "), None);
    }
}
