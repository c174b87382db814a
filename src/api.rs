//! Read-only JSON API over the persisted dataset.
//!
//! Handlers never reach upstream: they serve whatever the loops have
//! persisted, stale by at most one loop interval. Errors leave as
//! `{"error": "<code>"}` envelopes.

pub mod actions;
pub mod supernodes;
pub mod version;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Extension;
use axum::http::header;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::Method;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::DateTime;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use tokio_util::sync::CancellationToken;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

use crate::config::Settings;
use crate::scheduler::Runner;
use crate::store::Store;

pub struct ApiContext {
    pub store: Store,
    pub runner: Arc<Runner>,
    pub enable_sync_endpoint: bool,
}

pub fn router(ctx: Arc<ApiContext>, settings: &Settings) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/openapi.json", get(openapi))
        .route("/v1/actions", get(actions::list))
        .route("/v1/actions/stats", get(actions::stats))
        .route("/v1/actions/:id", get(actions::detail))
        .route("/v1/supernodes/metrics", get(supernodes::list_metrics))
        .route("/v1/supernodes/stats", get(supernodes::hardware_stats))
        .route("/v1/supernodes/unavailable", get(supernodes::unavailable))
        .route("/v1/supernodes/:id/metrics", get(supernodes::metrics))
        .route("/v1/supernodes/:id/paymentInfo", get(supernodes::payment_info))
        .route("/v1/version/matrix", get(version::matrix));

    // Off by default; the trigger reaches into the scheduler.
    if ctx.enable_sync_endpoint {
        router = router.route("/v1/supernodes/sync", post(supernodes::trigger_sync));
    }

    router
        .fallback(not_found)
        .layer(Extension(ctx))
        .layer(cors_layer(&settings.cors_allow_origins))
        .layer(TimeoutLayer::new(settings.request_timeout))
}

/// Binds and serves until the token is cancelled, then drains.
pub async fn serve(
    bind: SocketAddr,
    ctx: Arc<ApiContext>,
    settings: Settings,
    shutdown: CancellationToken,
) {
    let app = router(ctx, &settings);
    tracing::info!("api listening on {bind}");
    let server = axum::Server::bind(&bind)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await });
    if let Err(e) = server.await {
        tracing::error!("api server error: {e}");
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(parsed)
    }
}

async fn healthz() -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"),
        ],
        "ok",
    )
        .into_response()
}

async fn readyz() -> Response {
    (
        StatusCode::OK,
        [(header::CACHE_CONTROL, "no-store, no-cache, must-revalidate")],
        Json(serde_json::json!({"status": "ready"})),
    )
        .into_response()
}

async fn openapi() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        include_str!("api/openapi.json"),
    )
        .into_response()
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not_found")
}

pub(crate) fn error_response(status: StatusCode, code: &str) -> Response {
    (status, Json(serde_json::json!({ "error": code }))).into_response()
}

pub(crate) fn bad_request(message: &str) -> Response {
    error_response(StatusCode::BAD_REQUEST, message)
}

/// Serializes `value`, stamps a weak ETag and Last-Modified, and answers
/// `If-None-Match` with 304. The ETag covers the serialized body.
pub(crate) fn json_response<T: Serialize>(
    request_headers: &HeaderMap,
    value: &T,
    last_modified: DateTime<Utc>,
) -> Response {
    let body = match serde_json::to_vec(value) {
        Ok(body) => body,
        Err(_) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };
    let etag = weak_etag(&body);

    if let Some(if_none_match) = request_headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        if if_none_match == etag {
            return (
                StatusCode::NOT_MODIFIED,
                [(header::ETAG, etag)],
            )
                .into_response();
        }
    }

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/json".to_owned()),
            (header::ETAG, etag),
            (header::LAST_MODIFIED, http_date(last_modified)),
            (header::CACHE_CONTROL, "public, max-age=30".to_owned()),
        ],
        body,
    )
        .into_response()
}

fn weak_etag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    let mut hex = String::with_capacity(16);
    for byte in &digest[..8] {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("W/\"{hex}\"")
}

fn http_date(t: DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub(crate) fn encode_cursor<T: Serialize>(payload: &T) -> String {
    BASE64.encode(serde_json::to_vec(payload).unwrap_or_default())
}

pub(crate) fn decode_cursor<T: DeserializeOwned>(cursor: &str) -> Option<T> {
    let raw = BASE64.decode(cursor).ok()?;
    serde_json::from_slice(&raw).ok()
}

/// Clamped list limit shared by the list endpoints.
pub(crate) fn parse_limit(raw: Option<&String>, default: i64) -> Result<i64, ()> {
    match raw {
        None => Ok(default),
        Some(s) => {
            let parsed: i64 = s.parse().map_err(|_| ())?;
            Ok(parsed.clamp(1, 200))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[test]
    fn etag_is_stable_and_weak() {
        let a = weak_etag(b"{\"x\":1}");
        let b = weak_etag(b"{\"x\":1}");
        assert_eq!(a, b);
        assert!(a.starts_with("W/\""));
        assert_eq!(a.len(), 2 + 1 + 16 + 1);
        assert_ne!(weak_etag(b"{\"x\":2}"), a);
    }

    #[test]
    fn http_date_format() {
        let t = DateTime::parse_from_rfc3339("2024-06-01T10:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(http_date(t), "Sat, 01 Jun 2024 10:30:00 GMT");
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Payload {
        account: String,
    }

    #[test]
    fn cursor_roundtrip() {
        let payload = Payload {
            account: "lumera1abc".to_owned(),
        };
        let encoded = encode_cursor(&payload);
        assert_eq!(decode_cursor::<Payload>(&encoded), Some(payload));
    }

    #[test]
    fn cursor_rejects_garbage() {
        assert_eq!(decode_cursor::<Payload>("!!!"), None);
        let not_json = BASE64.encode(b"not json");
        assert_eq!(decode_cursor::<Payload>(&not_json), None);
    }

    #[test]
    fn limit_parsing() {
        assert_eq!(parse_limit(None, 50), Ok(50));
        assert_eq!(parse_limit(Some(&"10".to_owned()), 50), Ok(10));
        assert_eq!(parse_limit(Some(&"0".to_owned()), 50), Ok(1));
        assert_eq!(parse_limit(Some(&"9999".to_owned()), 50), Ok(200));
        assert_eq!(parse_limit(Some(&"abc".to_owned()), 50), Err(()));
    }
}
