//! HTTP surface: routing, client identification, CORS, and the translation of
//! gateway outcomes into responses.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use axum::routing::{get, post};

use crate::gateway::{ChatGateway, ChatOutcome, GatewayError};
use crate::types::ChatCompletion;

/// Upper bound on a `/chat` request body. Conversations are short text; a
/// larger body is noise or abuse.
const MAX_BODY_BYTES: usize = 1024 * 1024;

const ALLOWED_ORIGIN: &str = "*";
const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization";
const PREFLIGHT_MAX_AGE: &str = "86400";

pub fn router(gateway: Arc<ChatGateway>) -> Router {
    Router::new()
        .route("/chat", post(chat).options(preflight))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(axum::middleware::map_response(apply_cors))
        .with_state(gateway)
}

async fn apply_cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(ALLOWED_ORIGIN),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    response
}

async fn preflight() -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    response.headers_mut().insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(PREFLIGHT_MAX_AGE),
    );
    response
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics(State(gateway): State<Arc<ChatGateway>>) -> Response {
    Json(gateway.observability()).into_response()
}

/// Resolves the identity used for rate limiting: the first hop in
/// `x-forwarded-for` when a proxy supplied one, otherwise the peer address.
fn client_id(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .eq_ignore_ascii_case("application/json")
        })
        .unwrap_or(false)
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::Validation(err) => {
                error_body(StatusCode::BAD_REQUEST, &err.to_string())
            }
            GatewayError::RateLimited { retry_after_secs } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(serde_json::json!({
                        "error": "rate limit exceeded, please try again later",
                    })),
                )
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
            GatewayError::Provider(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "failed to get AI response",
                    "details": err.to_string(),
                })),
            )
                .into_response(),
        }
    }
}

async fn chat(
    State(gateway): State<Arc<ChatGateway>>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = request.into_parts();

    if !is_json_content_type(&parts.headers) {
        return error_body(
            StatusCode::BAD_REQUEST,
            "content-type must be application/json",
        );
    }

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(_) => {
            return error_body(StatusCode::BAD_REQUEST, "request body too large or unreadable");
        }
    };

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client = client_id(&parts.headers, peer);

    match gateway.handle(&body, &client).await {
        Ok(ChatOutcome::Cached(text)) => Json(ChatCompletion::new(text)).into_response(),
        Ok(ChatOutcome::Stream { key, chunks }) => {
            let mut response = Response::new(Body::from_stream(gateway.relay_stream(key, chunks)));
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/event-stream"),
            );
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
            response
        }
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_header_wins_over_the_peer_address() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        let peer: SocketAddr = "127.0.0.1:5000".parse().expect("addr");
        assert_eq!(client_id(&headers, Some(peer)), "203.0.113.9");
    }

    #[test]
    fn falls_back_to_peer_then_unknown() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "192.0.2.4:9999".parse().expect("addr");
        assert_eq!(client_id(&headers, Some(peer)), "192.0.2.4");
        assert_eq!(client_id(&headers, None), "unknown");
    }

    #[test]
    fn json_content_type_accepts_a_charset_parameter() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        assert!(is_json_content_type(&headers));

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain"),
        );
        assert!(!is_json_content_type(&headers));
    }
}
