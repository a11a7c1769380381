use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{convert::Infallible, sync::Arc};
use subtle::ConstantTimeEq;
use tracing::warn;

pub const TELEGRAM_SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";
const TRIGGER_KEY_HEADER: &str = "X-Trigger-Key";

#[derive(Clone)]
pub struct TriggerAuth {
    api_key: Option<Arc<str>>,
}

impl TriggerAuth {
    pub fn new(api_key: Option<&str>) -> Self {
        Self {
            api_key: api_key
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(Arc::from),
        }
    }
}

/// Guards the `/targets` API. Without a configured key every request is refused.
pub async fn require_trigger_key(
    State(auth): State<TriggerAuth>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(expected) = auth.api_key.as_deref() else {
        return Ok(unauthorized_response(
            "trigger_api_disabled",
            "TRIGGER_API_KEY is not configured",
        ));
    };
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(unauthorized_response(
            "missing_api_key",
            "Provide X-Trigger-Key or Bearer token",
        ));
    };
    if !secrets_match(expected, &presented) {
        warn!(target = "feeds.webhook", path = %request.uri().path(), "rejected trigger key");
        return Ok(unauthorized_response("invalid_api_key", "Key not recognized"));
    }
    Ok(next.run(request).await)
}

/// The webhook is closed unless a secret is configured and presented verbatim.
pub fn verify_telegram_secret(expected: Option<&str>, headers: &http::HeaderMap) -> bool {
    let Some(expected) = expected.filter(|secret| !secret.is_empty()) else {
        return false;
    };
    headers
        .get(TELEGRAM_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|presented| secrets_match(expected, presented))
}

pub fn secrets_match(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get(TRIGGER_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(ApiError::new(code, message))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, middleware, routing::get};
    use tower::ServiceExt;

    fn app(key: Option<&str>) -> Router {
        Router::new()
            .route("/targets", get(|| async { "ok" }))
            .route_layer(middleware::from_fn_with_state(
                TriggerAuth::new(key),
                require_trigger_key,
            ))
    }

    async fn status(app: Router, header: Option<(&str, &str)>) -> StatusCode {
        let mut request = Request::builder().uri("/targets");
        if let Some((name, value)) = header {
            request = request.header(name, value);
        }
        app.oneshot(request.body(Body::empty()).expect("request"))
            .await
            .expect("response")
            .status()
    }

    #[tokio::test]
    async fn accepts_bearer_and_header_keys() {
        assert_eq!(
            status(app(Some("k1")), Some(("Authorization", "Bearer k1"))).await,
            StatusCode::OK
        );
        assert_eq!(
            status(app(Some("k1")), Some(("X-Trigger-Key", "k1"))).await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn rejects_missing_wrong_or_unconfigured_key() {
        assert_eq!(status(app(Some("k1")), None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(
            status(app(Some("k1")), Some(("X-Trigger-Key", "k2"))).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(app(None), Some(("X-Trigger-Key", "anything"))).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn telegram_secret_requires_exact_match() {
        let mut headers = http::HeaderMap::new();
        assert!(!verify_telegram_secret(Some("s3"), &headers));
        headers.insert(TELEGRAM_SECRET_HEADER, "s3".parse().expect("header"));
        assert!(verify_telegram_secret(Some("s3"), &headers));
        assert!(!verify_telegram_secret(Some("s3x"), &headers));
        assert!(!verify_telegram_secret(None, &headers));
    }
}
