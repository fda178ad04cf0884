use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info_span, Instrument};
use uuid::Uuid;

/// HTTP header name for trace ID
pub const TRACE_ID_HEADER: &str = "X-Trace-Id";

/// Longest caller-supplied trace ID that is accepted as-is
const MAX_TRACE_ID_LEN: usize = 128;

tokio::task_local! {
    static CURRENT_TRACE_ID: String;
}

/// Trace ID of the command being handled on the current task, if any
pub fn current_trace_id() -> Option<String> {
    CURRENT_TRACE_ID.try_with(Clone::clone).ok()
}

/// Middleware that tags each command with a trace ID.
///
/// A caller-supplied `X-Trace-Id` is reused so the presentation layer can
/// correlate its own logs; otherwise a UUID v4 is generated. The ID is stored
/// in request extensions, attached to the request span, scoped to the task for
/// error bodies (see `current_trace_id`) and echoed back in the response headers.
pub async fn trace_id_middleware(mut request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty() && value.len() <= MAX_TRACE_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = info_span!(
        "command",
        trace_id = %trace_id,
        method = %request.method(),
        uri = %request.uri(),
    );

    request.extensions_mut().insert(TraceId(trace_id.clone()));

    let started = Instant::now();
    let handled = async move {
        let response = next.run(request).await;
        tracing::info!(
            status = %response.status(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Command completed"
        );
        response
    }
    .instrument(span);
    let mut response = CURRENT_TRACE_ID.scope(trace_id.clone(), handled).await;

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

/// Extension type for storing trace ID in request extensions
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        middleware,
        response::IntoResponse,
        routing::get,
        Router,
    };
    use crate::core::error::KaguraError;
    use tower::util::ServiceExt;

    async fn echo_trace_id(request: Request<Body>) -> impl IntoResponse {
        let trace_id = request
            .extensions()
            .get::<TraceId>()
            .map(|t| t.as_str().to_string())
            .unwrap_or_else(|| "no-trace-id".to_string());

        (StatusCode::OK, trace_id)
    }

    async fn fail() -> Result<String, KaguraError> {
        Err(KaguraError::ExtensionNotFound("missing".into()))
    }

    fn app() -> Router {
        Router::new()
            .route("/test", get(echo_trace_id))
            .route("/fail", get(fail))
            .layer(middleware::from_fn(trace_id_middleware))
    }

    fn header(response: &Response) -> String {
        response
            .headers()
            .get(TRACE_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_generates_id_visible_to_handler() {
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();
        let response = app().oneshot(request).await.unwrap();

        let header_trace_id = header(&response);
        assert!(Uuid::parse_str(&header_trace_id).is_ok());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(String::from_utf8(body.to_vec()).unwrap(), header_trace_id);
    }

    #[tokio::test]
    async fn test_reuses_caller_trace_id() {
        let request = Request::builder()
            .uri("/test")
            .header(TRACE_ID_HEADER, "ui-42")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();

        assert_eq!(header(&response), "ui-42");
    }

    #[tokio::test]
    async fn test_rejects_oversized_caller_trace_id() {
        let request = Request::builder()
            .uri("/test")
            .header(TRACE_ID_HEADER, "x".repeat(MAX_TRACE_ID_LEN + 1))
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();

        assert!(Uuid::parse_str(&header(&response)).is_ok());
    }

    #[tokio::test]
    async fn test_trace_id_unique_per_request() {
        let first = app()
            .oneshot(Request::builder().uri("/test").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let second = app()
            .oneshot(Request::builder().uri("/test").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_ne!(header(&first), header(&second));
    }

    #[tokio::test]
    async fn test_error_body_carries_the_header_trace_id() {
        for supplied in [Some("ui-7"), None] {
            let mut request = Request::builder().uri("/fail");
            if let Some(trace_id) = supplied {
                request = request.header(TRACE_ID_HEADER, trace_id);
            }
            let response = app().oneshot(request.body(Body::empty()).unwrap()).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);

            let header_trace_id = header(&response);
            if let Some(trace_id) = supplied {
                assert_eq!(header_trace_id, trace_id);
            }

            let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(body["traceId"], header_trace_id);
        }
    }

    #[test]
    fn test_no_trace_id_outside_a_command() {
        assert_eq!(current_trace_id(), None);
    }
}
