use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use rand::Rng;
use std::time::Instant;

pub const TRACE_HEADER: &str = "x-trace-id";

const TRACE_ID_LEN: usize = 16;

/// Longest body excerpt written to the log.
const BODY_EXCERPT_BYTES: usize = 200;

/// Largest request body buffered for logging.
const MAX_REQUEST_BODY: usize = 4 * 1024 * 1024;

/// Trace id of the current request, stored in request extensions.
#[derive(Clone)]
pub struct TraceId(pub String);

impl std::ops::Deref for TraceId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl TraceId {
    fn generate() -> Self {
        let bytes: [u8; TRACE_ID_LEN / 2] = rand::thread_rng().gen();
        Self(hex::encode(bytes))
    }

    /// Reuses the caller's id when it has our shape, so one id follows a
    /// request across services.
    fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(TRACE_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.len() == TRACE_ID_LEN && v.bytes().all(|b| b.is_ascii_hexdigit()))
            .map(|v| Self(v.to_ascii_lowercase()))
            .unwrap_or_else(Self::generate)
    }
}

/// How much of an exchange is written to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verbosity {
    /// Line, status and body excerpts at info.
    Full,
    /// Ingest payloads: no bodies, debug level unless the call failed.
    Bulk,
}

impl Verbosity {
    fn for_path(path: &str) -> Self {
        match path {
            "/v1/metrics" | "/v1/logs" => Self::Bulk,
            _ => Self::Full,
        }
    }
}

fn excerpt(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    let Ok(text) = std::str::from_utf8(bytes) else {
        return Some("<non-utf8 body>".to_string());
    };
    if text.len() <= BODY_EXCERPT_BYTES {
        return Some(text.to_string());
    }
    // Cutting inside a multi-byte char would panic; back up to a boundary.
    let mut end = BODY_EXCERPT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    Some(format!("{}...", &text[..end]))
}

fn human_elapsed(started: Instant) -> String {
    let micros = started.elapsed().as_micros();
    match micros {
        0..=999 => format!("{micros}µs"),
        1_000..=999_999 => format!("{}ms", micros / 1_000),
        _ => format!("{:.1}s", micros as f64 / 1_000_000.0),
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"))
}

/// One request as seen by the logging middleware.
struct Exchange {
    trace_id: TraceId,
    method: Method,
    url: String,
    user_agent: String,
    verbosity: Verbosity,
    started: Instant,
}

impl Exchange {
    fn begin(req: &Request) -> Self {
        let uri = req.uri();
        let url = match uri.query() {
            Some(q) if !q.is_empty() => format!("{}?{q}", uri.path()),
            _ => uri.path().to_string(),
        };
        Self {
            trace_id: TraceId::from_headers(req.headers()),
            method: req.method().clone(),
            url,
            user_agent: req
                .headers()
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_string(),
            verbosity: Verbosity::for_path(uri.path()),
            started: Instant::now(),
        }
    }

    fn wants_request_body(&self) -> bool {
        self.verbosity == Verbosity::Full
            && matches!(self.method, Method::POST | Method::PUT | Method::PATCH)
    }

    fn log_request(&self, body: Option<&str>) {
        let trace_id = &*self.trace_id;
        if self.verbosity == Verbosity::Bulk {
            tracing::debug!(trace_id, method = %self.method, path = %self.url, "--> request");
            return;
        }
        tracing::info!(
            trace_id,
            method = %self.method,
            path = %self.url,
            body = body.unwrap_or(""),
            ua = %self.user_agent,
            "--> request"
        );
    }

    fn log_response(&self, status: StatusCode, body: Option<&str>) {
        let trace_id = &*self.trace_id;
        let elapsed = human_elapsed(self.started);
        let status_code = status.as_u16();
        let body = body.unwrap_or("");
        if status.is_server_error() {
            tracing::error!(trace_id, status = status_code, %elapsed, body, "<-- response");
        } else if status.is_client_error() {
            tracing::warn!(trace_id, status = status_code, %elapsed, body, "<-- response");
        } else if self.verbosity == Verbosity::Bulk {
            tracing::debug!(trace_id, status = status_code, %elapsed, "<-- response");
        } else {
            tracing::info!(trace_id, status = status_code, %elapsed, body, "<-- response");
        }
    }
}

async fn buffer(body: Body, limit: usize) -> Bytes {
    // An oversized or broken body reaches the handler empty and fails there.
    axum::body::to_bytes(body, limit).await.unwrap_or_default()
}

/// Assigns a trace id and logs each request and its response.
pub async fn request_logging(req: Request, next: Next) -> Response {
    let exchange = Exchange::begin(&req);
    let (mut parts, body) = req.into_parts();
    parts.extensions.insert(exchange.trace_id.clone());

    let req = if exchange.wants_request_body() {
        let bytes = buffer(body, MAX_REQUEST_BODY).await;
        exchange.log_request(excerpt(&bytes).as_deref());
        Request::from_parts(parts, Body::from(bytes))
    } else {
        exchange.log_request(None);
        Request::from_parts(parts, body)
    };

    let (mut parts, body) = next.run(req).await.into_parts();
    let bytes = buffer(body, usize::MAX).await;
    let logged = (exchange.verbosity == Verbosity::Full || !parts.status.is_success())
        && is_json(&parts.headers);
    let snippet = if logged { excerpt(&bytes) } else { None };
    exchange.log_response(parts.status, snippet.as_deref());

    if let Ok(value) = HeaderValue::from_str(&exchange.trace_id) {
        parts.headers.insert(TRACE_HEADER, value);
    }
    Response::from_parts(parts, Body::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::{middleware, Extension, Router};
    use tower::util::ServiceExt;

    #[test]
    fn generated_ids_are_sixteen_hex_chars() {
        let id = TraceId::generate();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id.0, TraceId::generate().0);
    }

    #[test]
    fn caller_trace_id_is_kept_only_when_well_formed() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACE_HEADER, HeaderValue::from_static("00AABBCCDDEEFF11"));
        assert_eq!(TraceId::from_headers(&headers).0, "00aabbccddeeff11");

        headers.insert(TRACE_HEADER, HeaderValue::from_static("not-a-trace"));
        let id = TraceId::from_headers(&headers);
        assert_ne!(id.0, "not-a-trace");
        assert_eq!(id.len(), 16);
    }

    #[test]
    fn excerpt_stops_at_char_boundary() {
        assert_eq!(excerpt(b""), None);
        assert_eq!(excerpt(b"short").as_deref(), Some("short"));
        assert_eq!(excerpt(&[0xff, 0xfe]).as_deref(), Some("<non-utf8 body>"));

        // 'é' is two bytes and straddles the cut.
        let text = format!("{}é", "a".repeat(BODY_EXCERPT_BYTES - 1));
        let cut = excerpt(text.as_bytes()).unwrap();
        assert_eq!(cut, format!("{}...", "a".repeat(BODY_EXCERPT_BYTES - 1)));
    }

    #[test]
    fn ingest_paths_are_bulk() {
        assert_eq!(Verbosity::for_path("/v1/metrics"), Verbosity::Bulk);
        assert_eq!(Verbosity::for_path("/v1/logs"), Verbosity::Bulk);
        assert_eq!(Verbosity::for_path("/v1/rules"), Verbosity::Full);
    }

    #[tokio::test]
    async fn middleware_echoes_trace_id_to_handler_and_client() {
        let app = Router::new()
            .route(
                "/echo",
                get(|Extension(id): Extension<TraceId>| async move { id.0 }),
            )
            .layer(middleware::from_fn(request_logging));

        let req = axum::http::Request::builder()
            .uri("/echo")
            .header(TRACE_HEADER, "0123456789abcdef")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.headers()[TRACE_HEADER], "0123456789abcdef");
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"0123456789abcdef");
    }
}
