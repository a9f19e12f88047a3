//! HTTP Contract Checker.
//!
//! Issues one request against the backend API with a bearer credential and a
//! fixed timeout, then decodes the body as JSON. Schema checks are left to
//! the assertion engine so UI and API verification share one vocabulary.

use crate::result::{EnsayoError, EnsayoResult, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default request timeout (30 seconds)
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;

/// Name under which the most recent exchange is always stored
pub const LAST_RESPONSE: &str = "last";

/// Response bodies quoted in errors are cut to this many characters
const BODY_EXCERPT_CHARS: usize = 512;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    #[serde(alias = "get")]
    Get,
    /// POST
    #[serde(alias = "post")]
    Post,
    /// PUT
    #[serde(alias = "put")]
    Put,
    /// PATCH
    #[serde(alias = "patch")]
    Patch,
    /// DELETE
    #[serde(alias = "delete")]
    Delete,
}

impl HttpMethod {
    /// Method name in upper case
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Self::GET,
            HttpMethod::Post => Self::POST,
            HttpMethod::Put => Self::PUT,
            HttpMethod::Patch => Self::PATCH,
            HttpMethod::Delete => Self::DELETE,
        }
    }
}

/// One request against the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    /// Method
    pub method: HttpMethod,
    /// Path relative to the API base URL, or an absolute URL
    pub path: String,
    /// Query parameters; non-string values are sent as their JSON text
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, Value>,
    /// JSON body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl HttpRequest {
    /// Create a request without query or body
    #[must_use]
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: BTreeMap::new(),
            body: None,
        }
    }

    /// Add a query parameter
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: Value) -> Self {
        self.query.insert(name.into(), value);
        self
    }

    /// Set the JSON body
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    fn query_pairs(&self) -> Vec<(String, String)> {
        self.query
            .iter()
            .map(|(k, v)| {
                let text = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), text)
            })
            .collect()
    }
}

/// A completed request/response pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpExchange {
    /// Method used
    pub method: HttpMethod,
    /// Full request URL
    pub url: String,
    /// Response status code
    pub status: u16,
    /// Decoded body (`null` when empty)
    pub body: Value,
    /// Round-trip time
    pub elapsed_ms: u64,
}

impl HttpExchange {
    /// Whether the status is 2xx
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Require `exchange.status` to be in `expected` (any 2xx when empty)
pub fn check_status(exchange: &HttpExchange, expected: &[u16]) -> EnsayoResult<()> {
    let ok = if expected.is_empty() {
        exchange.is_success()
    } else {
        expected.contains(&exchange.status)
    };
    if ok {
        return Ok(());
    }
    Err(EnsayoError::HttpStatus {
        code: exchange.status,
        body: excerpt(&match &exchange.body {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
    })
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= BODY_EXCERPT_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(BODY_EXCERPT_CHARS).collect();
    format!("{cut}...")
}

/// HTTP client for contract checks
#[derive(Debug, Clone)]
pub struct ContractClient {
    base_url: String,
    token: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl ContractClient {
    /// Create a client for `base_url` with a fixed request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> EnsayoResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EnsayoError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            timeout,
            client,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the request timeout.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether a bearer token is configured
    pub const fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Absolute URL for a request path
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send one request and decode the response
    pub async fn send(&self, request: &HttpRequest) -> EnsayoResult<HttpExchange> {
        let url = self.url_for(&request.path);
        let mut builder = self.client.request(request.method.into(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query_pairs());
        }
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let start = Instant::now();
        let resp = builder.send().await.map_err(|e| self.transport_error(&e))?;
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|e| self.transport_error(&e))?;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let body = decode_body(&bytes, status.is_success())?;
        debug!(method = %request.method, url = %url, status = status.as_u16(), elapsed_ms, "http exchange");

        Ok(HttpExchange {
            method: request.method,
            url,
            status: status.as_u16(),
            body,
            elapsed_ms,
        })
    }

    fn transport_error(&self, e: &reqwest::Error) -> EnsayoError {
        if e.is_timeout() {
            TransportError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            let mut message = e.to_string();
            if let Some(source) = std::error::Error::source(e) {
                message = format!("{message}: {source}");
            }
            TransportError::ConnectionFailed { message }
        }
        .into()
    }
}

/// Decode a response body. Non-JSON bodies of error responses are kept as
/// text so the status check reports them; on success they are a decode error.
fn decode_body(bytes: &[u8], success: bool) -> EnsayoResult<Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    match serde_json::from_slice(bytes) {
        Ok(value) => Ok(value),
        Err(_) if !success => Ok(Value::String(String::from_utf8_lossy(bytes).into_owned())),
        Err(e) => Err(EnsayoError::decode(format!(
            "{e}; body: {}",
            excerpt(&String::from_utf8_lossy(bytes))
        ))),
    }
}

/// Exchanges of one scenario run, by `save_as` name
#[derive(Debug, Clone, Default)]
pub struct ResponseStore {
    named: HashMap<String, HttpExchange>,
}

impl ResponseStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an exchange as `last` and, when given, under `save_as`
    pub fn insert(&mut self, save_as: Option<&str>, exchange: HttpExchange) {
        if let Some(name) = save_as {
            self.named.insert(name.to_string(), exchange.clone());
        }
        self.named.insert(LAST_RESPONSE.to_string(), exchange);
    }

    /// Exchange by name (`None` means the most recent one)
    #[must_use]
    pub fn get(&self, name: Option<&str>) -> Option<&HttpExchange> {
        self.named.get(name.unwrap_or(LAST_RESPONSE))
    }

    /// Whether no exchange has been stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.named.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    async fn serve() -> String {
        let app = Router::new()
            .route(
                "/echo",
                get(|headers: HeaderMap, Query(q): Query<BTreeMap<String, String>>| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    Json(json!({"auth": auth, "query": q}))
                })
                .put(|Json(body): Json<Value>| async move { Json(body) }),
            )
            .route("/tasks/{id}", get(|Path(id): Path<u32>| async move { Json(json!({"id": id})) }))
            .route("/empty", get(|| async { StatusCode::NO_CONTENT }))
            .route("/html", get(|| async { "<html>oops</html>" }))
            .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "no such task") }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Json(json!({}))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base: &str) -> ContractClient {
        ContractClient::new(base, Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS)).unwrap()
    }

    mod request_tests {
        use super::*;

        #[test]
        fn test_method_yaml_forms() {
            let m: HttpMethod = serde_yaml_ng::from_str("PUT").unwrap();
            assert_eq!(m, HttpMethod::Put);
            let m: HttpMethod = serde_yaml_ng::from_str("delete").unwrap();
            assert_eq!(m, HttpMethod::Delete);
            assert_eq!(HttpMethod::Patch.to_string(), "PATCH");
        }

        #[test]
        fn test_url_for() {
            let c = client("http://api.local/");
            assert_eq!(c.url_for("/tasks"), "http://api.local/tasks");
            assert_eq!(c.url_for("tasks/1"), "http://api.local/tasks/1");
            assert_eq!(c.url_for("https://other/x"), "https://other/x");
        }

        #[test]
        fn test_query_values_stringified() {
            let req = HttpRequest::new(HttpMethod::Get, "/tracker_app_data")
                .with_query("phase_id", json!(2))
                .with_query("is_milestone", json!(true))
                .with_query("name", json!("x"));
            let pairs = req.query_pairs();
            assert!(pairs.contains(&("phase_id".into(), "2".into())));
            assert!(pairs.contains(&("is_milestone".into(), "true".into())));
            assert!(pairs.contains(&("name".into(), "x".into())));
        }

        #[test]
        fn test_check_status() {
            let mut ex = HttpExchange {
                method: HttpMethod::Get,
                url: "http://x".into(),
                status: 204,
                body: Value::Null,
                elapsed_ms: 1,
            };
            assert!(check_status(&ex, &[]).is_ok());
            assert!(check_status(&ex, &[200]).is_err());
            ex.status = 201;
            assert!(check_status(&ex, &[200, 201]).is_ok());
            ex.status = 500;
            ex.body = Value::String("boom".into());
            match check_status(&ex, &[]) {
                Err(EnsayoError::HttpStatus { code, body }) => {
                    assert_eq!(code, 500);
                    assert_eq!(body, "boom");
                }
                other => panic!("unexpected: {other:?}"),
            }
        }

        #[test]
        fn test_invalid_utf8_success_body_is_decode_error() {
            let err = decode_body(b"{\"a\":\"\xff\"}", true).unwrap_err();
            assert!(matches!(err, EnsayoError::Decode { .. }), "{err}");
            assert!(err.to_string().contains('\u{FFFD}'), "{err}");
        }

        #[test]
        fn test_invalid_utf8_error_body_kept_as_text() {
            let body = decode_body(b"bad \xff gateway", false).unwrap();
            assert_eq!(body, json!("bad \u{FFFD} gateway"));
        }

        #[test]
        fn test_whitespace_body_is_null() {
            assert_eq!(decode_body(b" \n", true).unwrap(), Value::Null);
        }

        #[test]
        fn test_excerpt_truncates() {
            let long = "x".repeat(BODY_EXCERPT_CHARS + 10);
            assert!(excerpt(&long).ends_with("..."));
            assert_eq!(excerpt("short"), "short");
        }

        #[test]
        fn test_response_store_last() {
            let ex = |status| HttpExchange {
                method: HttpMethod::Get,
                url: "http://x".into(),
                status,
                body: Value::Null,
                elapsed_ms: 0,
            };
            let mut store = ResponseStore::new();
            assert!(store.is_empty());
            store.insert(Some("created"), ex(201));
            store.insert(None, ex(200));
            assert_eq!(store.get(Some("created")).unwrap().status, 201);
            assert_eq!(store.get(None).unwrap().status, 200);
            assert!(store.get(Some("other")).is_none());
        }
    }

    mod exchange_tests {
        use super::*;

        #[tokio::test]
        async fn test_bearer_and_query_sent() {
            let base = serve().await;
            let ex = client(&base)
                .with_token("secret")
                .send(&HttpRequest::new(HttpMethod::Get, "/echo").with_query("phase_id", json!(3)))
                .await
                .unwrap();
            assert_eq!(ex.status, 200);
            assert_eq!(ex.body["auth"], "Bearer secret");
            assert_eq!(ex.body["query"]["phase_id"], "3");
        }

        #[tokio::test]
        async fn test_json_body_round_trip() {
            let base = serve().await;
            let ex = client(&base)
                .send(&HttpRequest::new(HttpMethod::Put, "/echo").with_body(json!({"status": "DONE"})))
                .await
                .unwrap();
            assert_eq!(ex.body, json!({"status": "DONE"}));
        }

        #[tokio::test]
        async fn test_path_parameter() {
            let base = serve().await;
            let ex = client(&base)
                .send(&HttpRequest::new(HttpMethod::Get, "/tasks/7"))
                .await
                .unwrap();
            assert_eq!(ex.body["id"], 7);
        }

        #[tokio::test]
        async fn test_empty_body_is_null() {
            let base = serve().await;
            let ex = client(&base)
                .send(&HttpRequest::new(HttpMethod::Get, "/empty"))
                .await
                .unwrap();
            assert_eq!(ex.status, 204);
            assert_eq!(ex.body, Value::Null);
        }

        #[tokio::test]
        async fn test_invalid_json_is_decode_error() {
            let base = serve().await;
            let err = client(&base)
                .send(&HttpRequest::new(HttpMethod::Get, "/html"))
                .await
                .unwrap_err();
            assert_eq!(err.category(), "decode");
        }

        #[tokio::test]
        async fn test_error_status_keeps_text_body() {
            let base = serve().await;
            let ex = client(&base)
                .send(&HttpRequest::new(HttpMethod::Get, "/missing"))
                .await
                .unwrap();
            assert_eq!(ex.status, 404);
            assert!(matches!(
                check_status(&ex, &[]),
                Err(EnsayoError::HttpStatus { code: 404, .. })
            ));
        }

        #[tokio::test]
        async fn test_timeout_is_transport_error() {
            let base = serve().await;
            let c = ContractClient::new(base, Duration::from_millis(50)).unwrap();
            let err = c
                .send(&HttpRequest::new(HttpMethod::Get, "/slow"))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                EnsayoError::Transport(TransportError::Timeout { timeout_ms: 50 })
            ));
        }

        #[tokio::test]
        async fn test_connection_refused() {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            drop(listener);
            let err = client(&format!("http://{addr}"))
                .send(&HttpRequest::new(HttpMethod::Get, "/tasks"))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                EnsayoError::Transport(TransportError::ConnectionFailed { .. })
            ));
        }
    }
}
