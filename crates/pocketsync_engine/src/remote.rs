//! Remote service abstraction.
//!
//! The actual HTTP client is abstracted via [`RemoteService`], allowing
//! different implementations (reqwest, hyper, a platform networking stack)
//! and a scripted mock for tests. The engine only depends on HTTP-shaped
//! requests and responses.

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use pocketsync_core::Query;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Response header carrying the server-side request start time, used for
/// sync checkpointing so client clock skew never drifts checkpoints.
pub const REQUEST_START_HEADER: &str = "x-request-start";

/// HTTP method of a remote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET request.
    Get,
    /// POST request.
    Post,
    /// PUT request.
    Put,
    /// DELETE request.
    Delete,
}

impl HttpMethod {
    /// Returns the method string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<pocketsync_protocol::OperationMethod> for HttpMethod {
    fn from(method: pocketsync_protocol::OperationMethod) -> Self {
        match method {
            pocketsync_protocol::OperationMethod::Post => HttpMethod::Post,
            pocketsync_protocol::OperationMethod::Put => HttpMethod::Put,
            pocketsync_protocol::OperationMethod::Delete => HttpMethod::Delete,
        }
    }
}

/// An HTTP-shaped request to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// JSON body, if any.
    pub body: Option<Value>,
    /// Timeout the transport must honor.
    pub timeout: Duration,
}

impl RemoteRequest {
    /// Creates a request with no headers or body and a 30 second timeout.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Merges a set of headers, overwriting duplicates.
    #[must_use]
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// An HTTP-shaped response from the backend.
#[derive(Debug, Clone)]
pub struct RemoteResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// JSON body, if any.
    pub body: Option<Value>,
}

impl RemoteResponse {
    /// Creates a response with the given status and optional body.
    #[must_use]
    pub fn with_status(status: u16, body: Option<Value>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    /// Creates a response with the given status and JSON body.
    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        Self::with_status(status, Some(body))
    }

    /// Creates a 200 response with the given JSON body.
    #[must_use]
    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    /// Attaches the server request-start header.
    #[must_use]
    pub fn with_request_start(mut self, at: DateTime<Utc>) -> Self {
        self.headers.insert(
            REQUEST_START_HEADER.to_string(),
            at.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        self
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Parses the server request-start header, if present.
    pub fn request_start(&self) -> Option<DateTime<Utc>> {
        self.header(REQUEST_START_HEADER)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|parsed| parsed.with_timezone(&Utc))
    }

    /// Decodes the JSON body into the given type.
    pub fn decode<T: DeserializeOwned>(&self) -> EngineResult<T> {
        let body = self
            .body
            .as_ref()
            .ok_or_else(|| EngineError::invalid_response("response body is empty"))?;
        Ok(serde_json::from_value(body.clone())?)
    }
}

/// Executes HTTP-shaped requests against the backend.
///
/// Implementations must surface transport failures as
/// [`EngineError::Transport`] or [`EngineError::Timeout`]; non-2xx statuses
/// are returned as ordinary responses for the engine to decode.
pub trait RemoteService: Send + Sync {
    /// Executes a request and returns the response.
    fn execute(&self, request: &RemoteRequest) -> EngineResult<RemoteResponse>;
}

/// Builds backend URLs for collection endpoints.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base_url: String,
    app_key: String,
}

impl Endpoints {
    /// Creates an endpoint builder. A trailing slash on the base URL is
    /// tolerated.
    pub fn new(base_url: impl Into<String>, app_key: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            app_key: app_key.into(),
        }
    }

    /// URL of a collection.
    #[must_use]
    pub fn collection(&self, collection: &str) -> String {
        format!("{}/appdata/{}/{}", self.base_url, self.app_key, collection)
    }

    /// URL of a single entity.
    #[must_use]
    pub fn entity(&self, collection: &str, id: &str) -> String {
        format!("{}/{}", self.collection(collection), id)
    }

    /// URL of a collection filtered by a query.
    pub fn collection_query(&self, collection: &str, query: &Query) -> EngineResult<String> {
        let mut url = self.collection(collection);
        if let Some(predicate) = &query.predicate {
            let encoded = urlencoding::encode(&serde_json::to_string(predicate)?).into_owned();
            url.push_str("?query=");
            url.push_str(&encoded);
        }
        Ok(url)
    }

    /// URL of a collection's incremental delta-set endpoint.
    pub fn delta_set(
        &self,
        collection: &str,
        since: DateTime<Utc>,
        query: &Query,
    ) -> EngineResult<String> {
        let mut url = format!(
            "{}/_deltaset?since={}",
            self.collection(collection),
            urlencoding::encode(&since.to_rfc3339_opts(SecondsFormat::Millis, true))
        );
        if let Some(predicate) = &query.predicate {
            let encoded = urlencoding::encode(&serde_json::to_string(predicate)?).into_owned();
            url.push_str("&query=");
            url.push_str(&encoded);
        }
        Ok(url)
    }

    /// URL of a collection's count endpoint.
    pub fn count(&self, collection: &str, query: Option<&Query>) -> EngineResult<String> {
        let mut url = format!("{}/_count", self.collection(collection));
        if let Some(predicate) = query.and_then(|q| q.predicate.as_ref()) {
            let encoded = urlencoding::encode(&serde_json::to_string(predicate)?).into_owned();
            url.push_str("?query=");
            url.push_str(&encoded);
        }
        Ok(url)
    }
}

/// A scripted remote service for tests.
///
/// Responses are consumed in FIFO order, one per executed request; every
/// executed request is recorded for assertions.
#[derive(Default)]
pub struct MockRemote {
    responses: Mutex<VecDeque<EngineResult<RemoteResponse>>>,
    requests: Mutex<Vec<RemoteRequest>>,
}

impl MockRemote {
    /// Creates a mock with no scripted responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the next response.
    pub fn push_response(&self, response: RemoteResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Scripts the next call to fail with the given error.
    pub fn push_error(&self, error: EngineError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Returns the requests executed so far.
    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of requests executed so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl std::fmt::Debug for MockRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRemote")
            .field("scripted", &self.responses.lock().len())
            .field("executed", &self.requests.lock().len())
            .finish()
    }
}

impl RemoteService for MockRemote {
    fn execute(&self, request: &RemoteRequest) -> EngineResult<RemoteResponse> {
        self.requests.lock().push(request.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(EngineError::transport_fatal("no scripted response")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pocketsync_core::Predicate;
    use serde_json::json;

    #[test]
    fn endpoint_urls() {
        let endpoints = Endpoints::new("https://api.example.com/", "kid_123");
        assert_eq!(
            endpoints.collection("person"),
            "https://api.example.com/appdata/kid_123/person"
        );
        assert_eq!(
            endpoints.entity("person", "a"),
            "https://api.example.com/appdata/kid_123/person/a"
        );

        let url = endpoints.count("person", None).unwrap();
        assert_eq!(url, "https://api.example.com/appdata/kid_123/person/_count");
    }

    #[test]
    fn query_urls_carry_the_predicate() {
        let endpoints = Endpoints::new("https://api.example.com", "kid_123");
        let query = Query::filtered(Predicate::eq("name", "Victor"));

        let url = endpoints.collection_query("person", &query).unwrap();
        assert!(url.starts_with("https://api.example.com/appdata/kid_123/person?query="));
        assert!(url.contains("Victor"));

        let unfiltered = endpoints
            .collection_query("person", &Query::new())
            .unwrap();
        assert_eq!(
            unfiltered,
            "https://api.example.com/appdata/kid_123/person"
        );
    }

    #[test]
    fn delta_set_url_carries_since() {
        let endpoints = Endpoints::new("https://api.example.com", "kid_123");
        let since = Utc::now();
        let url = endpoints
            .delta_set("person", since, &Query::new())
            .unwrap();
        assert!(url.contains("/_deltaset?since="));
    }

    #[test]
    fn request_start_header_roundtrip() {
        let at = Utc::now();
        let response = RemoteResponse::ok(json!([])).with_request_start(at);
        let parsed = response.request_start().unwrap();
        assert!((parsed - at).num_milliseconds().abs() <= 1);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut response = RemoteResponse::ok(json!([]));
        response
            .headers
            .insert("X-Request-Start".to_string(), "value".to_string());
        assert_eq!(response.header("x-request-start"), Some("value"));
    }

    #[test]
    fn mock_remote_scripts_in_order() {
        let mock = MockRemote::new();
        mock.push_response(RemoteResponse::ok(json!({"n": 1})));
        mock.push_error(EngineError::Timeout);

        let request = RemoteRequest::new(HttpMethod::Get, "https://api.example.com/x");
        let first = mock.execute(&request).unwrap();
        assert_eq!(first.body, Some(json!({"n": 1})));

        assert!(matches!(mock.execute(&request), Err(EngineError::Timeout)));

        // Exhausted scripts surface as a transport failure.
        assert!(matches!(
            mock.execute(&request),
            Err(EngineError::Transport { .. })
        ));
        assert_eq!(mock.request_count(), 3);
    }

    #[test]
    fn decode_rejects_empty_body() {
        let response = RemoteResponse::with_status(204, None);
        let decoded: EngineResult<Vec<String>> = response.decode();
        assert!(matches!(decoded, Err(EngineError::InvalidResponse { .. })));
    }
}
