//! Transport abstraction shared by the blocking and async clients.
//!
//! Everything above this module builds plain [`HttpRequest`] values and
//! consumes plain [`HttpResponse`] values, so header handling, URL
//! normalization and the session logic exist once regardless of how the
//! bytes actually travel.

use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{KeystoneError, Result};

pub use reqwest::Method;

/// Seconds before a request times out unless told otherwise
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum length for response bodies carried in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Request payload
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

/// A fully resolved HTTP request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    /// Passed to the transport as-is
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        HttpRequest {
            method,
            url: url.into(),
            headers: HashMap::new(),
            query: Vec::new(),
            body: RequestBody::Empty,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A received HTTP response with its body fully read
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lower-case; repeated headers appear once per value
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Build a response with a JSON body
    pub fn json_body(status: u16, value: &Value) -> Self {
        HttpResponse::new(status, value.to_string())
            .with_header("content-type", "application/json")
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    /// Whether the status code is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Get the first value of a header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get the value of a cookie set by this response
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("set-cookie"))
            .filter_map(|(_, v)| v.split(';').next()?.split_once('='))
            .find(|(k, _)| k.trim() == name)
            .map(|(_, v)| v.trim())
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// The body as text, with invalid UTF-8 replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Turn a non-2xx response into [`KeystoneError::Http`]
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }

        let mut body = self.text();
        if body.len() > MAX_ERROR_BODY_LENGTH {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
            body.push_str("... (truncated)");
        }
        Err(KeystoneError::http(self.status, body))
    }
}

/// Sends a request and waits for the response
pub trait Transport {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Sends a request, suspending until the response arrives
#[cfg(feature = "async")]
pub trait AsyncTransport {
    fn execute(
        &self,
        request: HttpRequest,
    ) -> impl std::future::Future<Output = Result<HttpResponse>> + Send;
}

fn collect_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// Blocking transport backed by `reqwest::blocking`.
/// Clone is cheap; the underlying client is reference counted.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    /// Create a transport with pooled connections and the given connect timeout
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::ClientBuilder::new()
            .pool_max_idle_per_host(50)
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(ReqwestTransport { client })
    }

    /// Wrap an already configured client
    pub fn from_client(client: reqwest::blocking::Client) -> Self {
        ReqwestTransport { client }
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .timeout(request.timeout);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Form(fields) => builder.form(&fields),
        };

        let response = builder.send()?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response.bytes()?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Async transport backed by `reqwest::Client`
#[cfg(feature = "async")]
#[derive(Debug, Clone)]
pub struct AsyncReqwestTransport {
    client: reqwest::Client,
}

#[cfg(feature = "async")]
impl AsyncReqwestTransport {
    /// Create a transport with pooled connections and the given connect timeout
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .pool_max_idle_per_host(50)
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(AsyncReqwestTransport { client })
    }

    /// Wrap an already configured client
    pub fn from_client(client: reqwest::Client) -> Self {
        AsyncReqwestTransport { client }
    }
}

#[cfg(feature = "async")]
impl AsyncTransport for AsyncReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .timeout(request.timeout);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Form(fields) => builder.form(&fields),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_for_status() {
        let ok = HttpResponse::new(204, Vec::new());
        assert!(ok.error_for_status().is_ok());

        let err = HttpResponse::new(401, "bad credentials")
            .error_for_status()
            .unwrap_err();
        match err {
            KeystoneError::Http { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad credentials");
            }
            other => panic!("expected KeystoneError::Http, got {:?}", other),
        }
    }

    #[test]
    fn test_error_body_truncated() {
        let err = HttpResponse::new(500, "x".repeat(2000))
            .error_for_status()
            .unwrap_err();
        match err {
            KeystoneError::Http { body, .. } => {
                assert!(body.len() < 600);
                assert!(body.ends_with("(truncated)"));
            }
            other => panic!("expected KeystoneError::Http, got {:?}", other),
        }
    }

    #[test]
    fn test_cookie_lookup() {
        let response = HttpResponse::new(200, Vec::new())
            .with_header("Set-Cookie", "sessionid=abc; Path=/; HttpOnly")
            .with_header("Set-Cookie", "csrftoken=xyz123; Path=/; SameSite=Lax");

        assert_eq!(response.cookie("csrftoken"), Some("xyz123"));
        assert_eq!(response.cookie("sessionid"), Some("abc"));
        assert_eq!(response.cookie("missing"), None);
    }

    #[test]
    fn test_json_body() {
        let response = HttpResponse::json_body(200, &serde_json::json!({"refresh": "abc"}));
        let value: Value = response.json().unwrap();
        assert_eq!(value["refresh"], "abc");
        assert_eq!(response.header("Content-Type"), Some("application/json"));
    }
}
