//! Lower level HTTP interface with automatic header handling.
//!
//! [`HttpClient`] and [`AsyncHttpClient`] send plain HTTP verbs against
//! the API. Both delegate URL normalization, the per-session correlation
//! id and CSRF token echoing to a shared [`HttpBase`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::schema::{normalize_url, Endpoint};
use crate::transport::{HttpRequest, HttpResponse, Method, RequestBody, Transport, DEFAULT_TIMEOUT};

#[cfg(feature = "async")]
use crate::transport::AsyncTransport;

/// Cookie the server uses to hand out its CSRF token
pub const CSRF_COOKIE: &str = "csrftoken";
/// Header the CSRF token is echoed back in
pub const CSRF_HEADER: &str = "X-CSRFToken";
/// Header carrying the client correlation id
pub const CID_HEADER: &str = "X-KEYSTONE-CID";

/// Optional parts of a request
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    pub headers: HashMap<String, String>,
    /// Falls back to the client's default when unset
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add query parameters
    pub fn query<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Send `value` as a JSON body
    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    /// Send `fields` as a form-encoded body
    pub fn form<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.body = RequestBody::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// State and helpers shared by the blocking and async HTTP clients
#[derive(Debug)]
pub struct HttpBase {
    base_url: String,
    cid: String,
    csrf_token: Mutex<Option<String>>,
    timeout: Duration,
}

impl HttpBase {
    /// Normalize the API URL and start a new client session id
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(HttpBase {
            base_url: normalize_url(base_url)?,
            cid: Uuid::new_v4().to_string(),
            csrf_token: Mutex::new(None),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Set the timeout used when a request does not specify one
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The normalized server URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The correlation id sent with every request of this session
    pub fn cid(&self) -> &str {
        &self.cid
    }

    /// The most recent CSRF token handed out by the server
    pub fn csrf_token(&self) -> Option<String> {
        self.csrf_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Application specific headers for the current session
    pub fn application_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(CID_HEADER.to_string(), self.cid.clone());
        if let Some(token) = self.csrf_token() {
            headers.insert(CSRF_HEADER.to_string(), token);
        }
        headers
    }

    /// Resolve an endpoint against the base URL. Absolute URLs are only
    /// normalized.
    pub fn resolve(&self, endpoint: &str) -> Result<String> {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            normalize_url(endpoint)
        } else {
            Endpoint::from(endpoint).join_url(&self.base_url)
        }
    }

    /// Build the request for `endpoint`. Caller supplied headers win over
    /// the application headers.
    pub fn prepare(&self, method: Method, endpoint: &str, options: RequestOptions) -> Result<HttpRequest> {
        let url = self.resolve(endpoint)?;
        Ok(HttpRequest::new(method, url)
            .with_headers(self.application_headers())
            .with_headers(options.headers)
            .with_query(options.query)
            .with_body(options.body)
            .with_timeout(options.timeout.unwrap_or(self.timeout)))
    }

    /// Record session state carried by a response
    pub fn observe(&self, response: &HttpResponse) {
        if let Some(token) = response.cookie(CSRF_COOKIE) {
            *self.csrf_token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        }
    }
}

/// Blocking HTTP client
#[derive(Clone)]
pub struct HttpClient<T> {
    base: Arc<HttpBase>,
    transport: T,
}

impl<T: Transport> HttpClient<T> {
    /// Create a client. Clients built from the same `base` share its
    /// correlation id and CSRF token.
    pub fn new(base: impl Into<Arc<HttpBase>>, transport: T) -> Self {
        HttpClient {
            base: base.into(),
            transport,
        }
    }

    pub fn base(&self) -> &Arc<HttpBase> {
        &self.base
    }

    pub fn base_url(&self) -> &str {
        self.base.base_url()
    }

    /// Send a request to an endpoint relative to the base URL.
    /// The response is returned whatever its status.
    pub fn send_request(&self, method: Method, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        let request = self.base.prepare(method, endpoint, options)?;
        let method = request.method.clone();
        let url = request.url.clone();

        let start = Instant::now();
        let response = self.transport.execute(request)?;
        self.base.observe(&response);

        debug!(
            cid = %self.base.cid(),
            baseurl = %self.base.base_url(),
            %method,
            endpoint,
            %url,
            status = response.status,
            elapsed = ?start.elapsed(),
            "request completed"
        );
        Ok(response)
    }

    pub fn http_get(&self, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.send_request(Method::GET, endpoint, options)
    }

    pub fn http_post(&self, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.send_request(Method::POST, endpoint, options)
    }

    pub fn http_put(&self, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.send_request(Method::PUT, endpoint, options)
    }

    pub fn http_patch(&self, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.send_request(Method::PATCH, endpoint, options)
    }

    pub fn http_delete(&self, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.send_request(Method::DELETE, endpoint, options)
    }
}

/// Async HTTP client
#[cfg(feature = "async")]
#[derive(Clone)]
pub struct AsyncHttpClient<T> {
    base: Arc<HttpBase>,
    transport: T,
}

#[cfg(feature = "async")]
impl<T: AsyncTransport> AsyncHttpClient<T> {
    /// Create a client. Clients built from the same `base` share its
    /// correlation id and CSRF token.
    pub fn new(base: impl Into<Arc<HttpBase>>, transport: T) -> Self {
        AsyncHttpClient {
            base: base.into(),
            transport,
        }
    }

    pub fn base(&self) -> &Arc<HttpBase> {
        &self.base
    }

    pub fn base_url(&self) -> &str {
        self.base.base_url()
    }

    pub async fn send_request(
        &self,
        method: Method,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        let request = self.base.prepare(method, endpoint, options)?;
        let method = request.method.clone();
        let url = request.url.clone();

        let start = Instant::now();
        let response = self.transport.execute(request).await?;
        self.base.observe(&response);

        debug!(
            cid = %self.base.cid(),
            baseurl = %self.base.base_url(),
            %method,
            endpoint,
            %url,
            status = response.status,
            elapsed = ?start.elapsed(),
            "request completed"
        );
        Ok(response)
    }

    pub async fn http_get(&self, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.send_request(Method::GET, endpoint, options).await
    }

    pub async fn http_post(&self, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.send_request(Method::POST, endpoint, options).await
    }

    pub async fn http_put(&self, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.send_request(Method::PUT, endpoint, options).await
    }

    pub async fn http_patch(&self, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.send_request(Method::PATCH, endpoint, options).await
    }

    pub async fn http_delete(&self, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.send_request(Method::DELETE, endpoint, options).await
    }
}
