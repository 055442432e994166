use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::auth::AuthenticationManager;
use crate::error::{KeystoneError, Result};
use crate::http::{HttpBase, HttpClient, RequestOptions};
use crate::schema::{Resource, Schema};
use crate::session::{Clock, SessionState};
use crate::transport::{HttpResponse, Method, ReqwestTransport, Transport, DEFAULT_TIMEOUT};

#[cfg(feature = "async")]
use crate::auth::AsyncAuthenticationManager;
#[cfg(feature = "async")]
use crate::http::AsyncHttpClient;
#[cfg(feature = "async")]
use crate::transport::{AsyncReqwestTransport, AsyncTransport};

/// Environment variable holding the API base URL
pub const ENV_URL: &str = "KEYSTONE_URL";
/// Environment variable holding the request timeout in seconds
pub const ENV_TIMEOUT: &str = "KEYSTONE_TIMEOUT";

/// Configuration for a Keystone API client
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of a running Keystone API server
    pub base_url: String,
    /// Timeout passed along with every request
    pub timeout: Duration,
    /// Timeout for establishing connections
    pub connect_timeout: Duration,
    /// Endpoint paths
    pub schema: Schema,
}

impl Config {
    /// Create a new configuration for the given server
    pub fn new(base_url: impl Into<String>) -> Self {
        Config {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
            schema: Schema::default(),
        }
    }

    /// Build a configuration from `KEYSTONE_URL` and, optionally,
    /// `KEYSTONE_TIMEOUT` (whole seconds)
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var(ENV_URL)
            .map_err(|_| KeystoneError::Config(format!("{} is not set", ENV_URL)))?;
        let mut config = Config::new(base_url);

        if let Ok(raw) = std::env::var(ENV_TIMEOUT) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                KeystoneError::Config(format!("{} must be a number of seconds, got {:?}", ENV_TIMEOUT, raw))
            })?;
            config.timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }
}

fn serialize_body<P: Serialize>(data: &P) -> Result<RequestOptions> {
    Ok(RequestOptions::new().json(serde_json::to_value(data)?))
}

fn decode_record<T: DeserializeOwned>(response: HttpResponse) -> Result<T> {
    response.error_for_status()?.json()
}

/// Like [`decode_record`], but a 404 means "no data" rather than an error
fn decode_optional<T: DeserializeOwned>(response: HttpResponse) -> Result<Option<T>> {
    match response.error_for_status() {
        Ok(response) => response.json().map(Some),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

fn record_path(pk: Option<u64>) -> Vec<String> {
    pk.map(|pk| vec![pk.to_string()]).unwrap_or_default()
}

fn filter_options(filters: &[(&str, &str)]) -> RequestOptions {
    RequestOptions::new().query(filters.iter().copied())
}

/// Client for the Keystone API.
///
/// Wraps an [`HttpClient`] and an [`AuthenticationManager`] and adds
/// CRUD operations over the [`Resource`] table. Every request carries
/// authentication headers while a session exists, refreshing it first
/// when the access token has expired.
pub struct KeystoneClient<T: Transport = ReqwestTransport> {
    config: Config,
    http: HttpClient<T>,
    auth: AuthenticationManager<T>,
    api_version: Option<String>,
}

impl KeystoneClient<ReqwestTransport> {
    /// Create a client backed by a blocking reqwest transport
    pub fn new(config: Config) -> Result<Self> {
        let transport = ReqwestTransport::new(config.connect_timeout)?;
        Self::with_transport(config, transport)
    }
}

impl<T: Transport + Clone> KeystoneClient<T> {
    /// Create a client sending its requests through `transport`
    pub fn with_transport(config: Config, transport: T) -> Result<Self> {
        let base = HttpBase::new(&config.base_url)?.with_timeout(config.timeout);
        let http = HttpClient::new(base, transport);
        let auth = AuthenticationManager::new(http.clone(), &config.schema.auth)?;

        Ok(KeystoneClient {
            config,
            http,
            auth,
            api_version: None,
        })
    }

    /// Replace the clock used for token expiry checks
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.auth = self.auth.with_clock(clock);
        self
    }

    /// The normalized server URL
    pub fn url(&self) -> &str {
        self.http.base_url()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn http(&self) -> &HttpClient<T> {
        &self.http
    }

    pub fn auth(&self) -> &AuthenticationManager<T> {
        &self.auth
    }

    pub fn auth_mut(&mut self) -> &mut AuthenticationManager<T> {
        &mut self.auth
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        self.auth.login(username, password)
    }

    pub fn logout(&mut self) -> Result<()> {
        self.auth.logout()
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    pub fn state(&self) -> SessionState {
        self.auth.state()
    }

    /// Authentication headers, or none at all for an anonymous client
    fn request_headers(&mut self) -> Result<HashMap<String, String>> {
        if self.auth.tokens().is_none() {
            return Ok(HashMap::new());
        }
        self.auth.get_auth_headers()
    }

    fn send(&mut self, method: Method, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        let headers = self.request_headers()?;
        self.http.send_request(method, endpoint, options.headers(headers))
    }

    /// Authenticated GET. The response is returned whatever its status.
    pub fn http_get(&mut self, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.send(Method::GET, endpoint, options)
    }

    pub fn http_post(&mut self, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.send(Method::POST, endpoint, options)
    }

    pub fn http_put(&mut self, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.send(Method::PUT, endpoint, options)
    }

    pub fn http_patch(&mut self, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.send(Method::PATCH, endpoint, options)
    }

    pub fn http_delete(&mut self, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.send(Method::DELETE, endpoint, options)
    }

    fn record_url(&self, resource: Resource, pk: Option<u64>) -> Result<String> {
        let segments = record_path(pk);
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        resource.endpoint().join_url_with(self.url(), &segments)
    }

    /// The version of the API server. Fetched once and cached.
    pub fn api_version(&mut self) -> Result<String> {
        if let Some(version) = &self.api_version {
            return Ok(version.clone());
        }

        let endpoint = self.config.schema.version.to_string();
        let response = self
            .send(Method::GET, &endpoint, RequestOptions::new())?
            .error_for_status()?;
        let version = response.text();
        self.api_version = Some(version.clone());
        Ok(version)
    }

    /// Create a new record
    pub fn create<R, P>(&mut self, resource: Resource, data: &P) -> Result<R>
    where
        R: DeserializeOwned,
        P: Serialize,
    {
        debug!(resource = resource.name(), "creating record");
        let url = self.record_url(resource, None)?;
        let response = self.send(Method::POST, &url, serialize_body(data)?)?;
        decode_record(response)
    }

    /// Retrieve a single record by primary key, or a filtered list of
    /// records when `pk` is `None`. Returns `None` when the API has no data
    /// for the query.
    pub fn retrieve<R>(&mut self, resource: Resource, pk: Option<u64>, filters: &[(&str, &str)]) -> Result<Option<R>>
    where
        R: DeserializeOwned,
    {
        debug!(resource = resource.name(), ?pk, "retrieving records");
        let url = self.record_url(resource, pk)?;
        let response = self.send(Method::GET, &url, filter_options(filters))?;
        decode_optional(response)
    }

    /// Apply a partial update to a record
    pub fn update<R, P>(&mut self, resource: Resource, pk: u64, data: &P) -> Result<R>
    where
        R: DeserializeOwned,
        P: Serialize,
    {
        debug!(resource = resource.name(), pk, "updating record");
        let url = self.record_url(resource, Some(pk))?;
        let response = self.send(Method::PATCH, &url, serialize_body(data)?)?;
        decode_record(response)
    }

    /// Delete a record
    pub fn delete(&mut self, resource: Resource, pk: u64) -> Result<()> {
        debug!(resource = resource.name(), pk, "deleting record");
        let url = self.record_url(resource, Some(pk))?;
        self.send(Method::DELETE, &url, RequestOptions::new())?
            .error_for_status()?;
        Ok(())
    }
}

/// Async client for the Keystone API, mirroring [`KeystoneClient`]
#[cfg(feature = "async")]
pub struct AsyncKeystoneClient<T: AsyncTransport = AsyncReqwestTransport> {
    config: Config,
    http: AsyncHttpClient<T>,
    auth: AsyncAuthenticationManager<T>,
    api_version: Option<String>,
}

#[cfg(feature = "async")]
impl AsyncKeystoneClient<AsyncReqwestTransport> {
    /// Create a client backed by an async reqwest transport
    pub fn new(config: Config) -> Result<Self> {
        let transport = AsyncReqwestTransport::new(config.connect_timeout)?;
        Self::with_transport(config, transport)
    }
}

#[cfg(feature = "async")]
impl<T: AsyncTransport + Clone> AsyncKeystoneClient<T> {
    pub fn with_transport(config: Config, transport: T) -> Result<Self> {
        let base = HttpBase::new(&config.base_url)?.with_timeout(config.timeout);
        let http = AsyncHttpClient::new(base, transport);
        let auth = AsyncAuthenticationManager::new(http.clone(), &config.schema.auth)?;

        Ok(AsyncKeystoneClient {
            config,
            http,
            auth,
            api_version: None,
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.auth = self.auth.with_clock(clock);
        self
    }

    pub fn url(&self) -> &str {
        self.http.base_url()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn http(&self) -> &AsyncHttpClient<T> {
        &self.http
    }

    pub fn auth(&self) -> &AsyncAuthenticationManager<T> {
        &self.auth
    }

    pub fn auth_mut(&mut self) -> &mut AsyncAuthenticationManager<T> {
        &mut self.auth
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        self.auth.login(username, password).await
    }

    pub async fn logout(&mut self) -> Result<()> {
        self.auth.logout().await
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    pub fn state(&self) -> SessionState {
        self.auth.state()
    }

    async fn send(&mut self, method: Method, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        let headers = if self.auth.tokens().is_none() {
            HashMap::new()
        } else {
            self.auth.get_auth_headers().await?
        };
        self.http
            .send_request(method, endpoint, options.headers(headers))
            .await
    }

    pub async fn http_get(&mut self, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.send(Method::GET, endpoint, options).await
    }

    pub async fn http_post(&mut self, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.send(Method::POST, endpoint, options).await
    }

    pub async fn http_put(&mut self, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.send(Method::PUT, endpoint, options).await
    }

    pub async fn http_patch(&mut self, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.send(Method::PATCH, endpoint, options).await
    }

    pub async fn http_delete(&mut self, endpoint: &str, options: RequestOptions) -> Result<HttpResponse> {
        self.send(Method::DELETE, endpoint, options).await
    }

    fn record_url(&self, resource: Resource, pk: Option<u64>) -> Result<String> {
        let segments = record_path(pk);
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        resource.endpoint().join_url_with(self.url(), &segments)
    }

    pub async fn api_version(&mut self) -> Result<String> {
        if let Some(version) = &self.api_version {
            return Ok(version.clone());
        }

        let endpoint = self.config.schema.version.to_string();
        let response = self
            .send(Method::GET, &endpoint, RequestOptions::new())
            .await?
            .error_for_status()?;
        let version = response.text();
        self.api_version = Some(version.clone());
        Ok(version)
    }

    pub async fn create<R, P>(&mut self, resource: Resource, data: &P) -> Result<R>
    where
        R: DeserializeOwned,
        P: Serialize,
    {
        debug!(resource = resource.name(), "creating record");
        let url = self.record_url(resource, None)?;
        let options = serialize_body(data)?;
        let response = self.send(Method::POST, &url, options).await?;
        decode_record(response)
    }

    pub async fn retrieve<R>(
        &mut self,
        resource: Resource,
        pk: Option<u64>,
        filters: &[(&str, &str)],
    ) -> Result<Option<R>>
    where
        R: DeserializeOwned,
    {
        debug!(resource = resource.name(), ?pk, "retrieving records");
        let url = self.record_url(resource, pk)?;
        let response = self
            .send(Method::GET, &url, filter_options(filters))
            .await?;
        decode_optional(response)
    }

    pub async fn update<R, P>(&mut self, resource: Resource, pk: u64, data: &P) -> Result<R>
    where
        R: DeserializeOwned,
        P: Serialize,
    {
        debug!(resource = resource.name(), pk, "updating record");
        let url = self.record_url(resource, Some(pk))?;
        let options = serialize_body(data)?;
        let response = self.send(Method::PATCH, &url, options).await?;
        decode_record(response)
    }

    pub async fn delete(&mut self, resource: Resource, pk: u64) -> Result<()> {
        debug!(resource = resource.name(), pk, "deleting record");
        let url = self.record_url(resource, Some(pk))?;
        self.send(Method::DELETE, &url, RequestOptions::new())
            .await?
            .error_for_status()?;
        Ok(())
    }
}
