//! Endpoint definitions for the Keystone API.
//!
//! The API redirects any request whose path does not end in exactly one
//! slash, so every URL built here is normalized the same way: repeated
//! slashes collapse to one and a single trailing slash is enforced.

use std::borrow::Cow;
use std::fmt;
use url::Url;

use crate::error::Result;

/// Collapse repeated slashes in `path` and enforce one trailing slash
fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 2);
    normalized.push('/');
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        normalized.push_str(segment);
        normalized.push('/');
    }
    normalized
}

/// Normalize a URL so its path has no duplicate slashes and exactly one
/// trailing slash. Scheme, host, port and query are kept as given.
pub fn normalize_url(url: &str) -> Result<String> {
    let mut parsed = Url::parse(url)?;
    let path = normalize_path(parsed.path());
    parsed.set_path(&path);
    Ok(parsed.into())
}

/// A path relative to the API base URL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint(Cow<'static, str>);

impl Endpoint {
    /// Create an endpoint from any path
    pub fn new(path: impl Into<String>) -> Self {
        Endpoint(Cow::Owned(path.into()))
    }

    /// Create an endpoint from a static path
    pub const fn from_static(path: &'static str) -> Self {
        Endpoint(Cow::Borrowed(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join the endpoint onto `base_url`.
    ///
    /// Leading and trailing slashes on either side are irrelevant: the
    /// endpoint is always appended below the base path, never resolved
    /// against the host root.
    pub fn join_url(&self, base_url: &str) -> Result<String> {
        self.join_url_with(base_url, &[])
    }

    /// Join the endpoint onto `base_url` followed by extra path segments,
    /// e.g. a record's primary key
    pub fn join_url_with(&self, base_url: &str, append: &[&str]) -> Result<String> {
        let mut parsed = Url::parse(base_url)?;

        let mut path = format!("{}/{}", parsed.path(), self.0);
        for part in append {
            path.push('/');
            path.push_str(part);
        }

        parsed.set_path(&normalize_path(&path));
        Ok(parsed.into())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Endpoint {
    fn from(path: &str) -> Self {
        Endpoint::new(path)
    }
}

impl From<String> for Endpoint {
    fn from(path: String) -> Self {
        Endpoint::new(path)
    }
}

/// Endpoints used for JWT authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSchema {
    /// Exchanges credentials for a new token pair
    pub new: Endpoint,
    /// Rotates the refresh token
    pub refresh: Endpoint,
    /// Invalidates a refresh token server-side
    pub blacklist: Endpoint,
}

impl Default for AuthSchema {
    fn default() -> Self {
        AuthSchema {
            new: Endpoint::from_static("authentication/new"),
            refresh: Endpoint::from_static("authentication/refresh"),
            blacklist: Endpoint::from_static("authentication/blacklist"),
        }
    }
}

/// Data resources exposed by the API, each backed by a fixed endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Allocations,
    Requests,
    ResearchGroups,
    Users,
}

impl Resource {
    /// Every resource, in declaration order
    pub const ALL: [Resource; 4] = [
        Resource::Allocations,
        Resource::Requests,
        Resource::ResearchGroups,
        Resource::Users,
    ];

    /// The endpoint serving this resource
    pub const fn endpoint(&self) -> Endpoint {
        Endpoint::from_static(match self {
            Resource::Allocations => "allocations/allocations",
            Resource::Requests => "allocations/requests",
            Resource::ResearchGroups => "users/researchgroups",
            Resource::Users => "users/users",
        })
    }

    /// Short name used in logs
    pub const fn name(&self) -> &'static str {
        match self {
            Resource::Allocations => "allocation",
            Resource::Requests => "request",
            Resource::ResearchGroups => "research_group",
            Resource::Users => "user",
        }
    }
}

/// The complete set of endpoints a client talks to.
/// Built per client instance and never shared between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub auth: AuthSchema,
    /// Returns the API version as plain text
    pub version: Endpoint,
}

impl Default for Schema {
    fn default() -> Self {
        Schema {
            auth: AuthSchema::default(),
            version: Endpoint::from_static("version"),
        }
    }
}
