//! # keystone-client - Rust client for the Keystone API
//!
//! A light-weight client for the Keystone REST API. It wraps the plain
//! HTTP verbs, manages the JWT session used to authenticate them, and
//! offers CRUD operations over the API's data resources.
//!
//! ## Features
//!
//! - JWT login, logout and refresh with local expiry tracking
//! - Automatic `Authorization`, CSRF and correlation id headers
//! - URL normalization matching the server's trailing slash rules
//! - Blocking client by default, async client behind the `async` feature
//! - Pluggable transport for testing or custom HTTP stacks
//!
//! ## Basic Usage
//!
//! ```no_run
//! use keystone_client::{Config, KeystoneClient, Resource};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct User {
//!     id: u64,
//!     username: String,
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = KeystoneClient::new(Config::new("https://keystone.example.com"))?;
//!     client.login("jdoe", "secret")?;
//!
//!     let user: Option<User> = client.retrieve(Resource::Users, Some(1), &[])?;
//!     if let Some(user) = user {
//!         println!("User: {} ({})", user.username, user.id);
//!     }
//!
//!     client.logout()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Session Lifecycle
//!
//! ```no_run
//! use keystone_client::{Config, KeystoneClient, KeystoneError};
//!
//! let mut client = KeystoneClient::new(Config::new("https://keystone.example.com"))?;
//! client.login("jdoe", "secret")?;
//!
//! match client.auth_mut().refresh(true) {
//!     Ok(()) => {}
//!     Err(KeystoneError::SessionExpired) => client.login("jdoe", "secret")?,
//!     Err(e) => return Err(e),
//! }
//! # Ok::<(), KeystoneError>(())
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod http;
pub mod schema;
pub mod session;
pub mod time;
pub mod token;
pub mod transport;

// Re-export main types for convenience
pub use auth::AuthenticationManager;
pub use client::{Config, KeystoneClient};
pub use error::{KeystoneError, Result};
pub use http::{HttpBase, HttpClient, RequestOptions};
pub use schema::{normalize_url, AuthSchema, Endpoint, Resource, Schema};
pub use session::{AuthUrls, Session, SessionState};
pub use time::Timestamp;
pub use token::TokenPair;
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};

#[cfg(feature = "async")]
pub use auth::AsyncAuthenticationManager;
#[cfg(feature = "async")]
pub use client::AsyncKeystoneClient;
#[cfg(feature = "async")]
pub use http::AsyncHttpClient;
#[cfg(feature = "async")]
pub use transport::{AsyncReqwestTransport, AsyncTransport};

// Re-export serde_json for convenience
pub use serde_json::json;
