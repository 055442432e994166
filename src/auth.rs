//! User authentication and JWT lifecycle management.
//!
//! A manager owns zero or one [`TokenPair`] and talks to the three
//! authentication endpoints through an HTTP client, so authentication
//! calls carry the same correlation id and CSRF token as every other
//! request. Operations that may change the stored tokens take `&mut self`,
//! so a manager shared between callers has to be wrapped in a lock by
//! whoever shares it.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::Result;
use crate::http::HttpClient;
use crate::schema::AuthSchema;
use crate::session::{login_options, refresh_options, AuthUrls, Clock, Session, SessionState};
use crate::time::Timestamp;
use crate::token::TokenPair;
use crate::transport::Transport;

#[cfg(feature = "async")]
use crate::http::AsyncHttpClient;
#[cfg(feature = "async")]
use crate::transport::AsyncTransport;

/// Blocking user authentication and JWT manager
pub struct AuthenticationManager<T> {
    http: HttpClient<T>,
    urls: AuthUrls,
    session: Session,
}

impl<T: Transport> AuthenticationManager<T> {
    /// Create a manager for the authentication endpoints in `schema`,
    /// resolved against the client's base URL
    pub fn new(http: HttpClient<T>, schema: &AuthSchema) -> Result<Self> {
        let urls = AuthUrls::resolve(http.base_url(), schema)?;
        Ok(AuthenticationManager {
            http,
            urls,
            session: Session::new(),
        })
    }

    /// Replace the clock used for expiry checks
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.session = self.session.with_clock(clock);
        self
    }

    pub fn urls(&self) -> &AuthUrls {
        &self.urls
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Whether the session has tokens and at least one of them is unexpired
    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn tokens(&self) -> Option<&TokenPair> {
        self.session.tokens()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.tokens().map(TokenPair::access)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.tokens().map(TokenPair::refresh)
    }

    pub fn access_expiry(&self) -> Option<Timestamp> {
        self.tokens().map(TokenPair::access_expiry)
    }

    pub fn refresh_expiry(&self) -> Option<Timestamp> {
        self.tokens().map(TokenPair::refresh_expiry)
    }

    /// Log in and cache the returned token pair.
    ///
    /// On any failure the previous session, if any, is left as it was.
    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let response = self
            .http
            .http_post(&self.urls.login, login_options(username, password))?;
        self.session.complete_login(response)?;

        debug!(username, "logged in");
        Ok(())
    }

    /// Log out, asking the server to blacklist the current refresh token.
    ///
    /// The local session is cleared whether or not the blacklist call
    /// succeeds; a failed call is logged and otherwise ignored.
    pub fn logout(&mut self) -> Result<()> {
        let Some(tokens) = self.session.clear() else {
            return Ok(());
        };

        match self
            .http
            .http_post(&self.urls.blacklist, refresh_options(tokens.refresh()))
            .and_then(|r| r.error_for_status())
        {
            Ok(_) => debug!("logged out"),
            Err(e) => warn!(error = %e, "failed to blacklist refresh token during logout"),
        }
        Ok(())
    }

    /// Drop the current session without contacting the server
    pub fn invalidate(&mut self) {
        self.session.clear();
    }

    /// Refresh the session if the access token has expired, or always
    /// when `force` is set.
    ///
    /// Fails with [`KeystoneError::SessionExpired`](crate::KeystoneError::SessionExpired)
    /// without contacting the server when the refresh token has expired.
    /// Any other failure ends the session.
    pub fn refresh(&mut self, force: bool) -> Result<()> {
        let Some(refresh) = self.session.plan_refresh(force)? else {
            return Ok(());
        };

        let outcome = self.http.http_post(&self.urls.refresh, refresh_options(&refresh));
        if let Err(e) = self.session.complete_refresh(outcome) {
            warn!(error = %e, "refresh failed, session dropped");
            return Err(e);
        }

        debug!(force, "refreshed session");
        Ok(())
    }

    /// Headers for an authenticated API request, refreshing first if needed
    pub fn get_auth_headers(&mut self) -> Result<HashMap<String, String>> {
        // Fail before any refresh attempt when there is no session at all
        self.session.auth_headers()?;
        self.refresh(false)?;
        self.session.auth_headers()
    }
}

/// Async user authentication and JWT manager.
///
/// Makes the same decisions as [`AuthenticationManager`]; only the wait on
/// the network differs.
#[cfg(feature = "async")]
pub struct AsyncAuthenticationManager<T> {
    http: AsyncHttpClient<T>,
    urls: AuthUrls,
    session: Session,
}

#[cfg(feature = "async")]
impl<T: AsyncTransport> AsyncAuthenticationManager<T> {
    pub fn new(http: AsyncHttpClient<T>, schema: &AuthSchema) -> Result<Self> {
        let urls = AuthUrls::resolve(http.base_url(), schema)?;
        Ok(AsyncAuthenticationManager {
            http,
            urls,
            session: Session::new(),
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.session = self.session.with_clock(clock);
        self
    }

    pub fn urls(&self) -> &AuthUrls {
        &self.urls
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn tokens(&self) -> Option<&TokenPair> {
        self.session.tokens()
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let response = self
            .http
            .http_post(&self.urls.login, login_options(username, password))
            .await?;
        self.session.complete_login(response)?;

        debug!(username, "logged in");
        Ok(())
    }

    pub async fn logout(&mut self) -> Result<()> {
        let Some(tokens) = self.session.clear() else {
            return Ok(());
        };

        match self
            .http
            .http_post(&self.urls.blacklist, refresh_options(tokens.refresh()))
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(_) => debug!("logged out"),
            Err(e) => warn!(error = %e, "failed to blacklist refresh token during logout"),
        }
        Ok(())
    }

    pub fn invalidate(&mut self) {
        self.session.clear();
    }

    pub async fn refresh(&mut self, force: bool) -> Result<()> {
        let Some(refresh) = self.session.plan_refresh(force)? else {
            return Ok(());
        };

        let outcome = self
            .http
            .http_post(&self.urls.refresh, refresh_options(&refresh))
            .await;
        if let Err(e) = self.session.complete_refresh(outcome) {
            warn!(error = %e, "refresh failed, session dropped");
            return Err(e);
        }

        debug!(force, "refreshed session");
        Ok(())
    }

    pub async fn get_auth_headers(&mut self) -> Result<HashMap<String, String>> {
        self.session.auth_headers()?;
        self.refresh(false).await?;
        self.session.auth_headers()
    }
}
