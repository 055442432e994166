//! Session state shared by the blocking and async authentication managers.
//!
//! Nothing here performs I/O. The managers ask the session what to send,
//! hand the request to their transport, and feed the response back in, so
//! both flavours make exactly the same decisions.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{KeystoneError, Result};
use crate::http::RequestOptions;
use crate::schema::AuthSchema;
use crate::token::TokenPair;
use crate::transport::HttpResponse;

/// Source of wall-clock time, read at every expiry comparison
pub type Clock = fn() -> DateTime<Utc>;

/// Where a session stands relative to its token expiries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No token pair
    Unauthenticated,
    /// Access token still valid
    Authenticated,
    /// Access token expired, but a refresh can restore it
    AccessExpiredRefreshValid,
    /// Both tokens expired; only a new login helps
    Expired,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access: Option<String>,
    refresh: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    refresh: Option<String>,
}

/// Fully resolved authentication URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUrls {
    pub login: String,
    pub refresh: String,
    pub blacklist: String,
}

impl AuthUrls {
    /// Resolve every authentication endpoint against `base_url`
    pub fn resolve(base_url: &str, schema: &AuthSchema) -> Result<Self> {
        Ok(AuthUrls {
            login: schema.new.join_url(base_url)?,
            refresh: schema.refresh.join_url(base_url)?,
            blacklist: schema.blacklist.join_url(base_url)?,
        })
    }
}

/// Body of a login request
pub(crate) fn login_options(username: &str, password: &str) -> RequestOptions {
    RequestOptions::new().json(serde_json::json!({
        "username": username,
        "password": password,
    }))
}

/// Body of a refresh or blacklist request
pub(crate) fn refresh_options(refresh: &str) -> RequestOptions {
    RequestOptions::new().form([("refresh", refresh)])
}

/// Holds at most one token pair and decides when it needs refreshing
#[derive(Debug, Clone)]
pub struct Session {
    tokens: Option<TokenPair>,
    clock: Clock,
}

impl Session {
    /// Create an unauthenticated session reading the system clock
    pub fn new() -> Self {
        Session {
            tokens: None,
            clock: Utc::now,
        }
    }

    /// Replace the clock used for expiry comparisons
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn tokens(&self) -> Option<&TokenPair> {
        self.tokens.as_ref()
    }

    /// Install a token pair obtained elsewhere
    pub fn set_tokens(&mut self, tokens: TokenPair) {
        self.tokens = Some(tokens);
    }

    /// Drop the token pair, returning it
    pub fn clear(&mut self) -> Option<TokenPair> {
        self.tokens.take()
    }

    pub fn state(&self) -> SessionState {
        let Some(tokens) = &self.tokens else {
            return SessionState::Unauthenticated;
        };

        let now = self.now();
        if tokens.access_expiry().is_after(now) {
            SessionState::Authenticated
        } else if tokens.refresh_expiry().is_after(now) {
            SessionState::AccessExpiredRefreshValid
        } else {
            SessionState::Expired
        }
    }

    /// True while either token is still valid
    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Authenticated | SessionState::AccessExpiredRefreshValid
        )
    }

    /// Decide whether a refresh call is needed.
    ///
    /// Returns the refresh token to send, `None` when nothing should be
    /// sent, or [`KeystoneError::SessionExpired`] when the refresh token is
    /// itself no longer valid.
    pub fn plan_refresh(&self, force: bool) -> Result<Option<String>> {
        let Some(tokens) = &self.tokens else {
            return Ok(None);
        };

        let now = self.now();
        if tokens.access_expiry().is_after(now) && !force {
            return Ok(None);
        }
        if !tokens.refresh_expiry().is_after(now) {
            return Err(KeystoneError::SessionExpired);
        }

        Ok(Some(tokens.refresh().to_string()))
    }

    /// Apply a login response. The session is only touched once the
    /// response has been fully validated.
    pub fn complete_login(&mut self, response: HttpResponse) -> Result<()> {
        let body: LoginResponse = response.error_for_status()?.json()?;
        let access = body.access.ok_or(KeystoneError::MissingField("access"))?;
        let refresh = body.refresh.ok_or(KeystoneError::MissingField("refresh"))?;

        self.tokens = Some(TokenPair::new(access, refresh)?);
        Ok(())
    }

    /// Apply the outcome of a refresh call, rotating only the refresh token.
    ///
    /// Any failure, whether the transport's, a rejection from the server or
    /// an unusable body, drops the session before the error is returned.
    pub fn complete_refresh(&mut self, outcome: Result<HttpResponse>) -> Result<()> {
        match outcome.and_then(|response| self.rotate_refresh(response)) {
            Ok(tokens) => {
                self.tokens = Some(tokens);
                Ok(())
            }
            Err(e) => {
                self.tokens = None;
                Err(e)
            }
        }
    }

    fn rotate_refresh(&self, response: HttpResponse) -> Result<TokenPair> {
        let body: RefreshResponse = response.error_for_status()?.json()?;
        let refresh = body.refresh.ok_or(KeystoneError::MissingField("refresh"))?;
        let tokens = self.tokens.as_ref().ok_or(KeystoneError::NotAuthenticated)?;
        tokens.with_refresh(refresh)
    }

    /// Headers carrying the current access token
    pub fn auth_headers(&self) -> Result<HashMap<String, String>> {
        let tokens = self.tokens.as_ref().ok_or(KeystoneError::NotAuthenticated)?;

        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), format!("Bearer {}", tokens.access()));
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Ok(headers)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::token::tests::jwt_expiring_at;
    use crate::transport::RequestBody;
    use chrono::TimeZone;

    pub(crate) const NOW: i64 = 1_700_000_000;
    pub(crate) const HOUR: i64 = 3600;
    pub(crate) const DAY: i64 = 24 * HOUR;

    pub(crate) fn fixed_now() -> DateTime<Utc> {
        Utc.timestamp_opt(NOW, 0).unwrap()
    }

    pub(crate) fn pair(access_exp: i64, refresh_exp: i64) -> TokenPair {
        TokenPair::new(jwt_expiring_at(access_exp), jwt_expiring_at(refresh_exp)).unwrap()
    }

    fn session_with(access_exp: i64, refresh_exp: i64) -> Session {
        let mut session = Session::new().with_clock(fixed_now);
        session.set_tokens(pair(access_exp, refresh_exp));
        session
    }

    #[test]
    fn test_states() {
        assert_eq!(Session::new().state(), SessionState::Unauthenticated);
        assert_eq!(
            session_with(NOW + HOUR, NOW + DAY).state(),
            SessionState::Authenticated
        );
        assert_eq!(
            session_with(NOW - HOUR, NOW + DAY).state(),
            SessionState::AccessExpiredRefreshValid
        );
        assert_eq!(
            session_with(NOW - DAY, NOW - HOUR).state(),
            SessionState::Expired
        );
    }

    #[test]
    fn test_is_authenticated() {
        assert!(!Session::new().is_authenticated());
        assert!(session_with(NOW + HOUR, NOW + DAY).is_authenticated());
        assert!(session_with(NOW - HOUR, NOW + DAY).is_authenticated());
        assert!(!session_with(NOW - DAY, NOW - HOUR).is_authenticated());
    }

    #[test]
    fn test_expiry_equal_to_now_is_expired() {
        let session = session_with(NOW, NOW + DAY);
        assert_eq!(session.state(), SessionState::AccessExpiredRefreshValid);

        let session = session_with(NOW, NOW);
        assert_eq!(session.state(), SessionState::Expired);
        assert!(!session.is_authenticated());
        assert!(matches!(
            session.plan_refresh(false),
            Err(KeystoneError::SessionExpired)
        ));
    }

    #[test]
    fn test_plan_refresh() {
        assert_eq!(Session::new().plan_refresh(true).unwrap(), None);
        assert_eq!(session_with(NOW + HOUR, NOW + DAY).plan_refresh(false).unwrap(), None);

        let session = session_with(NOW + HOUR, NOW + DAY);
        let expected = session.tokens().unwrap().refresh().to_string();
        assert_eq!(session.plan_refresh(true).unwrap(), Some(expected));

        let session = session_with(NOW - HOUR, NOW + DAY);
        assert!(session.plan_refresh(false).unwrap().is_some());
    }

    #[test]
    fn test_valid_access_with_expired_refresh_needs_nothing() {
        let session = session_with(NOW + HOUR, NOW - HOUR);
        assert_eq!(session.plan_refresh(false).unwrap(), None);
        assert!(matches!(
            session.plan_refresh(true),
            Err(KeystoneError::SessionExpired)
        ));
    }

    #[test]
    fn test_failed_login_keeps_prior_state() {
        let mut session = session_with(NOW + HOUR, NOW + DAY);
        let before = session.tokens().cloned();

        let err = session
            .complete_login(HttpResponse::new(401, "no"))
            .unwrap_err();
        assert_eq!(err.status_code(), Some(401));
        assert_eq!(session.tokens().cloned(), before);

        let missing = HttpResponse::json_body(200, &serde_json::json!({"access": "x"}));
        assert!(matches!(
            session.complete_login(missing),
            Err(KeystoneError::MissingField("refresh"))
        ));
        assert_eq!(session.tokens().cloned(), before);

        let undecodable = HttpResponse::json_body(
            200,
            &serde_json::json!({"access": "x", "refresh": "y"}),
        );
        assert!(matches!(
            session.complete_login(undecodable),
            Err(KeystoneError::Decode(_))
        ));
        assert_eq!(session.tokens().cloned(), before);
    }

    #[test]
    fn test_refresh_rejection_drops_session() {
        let mut session = session_with(NOW - HOUR, NOW + DAY);
        let err = session
            .complete_refresh(Ok(HttpResponse::new(401, "token_not_valid")))
            .unwrap_err();
        assert!(err.is_auth_error());
        assert_eq!(session.state(), SessionState::Unauthenticated);
    }

    #[test]
    fn test_refresh_without_new_token_drops_session() {
        let mut session = session_with(NOW - HOUR, NOW + DAY);
        let response = HttpResponse::json_body(200, &serde_json::json!({"detail": "ok"}));
        assert!(matches!(
            session.complete_refresh(Ok(response)),
            Err(KeystoneError::MissingField("refresh"))
        ));
        assert_eq!(session.state(), SessionState::Unauthenticated);
    }

    #[test]
    fn test_refresh_with_undecodable_token_drops_session() {
        let mut session = session_with(NOW - HOUR, NOW + DAY);
        let response = HttpResponse::json_body(200, &serde_json::json!({"refresh": "garbage"}));
        assert!(matches!(
            session.complete_refresh(Ok(response)),
            Err(KeystoneError::Decode(_))
        ));
        assert!(session.tokens().is_none());
    }

    #[test]
    fn test_refresh_transport_failure_drops_session() {
        let mut session = session_with(NOW - HOUR, NOW + DAY);
        let outcome = Err(KeystoneError::RequestBuild("connection reset".to_string()));
        assert!(session.complete_refresh(outcome).is_err());
        assert_eq!(session.state(), SessionState::Unauthenticated);
    }

    #[test]
    fn test_successful_refresh_rotates_token() {
        let mut session = session_with(NOW - HOUR, NOW + DAY);
        let access = session.tokens().unwrap().access().to_string();
        let response = HttpResponse::json_body(
            200,
            &serde_json::json!({"refresh": jwt_expiring_at(NOW + 2 * DAY)}),
        );

        session.complete_refresh(Ok(response)).unwrap();
        let tokens = session.tokens().unwrap();
        assert_eq!(tokens.access(), access);
        assert_eq!(tokens.refresh_expiry().unix(), NOW + 2 * DAY);
    }

    #[test]
    fn test_request_options() {
        let options = login_options("jdoe", "secret");
        assert_eq!(
            options.body,
            RequestBody::Json(serde_json::json!({"username": "jdoe", "password": "secret"}))
        );

        let options = refresh_options("tok");
        assert_eq!(
            options.body,
            RequestBody::Form(vec![("refresh".to_string(), "tok".to_string())])
        );
    }

    #[test]
    fn test_auth_headers() {
        assert!(matches!(
            Session::new().auth_headers(),
            Err(KeystoneError::NotAuthenticated)
        ));

        let session = session_with(NOW + HOUR, NOW + DAY);
        let headers = session.auth_headers().unwrap();
        let access = session.tokens().unwrap().access();
        assert_eq!(headers["Authorization"], format!("Bearer {}", access));
        assert_eq!(headers["Content-Type"], "application/json");
    }

    #[test]
    fn test_auth_urls() {
        let urls = AuthUrls::resolve("https://api.example.com//", &AuthSchema::default()).unwrap();
        assert_eq!(urls.login, "https://api.example.com/authentication/new/");
        assert_eq!(urls.refresh, "https://api.example.com/authentication/refresh/");
        assert_eq!(urls.blacklist, "https://api.example.com/authentication/blacklist/");
    }
}
