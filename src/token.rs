//! OAuth2 password-grant token cache.
//!
//! A [`TokenCache`] keeps one access token per endpoint configuration and refreshes it when it is
//! missing or past its expiry. Refreshes are single-flight: callers that find a refresh already
//! running wait for its outcome instead of calling the token endpoint themselves.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use http::HeaderMap;
use http::header::{AUTHORIZATION, HeaderValue};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::{RequestAuthenticator, RestClient};
use crate::error::Error;
use crate::retry::CancellationToken;
use crate::util::{lock_unpoisoned, redact_uri_for_logs};

const DEFAULT_FALLBACK_TTL: Duration = Duration::from_secs(5 * 60);

pub trait Clock: Send + Sync {
    fn now_system(&self) -> SystemTime;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Token endpoint and resource-owner credentials for the password grant.
#[derive(Clone)]
pub struct TokenEndpoint {
    url: String,
    client_id: String,
    client_secret: Option<String>,
    user_name: Option<String>,
    password: Option<String>,
    fallback_ttl: Duration,
}

impl TokenEndpoint {
    pub fn new(url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_id: client_id.into(),
            client_secret: None,
            user_name: None,
            password: None,
            fallback_ttl: DEFAULT_FALLBACK_TTL,
        }
    }

    pub fn client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    pub fn credentials(
        mut self,
        user_name: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.user_name = Some(user_name.into());
        self.password = Some(password.into());
        self
    }

    pub fn user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Lifetime assumed when the endpoint omits `expires_in`.
    pub fn fallback_ttl(mut self, fallback_ttl: Duration) -> Self {
        self.fallback_ttl = fallback_ttl.max(Duration::from_secs(1));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn resource_owner(&self) -> crate::Result<(&str, &str)> {
        let user_name = self
            .user_name
            .as_deref()
            .filter(|user_name| !user_name.is_empty())
            .ok_or(Error::MissingCredentials { field: "user_name" })?;
        let password = self
            .password
            .as_deref()
            .filter(|password| !password.is_empty())
            .ok_or(Error::MissingCredentials { field: "password" })?;
        Ok((user_name, password))
    }
}

impl std::fmt::Debug for TokenEndpoint {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TokenEndpoint")
            .field("url", &redact_uri_for_logs(&self.url))
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("user_name", &self.user_name)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("fallback_ttl", &self.fallback_ttl)
            .finish()
    }
}

/// The cached token triple. Replaced as a whole on every successful refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSnapshot {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: SystemTime,
}

impl TokenSnapshot {
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    /// Valid up to and including the expiry instant.
    pub fn is_valid_at(&self, now: SystemTime) -> bool {
        now <= self.expires_at
    }
}

impl std::fmt::Debug for TokenSnapshot {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TokenSnapshot")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// Deserialize-only so a token can never be serialized back out by accident.
#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Default)]
struct TokenState {
    token: Option<TokenSnapshot>,
    refreshing: bool,
    generation: u64,
    last_failure: Option<String>,
}

pub struct TokenCache {
    endpoint: TokenEndpoint,
    clock: Arc<dyn Clock>,
    state: Mutex<TokenState>,
    condvar: Condvar,
}

impl TokenCache {
    pub fn new(endpoint: TokenEndpoint) -> Self {
        Self::with_clock(endpoint, Arc::new(SystemClock))
    }

    pub fn with_clock(endpoint: TokenEndpoint, clock: Arc<dyn Clock>) -> Self {
        Self {
            endpoint,
            clock,
            state: Mutex::new(TokenState::default()),
            condvar: Condvar::new(),
        }
    }

    pub fn endpoint(&self) -> &TokenEndpoint {
        &self.endpoint
    }

    pub fn snapshot(&self) -> Option<TokenSnapshot> {
        lock_unpoisoned(&self.state).token.clone()
    }

    /// Drops the cached token so the next [`TokenCache::ensure_valid`] refreshes.
    pub fn invalidate(&self) {
        lock_unpoisoned(&self.state).token = None;
    }

    /// Returns a currently valid access token, refreshing it through `client` when needed.
    ///
    /// Missing resource-owner credentials fail before any network call. A failed refresh clears
    /// the cached token; concurrent callers waiting on that refresh get
    /// [`Error::TokenRefreshFailed`].
    pub fn ensure_valid(&self, client: &RestClient) -> crate::Result<String> {
        self.ensure_valid_cancellable(client, None)
    }

    /// [`TokenCache::ensure_valid`] whose token request stops at the next retry boundary once
    /// `cancellation` fires.
    pub fn ensure_valid_cancellable(
        &self,
        client: &RestClient,
        cancellation: Option<&CancellationToken>,
    ) -> crate::Result<String> {
        let (user_name, password) = self.endpoint.resource_owner()?;

        let mut state = lock_unpoisoned(&self.state);
        loop {
            if let Some(token) = &state.token
                && token.is_valid_at(self.clock.now_system())
            {
                return Ok(token.access_token.clone());
            }
            if !state.refreshing {
                break;
            }

            let generation = state.generation;
            while state.refreshing {
                state = self.wait(state);
            }
            if state.generation != generation
                && let Some(message) = &state.last_failure
            {
                return Err(Error::TokenRefreshFailed {
                    message: message.clone(),
                });
            }
        }
        state.refreshing = true;
        drop(state);

        let guard = RefreshGuard {
            cache: self,
            finished: false,
        };
        let outcome = self.fetch(client, user_name, password, cancellation);
        guard.finish(outcome)
    }

    fn wait<'a>(&self, state: MutexGuard<'a, TokenState>) -> MutexGuard<'a, TokenState> {
        match self.condvar.wait(state) {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn fetch(
        &self,
        client: &RestClient,
        user_name: &str,
        password: &str,
        cancellation: Option<&CancellationToken>,
    ) -> crate::Result<TokenSnapshot> {
        let endpoint = &self.endpoint;
        let issued_at = self.clock.now_system();
        debug!(
            token_url = %redact_uri_for_logs(&endpoint.url),
            client_id = %endpoint.client_id,
            "refreshing access token"
        );

        let mut fields = vec![("client_id", endpoint.client_id.as_str())];
        if let Some(client_secret) = endpoint.client_secret.as_deref() {
            fields.push(("client_secret", client_secret));
        }
        fields.extend([
            ("grant_type", "password"),
            ("username", user_name),
            ("password", password),
        ]);

        let mut request = client
            .request_without_base(http::Method::POST)
            .add_url_segment(endpoint.url.as_str())
            .add_header("Accept", "application/json")
            .form(fields)
            .retry_short();
        if let Some(cancellation) = cancellation {
            request = request.cancellation(cancellation.clone());
        }
        let text = request
            .execute_required_text()
            .map_err(|source| match source {
                Error::Cancelled { .. } => source,
                source => Error::TokenEndpoint {
                    source: Box::new(source),
                },
            })?;

        self.parse_token_response(&text, issued_at)
    }

    /// `issued_at` is read before the request goes out, so a slow endpoint shortens the
    /// lifetime rather than extending it.
    fn parse_token_response(
        &self,
        text: &str,
        issued_at: SystemTime,
    ) -> crate::Result<TokenSnapshot> {
        let invalid = |message: String| Error::InvalidTokenResponse { message };
        if text.trim().is_empty() {
            return Err(invalid("empty body".to_owned()));
        }
        let response: TokenResponse = serde_json::from_str(text).map_err(|source| {
            invalid(format!(
                "malformed token json at line {} column {}",
                source.line(),
                source.column()
            ))
        })?;

        if let Some(token_type) = response.token_type.as_deref()
            && !token_type.eq_ignore_ascii_case("bearer")
        {
            return Err(invalid(format!("unsupported token_type {token_type}")));
        }
        let access_token = response
            .access_token
            .filter(|access_token| !access_token.is_empty())
            .ok_or_else(|| invalid("missing access_token".to_owned()))?;
        if HeaderValue::from_str(&format!("Bearer {access_token}")).is_err() {
            return Err(invalid(
                "access_token is not usable as a header value".to_owned(),
            ));
        }

        let lifetime = match response.expires_in {
            Some(0) => return Err(invalid("expires_in must be positive".to_owned())),
            Some(seconds) => Duration::from_secs(seconds),
            None => self.endpoint.fallback_ttl,
        };
        let expires_at = issued_at
            .checked_add(lifetime)
            .ok_or_else(|| invalid("expires_in is out of range".to_owned()))?;

        debug!(
            lifetime_secs = lifetime.as_secs(),
            has_refresh_token = response.refresh_token.is_some(),
            "access token refreshed"
        );
        Ok(TokenSnapshot {
            access_token,
            refresh_token: response.refresh_token,
            expires_at,
        })
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TokenCache")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl RequestAuthenticator for TokenCache {
    fn authorize(&self, client: &RestClient, headers: &mut HeaderMap) -> crate::Result<()> {
        self.authorize_cancellable(client, headers, None)
    }

    fn authorize_cancellable(
        &self,
        client: &RestClient,
        headers: &mut HeaderMap,
        cancellation: Option<&CancellationToken>,
    ) -> crate::Result<()> {
        let access_token = self.ensure_valid_cancellable(client, cancellation)?;
        let mut value = HeaderValue::from_str(&format!("Bearer {access_token}")).map_err(|_| {
            Error::InvalidTokenResponse {
                message: "access_token is not usable as a header value".to_owned(),
            }
        })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
        Ok(())
    }
}

/// Publishes the refresh outcome and wakes waiters, also when the refreshing thread unwinds.
struct RefreshGuard<'a> {
    cache: &'a TokenCache,
    finished: bool,
}

impl RefreshGuard<'_> {
    fn finish(mut self, outcome: crate::Result<TokenSnapshot>) -> crate::Result<String> {
        self.finished = true;
        let mut state = lock_unpoisoned(&self.cache.state);
        state.refreshing = false;
        state.generation = state.generation.wrapping_add(1);
        let result = match outcome {
            Ok(snapshot) => {
                let access_token = snapshot.access_token.clone();
                state.token = Some(snapshot);
                state.last_failure = None;
                Ok(access_token)
            }
            Err(error) => {
                warn!(
                    token_url = %redact_uri_for_logs(&self.cache.endpoint.url),
                    error = %error,
                    "access token refresh failed"
                );
                state.token = None;
                state.last_failure = Some(error.to_string());
                Err(error)
            }
        };
        drop(state);
        self.cache.condvar.notify_all();
        result
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = lock_unpoisoned(&self.cache.state);
        state.refreshing = false;
        state.generation = state.generation.wrapping_add(1);
        state.token = None;
        state.last_failure = Some("token refresh was aborted".to_owned());
        drop(state);
        self.cache.condvar.notify_all();
    }
}
