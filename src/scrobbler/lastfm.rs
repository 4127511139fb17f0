// Last.fm API client
// Signed requests, transport retry with backoff and session bookkeeping

use super::error::ApiError;
use super::signature::{self, redact, sanitize_key};
use super::traits::{HttpResponse, Transport};
use super::track::TrackInfo;
use crate::session::{Session, SessionStore};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://ws.audioscrobbler.com/2.0/";
pub const DEFAULT_AUTH_URL: &str = "https://www.last.fm/api/auth/";

/// Last.fm error code for an invalid session key
const ERROR_INVALID_SESSION: i64 = 9;

/// Methods whose 401/403 responses do not end the current session
const AUTH_METHODS: [&str; 2] = ["auth.getSession", "auth.getToken"];

/// Transport-level retry policy for 429 and 5xx responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(1600),
        }
    }
}

impl RetryPolicy {
    /// Doubling backoff without jitter, capped at `max_backoff`
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(self.max_backoff)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Static endpoint and retry settings
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_url: String,
    pub auth_url: String,
    pub retry: RetryPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Default)]
struct ClientState {
    api_key: String,
    api_secret: String,
    session_key: String,
}

#[derive(Deserialize)]
struct SessionEnvelope {
    session: SessionBody,
}

#[derive(Deserialize)]
struct SessionBody {
    #[serde(default)]
    name: String,
    key: String,
}

#[derive(Deserialize)]
struct TokenEnvelope {
    token: String,
}

/// Server verdict on a session key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCheck {
    Valid,
    /// Rejected by the server and already cleared
    Rejected,
    /// No verdict, for example while offline
    Inconclusive(ApiError),
}

/// Client for the Last.fm web service.
///
/// Holds the application credentials and the in-memory session key. Whenever
/// the session key is dropped because the server rejected it, the persisted
/// copy in the [`SessionStore`] is erased as well.
pub struct LastFmClient {
    settings: ClientSettings,
    transport: Arc<dyn Transport>,
    store: SessionStore,
    state: RwLock<ClientState>,
}

impl LastFmClient {
    pub fn new(settings: ClientSettings, transport: Arc<dyn Transport>, store: SessionStore) -> Self {
        Self {
            settings,
            transport,
            store,
            state: RwLock::new(ClientState::default()),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ClientState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ClientState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session_store(&self) -> &SessionStore {
        &self.store
    }

    /// Replace the API credentials. A change drops the in-memory session,
    /// since a session is only valid for the credentials that created it.
    pub fn set_credentials(&self, api_key: &str, api_secret: &str) {
        log::debug!(
            "Credentials set (api_key: {} [len={}], api_secret: {} [len={}])",
            redact(api_key),
            api_key.len(),
            redact(api_secret),
            api_secret.len()
        );

        let mut state = self.write_state();
        if state.api_key != api_key || state.api_secret != api_secret {
            if !state.session_key.is_empty() {
                log::info!("Credentials changed, clearing session");
            }
            state.session_key.clear();
        }
        state.api_key = api_key.to_string();
        state.api_secret = api_secret.to_string();
    }

    pub fn has_credentials(&self) -> bool {
        let state = self.read_state();
        !state.api_key.is_empty() && !state.api_secret.is_empty()
    }

    pub fn set_session_key(&self, session_key: &str) {
        let session_key = sanitize_key(session_key);
        let mut state = self.write_state();
        if state.session_key != session_key {
            log::debug!(
                "Session key set (len={}, value={})",
                session_key.len(),
                redact(&session_key)
            );
            state.session_key = session_key;
        }
    }

    pub fn session_key(&self) -> String {
        self.read_state().session_key.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        !self.read_state().session_key.is_empty()
    }

    /// Drop the session in memory and on disk
    pub fn invalidate_session(&self) {
        self.write_state().session_key.clear();
        self.store.clear();
    }

    /// Browser URL where the user grants access
    pub fn auth_url(&self, token: Option<&str>) -> String {
        let api_key = self.read_state().api_key.clone();
        let mut url = format!("{}?api_key={}", self.settings.auth_url, signature::url_encode(&api_key));
        if let Some(token) = token {
            url.push_str("&token=");
            url.push_str(&signature::url_encode(token));
        }
        url
    }

    /// Request a fresh, unauthorized token (`auth.getToken`)
    pub fn request_token(&self) -> Result<String, ApiError> {
        let params = self.base_params("auth.getToken");
        let response = self.send(params)?;
        let envelope: TokenEnvelope = serde_json::from_value(response)
            .map_err(|e| ApiError::Malformed(format!("missing token: {}", e)))?;
        Ok(envelope.token)
    }

    /// Exchange an authorized token for a session, then keep and persist it
    pub fn authenticate(&self, token: &str) -> Result<Session, ApiError> {
        let session = self.fetch_session(token)?;
        self.adopt_session(&session);
        Ok(session)
    }

    /// `auth.getSession` without touching any state
    pub(crate) fn fetch_session(&self, token: &str) -> Result<Session, ApiError> {
        log::debug!("Starting authentication (token length: {})", token.len());
        let mut params = self.base_params("auth.getSession");
        params.insert("token".to_string(), token.to_string());

        let response = self.send(params).inspect_err(|e| {
            log::error!("Last.fm authentication failed: {}", e);
        })?;

        let envelope: SessionEnvelope = serde_json::from_value(response).map_err(|e| {
            log::error!("Unexpected authentication response (missing session): {}", e);
            ApiError::Malformed(format!("missing session: {}", e))
        })?;

        Ok(Session {
            key: envelope.session.key,
            name: envelope.session.name,
        })
    }

    /// Keep a freshly obtained session in memory and on disk
    pub(crate) fn adopt_session(&self, session: &Session) {
        self.set_session_key(&session.key);
        self.store.save(session);
        log::info!("Authenticated as: {}", session.name);
    }

    /// Ask the server about the current session without deciding what an
    /// inconclusive answer means. A rejection clears the session in memory
    /// and on disk.
    pub fn check_session(&self) -> SessionCheck {
        if !self.is_authenticated() {
            return SessionCheck::Inconclusive(ApiError::NotAuthenticated);
        }

        let params = self.session_params("auth.getSessionInfo");
        match self.send(params) {
            Ok(_) => SessionCheck::Valid,
            Err(e @ ApiError::Http { status: 401 | 403 })
            | Err(e @ ApiError::Api { code: ERROR_INVALID_SESSION, .. }) => {
                log::warn!("Session is invalid ({}), clearing", e);
                self.invalidate_session();
                SessionCheck::Rejected
            }
            Err(e) => SessionCheck::Inconclusive(e),
        }
    }

    /// Check the current session.
    ///
    /// Being offline keeps the session; a 401/403 or an invalid-session error
    /// clears it in memory and on disk.
    pub fn validate_session(&self) -> Result<bool, ApiError> {
        if !self.is_authenticated() {
            return Ok(false);
        }

        match self.check_session() {
            SessionCheck::Valid => {
                log::info!(
                    "Session key validated (length: {})",
                    self.session_key().len()
                );
                Ok(true)
            }
            SessionCheck::Rejected => Ok(false),
            SessionCheck::Inconclusive(ApiError::MissingCredentials) => {
                Err(ApiError::MissingCredentials)
            }
            SessionCheck::Inconclusive(e) if e.is_offline() => {
                log::warn!("Offline mode detected, skipping session validation ({})", e);
                Ok(true)
            }
            SessionCheck::Inconclusive(e) => {
                log::warn!("Session validation inconclusive ({}), keeping session", e);
                Ok(true)
            }
        }
    }

    /// `track.updateNowPlaying`, never retried beyond the transport policy
    pub fn update_now_playing(&self, track: &TrackInfo) -> Result<(), ApiError> {
        let params = self.track_params("track.updateNowPlaying", track)?;
        self.send(params).map(|_| ()).inspect_err(|e| {
            log::warn!("Failed to update now playing: {}", e);
        })
    }

    /// `track.scrobble` using the track's start timestamp
    pub fn scrobble(&self, track: &TrackInfo) -> Result<(), ApiError> {
        let mut params = self.track_params("track.scrobble", track)?;
        params.insert("timestamp".to_string(), track.timestamp.to_string());
        self.send(params).map(|_| ()).inspect_err(|e| {
            log::warn!("Scrobble failed for {}: {}", track, e);
        })
    }

    /// HEAD request against the API endpoint
    pub fn is_reachable(&self) -> bool {
        self.transport.probe(&self.settings.api_url)
    }

    fn base_params(&self, method: &str) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("method".to_string(), method.to_string());
        params.insert("api_key".to_string(), self.read_state().api_key.clone());
        params
    }

    fn session_params(&self, method: &str) -> BTreeMap<String, String> {
        let mut params = self.base_params(method);
        params.insert("sk".to_string(), self.session_key());
        params
    }

    fn track_params(
        &self,
        method: &str,
        track: &TrackInfo,
    ) -> Result<BTreeMap<String, String>, ApiError> {
        if !self.is_authenticated() {
            return Err(ApiError::NotAuthenticated);
        }
        if !track.has_required_fields() {
            return Err(ApiError::MissingMetadata);
        }
        let mut params = self.session_params(method);
        track.request_params(&mut params);
        Ok(params)
    }

    /// Sign and POST a request, retrying 429/5xx with backoff.
    ///
    /// Returns the parsed JSON body of a 2xx response without an `error` field.
    fn send(&self, mut params: BTreeMap<String, String>) -> Result<Value, ApiError> {
        let (api_key, api_secret) = {
            let state = self.read_state();
            (state.api_key.clone(), state.api_secret.clone())
        };
        if api_key.is_empty() || api_secret.is_empty() {
            log::warn!("Last.fm API credentials are missing, request not sent");
            return Err(ApiError::MissingCredentials);
        }

        if let Some(sk) = params.get_mut("sk") {
            *sk = sanitize_key(sk);
        }
        let method = params.get("method").cloned().unwrap_or_default();

        params.insert("format".to_string(), "json".to_string());
        let api_sig = signature::sign(&params, &api_secret);
        params.insert("api_sig".to_string(), api_sig);

        for (key, value) in &params {
            let sensitive = matches!(key.as_str(), "api_key" | "sk" | "token");
            log::trace!(
                "  {} = {}",
                key,
                if sensitive { redact(value) } else { value.clone() }
            );
        }

        let body = signature::form_body(&params);
        log::debug!("{}: post data length {}", method, body.len());

        let response = self.post_with_retry(&method, &body)?;

        if !response.is_success() {
            log::error!("Last.fm {} failed: HTTP {}", method, response.status);
            return Err(ApiError::Http {
                status: response.status,
            });
        }

        let value: Value = serde_json::from_str(&response.body).map_err(|e| {
            log::error!("Last.fm {}: response not valid JSON ({})", method, e);
            ApiError::Malformed(e.to_string())
        })?;

        if let Some(code) = value.get("error") {
            let code = code.as_i64().unwrap_or_default();
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            log::error!("Last.fm API error: {} - {}", code, message);
            return Err(ApiError::Api { code, message });
        }

        Ok(value)
    }

    fn post_with_retry(&self, method: &str, body: &str) -> Result<HttpResponse, ApiError> {
        let mut backoff = self.settings.retry.backoff();
        let attempts = self.settings.retry.attempts.max(1);
        let mut attempt = 1;

        loop {
            let response = self.transport.post_form(&self.settings.api_url, body)?;

            if matches!(response.status, 401 | 403) {
                if AUTH_METHODS.contains(&method) {
                    log::debug!("HTTP {} during authentication (ignored)", response.status);
                } else {
                    log::warn!(
                        "Session invalidated due to HTTP {} on {}",
                        response.status,
                        method
                    );
                    log::debug!("Response body: {}", response.body);
                    self.invalidate_session();
                }
            }

            if response.is_success() || !response.is_retryable() || attempt >= attempts {
                return Ok(response);
            }

            let delay = backoff
                .next_backoff()
                .unwrap_or(self.settings.retry.max_backoff);
            log::debug!(
                "Last.fm: HTTP {} on attempt {}, backing off for {} ms",
                response.status,
                attempt,
                delay.as_millis()
            );
            std::thread::sleep(delay);
            attempt += 1;
        }
    }
}
