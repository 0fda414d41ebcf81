//! HTTP client for the hosted identity provider.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::Config;

use super::callback::CallbackServer;

/// File name for the persisted session inside the data directory.
const SESSION_FILE: &str = "session.json";

/// How long to wait for the browser leg of an OAuth sign-in.
const OAUTH_WAIT: Duration = Duration::from_secs(300);

/// Leeway before token expiry at which a session counts as expired.
const EXPIRY_LEEWAY_SECS: i64 = 30;

/// Fallback token lifetime when the provider does not report one.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Errors from the identity provider.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The provider rejected the request and said why.
    #[error("{0}")]
    Provider(String),

    /// The provider could not be reached.
    #[error("could not reach the sign-in service: {0}")]
    Network(#[from] reqwest::Error),

    /// The identity provider is not configured.
    #[error("sign-in is not configured; set ALRIS_AUTH_URL and ALRIS_AUTH_KEY")]
    NotConfigured,

    /// Reading or writing the persisted session failed.
    #[error("failed to access the stored session: {0}")]
    Store(#[from] std::io::Error),

    /// The browser leg of an OAuth sign-in failed.
    #[error("{0}")]
    Callback(String),
}

/// Profile metadata attached at sign-up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMetadata {
    pub full_name: Option<String>,
}

/// Signed-in user as reported by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
    pub email_confirmed_at: Option<DateTime<Utc>>,
}

impl User {
    /// Display name for greetings: full name, then email, then a neutral
    /// fallback.
    pub fn display_name(&self) -> &str {
        self.user_metadata
            .full_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or("there")
    }

    /// Whether the email address has been confirmed.
    pub const fn email_confirmed(&self) -> bool {
        self.email_confirmed_at.is_some()
    }
}

/// A provider session: tokens plus the user they belong to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp when the access token expires.
    pub expires_at: i64,
    pub user: User,
}

impl Session {
    /// Whether the access token is expired (with leeway) at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.expires_at - EXPIRY_LEEWAY_SECS
    }
}

/// Auth lifecycle state published to subscribers.
#[derive(Debug, Clone)]
pub enum AuthState {
    /// No session.
    SignedOut,
    /// Signed in with a confirmed email address.
    SignedIn(User),
    /// Signed in, email not yet confirmed; the UI routes to verification.
    PendingVerification(User),
}

impl AuthState {
    /// State for a signed-in user, gated on email confirmation.
    pub fn for_user(user: User) -> Self {
        if user.email_confirmed() {
            Self::SignedIn(user)
        } else {
            Self::PendingVerification(user)
        }
    }
}

/// Persisted session file under the Alris data directory.
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Open the store at the default location (`~/.alris/session.json`),
    /// creating the data directory if needed.
    pub fn open() -> Result<Self, AuthError> {
        let dir = Config::data_dir().ok_or_else(|| {
            AuthError::Store(std::io::Error::other("could not find home directory"))
        })?;
        std::fs::create_dir_all(&dir)?;
        Ok(Self::open_at(dir.join(SESSION_FILE)))
    }

    /// Open the store at a specific path.
    pub const fn open_at(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load the persisted session, if any. A corrupt file reads as none.
    pub fn load(&self) -> Option<Session> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&content) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "discarding corrupt stored session");
                None
            }
        }
    }

    /// Persist a session, overwriting any previous one.
    pub fn save(&self, session: &Session) -> Result<(), AuthError> {
        let json = serde_json::to_string(session).map_err(std::io::Error::other)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    /// Remove the persisted session.
    pub fn clear(&self) -> Result<(), AuthError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::Store(e)),
        }
    }
}

/// Token response from the provider's token and signup endpoints.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: Option<User>,
}

/// Client for the identity provider's REST surface.
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    store: SessionStore,
    state: watch::Sender<AuthState>,
}

impl AuthClient {
    /// Create a client from configuration and a session store.
    pub fn new(config: &Config, store: SessionStore) -> Result<Self, AuthError> {
        let (base_url, api_key) = match (&config.auth_url, &config.auth_key) {
            (Some(url), Some(key)) => (url.clone(), key.clone()),
            _ => return Err(AuthError::NotConfigured),
        };

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let initial = store
            .load()
            .map_or(AuthState::SignedOut, |session| AuthState::for_user(session.user));
        let (state, _) = watch::channel(initial);

        Ok(Self {
            http,
            base_url,
            api_key,
            store,
            state,
        })
    }

    /// Subscribe to auth state changes. The receiver sees every transition
    /// for as long as it is held; dropping it is the unsubscribe.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Current session, refreshed when the access token has expired. A
    /// refresh rejected by the provider clears the stored session.
    pub async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        let Some(session) = self.store.load() else {
            return Ok(None);
        };
        if !session.is_expired(Utc::now()) {
            return Ok(Some(session));
        }

        match self.refresh(&session.refresh_token).await {
            Ok(fresh) => Ok(Some(fresh)),
            Err(AuthError::Provider(msg)) => {
                tracing::warn!(error = %msg, "stored session could not be refreshed");
                self.store.clear()?;
                self.state.send_replace(AuthState::SignedOut);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Password sign-in.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let resp = self
            .http
            .post(self.endpoint("token?grant_type=password"))
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        let session = session_from_response(resp).await?;
        self.adopt(session)
    }

    /// Sign-up with a full name attached as profile metadata.
    ///
    /// Returns `PendingVerification` when the provider requires email
    /// confirmation before granting a session.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<AuthState, AuthError> {
        let resp = self
            .http
            .post(self.endpoint("signup"))
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "data": { "full_name": name },
            }))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(AuthError::Provider(provider_message(status, &body)));
        }

        // With confirmation disabled the provider grants a session right
        // away; otherwise it returns just the pending user.
        if let Ok(session) = parse_session(&body, Utc::now()) {
            let session = self.adopt(session)?;
            return Ok(AuthState::for_user(session.user));
        }

        let user: User = serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(error = %e, "unexpected sign-up response");
            AuthError::Provider("unexpected response from the sign-in service".to_string())
        })?;
        let state = AuthState::for_user(user);
        self.state.send_replace(state.clone());
        Ok(state)
    }

    /// OAuth sign-in with Google via the system browser and a loopback
    /// callback listener.
    pub async fn sign_in_with_google(&self) -> Result<Session, AuthError> {
        let server = CallbackServer::bind().await?;
        let redirect = server.redirect_uri();
        let url = format!(
            "{}?provider=google&redirect_to={}",
            self.endpoint("authorize"),
            urlencoding::encode(&redirect)
        );

        if let Err(e) = open::that(&url) {
            return Err(AuthError::Callback(format!(
                "could not open a browser ({e}); open this URL yourself: {url}"
            )));
        }

        let tokens = server.wait(OAUTH_WAIT).await?;
        let user = self.fetch_user(&tokens.access_token).await?;

        let session = Session {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: Utc::now().timestamp()
                + tokens.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
            user,
        };
        self.adopt(session)
    }

    /// Sign out: revoke remotely when possible, always clear locally.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(session) = self.store.load() {
            let result = self
                .http
                .post(self.endpoint("logout"))
                .header("apikey", &self.api_key)
                .bearer_auth(&session.access_token)
                .send()
                .await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "remote sign-out failed; clearing local session anyway");
            }
        }

        self.store.clear()?;
        self.state.send_replace(AuthState::SignedOut);
        Ok(())
    }

    /// Exchange a refresh token for a fresh session.
    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let resp = self
            .http
            .post(self.endpoint("token?grant_type=refresh_token"))
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        let session = session_from_response(resp).await?;
        self.adopt(session)
    }

    /// Fetch the user a token belongs to.
    async fn fetch_user(&self, access_token: &str) -> Result<User, AuthError> {
        let resp = self
            .http
            .get(self.endpoint("user"))
            .header("apikey", &self.api_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(AuthError::Provider(provider_message(status, &body)));
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(error = %e, "unexpected user response");
            AuthError::Provider("unexpected response from the sign-in service".to_string())
        })
    }

    /// Persist a session and publish the resulting auth state.
    fn adopt(&self, session: Session) -> Result<Session, AuthError> {
        self.store.save(&session)?;
        self.state
            .send_replace(AuthState::for_user(session.user.clone()));
        Ok(session)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.base_url)
    }
}

/// Interpret a token-endpoint response.
async fn session_from_response(resp: reqwest::Response) -> Result<Session, AuthError> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(AuthError::Provider(provider_message(status, &body)));
    }
    parse_session(&body, Utc::now())
}

/// Parse a token response body into a session.
fn parse_session(body: &str, now: DateTime<Utc>) -> Result<Session, AuthError> {
    let token: TokenResponse = serde_json::from_str(body)
        .map_err(|_| AuthError::Provider("unexpected response from the sign-in service".to_string()))?;

    let user = token.user.ok_or_else(|| {
        AuthError::Provider("sign-in response carried no user".to_string())
    })?;

    let expires_at = token
        .expires_at
        .unwrap_or_else(|| now.timestamp() + token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS));

    Ok(Session {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        expires_at,
        user,
    })
}

/// Extract the provider's own error message from a failure body.
///
/// The provider reports errors under several keys depending on endpoint
/// and version; fall back to the status line when none is present.
fn provider_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|key| v.get(key).and_then(Value::as_str).map(String::from))
        })
        .unwrap_or_else(|| format!("the sign-in service returned {status}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmed_user() -> User {
        User {
            id: "user-1".to_string(),
            email: Some("kim@example.com".to_string()),
            user_metadata: UserMetadata {
                full_name: Some("Kim".to_string()),
            },
            email_confirmed_at: Some(Utc::now()),
        }
    }

    #[test]
    fn provider_message_prefers_the_service_text() {
        assert_eq!(
            provider_message(
                StatusCode::BAD_REQUEST,
                r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#
            ),
            "Invalid login credentials"
        );
        assert_eq!(
            provider_message(StatusCode::UNPROCESSABLE_ENTITY, r#"{"msg":"User already registered"}"#),
            "User already registered"
        );
        assert_eq!(
            provider_message(StatusCode::BAD_GATEWAY, "<html>oops</html>"),
            "the sign-in service returned 502 Bad Gateway"
        );
    }

    #[test]
    fn parse_session_computes_expiry_from_lifetime() {
        let now = Utc::now();
        let body = format!(
            r#"{{"access_token":"at","refresh_token":"rt","expires_in":900,"user":{}}}"#,
            serde_json::to_string(&confirmed_user()).unwrap()
        );
        let session = parse_session(&body, now).unwrap();
        assert_eq!(session.expires_at, now.timestamp() + 900);
        assert!(!session.is_expired(now));
        assert!(session.is_expired(now + chrono::Duration::seconds(900)));
    }

    #[test]
    fn parse_session_prefers_an_explicit_expiry() {
        let now = Utc::now();
        let body = format!(
            r#"{{"access_token":"at","refresh_token":"rt","expires_in":900,"expires_at":1234,"user":{}}}"#,
            serde_json::to_string(&confirmed_user()).unwrap()
        );
        assert_eq!(parse_session(&body, now).unwrap().expires_at, 1234);
    }

    #[test]
    fn parse_session_without_user_is_rejected() {
        let err = parse_session(r#"{"access_token":"at","refresh_token":"rt"}"#, Utc::now())
            .unwrap_err();
        assert!(matches!(err, AuthError::Provider(_)));
    }

    #[test]
    fn auth_state_gates_on_email_confirmation() {
        let confirmed = confirmed_user();
        assert!(matches!(
            AuthState::for_user(confirmed.clone()),
            AuthState::SignedIn(_)
        ));

        let unconfirmed = User {
            email_confirmed_at: None,
            ..confirmed
        };
        assert!(matches!(
            AuthState::for_user(unconfirmed),
            AuthState::PendingVerification(_)
        ));
    }

    #[test]
    fn display_name_falls_back_to_email() {
        let mut user = confirmed_user();
        assert_eq!(user.display_name(), "Kim");
        user.user_metadata.full_name = None;
        assert_eq!(user.display_name(), "kim@example.com");
        user.email = None;
        assert_eq!(user.display_name(), "there");
    }

    #[test]
    fn session_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open_at(dir.path().join("session.json"));
        assert!(store.load().is_none());

        let session = Session {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            expires_at: 1_234,
            user: confirmed_user(),
        };
        store.save(&session).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.access_token, "at");
        assert_eq!(loaded.user.id, "user-1");

        store.clear().unwrap();
        assert!(store.load().is_none());
        // Clearing twice is fine.
        store.clear().unwrap();
    }
}
