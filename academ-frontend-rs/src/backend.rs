use base64::Engine;
use language_utils::profile::{ProfileRow, ProfileRowUpdate};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed")]
    Request(#[source] fetch_happen::Error),
    #[error("backend returned {status}: {message}")]
    Status { status: String, message: String },
    #[error("could not parse backend response: {0}")]
    Parse(String),
    #[error("session has no refresh token")]
    NotRefreshable,
}

impl BackendError {
    /// The human-readable reason the backend gave, if it gave one.
    pub fn message(&self) -> Option<&str> {
        match self {
            BackendError::Status { message, .. } => Some(message),
            _ => None,
        }
    }

    /// The access token was rejected, usually because it expired.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, BackendError::Status { status, .. } if status.starts_with("401"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

#[derive(Deserialize)]
struct JwtClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
}

impl Session {
    /// Reads the session an OAuth provider redirect leaves in the URL fragment,
    /// e.g. `#access_token=...&refresh_token=...&expires_at=...`.
    pub fn from_redirect_fragment(fragment: &str) -> Option<Self> {
        let mut access_token = None;
        let mut refresh_token = None;
        let mut expires_at = None;
        for pair in fragment.trim_start_matches('#').split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let Ok(value) = urlencoding::decode(value) else {
                continue;
            };
            match key {
                "access_token" => access_token = Some(value.to_string()),
                "refresh_token" => refresh_token = Some(value.to_string()),
                "expires_at" => expires_at = value.parse().ok(),
                _ => {}
            }
        }
        let access_token = access_token?;
        let claims = decode_claims(&access_token)?;
        Some(Self {
            access_token,
            refresh_token,
            user_id: claims.sub,
            email: claims.email,
            expires_at: expires_at.or(claims.exp),
        })
    }

    pub fn is_expired(&self, now_unix: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_unix)
    }
}

// the signature is the server's business, the client only needs the claims
fn decode_claims(token: &str) -> Option<JwtClaims> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// What a sign-up produced. Without a session the address still has to be
/// confirmed by email.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignUpOutcome {
    pub session: Option<Session>,
}

#[allow(async_fn_in_trait)]
pub trait AuthBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<SignUpOutcome, BackendError>;

    async fn sign_out(&self, session: &Session) -> Result<(), BackendError>;

    /// Trades the refresh token for a new session of the same user.
    async fn refresh(&self, session: &Session) -> Result<Session, BackendError>;

    fn oauth_url(&self, provider: &str, redirect_to: &str) -> String;
}

#[allow(async_fn_in_trait)]
pub trait ProfileBackend {
    async fn fetch_profile(&self, session: &Session) -> Result<ProfileRow, BackendError>;

    async fn update_profile(
        &self,
        session: &Session,
        update: &ProfileRowUpdate,
    ) -> Result<(), BackendError>;
}
