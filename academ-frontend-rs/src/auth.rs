use crate::backend::{BackendError, Session};
use crate::i18n::{self, AppLanguage};
use serde::{Deserialize, Serialize};

pub const MIN_NAME_CHARS: usize = 3;
pub const OAUTH_PROVIDER: &str = "google";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("full name is too short")]
    NameTooShort,
    #[error("invalid login credentials")]
    InvalidCredentials,
    #[error("an account with this email already exists")]
    DuplicateEmail,
    #[error("authentication failed")]
    Failed(#[source] BackendError),
}

impl AuthError {
    pub fn message_key(&self) -> &'static str {
        match self {
            AuthError::NameTooShort => "auth.nameTooShort",
            AuthError::InvalidCredentials => "auth.invalidCreds",
            AuthError::DuplicateEmail => "auth.duplicateEmail",
            AuthError::Failed(_) => "auth.authFailed",
        }
    }

    pub fn localized(&self, language: AppLanguage) -> String {
        i18n::lookup(language, self.message_key())
    }
}

impl From<BackendError> for AuthError {
    fn from(error: BackendError) -> Self {
        match error.message() {
            Some(message) if message.contains("Invalid login credentials") => {
                AuthError::InvalidCredentials
            }
            Some(message) if message.contains("User already registered") => {
                AuthError::DuplicateEmail
            }
            _ => AuthError::Failed(error),
        }
    }
}

/// Counted in characters, not bytes, so Khmer names are measured fairly.
pub fn validate_full_name(name: &str) -> Result<(), AuthError> {
    if name.trim().chars().count() < MIN_NAME_CHARS {
        return Err(AuthError::NameTooShort);
    }
    Ok(())
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    #[default]
    Checking,
    SignedOut,
    SignedIn,
}

#[derive(Clone, Debug, Default)]
pub struct AuthState {
    session: Option<Session>,
    status: AuthStatus,
    error: Option<&'static str>,
    busy: bool,
    awaiting_confirmation: bool,
}

impl AuthState {
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn status(&self) -> AuthStatus {
        self.status
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Claims the form for one request. Rejected while another is running.
    pub fn begin(&mut self) -> bool {
        if self.busy {
            return false;
        }
        self.busy = true;
        self.error = None;
        self.awaiting_confirmation = false;
        true
    }

    pub fn finish(&mut self) {
        self.busy = false;
    }

    pub fn fail(&mut self, error: &AuthError) {
        log::warn!("Authentication error: {error}");
        self.busy = false;
        self.error = Some(error.message_key());
    }

    pub fn set_session(&mut self, session: Option<Session>) {
        self.status = if session.is_some() {
            AuthStatus::SignedIn
        } else {
            AuthStatus::SignedOut
        };
        self.session = session;
    }

    pub fn await_confirmation(&mut self) {
        self.awaiting_confirmation = true;
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn view(&self, language: AppLanguage) -> AuthView {
        AuthView {
            status: self.status,
            email: self.session.as_ref().and_then(|s| s.email.clone()),
            error: self.error.map(|key| i18n::lookup(language, key)),
            busy: self.busy,
            awaiting_confirmation: self.awaiting_confirmation,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct AuthView {
    pub status: AuthStatus,
    pub email: Option<String>,
    pub error: Option<String>,
    pub busy: bool,
    pub awaiting_confirmation: bool,
}
