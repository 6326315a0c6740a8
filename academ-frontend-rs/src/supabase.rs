//! Supabase auth (GoTrue) and profile RPCs over fetch.
use crate::backend::{AuthBackend, BackendError, ProfileBackend, Session, SignUpOutcome};
use fetch_happen::Client;
use language_utils::profile::{GetProfileParams, ProfileRow, ProfileRowUpdate, UpdateProfileParams};
use serde::Deserialize;
use serde_json::json;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct SupabaseConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

pub fn supabase_config() -> SupabaseConfig {
    SupabaseConfig {
        supabase_url: option_env!("ACADEM_SUPABASE_URL")
            .unwrap_or("https://academ.supabase.co")
            .to_string(),
        supabase_anon_key: option_env!("ACADEM_SUPABASE_ANON_KEY")
            .unwrap_or_default()
            .to_string(),
    }
}

#[derive(Deserialize)]
struct GoTrueUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// Token grant, or the bare user a sign-up returns while the email is unconfirmed.
#[derive(Deserialize)]
struct GoTrueResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    user: Option<GoTrueUser>,
}

impl GoTrueResponse {
    fn into_session(self) -> Option<Session> {
        let user = self.user?;
        Some(Session {
            access_token: self.access_token?,
            refresh_token: self.refresh_token,
            user_id: user.id,
            email: user.email,
            expires_at: self.expires_at,
        })
    }
}

// GoTrue has used all of these for the human-readable reason over time
#[derive(Deserialize, Default)]
struct GoTrueError {
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn error_message(body: &str) -> String {
    let parsed: GoTrueError = serde_json::from_str(body).unwrap_or_default();
    parsed
        .msg
        .or(parsed.error_description)
        .or(parsed.message)
        .or(parsed.error)
        .unwrap_or_else(|| body.to_string())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProfileRows {
    Many(Vec<ProfileRow>),
    One(ProfileRow),
}

pub struct Supabase {
    config: SupabaseConfig,
}

impl Supabase {
    pub fn new(config: SupabaseConfig) -> Self {
        Self { config }
    }

    async fn post(
        &self,
        path: &str,
        body: impl serde::Serialize,
        access_token: Option<&str>,
    ) -> Result<String, BackendError> {
        let SupabaseConfig {
            supabase_url,
            supabase_anon_key,
        } = &self.config;
        let bearer = access_token.unwrap_or(supabase_anon_key.as_str());

        let response = Client
            .post(format!("{supabase_url}{path}"))
            .header("apikey", supabase_anon_key)
            .header("Authorization", format!("Bearer {bearer}"))
            .json(&body)
            .map_err(BackendError::Request)?
            .send()
            .await
            .map_err(BackendError::Request)?;

        let ok = response.ok();
        let status = response.status().to_string();
        let text = response.text().await.map_err(BackendError::Request)?;
        if !ok {
            return Err(BackendError::Status {
                status,
                message: error_message(&text),
            });
        }
        Ok(text)
    }
}

impl AuthBackend for Supabase {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let body = self
            .post(
                "/auth/v1/token?grant_type=password",
                json!({ "email": email, "password": password }),
                None,
            )
            .await?;
        let response: GoTrueResponse = serde_json::from_str(&body)
            .map_err(|e| BackendError::Parse(format!("Failed to parse token grant: {e}")))?;
        response
            .into_session()
            .ok_or_else(|| BackendError::Parse("token grant carried no session".to_string()))
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<SignUpOutcome, BackendError> {
        let body = self
            .post(
                "/auth/v1/signup",
                json!({
                    "email": email,
                    "password": password,
                    "data": { "full_name": full_name },
                }),
                None,
            )
            .await?;
        let response: GoTrueResponse = serde_json::from_str(&body)
            .map_err(|e| BackendError::Parse(format!("Failed to parse sign-up response: {e}")))?;
        Ok(SignUpOutcome {
            session: response.into_session(),
        })
    }

    async fn sign_out(&self, session: &Session) -> Result<(), BackendError> {
        self.post("/auth/v1/logout", json!({}), Some(&session.access_token))
            .await?;
        Ok(())
    }

    async fn refresh(&self, session: &Session) -> Result<Session, BackendError> {
        let refresh_token = session
            .refresh_token
            .as_deref()
            .ok_or(BackendError::NotRefreshable)?;
        let body = self
            .post(
                "/auth/v1/token?grant_type=refresh_token",
                json!({ "refresh_token": refresh_token }),
                None,
            )
            .await?;
        let response: GoTrueResponse = serde_json::from_str(&body)
            .map_err(|e| BackendError::Parse(format!("Failed to parse refreshed session: {e}")))?;
        response
            .into_session()
            .ok_or_else(|| BackendError::Parse("refresh carried no session".to_string()))
    }

    fn oauth_url(&self, provider: &str, redirect_to: &str) -> String {
        format!(
            "{}/auth/v1/authorize?provider={}&redirect_to={}",
            self.config.supabase_url,
            urlencoding::encode(provider),
            urlencoding::encode(redirect_to)
        )
    }
}

impl ProfileBackend for Supabase {
    async fn fetch_profile(&self, session: &Session) -> Result<ProfileRow, BackendError> {
        let params = GetProfileParams {
            p_user_id: session.user_id.clone(),
        };
        let body = self
            .post("/rest/v1/rpc/get_profile", &params, Some(&session.access_token))
            .await?;
        let rows: ProfileRows = serde_json::from_str(&body).map_err(|e| {
            BackendError::Parse(format!("Failed to parse get_profile response: {e}. Body: {body}"))
        })?;
        let row = match rows {
            ProfileRows::One(row) => Some(row),
            ProfileRows::Many(rows) => rows.into_iter().next(),
        };
        // a brand new account may not have a row yet
        Ok(row.unwrap_or_else(|| ProfileRow {
            id: session.user_id.clone(),
            ..Default::default()
        }))
    }

    async fn update_profile(
        &self,
        session: &Session,
        update: &ProfileRowUpdate,
    ) -> Result<(), BackendError> {
        let params = UpdateProfileParams {
            p_user_id: session.user_id.clone(),
            p_updates: update.clone(),
        };
        self.post(
            "/rest/v1/rpc/update_profile",
            &params,
            Some(&session.access_token),
        )
        .await?;
        Ok(())
    }
}
