//! GoTrue-backed identity provider.
//!
//! Talks to the Supabase auth REST surface (`/auth/v1/...`) and keeps
//! the issued tokens in memory, refreshing the access token when it
//! nears expiry. The rest of the crate only sees the `IdentityProvider`
//! trait and `Session` values.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthError, IdentityProvider};
use crate::models::Session;

/// Env vars naming the Supabase project and its public (anon) API key.
pub const SUPABASE_URL_ENV: &str = "SUPABASE_URL";
pub const SUPABASE_ANON_KEY_ENV: &str = "SUPABASE_ANON_KEY";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Refresh this many seconds before the reported expiry, so a token
/// handed to the inference service does not expire mid-request.
const EXPIRY_SKEW_SECS: i64 = 30;

/// Supabase auth client implementing `IdentityProvider`.
pub struct SupabaseAuth {
    base_url: String,
    anon_key: String,
    client: reqwest::Client,
    /// Last issued session. tokio Mutex: held across the refresh call
    /// so overlapping resolutions do not refresh twice.
    session: tokio::sync::Mutex<Option<Session>>,
}

// ── Wire types ──────────────────────────────────────────────

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct EmailOnly<'a> {
    email: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    expires_in: Option<i64>,
    user: TokenUser,
}

#[derive(Deserialize)]
struct TokenUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// GoTrue error bodies vary by endpoint and version; probe the known
/// message fields in order.
#[derive(Default, Deserialize)]
struct GotrueErrorBody {
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl GotrueErrorBody {
    fn into_message(self, status: u16) -> String {
        self.error_description
            .or(self.msg)
            .or(self.message)
            .or(self.error)
            .unwrap_or_else(|| format!("identity provider returned HTTP {status}"))
    }
}

impl SupabaseAuth {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            client,
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Build from `SUPABASE_URL` / `SUPABASE_ANON_KEY`; `None` when
    /// either is unset (the dashboard then runs anonymous-only).
    pub fn from_env() -> Option<Self> {
        let url = std::env::var(SUPABASE_URL_ENV).ok()?;
        let key = std::env::var(SUPABASE_ANON_KEY_ENV).ok()?;
        Some(Self::new(&url, &key))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.base_url)
    }

    fn transport_error(e: reqwest::Error) -> AuthError {
        if e.is_timeout() {
            AuthError::Network("request timed out".to_string())
        } else if e.is_connect() {
            AuthError::Network(format!("connection failed: {e}"))
        } else {
            AuthError::Network(e.to_string())
        }
    }

    async fn rejection(response: reqwest::Response) -> AuthError {
        let status = response.status().as_u16();
        let body = response
            .json::<GotrueErrorBody>()
            .await
            .unwrap_or_default();
        AuthError::Provider(body.into_message(status))
    }

    /// Expiry claim from the JWT payload, for token responses that omit
    /// `expires_in`.
    fn jwt_exp(access_token: &str) -> Option<DateTime<Utc>> {
        use base64::Engine;

        let payload = access_token.split('.').nth(1)?;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .ok()?;
        let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
        let exp = claims.get("exp")?.as_i64()?;
        DateTime::from_timestamp(exp, 0)
    }

    fn session_from_token(token: TokenResponse, now: DateTime<Utc>) -> Session {
        let expires_at = token
            .expires_in
            .map(|secs| now + chrono::Duration::seconds((secs - EXPIRY_SKEW_SECS).max(0)))
            .or_else(|| {
                Self::jwt_exp(&token.access_token)
                    .map(|exp| exp - chrono::Duration::seconds(EXPIRY_SKEW_SECS))
            });
        Session {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at,
            user_id: token.user.id,
            email: token.user.email.unwrap_or_default(),
        }
    }

    /// POST to a token endpoint and map the response into a `Session`.
    async fn token_request<B: Serialize>(
        &self,
        grant_type: &str,
        body: &B,
    ) -> Result<Session, AuthError> {
        let url = format!("{}?grant_type={grant_type}", self.auth_url("token"));
        let response = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(body)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        Ok(Self::session_from_token(token, Utc::now()))
    }

    /// Fire-and-confirm POST for the email flows (otp, signup, recover).
    async fn email_request<B: Serialize>(&self, url: String, body: &B) -> Result<(), AuthError> {
        let response = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(body)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for SupabaseAuth {
    async fn get_current_session(&self) -> Result<Option<Session>, AuthError> {
        let mut stored = self.session.lock().await;

        let session = match stored.as_ref() {
            None => return Ok(None),
            Some(s) => s.clone(),
        };

        if !session.is_expired(Utc::now()) {
            return Ok(Some(session));
        }

        let Some(refresh_token) = session.refresh_token.clone() else {
            tracing::debug!("session expired with no refresh token");
            *stored = None;
            return Ok(None);
        };

        tracing::debug!("refreshing expired access token");
        let refreshed = self
            .token_request(
                "refresh_token",
                &RefreshGrant {
                    refresh_token: &refresh_token,
                },
            )
            .await?;
        *stored = Some(refreshed.clone());
        Ok(Some(refreshed))
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let session = self
            .token_request("password", &PasswordGrant { email, password })
            .await?;
        *self.session.lock().await = Some(session.clone());
        Ok(session)
    }

    async fn sign_in_with_otp(&self, email: &str) -> Result<(), AuthError> {
        self.email_request(self.auth_url("otp"), &EmailOnly { email })
            .await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<(), AuthError> {
        self.email_request(self.auth_url("signup"), &PasswordGrant { email, password })
            .await
    }

    async fn request_password_reset(
        &self,
        email: &str,
        redirect_url: &str,
    ) -> Result<(), AuthError> {
        let url = format!(
            "{}?redirect_to={redirect_url}",
            self.auth_url("recover")
        );
        self.email_request(url, &EmailOnly { email }).await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let mut stored = self.session.lock().await;
        let Some(session) = stored.as_ref() else {
            return Ok(());
        };

        let response = self
            .client
            .post(self.auth_url("logout"))
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        *stored = None;
        Ok(())
    }
}
