//! Identity provider seam.
//!
//! The dashboard treats the auth provider as an opaque remote
//! collaborator: every call either yields a `Session` (or confirmation)
//! or a classified `AuthError`. `supabase_auth` holds the real GoTrue
//! implementation; tests inject `MockIdentityProvider`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::models::Session;

// ═══════════════════════════════════════════════════════════
// AuthError
// ═══════════════════════════════════════════════════════════

/// Classified failure from the identity provider.
///
/// `Provider` renders as the bare provider message (wrong password,
/// unconfirmed email, ...), matching what the login form shows.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Provider(String),
    #[error("Network failure: {0}")]
    Network(String),
    #[error("Malformed response from identity provider: {0}")]
    Malformed(String),
}

// ═══════════════════════════════════════════════════════════
// IdentityProvider trait
// ═══════════════════════════════════════════════════════════

/// Remote identity operations the session manager depends on.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Existing session, if one is live. `Ok(None)` is anonymous.
    async fn get_current_session(&self) -> Result<Option<Session>, AuthError>;

    /// Password sign-in; returns the new session.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError>;

    /// Send a one-time sign-in link. Sign-in completes out of band.
    async fn sign_in_with_otp(&self, email: &str) -> Result<(), AuthError>;

    /// Register a new account. Confirmation completes out of band.
    async fn sign_up(&self, email: &str, password: &str) -> Result<(), AuthError>;

    /// Send a password-reset email pointing at `redirect_url`.
    async fn request_password_reset(
        &self,
        email: &str,
        redirect_url: &str,
    ) -> Result<(), AuthError>;

    /// Invalidate the current session provider-side.
    async fn sign_out(&self) -> Result<(), AuthError>;
}

// ═══════════════════════════════════════════════════════════
// MockIdentityProvider — scriptable collaborator for tests
// ═══════════════════════════════════════════════════════════

/// Scriptable `IdentityProvider` for controller tests.
#[derive(Default)]
pub struct MockIdentityProvider {
    session: Mutex<Option<Session>>,
    resolve_failure: Mutex<Option<AuthError>>,
    sign_out_failure: Mutex<Option<AuthError>>,
    sign_out_calls: AtomicUsize,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider with an existing live session.
    pub fn with_session(session: Session) -> Self {
        let mock = Self::default();
        *mock.session.lock().unwrap() = Some(session);
        mock
    }

    /// Make `get_current_session` fail with the given error.
    pub fn fail_resolve(&self, error: AuthError) {
        *self.resolve_failure.lock().unwrap() = Some(error);
    }

    /// Make `sign_out` fail with the given error.
    pub fn fail_sign_out(&self, error: AuthError) {
        *self.sign_out_failure.lock().unwrap() = Some(error);
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn get_current_session(&self) -> Result<Option<Session>, AuthError> {
        if let Some(err) = self.resolve_failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.session.lock().unwrap().clone())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        if password.is_empty() {
            return Err(AuthError::Provider("Invalid login credentials".to_string()));
        }
        let session = Session {
            access_token: "mock-access-token".to_string(),
            refresh_token: Some("mock-refresh-token".to_string()),
            expires_at: None,
            user_id: "mock-user".to_string(),
            email: email.to_string(),
        };
        *self.session.lock().unwrap() = Some(session.clone());
        Ok(session)
    }

    async fn sign_in_with_otp(&self, _email: &str) -> Result<(), AuthError> {
        Ok(())
    }

    async fn sign_up(&self, _email: &str, _password: &str) -> Result<(), AuthError> {
        Ok(())
    }

    async fn request_password_reset(
        &self,
        _email: &str,
        _redirect_url: &str,
    ) -> Result<(), AuthError> {
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.sign_out_failure.lock().unwrap().clone() {
            return Err(err);
        }
        *self.session.lock().unwrap() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            access_token: "tok".into(),
            refresh_token: None,
            expires_at: None,
            user_id: "u-1".into(),
            email: "doc@clinic.test".into(),
        }
    }

    #[tokio::test]
    async fn mock_resolves_configured_session() {
        let provider = MockIdentityProvider::with_session(session());
        let resolved = provider.get_current_session().await.unwrap();
        assert_eq!(resolved.unwrap().user_id, "u-1");
    }

    #[tokio::test]
    async fn mock_resolve_failure() {
        let provider = MockIdentityProvider::new();
        provider.fail_resolve(AuthError::Network("dns".into()));
        assert!(provider.get_current_session().await.is_err());
    }

    #[tokio::test]
    async fn mock_sign_out_clears_session() {
        let provider = MockIdentityProvider::with_session(session());
        provider.sign_out().await.unwrap();
        assert!(provider.get_current_session().await.unwrap().is_none());
        assert_eq!(provider.sign_out_calls(), 1);
    }

    #[test]
    fn provider_error_displays_bare_message() {
        let err = AuthError::Provider("Invalid login credentials".into());
        assert_eq!(err.to_string(), "Invalid login credentials");
    }
}
