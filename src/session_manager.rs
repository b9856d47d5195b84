//! Session lifecycle controller.
//!
//! Owns the auth slice of the `DashboardStore`. Resolution runs
//! `Unresolved → Resolving → {Authenticated | Anonymous}`; sign-out is
//! the only path from `Authenticated` back to `Anonymous`, and a fresh
//! `resolve_session` is the only way back in (e.g. after an out-of-band
//! magic-link sign-in completes).

use std::sync::Arc;

use crate::auth::{AuthError, IdentityProvider};
use crate::models::Session;
use crate::store::{AuthPhase, DashboardStore, StoreError};

/// Errors surfaced by session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolves and holds the current session; leaf dependency for the scan
/// and history controllers.
pub struct SessionManager {
    store: Arc<DashboardStore>,
    provider: Arc<dyn IdentityProvider>,
}

impl SessionManager {
    pub fn new(store: Arc<DashboardStore>, provider: Arc<dyn IdentityProvider>) -> Self {
        Self { store, provider }
    }

    /// Resolve the current session from the identity provider.
    ///
    /// Never fails on provider errors: a failed lookup lands in
    /// `Anonymous` with the error recorded on the auth slice, so the
    /// dashboard always reaches a terminal (non-loading) auth state.
    pub async fn resolve_session(&self) -> Result<Option<Session>, StoreError> {
        self.store.with_auth_mut(|a| {
            a.phase = AuthPhase::Resolving;
            a.error = None;
        })?;

        match self.provider.get_current_session().await {
            Ok(Some(session)) => {
                tracing::debug!(user = %session.user_id, "session resolved");
                self.store.with_auth_mut(|a| {
                    a.phase = AuthPhase::Authenticated;
                    a.session = Some(session.clone());
                    a.error = None;
                })?;
                Ok(Some(session))
            }
            Ok(None) => {
                tracing::debug!("no live session, anonymous");
                self.store.with_auth_mut(|a| {
                    a.phase = AuthPhase::Anonymous;
                    a.session = None;
                })?;
                Ok(None)
            }
            Err(e) => {
                tracing::warn!("session resolution failed: {e}");
                self.store.with_auth_mut(|a| {
                    a.phase = AuthPhase::Anonymous;
                    a.session = None;
                    a.error = Some(e.to_string());
                })?;
                Ok(None)
            }
        }
    }

    /// Sign the current session out.
    ///
    /// Idempotent: with no live session this is a no-op success and no
    /// provider call is made. On provider failure the session is left
    /// untouched and the error is surfaced.
    pub async fn sign_out(&self) -> Result<(), SessionError> {
        if self.store.session()?.is_none() {
            return Ok(());
        }

        match self.provider.sign_out().await {
            Ok(()) => {
                tracing::info!("signed out");
                self.store.with_auth_mut(|a| {
                    a.phase = AuthPhase::Anonymous;
                    a.session = None;
                    a.error = None;
                })?;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("sign-out failed: {e}");
                self.store
                    .with_auth_mut(|a| a.error = Some(e.to_string()))?;
                Err(e.into())
            }
        }
    }

    /// Password sign-in; installs the returned session on success.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, SessionError> {
        match self.provider.sign_in_with_password(email, password).await {
            Ok(session) => {
                self.store.with_auth_mut(|a| {
                    a.phase = AuthPhase::Authenticated;
                    a.session = Some(session.clone());
                    a.error = None;
                })?;
                Ok(session)
            }
            Err(e) => {
                self.store
                    .with_auth_mut(|a| a.error = Some(e.to_string()))?;
                Err(e.into())
            }
        }
    }

    /// Send a one-time sign-in link. The session appears on the next
    /// `resolve_session` after the user follows it.
    pub async fn sign_in_with_otp(&self, email: &str) -> Result<(), SessionError> {
        self.provider.sign_in_with_otp(email).await?;
        Ok(())
    }

    /// Register a new account (confirmation email flow).
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<(), SessionError> {
        self.provider.sign_up(email, password).await?;
        Ok(())
    }

    /// Send a password-reset email.
    pub async fn request_password_reset(
        &self,
        email: &str,
        redirect_url: &str,
    ) -> Result<(), SessionError> {
        self.provider
            .request_password_reset(email, redirect_url)
            .await?;
        Ok(())
    }
}
