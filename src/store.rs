//! Shared dashboard state.
//!
//! `DashboardStore` is the single source of truth for the three state
//! slices (auth, scan submission, history). It is wrapped in `Arc` at
//! startup and handed to each controller explicitly — no ambient
//! singleton. Each controller mutates only its own slice through the
//! crate-private `with_*_mut` writer; everything else reads cloned
//! snapshots. Every mutation bumps a `watch` counter so a UI layer can
//! re-render on change without knowing anything about the controllers.

use std::sync::{RwLock, RwLockReadGuard};

use serde::Serialize;
use tokio::sync::watch;

use crate::models::{ScanRecord, ScanResult, ScanStats, Session};

/// Errors from store access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Internal lock error")]
    LockPoisoned,
}

// ═══════════════════════════════════════════════════════════
// State slices
// ═══════════════════════════════════════════════════════════

/// Where session resolution stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPhase {
    /// `resolve_session` has not been called yet.
    #[default]
    Unresolved,
    /// Resolution is in flight.
    Resolving,
    Authenticated,
    Anonymous,
}

/// Auth slice. Invariant: `session.is_some()` exactly when the phase is
/// `Authenticated`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuthState {
    pub phase: AuthPhase,
    pub session: Option<Session>,
    pub error: Option<String>,
}

impl AuthState {
    /// Whether resolution has not reached a terminal phase yet.
    pub fn loading(&self) -> bool {
        matches!(self.phase, AuthPhase::Unresolved | AuthPhase::Resolving)
    }
}

/// Scan submission slice: at most one of `result` / `error` is set once
/// `scanning` is false.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanState {
    pub scanning: bool,
    pub result: Option<ScanResult>,
    pub error: Option<String>,
}

/// History slice: read-through copy of the remote scan list, newest
/// first, plus the one staged delete confirmation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HistoryState {
    pub scans: Vec<ScanRecord>,
    pub loading: bool,
    pub error: Option<String>,
    /// Scan id awaiting user confirmation before deletion. At most one.
    pub staged_deletion: Option<String>,
}

impl HistoryState {
    /// Dashboard summary figures over the cached records.
    pub fn stats(&self) -> ScanStats {
        ScanStats::from_records(&self.scans)
    }
}

// ═══════════════════════════════════════════════════════════
// DashboardStore
// ═══════════════════════════════════════════════════════════

/// Process-wide dashboard state container.
pub struct DashboardStore {
    auth: RwLock<AuthState>,
    scan: RwLock<ScanState>,
    history: RwLock<HistoryState>,
    /// Bumped on every mutation; receivers re-read snapshots on change.
    changes: watch::Sender<u64>,
}

impl DashboardStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            auth: RwLock::new(AuthState::default()),
            scan: RwLock::new(ScanState::default()),
            history: RwLock::new(HistoryState::default()),
            changes,
        }
    }

    // ── Snapshots (read path) ───────────────────────────────

    pub fn auth(&self) -> Result<AuthState, StoreError> {
        Ok(self.read_auth()?.clone())
    }

    pub fn scan(&self) -> Result<ScanState, StoreError> {
        self.scan
            .read()
            .map(|g| g.clone())
            .map_err(|_| StoreError::LockPoisoned)
    }

    pub fn history(&self) -> Result<HistoryState, StoreError> {
        self.history
            .read()
            .map(|g| g.clone())
            .map_err(|_| StoreError::LockPoisoned)
    }

    /// Current session, if authenticated. The cross-slice read the two
    /// downstream controllers use to gate remote calls.
    pub fn session(&self) -> Result<Option<Session>, StoreError> {
        Ok(self.read_auth()?.session.clone())
    }

    /// Change counter value; increases on every mutation.
    pub fn version(&self) -> u64 {
        *self.changes.borrow()
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn read_auth(&self) -> Result<RwLockReadGuard<'_, AuthState>, StoreError> {
        self.auth.read().map_err(|_| StoreError::LockPoisoned)
    }

    // ── Mutation (designated-writer paths) ──────────────────
    //
    // Crate-private: SessionManager writes auth, the submission
    // controller writes scan, HistoryCache writes history.

    pub(crate) fn with_auth_mut<R>(
        &self,
        f: impl FnOnce(&mut AuthState) -> R,
    ) -> Result<R, StoreError> {
        let mut guard = self.auth.write().map_err(|_| StoreError::LockPoisoned)?;
        let out = f(&mut guard);
        drop(guard);
        self.bump();
        Ok(out)
    }

    pub(crate) fn with_scan_mut<R>(
        &self,
        f: impl FnOnce(&mut ScanState) -> R,
    ) -> Result<R, StoreError> {
        let mut guard = self.scan.write().map_err(|_| StoreError::LockPoisoned)?;
        let out = f(&mut guard);
        drop(guard);
        self.bump();
        Ok(out)
    }

    pub(crate) fn with_history_mut<R>(
        &self,
        f: impl FnOnce(&mut HistoryState) -> R,
    ) -> Result<R, StoreError> {
        let mut guard = self.history.write().map_err(|_| StoreError::LockPoisoned)?;
        let out = f(&mut guard);
        drop(guard);
        self.bump();
        Ok(out)
    }

    fn bump(&self) {
        self.changes.send_modify(|v| *v += 1);
    }
}

impl Default for DashboardStore {
    fn default() -> Self {
        Self::new()
    }
}
