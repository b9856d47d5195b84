//! History cache controller.
//!
//! Owns the history slice: a read-through copy of the remote scan list.
//! `refresh()` is a full resync (the whole cached sequence is replaced
//! atomically, last-issued-wins); `delete()` removes an entry only after
//! the server confirms, because the remote delete also removes backing
//! storage and an optimistic removal would imply data loss that didn't
//! happen. Concurrent deletes for the same id collapse into one call.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::api::{ApiError, ScanService};
use crate::store::{DashboardStore, StoreError};

/// Errors surfaced by history operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    /// `confirm_staged` with nothing staged.
    #[error("No deletion staged")]
    NothingStaged,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Ordered, de-duplicated local view of the user's scans.
pub struct HistoryCache {
    store: Arc<DashboardStore>,
    service: Arc<dyn ScanService>,
    /// Sequence of the most recently issued refresh.
    refresh_seq: AtomicU64,
    /// Scan ids with a delete currently in flight.
    deletes_in_flight: Mutex<HashSet<String>>,
}

impl HistoryCache {
    pub fn new(store: Arc<DashboardStore>, service: Arc<dyn ScanService>) -> Self {
        Self {
            store,
            service,
            refresh_seq: AtomicU64::new(0),
            deletes_in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Re-synchronize the cached list with the remote store.
    ///
    /// With no live session this is a silent no-op: the cache and error
    /// slot stay untouched and no network call is made. Otherwise the
    /// fetched list replaces the cached sequence wholesale; when
    /// refreshes overlap, only the most recently issued one commits.
    pub async fn refresh(&self) -> Result<(), HistoryError> {
        let token = match self.store.session()? {
            Some(session) => session.access_token,
            None => {
                tracing::debug!("refresh skipped, no session");
                return Ok(());
            }
        };

        let seq = self.refresh_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.store.with_history_mut(|h| {
            h.loading = true;
            h.error = None;
        })?;

        let outcome = self.service.list_scans(&token).await;

        let committed = self.store.with_history_mut(|h| {
            if self.refresh_seq.load(Ordering::SeqCst) != seq {
                return false;
            }
            h.loading = false;
            match &outcome {
                Ok(scans) => {
                    h.scans = scans.clone();
                    h.error = None;
                }
                Err(e) => {
                    h.error = Some(e.to_string());
                }
            }
            true
        })?;

        if !committed {
            tracing::debug!(seq, "discarding stale refresh result");
            return Ok(());
        }

        outcome.map(|_| ()).map_err(Into::into)
    }

    /// Delete one scan, server-first.
    ///
    /// Returns `Ok(true)` when the entry was confirmed deleted and
    /// removed from the cache, `Ok(false)` when the call collapsed into
    /// an already-in-flight delete for the same id. On failure the cache
    /// is left unchanged and the error is surfaced; a missing record is
    /// a distinct `NotFound` (the service answers 404 for it).
    pub async fn delete(&self, scan_id: &str) -> Result<bool, HistoryError> {
        let token = match self.store.session()? {
            Some(session) => session.access_token,
            None => {
                self.store
                    .with_history_mut(|h| h.error = Some(ApiError::Unauthenticated.to_string()))?;
                return Err(ApiError::Unauthenticated.into());
            }
        };

        {
            let mut in_flight = self
                .deletes_in_flight
                .lock()
                .map_err(|_| StoreError::LockPoisoned)?;
            if !in_flight.insert(scan_id.to_string()) {
                tracing::debug!(scan_id, "delete already in flight, collapsing");
                return Ok(false);
            }
        }

        let outcome = self.service.delete_scan(&token, scan_id).await;

        if let Ok(mut in_flight) = self.deletes_in_flight.lock() {
            in_flight.remove(scan_id);
        }

        match outcome {
            Ok(()) => {
                tracing::info!(scan_id, "scan deleted");
                self.store.with_history_mut(|h| {
                    h.scans.retain(|r| r.id != scan_id);
                    if h.staged_deletion.as_deref() == Some(scan_id) {
                        h.staged_deletion = None;
                    }
                    h.error = None;
                })?;
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(scan_id, "delete failed: {e}");
                self.store
                    .with_history_mut(|h| h.error = Some(e.to_string()))?;
                Err(e.into())
            }
        }
    }

    // ── Delete confirmation staging ─────────────────────────
    //
    // The UI serializes delete confirmations: at most one staged
    // deletion exists, and staging a second id replaces the first.

    /// Stage a scan for deletion pending user confirmation.
    pub fn stage_delete(&self, scan_id: &str) -> Result<(), StoreError> {
        self.store
            .with_history_mut(|h| h.staged_deletion = Some(scan_id.to_string()))
    }

    /// The scan id currently awaiting confirmation, if any.
    pub fn staged_deletion(&self) -> Result<Option<String>, StoreError> {
        Ok(self.store.history()?.staged_deletion)
    }

    /// Drop the staged deletion without deleting anything.
    pub fn cancel_staged(&self) -> Result<(), StoreError> {
        self.store.with_history_mut(|h| h.staged_deletion = None)
    }

    /// Execute the staged deletion. The staging is cleared whether the
    /// delete succeeds or fails (the confirmation dialog closes either
    /// way); on failure the record itself stays in the cache.
    pub async fn confirm_staged(&self) -> Result<bool, HistoryError> {
        let staged = self.staged_deletion()?.ok_or(HistoryError::NothingStaged)?;
        let outcome = self.delete(&staged).await;
        self.store.with_history_mut(|h| {
            if h.staged_deletion.as_deref() == Some(staged.as_str()) {
                h.staged_deletion = None;
            }
        })?;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockScanService;
    use crate::models::{PredictionLabel, ScanRecord, Session};
    use crate::store::AuthPhase;
    use chrono::{TimeZone, Utc};

    fn authed_store() -> Arc<DashboardStore> {
        let store = Arc::new(DashboardStore::new());
        store
            .with_auth_mut(|a| {
                a.phase = AuthPhase::Authenticated;
                a.session = Some(Session {
                    access_token: "tok".into(),
                    refresh_token: None,
                    expires_at: None,
                    user_id: "u-1".into(),
                    email: "doc@clinic.test".into(),
                });
            })
            .unwrap();
        store
    }

    fn record(id: &str, minute: u32) -> ScanRecord {
        ScanRecord {
            id: id.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 14, 9, 59 - minute, 0).unwrap(),
            prediction_label: PredictionLabel::Benign,
            confidence_score: 0.8,
            original_image_url: format!("https://cdn.example/scans/{id}.png"),
            annotated_image_url: None,
        }
    }

    fn three_records() -> Vec<ScanRecord> {
        vec![record("first", 0), record("second", 1), record("third", 2)]
    }

    #[tokio::test]
    async fn refresh_replaces_cache_wholesale() {
        let store = authed_store();
        let mock = Arc::new(MockScanService::new());
        mock.push_list(Ok(three_records()));
        let cache = HistoryCache::new(store.clone(), mock);

        cache.refresh().await.unwrap();

        let history = store.history().unwrap();
        assert_eq!(history.scans.len(), 3);
        assert!(!history.loading);
        assert!(history.error.is_none());
    }

    #[tokio::test]
    async fn refresh_without_session_is_silent_noop() {
        let store = Arc::new(DashboardStore::new());
        let mock = Arc::new(MockScanService::new());
        let cache = HistoryCache::new(store.clone(), mock.clone());

        cache.refresh().await.unwrap();

        assert_eq!(mock.list_calls(), 0);
        let history = store.history().unwrap();
        assert!(history.scans.is_empty());
        assert!(history.error.is_none(), "no error for the anonymous no-op");
    }

    #[tokio::test]
    async fn refresh_failure_records_error_and_keeps_cache() {
        let store = authed_store();
        let mock = Arc::new(MockScanService::new());
        mock.push_list(Ok(three_records()));
        mock.push_list(Err(ApiError::Network("unreachable".into())));
        let cache = HistoryCache::new(store.clone(), mock);

        cache.refresh().await.unwrap();
        assert!(cache.refresh().await.is_err());

        let history = store.history().unwrap();
        assert_eq!(history.scans.len(), 3, "cache unchanged on failure");
        assert!(!history.loading, "never left stuck in loading");
        assert!(history.error.as_deref().unwrap().contains("unreachable"));
    }

    #[tokio::test]
    async fn stale_refresh_result_is_discarded() {
        let store = authed_store();
        let mock = Arc::new(MockScanService::new());
        let gate = MockScanService::gate();
        // The older refresh would answer with a single outdated record.
        mock.push_list_gated(Ok(vec![record("outdated", 9)]), gate.clone());
        mock.push_list(Ok(three_records()));
        let cache = Arc::new(HistoryCache::new(store.clone(), mock));

        let stale = tokio::spawn({
            let cache = cache.clone();
            async move { cache.refresh().await }
        });
        tokio::task::yield_now().await;

        cache.refresh().await.unwrap();
        assert_eq!(store.history().unwrap().scans.len(), 3);

        gate.notify_one();
        stale.await.unwrap().unwrap();

        let history = store.history().unwrap();
        assert_eq!(history.scans.len(), 3, "latest issued refresh wins");
        assert_eq!(history.scans[0].id, "first");
        assert!(!history.loading);
    }

    #[tokio::test]
    async fn delete_removes_exactly_one_entry_preserving_order() {
        let store = authed_store();
        let mock = Arc::new(MockScanService::new());
        mock.push_list(Ok(three_records()));
        mock.push_delete(Ok(()));
        let cache = HistoryCache::new(store.clone(), mock.clone());

        cache.refresh().await.unwrap();
        assert!(cache.delete("second").await.unwrap());

        let ids: Vec<_> = store
            .history()
            .unwrap()
            .scans
            .iter()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(ids, vec!["first", "third"]);
        assert_eq!(mock.deleted_ids(), vec!["second"]);
    }

    #[tokio::test]
    async fn failed_delete_leaves_cache_unchanged() {
        let store = authed_store();
        let mock = Arc::new(MockScanService::new());
        mock.push_list(Ok(three_records()));
        mock.push_delete(Err(ApiError::Rejected("storage backend down".into())));
        let cache = HistoryCache::new(store.clone(), mock);

        cache.refresh().await.unwrap();
        let before = store.history().unwrap().scans;

        assert!(cache.delete("second").await.is_err());

        let history = store.history().unwrap();
        assert_eq!(history.scans, before, "no optimistic removal");
        assert_eq!(history.error.as_deref(), Some("storage backend down"));
    }

    #[tokio::test]
    async fn delete_of_missing_record_surfaces_not_found() {
        let store = authed_store();
        let mock = Arc::new(MockScanService::new());
        mock.push_delete(Err(ApiError::NotFound));
        let cache = HistoryCache::new(store.clone(), mock);

        let err = cache.delete("gone").await.unwrap_err();
        assert_eq!(err, HistoryError::Api(ApiError::NotFound));
    }

    #[tokio::test]
    async fn delete_without_session_makes_no_network_call() {
        let store = Arc::new(DashboardStore::new());
        let mock = Arc::new(MockScanService::new());
        let cache = HistoryCache::new(store, mock.clone());

        assert!(cache.delete("first").await.is_err());
        assert_eq!(mock.delete_calls(), 0);
    }

    #[tokio::test]
    async fn concurrent_deletes_for_same_id_collapse_to_one_call() {
        let store = authed_store();
        let mock = Arc::new(MockScanService::new());
        let gate = MockScanService::gate();
        mock.push_delete_gated(Ok(()), gate.clone());
        let cache = Arc::new(HistoryCache::new(store, mock.clone()));

        let first = tokio::spawn({
            let cache = cache.clone();
            async move { cache.delete("scan-1").await }
        });
        tokio::task::yield_now().await;

        // Second request for the same id while the first is in flight
        assert_eq!(cache.delete("scan-1").await.unwrap(), false);
        assert_eq!(mock.delete_calls(), 1, "exactly one network delete");

        gate.notify_one();
        assert!(first.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn deletes_for_different_ids_proceed_independently() {
        let store = authed_store();
        let mock = Arc::new(MockScanService::new());
        let gate = MockScanService::gate();
        mock.push_delete_gated(Ok(()), gate.clone());
        mock.push_delete(Ok(()));
        let cache = Arc::new(HistoryCache::new(store, mock.clone()));

        let first = tokio::spawn({
            let cache = cache.clone();
            async move { cache.delete("scan-1").await }
        });
        tokio::task::yield_now().await;

        assert!(cache.delete("scan-2").await.unwrap());
        assert_eq!(mock.delete_calls(), 2);

        gate.notify_one();
        assert!(first.await.unwrap().unwrap());
        assert_eq!(mock.deleted_ids(), vec!["scan-1", "scan-2"]);
    }

    #[tokio::test]
    async fn staging_flow() {
        let store = authed_store();
        let mock = Arc::new(MockScanService::new());
        mock.push_list(Ok(three_records()));
        mock.push_delete(Ok(()));
        let cache = HistoryCache::new(store.clone(), mock);

        cache.refresh().await.unwrap();

        assert_eq!(
            cache.confirm_staged().await.unwrap_err(),
            HistoryError::NothingStaged
        );

        cache.stage_delete("second").unwrap();
        cache.stage_delete("third").unwrap();
        assert_eq!(cache.staged_deletion().unwrap().as_deref(), Some("third"));

        cache.cancel_staged().unwrap();
        assert!(cache.staged_deletion().unwrap().is_none());

        cache.stage_delete("second").unwrap();
        assert!(cache.confirm_staged().await.unwrap());
        assert!(cache.staged_deletion().unwrap().is_none());
        assert_eq!(store.history().unwrap().scans.len(), 2);
    }

    #[tokio::test]
    async fn failed_confirm_clears_staging_but_keeps_record() {
        let store = authed_store();
        let mock = Arc::new(MockScanService::new());
        mock.push_list(Ok(three_records()));
        mock.push_delete(Err(ApiError::Network("unreachable".into())));
        let cache = HistoryCache::new(store.clone(), mock);

        cache.refresh().await.unwrap();
        cache.stage_delete("second").unwrap();

        assert!(cache.confirm_staged().await.is_err());
        assert!(cache.staged_deletion().unwrap().is_none(), "dialog closes");
        assert_eq!(store.history().unwrap().scans.len(), 3);
    }
}
