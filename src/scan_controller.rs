//! Scan submission controller.
//!
//! Drives exactly one image through the classifier at a time and owns
//! the scan slice of the `DashboardStore`. Every accepted submission is
//! tagged with a monotonic sequence number; `clear()` bumps the
//! sequence, so a response arriving for a superseded submission is
//! discarded instead of resurrecting stale state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::api::{ApiError, ScanService};
use crate::models::ScanResult;
use crate::store::{DashboardStore, StoreError};

/// Errors surfaced by scan submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    /// A submission is already in flight; concurrent submissions are
    /// rejected rather than queued.
    #[error("A scan is already in progress")]
    SubmissionInFlight,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One image payload to analyze.
#[derive(Debug, Clone)]
pub struct ScanUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl ScanUpload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }
}

enum Begin {
    Started,
    Busy,
    NoSession,
}

/// Single-shot upload → inference → result lifecycle.
pub struct ScanSubmissionController {
    store: Arc<DashboardStore>,
    service: Arc<dyn ScanService>,
    /// Sequence of the most recently issued submission (or clear).
    seq: AtomicU64,
}

impl ScanSubmissionController {
    pub fn new(store: Arc<DashboardStore>, service: Arc<dyn ScanService>) -> Self {
        Self {
            store,
            service,
            seq: AtomicU64::new(0),
        }
    }

    /// Submit one image for analysis.
    ///
    /// Fails immediately with `Unauthenticated` (no network call) when
    /// no session is live, and with `SubmissionInFlight` while a prior
    /// submission is still scanning. On acceptance the prior
    /// result/error is cleared and the controller ends in exactly one
    /// terminal state: result set, or error set.
    pub async fn submit(&self, upload: ScanUpload) -> Result<ScanResult, ScanError> {
        let token = self.store.session()?.map(|s| s.access_token);

        let begin = self.store.with_scan_mut(|s| {
            if s.scanning {
                return Begin::Busy;
            }
            if token.is_none() {
                s.result = None;
                s.error = Some(ApiError::Unauthenticated.to_string());
                return Begin::NoSession;
            }
            s.scanning = true;
            s.result = None;
            s.error = None;
            Begin::Started
        })?;

        let token = match (begin, token) {
            (Begin::Busy, _) => return Err(ScanError::SubmissionInFlight),
            (Begin::NoSession, _) | (Begin::Started, None) => {
                return Err(ApiError::Unauthenticated.into())
            }
            (Begin::Started, Some(token)) => token,
        };

        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(seq, filename = %upload.filename, "submitting scan");

        let outcome = self
            .service
            .predict(&token, &upload.filename, upload.bytes)
            .await;

        let committed = self.store.with_scan_mut(|s| {
            if self.seq.load(Ordering::SeqCst) != seq {
                return false;
            }
            s.scanning = false;
            match &outcome {
                Ok(result) => {
                    s.result = Some(result.clone());
                    s.error = None;
                }
                Err(e) => {
                    s.result = None;
                    s.error = Some(e.to_string());
                }
            }
            true
        })?;

        if !committed {
            tracing::debug!(seq, "discarding stale scan response");
        }

        outcome.map_err(Into::into)
    }

    /// Discard the current result/error and return to idle.
    ///
    /// Safe mid-scan: the in-flight call is not cancelled, but its
    /// response is superseded and will be ignored on arrival.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.seq.fetch_add(1, Ordering::SeqCst);
        self.store.with_scan_mut(|s| {
            s.scanning = false;
            s.result = None;
            s.error = None;
        })
    }
}
