//! HTTP surface of the inference/history service.
//!
//! One trait seam (`ScanService`) with two implementations: the real
//! reqwest client and a scriptable mock for controller tests. All
//! collaborator failures are normalized into `ApiError` here — nothing
//! above this module sees a raw `reqwest::Error`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config;
use crate::models::{ScanRecord, ScanResult};

/// Default request timeout for the inference service. Model inference on
/// large mammograms can take a while on CPU-only deployments.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

// ═══════════════════════════════════════════════════════════
// ApiError — the remote-call error taxonomy
// ═══════════════════════════════════════════════════════════

/// Classified outcome of a failed remote call.
///
/// `Rejected` renders as the bare service message so the store surfaces
/// exactly what the service said (e.g. "model unavailable").
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Not authenticated")]
    Unauthenticated,
    #[error("Network failure: {0}")]
    Network(String),
    #[error("{0}")]
    Rejected(String),
    #[error("Malformed response from service: {0}")]
    Malformed(String),
    #[error("Scan not found")]
    NotFound,
}

/// Error body the service returns on non-2xx: `{"error": "..."}`.
#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Response body from `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub model_loaded: bool,
}

// ═══════════════════════════════════════════════════════════
// ScanService trait
// ═══════════════════════════════════════════════════════════

/// Remote inference/history operations the controllers depend on.
#[async_trait]
pub trait ScanService: Send + Sync {
    /// `POST /predict` — run one image through the classifier.
    async fn predict(
        &self,
        token: &str,
        filename: &str,
        image: Vec<u8>,
    ) -> Result<ScanResult, ApiError>;

    /// `GET /scans` — full scan list, newest first.
    async fn list_scans(&self, token: &str) -> Result<Vec<ScanRecord>, ApiError>;

    /// `DELETE /scans/{id}` — remove one scan and its backing storage.
    async fn delete_scan(&self, token: &str, scan_id: &str) -> Result<(), ApiError>;

    /// `GET /health` — service liveness and model state.
    async fn health(&self) -> Result<HealthStatus, ApiError>;
}

// ═══════════════════════════════════════════════════════════
// HttpScanService — reqwest implementation
// ═══════════════════════════════════════════════════════════

/// reqwest-backed `ScanService`.
pub struct HttpScanService {
    base_url: String,
    client: reqwest::Client,
}

impl HttpScanService {
    /// Create a client against the given base URL.
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Client against the configured service URL (env or local default).
    pub fn from_env() -> Self {
        Self::new(&config::api_base_url(), DEFAULT_TIMEOUT_SECS)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn transport_error(e: reqwest::Error) -> ApiError {
        if e.is_timeout() {
            ApiError::Network("request timed out".to_string())
        } else if e.is_connect() {
            ApiError::Network(format!("connection failed: {e}"))
        } else {
            ApiError::Network(e.to_string())
        }
    }

    /// Map a non-2xx response to `Rejected` / `NotFound`, reading the
    /// service's `{"error": ...}` body when it has one.
    async fn rejection(response: reqwest::Response) -> ApiError {
        let status = response.status();
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => format!("service returned HTTP {}", status.as_u16()),
        };
        if status == reqwest::StatusCode::NOT_FOUND {
            ApiError::NotFound
        } else {
            ApiError::Rejected(message)
        }
    }
}

#[async_trait]
impl ScanService for HttpScanService {
    async fn predict(
        &self,
        token: &str,
        filename: &str,
        image: Vec<u8>,
    ) -> Result<ScanResult, ApiError> {
        let url = format!("{}/predict", self.base_url);
        let part = reqwest::multipart::Part::bytes(image).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        response
            .json::<ScanResult>()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))
    }

    async fn list_scans(&self, token: &str) -> Result<Vec<ScanRecord>, ApiError> {
        let url = format!("{}/scans", self.base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        response
            .json::<Vec<ScanRecord>>()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))
    }

    async fn delete_scan(&self, token: &str, scan_id: &str) -> Result<(), ApiError> {
        let url = format!("{}/scans/{}", self.base_url, scan_id);

        let response = self
            .client
            .delete(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(())
    }

    async fn health(&self) -> Result<HealthStatus, ApiError> {
        let url = format!("{}/health", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        response
            .json::<HealthStatus>()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════
// MockScanService — scriptable collaborator for tests
// ═══════════════════════════════════════════════════════════

/// Scriptable `ScanService` for controller tests.
///
/// Responses are queued per operation and consumed in order. A queued
/// response may carry a gate (`tokio::sync::Notify`): the mock parks on
/// it before answering, letting tests stage out-of-order completions
/// deterministically. Call counters let tests assert how many network
/// calls were actually made.
#[derive(Default)]
pub struct MockScanService {
    predict: std::sync::Mutex<std::collections::VecDeque<Scripted<ScanResult>>>,
    list: std::sync::Mutex<std::collections::VecDeque<Scripted<Vec<ScanRecord>>>>,
    delete: std::sync::Mutex<std::collections::VecDeque<Scripted<()>>>,
    predict_calls: std::sync::atomic::AtomicUsize,
    list_calls: std::sync::atomic::AtomicUsize,
    delete_calls: std::sync::atomic::AtomicUsize,
    deleted_ids: std::sync::Mutex<Vec<String>>,
}

struct Scripted<T> {
    result: Result<T, ApiError>,
    gate: Option<std::sync::Arc<tokio::sync::Notify>>,
}

impl MockScanService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a gate for staging a delayed response. The mock parks on it
    /// until the test calls `notify_one()`.
    pub fn gate() -> std::sync::Arc<tokio::sync::Notify> {
        std::sync::Arc::new(tokio::sync::Notify::new())
    }

    pub fn push_predict(&self, result: Result<ScanResult, ApiError>) {
        self.predict.lock().unwrap().push_back(Scripted { result, gate: None });
    }

    pub fn push_predict_gated(
        &self,
        result: Result<ScanResult, ApiError>,
        gate: std::sync::Arc<tokio::sync::Notify>,
    ) {
        self.predict
            .lock()
            .unwrap()
            .push_back(Scripted { result, gate: Some(gate) });
    }

    pub fn push_list(&self, result: Result<Vec<ScanRecord>, ApiError>) {
        self.list.lock().unwrap().push_back(Scripted { result, gate: None });
    }

    pub fn push_list_gated(
        &self,
        result: Result<Vec<ScanRecord>, ApiError>,
        gate: std::sync::Arc<tokio::sync::Notify>,
    ) {
        self.list
            .lock()
            .unwrap()
            .push_back(Scripted { result, gate: Some(gate) });
    }

    pub fn push_delete(&self, result: Result<(), ApiError>) {
        self.delete.lock().unwrap().push_back(Scripted { result, gate: None });
    }

    pub fn push_delete_gated(
        &self,
        result: Result<(), ApiError>,
        gate: std::sync::Arc<tokio::sync::Notify>,
    ) {
        self.delete
            .lock()
            .unwrap()
            .push_back(Scripted { result, gate: Some(gate) });
    }

    pub fn predict_calls(&self) -> usize {
        self.predict_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Identifiers passed to `delete_scan`, in call order.
    pub fn deleted_ids(&self) -> Vec<String> {
        self.deleted_ids.lock().unwrap().clone()
    }

    async fn answer<T>(
        queue: &std::sync::Mutex<std::collections::VecDeque<Scripted<T>>>,
    ) -> Result<T, ApiError> {
        let scripted = queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("MockScanService: no scripted response left"));
        if let Some(gate) = scripted.gate {
            gate.notified().await;
        }
        scripted.result
    }
}

#[async_trait]
impl ScanService for MockScanService {
    async fn predict(
        &self,
        _token: &str,
        _filename: &str,
        _image: Vec<u8>,
    ) -> Result<ScanResult, ApiError> {
        self.predict_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Self::answer(&self.predict).await
    }

    async fn list_scans(&self, _token: &str) -> Result<Vec<ScanRecord>, ApiError> {
        self.list_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Self::answer(&self.list).await
    }

    async fn delete_scan(&self, _token: &str, scan_id: &str) -> Result<(), ApiError> {
        self.delete_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.deleted_ids.lock().unwrap().push(scan_id.to_string());
        Self::answer(&self.delete).await
    }

    async fn health(&self) -> Result<HealthStatus, ApiError> {
        Ok(HealthStatus {
            status: "healthy".to_string(),
            model_loaded: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PredictionLabel;

    fn result(confidence: f32) -> ScanResult {
        ScanResult {
            prediction: PredictionLabel::Benign,
            confidence,
            image_url: None,
            annotated_url: None,
            raw_output: vec![],
        }
    }

    #[test]
    fn rejected_error_displays_bare_message() {
        let err = ApiError::Rejected("model unavailable".to_string());
        assert_eq!(err.to_string(), "model unavailable");
    }

    #[test]
    fn network_error_mentions_transport() {
        let err = ApiError::Network("request timed out".to_string());
        assert!(err.to_string().contains("Network failure"));
    }

    #[test]
    fn http_service_trims_trailing_slash() {
        let service = HttpScanService::new("http://localhost:5000/", 30);
        assert_eq!(service.base_url(), "http://localhost:5000");
    }

    #[test]
    fn from_env_uses_configured_base() {
        if std::env::var(crate::config::API_URL_ENV).is_err() {
            let service = HttpScanService::from_env();
            assert_eq!(service.base_url(), crate::config::DEFAULT_API_URL);
        }
    }

    #[tokio::test]
    async fn mock_consumes_responses_in_order() {
        let mock = MockScanService::new();
        mock.push_predict(Ok(result(0.6)));
        mock.push_predict(Err(ApiError::Rejected("down".into())));

        let first = mock.predict("tok", "a.png", vec![1]).await.unwrap();
        assert!((first.confidence - 0.6).abs() < f32::EPSILON);

        let second = mock.predict("tok", "b.png", vec![2]).await;
        assert_eq!(second, Err(ApiError::Rejected("down".into())));
        assert_eq!(mock.predict_calls(), 2);
    }

    #[tokio::test]
    async fn mock_gate_parks_until_notified() {
        let mock = std::sync::Arc::new(MockScanService::new());
        let gate = MockScanService::gate();
        mock.push_delete_gated(Ok(()), gate.clone());

        let task = tokio::spawn({
            let mock = mock.clone();
            async move { mock.delete_scan("tok", "scan-1").await }
        });
        tokio::task::yield_now().await;
        assert_eq!(mock.delete_calls(), 1, "call entered before gate opens");

        gate.notify_one();
        assert_eq!(task.await.unwrap(), Ok(()));
        assert_eq!(mock.deleted_ids(), vec!["scan-1".to_string()]);
    }
}
