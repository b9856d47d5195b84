//! Wire and domain types shared by the dashboard controllers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════
// Session — authenticated identity
// ═══════════════════════════════════════════════════════════

/// Authenticated identity held by the client.
///
/// Replaced wholesale on sign-in / resolution, never mutated in place.
/// Absence of a `Session` is the anonymous state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque bearer credential sent to the inference/history service.
    pub access_token: String,
    /// Refresh credential, present when the provider issues one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Token expiry, when known. Used by the auth provider for refresh.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Provider-assigned user identifier.
    pub user_id: String,
    /// User email address.
    pub email: String,
}

impl Session {
    /// Whether the access token is past its known expiry.
    /// Unknown expiry counts as not expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

// ═══════════════════════════════════════════════════════════
// Prediction types
// ═══════════════════════════════════════════════════════════

/// Closed class set produced by the mammogram classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionLabel {
    Benign,
    Malignant,
}

impl std::fmt::Display for PredictionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Benign => write!(f, "Benign"),
            Self::Malignant => write!(f, "Malignant"),
        }
    }
}

/// Outcome of a single submission, as returned by `POST /predict`.
///
/// Transient: lives in the scan slice until the user advances to a new
/// scan; the durable form is the `ScanRecord` written server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub prediction: PredictionLabel,
    /// Confidence of the predicted class, in [0, 1].
    pub confidence: f32,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub annotated_url: Option<String>,
    /// Raw softmax probabilities from the model, [benign, malignant].
    #[serde(default)]
    pub raw_output: Vec<f32>,
}

/// One persisted analysis, owned by the remote store.
///
/// The client only reads, lists, and deletes these; `HistoryCache` holds
/// a read-through copy, newest first by `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub prediction_label: PredictionLabel,
    /// Confidence of the predicted class, in [0, 1].
    pub confidence_score: f32,
    pub original_image_url: String,
    #[serde(default)]
    pub annotated_image_url: Option<String>,
}

// ═══════════════════════════════════════════════════════════
// ScanStats — dashboard summary over cached records
// ═══════════════════════════════════════════════════════════

/// Aggregate figures the dashboard header shows over the scan history.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ScanStats {
    pub total: usize,
    pub benign: usize,
    pub malignant: usize,
    /// Mean confidence across all records; 0.0 when empty.
    pub mean_confidence: f32,
}

impl ScanStats {
    pub fn from_records(records: &[ScanRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        let malignant = records
            .iter()
            .filter(|r| r.prediction_label == PredictionLabel::Malignant)
            .count();
        let sum: f32 = records.iter().map(|r| r.confidence_score).sum();
        Self {
            total: records.len(),
            benign: records.len() - malignant,
            malignant,
            mean_confidence: sum / records.len() as f32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str, label: PredictionLabel, confidence: f32) -> ScanRecord {
        ScanRecord {
            id: id.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap(),
            prediction_label: label,
            confidence_score: confidence,
            original_image_url: format!("https://cdn.example/scans/{id}.png"),
            annotated_image_url: None,
        }
    }

    #[test]
    fn scan_record_round_trips_confidence_and_label() {
        let original = record("scan-1", PredictionLabel::Malignant, 0.93);
        let json = serde_json::to_string(&original).unwrap();
        let parsed: ScanRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.prediction_label, PredictionLabel::Malignant);
        assert!((parsed.confidence_score - 0.93).abs() < f32::EPSILON);
        assert_eq!(parsed, original);
    }

    #[test]
    fn scan_record_parses_service_shape() {
        let json = r#"{
            "id": "7c0e",
            "created_at": "2026-03-14T09:00:00Z",
            "prediction_label": "Benign",
            "confidence_score": 0.81,
            "original_image_url": "https://cdn.example/scans/7c0e.png"
        }"#;
        let parsed: ScanRecord = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.prediction_label, PredictionLabel::Benign);
        assert!(parsed.annotated_image_url.is_none());
    }

    #[test]
    fn unknown_label_is_rejected() {
        let json = r#"{
            "id": "7c0e",
            "created_at": "2026-03-14T09:00:00Z",
            "prediction_label": "Suspicious",
            "confidence_score": 0.5,
            "original_image_url": "x"
        }"#;
        assert!(serde_json::from_str::<ScanRecord>(json).is_err());
    }

    #[test]
    fn scan_result_parses_predict_response() {
        let json = r#"{
            "prediction": "Malignant",
            "confidence": 0.93,
            "image_url": "https://x/y.png",
            "raw_output": [0.0625, 0.9375]
        }"#;
        let result: ScanResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.prediction, PredictionLabel::Malignant);
        assert!((result.confidence - 0.93).abs() < f32::EPSILON);
        assert_eq!(result.image_url.as_deref(), Some("https://x/y.png"));
        assert_eq!(result.raw_output, vec![0.0625, 0.9375]);
    }

    #[test]
    fn scan_result_tolerates_missing_optional_fields() {
        let json = r#"{"prediction": "Benign", "confidence": 0.6}"#;
        let result: ScanResult = serde_json::from_str(json).unwrap();
        assert!(result.image_url.is_none());
        assert!(result.annotated_url.is_none());
        assert!(result.raw_output.is_empty());
    }

    #[test]
    fn label_display_matches_wire_strings() {
        assert_eq!(PredictionLabel::Benign.to_string(), "Benign");
        assert_eq!(PredictionLabel::Malignant.to_string(), "Malignant");
    }

    #[test]
    fn session_expiry() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let mut session = Session {
            access_token: "tok".into(),
            refresh_token: None,
            expires_at: None,
            user_id: "u-1".into(),
            email: "a@b.c".into(),
        };
        assert!(!session.is_expired(now));

        session.expires_at = Some(now - chrono::Duration::minutes(1));
        assert!(session.is_expired(now));

        session.expires_at = Some(now + chrono::Duration::minutes(1));
        assert!(!session.is_expired(now));
    }

    #[test]
    fn stats_over_empty_history() {
        assert_eq!(ScanStats::from_records(&[]), ScanStats::default());
    }

    #[test]
    fn stats_counts_and_mean() {
        let records = vec![
            record("a", PredictionLabel::Benign, 0.8),
            record("b", PredictionLabel::Malignant, 0.9),
            record("c", PredictionLabel::Benign, 0.7),
        ];
        let stats = ScanStats::from_records(&records);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.benign, 2);
        assert_eq!(stats.malignant, 1);
        assert!((stats.mean_confidence - 0.8).abs() < 1e-6);
    }
}
