//! Job submission endpoint handlers.
//!
//! These handlers are designed to be extremely fast - they only:
//! 1. Verify the submission signature
//! 2. Run cheap shape checks on the payload
//! 3. Enqueue the raw submission to RabbitMQ
//! 4. Return immediately
//!
//! Row scanning and recipient validation happen in the background
//! processor.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::queue::{Publisher, SubmissionPayload};
use crate::source::has_any_address;
use crate::web::signature::{is_signature_verification_enabled, verify_submission_signature};
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub publisher: Publisher,
}

impl AppState {
    pub fn new(config: Config, publisher: Publisher) -> Self {
        Self {
            config: Arc::new(config),
            publisher,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Job Submission
// =============================================================================

/// A signed job submission.
///
/// The payload fields sit alongside the signature triplet in one JSON
/// object.
#[derive(Debug, Deserialize)]
pub struct SubmissionForm {
    #[serde(flatten)]
    pub payload: SubmissionPayload,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub signature: String,
}

/// Submission response.
#[derive(Serialize)]
pub struct SubmissionResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
}

impl SubmissionResponse {
    fn status_only(status: &'static str) -> Self {
        Self { status, rows: None }
    }
}

/// Job submission endpoint.
///
/// This endpoint:
/// 1. Verifies the HMAC signature (if configured)
/// 2. Rejects obviously unusable payloads
/// 3. Enqueues the raw submission immediately
/// 4. Returns 200 OK
pub async fn submit_job(
    State(state): State<AppState>,
    Json(form): Json<SubmissionForm>,
) -> impl IntoResponse {
    info!(
        template = %form.payload.template.name,
        rows = form.payload.rows.len(),
        headers = form.payload.headers.len(),
        has_signature = !form.signature.is_empty(),
        "job_submission_received"
    );

    // Verify signature if signing key is configured
    if is_signature_verification_enabled(&state.config.submission_signing_key) {
        let signing_key = state.config.submission_signing_key.as_ref().unwrap();
        if !verify_submission_signature(
            signing_key,
            &form.timestamp,
            &form.token,
            &form.signature,
            state.config.submission_signature_max_age,
        ) {
            warn!(template = %form.payload.template.name, "job_submission_signature_invalid");
            return (
                StatusCode::UNAUTHORIZED,
                Json(SubmissionResponse::status_only("unauthorized")),
            );
        }
    }

    // A template with nothing to say aborts the submission up front.
    if form.payload.template.is_empty() {
        warn!("job_submission_empty_template");
        return (
            StatusCode::BAD_REQUEST,
            Json(SubmissionResponse::status_only("empty_template")),
        );
    }

    // Cheap probe: is there at least one address-shaped cell?
    if !has_any_address(&form.payload) {
        warn!(
            rows = form.payload.rows.len(),
            "job_submission_no_recipients"
        );
        return (
            StatusCode::BAD_REQUEST,
            Json(SubmissionResponse::status_only("no_recipients")),
        );
    }

    let row_count = form.payload.rows.len();

    if let Err(e) = state.publisher.publish_submission(&form.payload).await {
        error!(error = %e, "job_submission_publish_failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(SubmissionResponse::status_only("error")),
        );
    }

    info!(
        template = %form.payload.template.name,
        rows = row_count,
        "job_submission_enqueued"
    );

    (
        StatusCode::OK,
        Json(SubmissionResponse {
            status: "enqueued",
            rows: Some(row_count),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_form_deserialization() {
        let json = r#"{
            "template": {"name": "reminder", "subject": "Hi {name}", "body": "B"},
            "headers": ["Name", "Email"],
            "rows": [["Jane", "jane@x.com"]],
            "timestamp": "1234567890",
            "token": "nonce",
            "signature": "abc"
        }"#;

        let form: SubmissionForm = serde_json::from_str(json).unwrap();

        assert_eq!(form.payload.template.name, "reminder");
        assert_eq!(form.payload.rows.len(), 1);
        assert_eq!(form.timestamp, "1234567890");
        assert_eq!(form.signature, "abc");
    }

    #[test]
    fn test_submission_form_signature_optional() {
        let json = r#"{
            "template": {"subject": "S", "body": "B"},
            "headers": ["Email"],
            "rows": [["a@x.com"]]
        }"#;

        let form: SubmissionForm = serde_json::from_str(json).unwrap();

        assert!(form.signature.is_empty());
        assert!(form.token.is_empty());
    }

    #[test]
    fn test_submission_response_serialization() {
        let with_rows = SubmissionResponse {
            status: "enqueued",
            rows: Some(3),
        };
        let json = serde_json::to_string(&with_rows).unwrap();
        assert!(json.contains("\"rows\":3"));

        let bare = SubmissionResponse::status_only("unauthorized");
        let json = serde_json::to_string(&bare).unwrap();
        assert!(!json.contains("rows"));
    }
}
