//! Queue message types for the two-queue architecture.
//!
//! This module defines the message formats for:
//! - `inbound_submissions` queue: Raw job submissions from the web server
//! - `bulk_delivery` queue: Normalized bulk requests ready for delivery

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::source::rows::CellValue;
use crate::source::Recipient;
use crate::template::Template;

/// Queue name for raw inbound submissions.
pub const SUBMISSION_QUEUE: &str = "inbound_submissions";

/// Queue name for normalized bulk delivery requests.
pub const DELIVERY_QUEUE: &str = "bulk_delivery";

// =============================================================================
// Inbound Submission Types (inbound_submissions queue)
// =============================================================================

/// Raw job submission stored in the inbound_submissions queue.
///
/// The web server enqueues submissions as received, without scanning
/// the rows; all normalization happens in the background processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionPayload {
    /// The template to render for every recipient
    pub template: Template,
    /// Header row, aligned with each row's cells
    pub headers: Vec<String>,
    /// Data rows as scraped from the workbook
    pub rows: Vec<Vec<CellValue>>,
    /// Header of the email column; first header mentioning "email" when absent
    #[serde(default)]
    pub email_column: Option<String>,
    /// Header of the send-flag column; rows not marked `X` are ignored
    #[serde(default)]
    pub flag_column: Option<String>,
    /// Mark every message high-importance
    #[serde(default)]
    pub urgent: bool,
    /// Attachments added to every message
    #[serde(default)]
    pub shared_attachments: Vec<String>,
    /// Candidate attachments matched per recipient by file name
    #[serde(default)]
    pub attachment_pool: Vec<String>,
}

// =============================================================================
// Bulk Request Types (bulk_delivery queue)
// =============================================================================

/// Normalized bulk request ready for job creation and delivery.
///
/// This is the format the delivery worker consumes; every recipient in
/// it has already passed validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkRequest {
    /// Unique request identifier
    pub request_id: Uuid,
    /// The template to render for every recipient
    pub template: Template,
    /// Validated recipients, in submission order
    pub recipients: Vec<Recipient>,
    /// Rows dropped during the scan
    #[serde(default)]
    pub skipped: usize,
    /// Mark every message high-importance
    #[serde(default)]
    pub urgent: bool,
    /// Attachments added to every message
    #[serde(default)]
    pub shared_attachments: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_submission_payload_serialization() {
        let payload = SubmissionPayload {
            template: Template::new("reminder", "Hi {name}", "Body"),
            headers: vec!["Name".to_string(), "Email".to_string()],
            rows: vec![vec![
                CellValue::Text("Jane".to_string()),
                CellValue::Text("jane@x.com".to_string()),
            ]],
            email_column: Some("Email".to_string()),
            flag_column: None,
            urgent: true,
            shared_attachments: vec!["policy.pdf".to_string()],
            attachment_pool: Vec::new(),
        };

        let json = serde_json::to_string(&payload).unwrap();
        let parsed: SubmissionPayload = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.headers.len(), 2);
        assert_eq!(parsed.rows[0][1], CellValue::Text("jane@x.com".to_string()));
        assert!(parsed.urgent);
        assert_eq!(parsed.template.subject, "Hi {name}");
    }

    #[test]
    fn test_submission_payload_defaults() {
        let json = r#"{
            "template": {"subject": "S", "body": "B"},
            "headers": ["Email"],
            "rows": [["a@x.com"]]
        }"#;

        let parsed: SubmissionPayload = serde_json::from_str(json).unwrap();

        assert_eq!(parsed.email_column, None);
        assert_eq!(parsed.flag_column, None);
        assert!(!parsed.urgent);
        assert!(parsed.shared_attachments.is_empty());
        assert_eq!(parsed.template.name, "");
    }

    #[test]
    fn test_bulk_request_serialization() {
        let request = BulkRequest {
            request_id: Uuid::nil(),
            template: Template::new("t", "S", "B"),
            recipients: vec![Recipient {
                email: "jane@x.com".to_string(),
                cc: vec!["mgr@x.com".to_string()],
                display_name: "Jane".to_string(),
                variables: BTreeMap::from([("name".to_string(), "Jane".to_string())]),
                attachments: Vec::new(),
            }],
            skipped: 2,
            urgent: false,
            shared_attachments: Vec::new(),
        };

        let json = serde_json::to_string(&request).unwrap();
        let parsed: BulkRequest = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.recipients.len(), 1);
        assert_eq!(parsed.recipients[0].cc, vec!["mgr@x.com".to_string()]);
        assert_eq!(parsed.skipped, 2);
    }
}
