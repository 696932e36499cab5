//! Recipient source: submission rows in, clean recipients out.
//!
//! This is the validation and coercion boundary. Spreadsheet-shaped
//! rows (mixed blank/numeric/string cells) are normalized here exactly
//! once; everything downstream of this module works with strict
//! [`Recipient`] records and never re-checks the data.
//!
//! ## Processing Flow
//!
//! ```text
//! SubmissionPayload → scan_submission() → BulkRequest
//! ```

pub mod rows;
pub mod variables;

use std::collections::BTreeMap;

use chrono::Local;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::queue::{BulkRequest, SubmissionPayload};
use crate::util::address::{email_domain, local_part, normalize_for_match, parse_address_list};

use rows::CellValue;

/// One destination of a bulk send, fully validated.
///
/// Constructed once per job by the scan; immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    /// Primary destination address
    pub email: String,
    /// Carbon-copy addresses (already deduplicated, never equal to `email`)
    #[serde(default)]
    pub cc: Vec<String>,
    /// Resolved display name; falls back to the email local part
    pub display_name: String,
    /// Template variables for this recipient, keys normalized
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    /// Attachment pool entries matched to this recipient by name
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// Errors that abort a scan before any recipient is produced.
///
/// Per-row problems never end up here; bad rows are skipped and tallied.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("no email column could be identified in the submission headers")]
    NoEmailColumn,
    #[error("column {0:?} not present in the submission headers")]
    ColumnNotFound(String),
}

/// Normalize a raw submission into a bulk request.
///
/// Row handling:
/// 1. When a flag column is named, rows not marked `X` are ignored
/// 2. The email cell is split on `;`: first address is To, rest are Cc
/// 3. Rows without a usable To address are skipped and tallied
/// 4. Rows whose recipient domain fails the allow/deny lists are skipped
/// 5. Surviving rows become recipients, in submission order
pub fn scan_submission(
    payload: SubmissionPayload,
    config: &Config,
) -> Result<BulkRequest, ScanError> {
    info!(
        rows = payload.rows.len(),
        headers = payload.headers.len(),
        template = %payload.template.name,
        "scan_start"
    );

    let email_index = resolve_email_column(&payload.headers, payload.email_column.as_deref())?;
    let flag_index = match payload.flag_column.as_deref() {
        Some(name) => Some(
            resolve_column(&payload.headers, name)
                .ok_or_else(|| ScanError::ColumnNotFound(name.to_string()))?,
        ),
        None => None,
    };

    let now = Local::now();
    let mut recipients = Vec::new();
    let mut skipped = 0usize;

    for cells in &payload.rows {
        if let Some(flag) = flag_index {
            let marked = cells
                .get(flag)
                .map(|c| c.as_text().eq_ignore_ascii_case("x"))
                .unwrap_or(false);
            if !marked {
                continue;
            }
        }

        let email_cell = cells.get(email_index).map(CellValue::as_text).unwrap_or_default();
        let mut addresses = parse_address_list(&email_cell);
        if addresses.is_empty() {
            debug!(cell = %email_cell, "scan_row_skipped_no_email");
            skipped += 1;
            continue;
        }
        let email = addresses.remove(0);

        if !domain_permitted(&email, config) {
            debug!(email = %email, "scan_row_skipped_domain");
            skipped += 1;
            continue;
        }

        let mut cc = addresses;
        collect_extra_cc(&payload.headers, cells, &mut cc);
        cc.retain(|address| !address.eq_ignore_ascii_case(&email));
        dedup_case_insensitive(&mut cc);

        let display_name = display_name_for_row(&payload.headers, cells, &email);

        let mut vars = variables::row_variables(&payload.headers, cells);
        vars.insert("email".to_string(), email.clone());
        vars.insert("to_email".to_string(), email.clone());
        vars.insert("cc_email".to_string(), cc.join("; "));
        variables::add_name_variables(&mut vars, &display_name);
        variables::add_card_variables(&mut vars);
        variables::add_date_variables(&mut vars, now);

        let attachments = match_attachments(&display_name, &payload.attachment_pool);

        recipients.push(Recipient {
            email,
            cc,
            display_name,
            variables: vars,
            attachments,
        });
    }

    info!(
        recipients = recipients.len(),
        skipped = skipped,
        "scan_complete"
    );

    Ok(BulkRequest {
        request_id: Uuid::new_v4(),
        template: payload.template,
        recipients,
        skipped,
        urgent: payload.urgent,
        shared_attachments: payload.shared_attachments,
    })
}

/// Locate a header by name, case-insensitively.
fn resolve_column(headers: &[String], name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name.trim()))
}

/// Locate the email column: the explicitly named one, or the first
/// header that mentions "email".
fn resolve_email_column(headers: &[String], explicit: Option<&str>) -> Result<usize, ScanError> {
    if let Some(name) = explicit {
        return resolve_column(headers, name)
            .ok_or_else(|| ScanError::ColumnNotFound(name.to_string()));
    }
    headers
        .iter()
        .position(|h| h.to_lowercase().contains("email"))
        .ok_or(ScanError::NoEmailColumn)
}

/// Append addresses from manager/cc columns to the Cc list.
fn collect_extra_cc(headers: &[String], cells: &[CellValue], cc: &mut Vec<String>) {
    for (index, header) in headers.iter().enumerate() {
        let lower = header.trim().to_lowercase();
        let is_cc_column =
            lower.contains("manager") || lower == "cc" || lower.contains("cc_email") || lower.contains("cc email");
        if !is_cc_column {
            continue;
        }
        if let Some(cell) = cells.get(index) {
            cc.extend(parse_address_list(&cell.as_text()));
        }
    }
}

fn dedup_case_insensitive(addresses: &mut Vec<String>) {
    let mut seen = Vec::new();
    addresses.retain(|address| {
        let lower = address.to_lowercase();
        if seen.contains(&lower) {
            false
        } else {
            seen.push(lower);
            true
        }
    });
}

/// Whether a name cell is usable: not all digits, at least two characters.
fn usable_name(value: &str) -> bool {
    value.len() >= 2 && !value.chars().all(|c| c.is_ascii_digit())
}

/// Pick a display name for a row.
///
/// Prefers first/last-name columns, then any `name`-ish column, then
/// the email local part. Digit-only values (card numbers) never win.
fn display_name_for_row(headers: &[String], cells: &[CellValue], email: &str) -> String {
    let mut first = None;
    let mut last = None;
    let mut any_name = None;

    for (index, header) in headers.iter().enumerate() {
        let Some(cell) = cells.get(index) else { continue };
        let value = cell.as_text();
        if !usable_name(&value) {
            continue;
        }
        let lower = header.trim().to_lowercase();
        if lower.contains("first") && first.is_none() {
            first = Some(value);
        } else if (lower.contains("last") || lower.contains("surname")) && last.is_none() {
            last = Some(value);
        } else if lower.contains("name") && any_name.is_none() {
            any_name = Some(value);
        }
    }

    if first.is_some() || last.is_some() {
        let joined = format!(
            "{} {}",
            first.as_deref().unwrap_or(""),
            last.as_deref().unwrap_or("")
        );
        return joined.trim().to_string();
    }
    if let Some(name) = any_name {
        return name;
    }
    local_part(email).to_string()
}

/// Check the recipient domain against the configured allow/deny lists.
fn domain_permitted(email: &str, config: &Config) -> bool {
    let Some(domain) = email_domain(email) else {
        return false;
    };

    if let Some(deny) = &config.deny_domains {
        if deny.iter().any(|d| domain == d.to_lowercase()) {
            return false;
        }
    }

    if let Some(allow) = &config.allow_domains {
        return allow.iter().any(|d| domain == d.to_lowercase());
    }

    true
}

/// Match attachment pool entries to a recipient by normalized name.
///
/// A pool file is attached when its normalized file name contains the
/// normalized recipient name, or the other way around.
fn match_attachments(display_name: &str, pool: &[String]) -> Vec<String> {
    let recipient_norm = normalize_for_match(display_name);
    if recipient_norm.is_empty() {
        return Vec::new();
    }

    pool.iter()
        .filter(|path| {
            let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path);
            let file_norm = normalize_for_match(file_name);
            !file_norm.is_empty()
                && (file_norm.contains(&recipient_norm) || recipient_norm.contains(&file_norm))
        })
        .cloned()
        .collect()
}

/// Quick validity probe used by the web layer before a payload is
/// accepted: does any row carry something that looks like an email?
pub fn has_any_address(payload: &SubmissionPayload) -> bool {
    let Ok(email_index) = resolve_email_column(&payload.headers, payload.email_column.as_deref())
    else {
        return false;
    };
    payload.rows.iter().any(|cells| {
        cells
            .get(email_index)
            .map(|cell| !parse_address_list(&cell.as_text()).is_empty())
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Template;

    fn text(value: &str) -> CellValue {
        CellValue::Text(value.to_string())
    }

    fn test_config() -> Config {
        Config {
            cloudamqp_url: String::new(),
            max_send_attempts: 3,
            retry_base_delay_ms: 0,
            retry_max_delay_ms: 0,
            send_timeout_ms: 1000,
            worker_concurrency: 1,
            sender_address: "postroom@localhost".to_string(),
            allow_domains: None,
            deny_domains: None,
            mailgun_api_key: None,
            mailgun_domain: None,
            mailgun_api_base: "https://api.mailgun.net".to_string(),
            port: 0,
            submission_signing_key: None,
            submission_signature_max_age: 300,
        }
    }

    fn payload(headers: &[&str], rows: Vec<Vec<CellValue>>) -> SubmissionPayload {
        SubmissionPayload {
            template: Template::new("t", "Hi {name}", "Body"),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows,
            email_column: None,
            flag_column: None,
            urgent: false,
            shared_attachments: Vec::new(),
            attachment_pool: Vec::new(),
        }
    }

    #[test]
    fn test_scan_skips_invalid_emails_and_preserves_order() {
        let payload = payload(
            &["Name", "Email"],
            vec![
                vec![text("A"), text("a@x.com")],
                vec![text("B"), text("bad-email")],
                vec![text("C"), text("c@x.com")],
            ],
        );

        let request = scan_submission(payload, &test_config()).unwrap();

        assert_eq!(request.recipients.len(), 2);
        assert_eq!(request.skipped, 1);
        assert_eq!(request.recipients[0].email, "a@x.com");
        assert_eq!(request.recipients[1].email, "c@x.com");
    }

    #[test]
    fn test_scan_splits_cc_from_email_cell() {
        let payload = payload(
            &["Name", "Email"],
            vec![vec![
                text("Jane"),
                text("jane@x.com; boss@x.com; jane@x.com"),
            ]],
        );

        let request = scan_submission(payload, &test_config()).unwrap();

        let recipient = &request.recipients[0];
        assert_eq!(recipient.email, "jane@x.com");
        // To address never appears in Cc, duplicates collapse.
        assert_eq!(recipient.cc, vec!["boss@x.com".to_string()]);
    }

    #[test]
    fn test_scan_collects_manager_column_as_cc() {
        let payload = payload(
            &["Name", "Email", "Manager Email"],
            vec![vec![text("Jane"), text("jane@x.com"), text("mgr@x.com")]],
        );

        let request = scan_submission(payload, &test_config()).unwrap();

        assert_eq!(request.recipients[0].cc, vec!["mgr@x.com".to_string()]);
        assert_eq!(request.recipients[0].variables["cc_email"], "mgr@x.com");
    }

    #[test]
    fn test_scan_flag_column_filters_unmarked_rows() {
        let mut p = payload(
            &["Send", "Name", "Email"],
            vec![
                vec![text("X"), text("A"), text("a@x.com")],
                vec![CellValue::Blank, text("B"), text("b@x.com")],
                vec![text("x"), text("C"), text("c@x.com")],
            ],
        );
        p.flag_column = Some("Send".to_string());

        let request = scan_submission(p, &test_config()).unwrap();

        assert_eq!(request.recipients.len(), 2);
        // Unmarked rows are ignored, not skipped.
        assert_eq!(request.skipped, 0);
        assert_eq!(request.recipients[0].email, "a@x.com");
        assert_eq!(request.recipients[1].email, "c@x.com");
    }

    #[test]
    fn test_scan_display_name_falls_back_to_local_part() {
        let payload = payload(
            &["Email"],
            vec![vec![text("lundon.robinson@gov.im")]],
        );

        let request = scan_submission(payload, &test_config()).unwrap();

        assert_eq!(request.recipients[0].display_name, "lundon.robinson");
    }

    #[test]
    fn test_scan_prefers_first_and_surname_columns() {
        let payload = payload(
            &["First Name", "Surname", "Email", "Card Number"],
            vec![vec![
                text("Jane"),
                text("Smith"),
                text("jane@x.com"),
                text("4929123456789012"),
            ]],
        );

        let request = scan_submission(payload, &test_config()).unwrap();

        let recipient = &request.recipients[0];
        assert_eq!(recipient.display_name, "Jane Smith");
        assert_eq!(recipient.variables["card_last4"], "9012");
        assert_eq!(recipient.variables["first_name"], "Jane");
    }

    #[test]
    fn test_scan_name_never_comes_from_digits() {
        let payload = payload(
            &["Name", "Email"],
            vec![vec![text("12345678"), text("jane@x.com")]],
        );

        let request = scan_submission(payload, &test_config()).unwrap();

        assert_eq!(request.recipients[0].display_name, "jane");
    }

    #[test]
    fn test_scan_deny_list_skips_recipient() {
        let mut config = test_config();
        config.deny_domains = Some(vec!["blocked.com".to_string()]);

        let payload = payload(
            &["Email"],
            vec![
                vec![text("a@blocked.com")],
                vec![text("b@fine.com")],
            ],
        );

        let request = scan_submission(payload, &config).unwrap();

        assert_eq!(request.recipients.len(), 1);
        assert_eq!(request.skipped, 1);
        assert_eq!(request.recipients[0].email, "b@fine.com");
    }

    #[test]
    fn test_scan_allow_list_excludes_other_domains() {
        let mut config = test_config();
        config.allow_domains = Some(vec!["gov.im".to_string()]);

        let payload = payload(
            &["Email"],
            vec![vec![text("a@gov.im")], vec![text("b@other.com")]],
        );

        let request = scan_submission(payload, &config).unwrap();

        assert_eq!(request.recipients.len(), 1);
        assert_eq!(request.skipped, 1);
    }

    #[test]
    fn test_scan_no_email_column_is_an_error() {
        let payload = payload(&["Name", "Phone"], vec![vec![text("A"), text("1")]]);

        let result = scan_submission(payload, &test_config());

        assert!(matches!(result, Err(ScanError::NoEmailColumn)));
    }

    #[test]
    fn test_scan_explicit_missing_column_is_an_error() {
        let mut p = payload(&["Email"], vec![vec![text("a@x.com")]]);
        p.email_column = Some("Work Email".to_string());

        let result = scan_submission(p, &test_config());

        assert!(matches!(result, Err(ScanError::ColumnNotFound(_))));
    }

    #[test]
    fn test_scan_matches_attachments_by_name() {
        let mut p = payload(
            &["Name", "Email"],
            vec![
                vec![text("Jane Smith"), text("jane@x.com")],
                vec![text("Bob Quayle"), text("bob@x.com")],
            ],
        );
        p.attachment_pool = vec![
            "/tmp/statements/Jane-Smith.pdf".to_string(),
            "/tmp/statements/quayle.pdf".to_string(),
            "/tmp/statements/unrelated.pdf".to_string(),
        ];

        let request = scan_submission(p, &test_config()).unwrap();

        assert_eq!(
            request.recipients[0].attachments,
            vec!["/tmp/statements/Jane-Smith.pdf".to_string()]
        );
        assert!(request.recipients[1].attachments.is_empty());
        // "quayle.pdf" normalizes to "quayle.pdf", which neither contains
        // nor is contained by "bobquayle"; only honest matches attach.
    }

    #[test]
    fn test_has_any_address() {
        let good = payload(&["Email"], vec![vec![text("a@x.com")]]);
        let bad = payload(&["Email"], vec![vec![text("nope")]]);

        assert!(has_any_address(&good));
        assert!(!has_any_address(&bad));
    }
}
