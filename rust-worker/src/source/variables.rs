//! Per-recipient template variable construction.
//!
//! Header names are normalized to snake_case keys, then a handful of
//! derived variables are layered on top: name splits, the last four
//! card digits, and a date/time family stamped at scan time.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};

use super::rows::CellValue;

/// Normalize a header into a variable key: lowercased, with every run
/// of non-alphanumeric characters collapsed to a single underscore.
pub fn normalize_key(header: &str) -> String {
    let mut key = String::with_capacity(header.len());
    let mut last_was_sep = true;
    for c in header.trim().chars() {
        if c.is_ascii_alphanumeric() {
            key.push(c.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            key.push('_');
            last_was_sep = true;
        }
    }
    while key.ends_with('_') {
        key.pop();
    }
    key
}

/// Build the base variable map for one row: normalized header keys
/// mapped to the row's cell text.
pub fn row_variables(headers: &[String], cells: &[CellValue]) -> BTreeMap<String, String> {
    let mut variables = BTreeMap::new();
    for (index, header) in headers.iter().enumerate() {
        let key = normalize_key(header);
        if key.is_empty() {
            continue;
        }
        let value = cells.get(index).map(CellValue::as_text).unwrap_or_default();
        variables.insert(key, value);
    }
    variables
}

/// Add name-derived variables.
///
/// `name` and `full_name` always end up set; `first_name`/`last_name`
/// are split out of the display name when no dedicated columns provided
/// them.
pub fn add_name_variables(variables: &mut BTreeMap<String, String>, display_name: &str) {
    variables.insert("name".to_string(), display_name.to_string());
    if !variables.contains_key("full_name") || variables["full_name"].is_empty() {
        variables.insert("full_name".to_string(), display_name.to_string());
    }

    let needs_split = variables
        .get("first_name")
        .map(|v| v.is_empty())
        .unwrap_or(true);
    if needs_split {
        let mut parts = display_name.split_whitespace();
        let first = parts.next().unwrap_or_default().to_string();
        let rest = parts.collect::<Vec<_>>().join(" ");
        variables.insert("first_name".to_string(), first);
        variables.insert("last_name".to_string(), rest);
    }
}

/// Derive `card_last4` from the first card-ish column carrying digits.
pub fn add_card_variables(variables: &mut BTreeMap<String, String>) {
    if variables.contains_key("card_last4") {
        return;
    }
    let digits = variables
        .iter()
        .filter(|(key, _)| key.contains("card"))
        .map(|(_, value)| value.chars().filter(char::is_ascii_digit).collect::<String>())
        .find(|digits| !digits.is_empty());

    if let Some(digits) = digits {
        let last4 = if digits.len() >= 4 {
            digits[digits.len() - 4..].to_string()
        } else {
            digits
        };
        variables.insert("card_last4".to_string(), last4);
    }
}

/// Stamp the date/time variable family from one instant, so every
/// recipient in a job renders the same dates.
pub fn add_date_variables(variables: &mut BTreeMap<String, String>, now: DateTime<Local>) {
    let entries = [
        ("today", now.format("%d/%m/%Y").to_string()),
        ("full_date", now.format("%d %B %Y").to_string()),
        ("time", now.format("%H:%M:%S").to_string()),
        ("timestamp", now.to_rfc3339()),
        ("year", now.format("%Y").to_string()),
        ("month", now.format("%m").to_string()),
        ("weekday", now.format("%A").to_string()),
    ];
    for (key, value) in entries {
        variables.entry(key.to_string()).or_insert(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("Card Number"), "card_number");
        assert_eq!(normalize_key("  Monthly Limit (GBP)  "), "monthly_limit_gbp");
        assert_eq!(normalize_key("E-mail"), "e_mail");
        assert_eq!(normalize_key("!!!"), "");
    }

    #[test]
    fn test_row_variables_align_headers_and_cells() {
        let headers = vec!["Name".to_string(), "Card Number".to_string(), "Spare".to_string()];
        let cells = vec![
            CellValue::Text("Jane Smith".to_string()),
            CellValue::Number(4929_1234_5678_9012_f64),
        ];
        let variables = row_variables(&headers, &cells);

        assert_eq!(variables["name"], "Jane Smith");
        assert_eq!(variables["card_number"], "4929123456789012");
        // Missing trailing cell becomes an empty value, not a missing key.
        assert_eq!(variables["spare"], "");
    }

    #[test]
    fn test_add_name_variables_splits_display_name() {
        let mut variables = BTreeMap::new();
        add_name_variables(&mut variables, "Jane Anne Smith");

        assert_eq!(variables["name"], "Jane Anne Smith");
        assert_eq!(variables["full_name"], "Jane Anne Smith");
        assert_eq!(variables["first_name"], "Jane");
        assert_eq!(variables["last_name"], "Anne Smith");
    }

    #[test]
    fn test_add_name_variables_keeps_existing_first_name() {
        let mut variables = BTreeMap::new();
        variables.insert("first_name".to_string(), "J".to_string());
        add_name_variables(&mut variables, "Jane Smith");

        assert_eq!(variables["first_name"], "J");
    }

    #[test]
    fn test_add_card_variables() {
        let mut variables = BTreeMap::new();
        variables.insert("card_number".to_string(), "4929 1234 5678 9012".to_string());
        add_card_variables(&mut variables);

        assert_eq!(variables["card_last4"], "9012");
    }

    #[test]
    fn test_add_card_variables_short_number() {
        let mut variables = BTreeMap::new();
        variables.insert("card".to_string(), "123".to_string());
        add_card_variables(&mut variables);

        assert_eq!(variables["card_last4"], "123");
    }

    #[test]
    fn test_add_card_variables_no_card_column() {
        let mut variables = BTreeMap::new();
        variables.insert("email".to_string(), "a@x.com".to_string());
        add_card_variables(&mut variables);

        assert!(!variables.contains_key("card_last4"));
    }

    #[test]
    fn test_add_date_variables() {
        let mut variables = BTreeMap::new();
        let now = Local.with_ymd_and_hms(2024, 3, 4, 9, 30, 0).unwrap();
        add_date_variables(&mut variables, now);

        assert_eq!(variables["today"], "04/03/2024");
        assert_eq!(variables["full_date"], "04 March 2024");
        assert_eq!(variables["year"], "2024");
        assert_eq!(variables["month"], "03");
        assert_eq!(variables["weekday"], "Monday");
    }
}
