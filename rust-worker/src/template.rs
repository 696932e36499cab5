//! Message templates and placeholder substitution.
//!
//! Templates carry a subject and body containing `{token}` placeholders.
//! Substitution is fail-open: a token with no matching variable, and any
//! stray or unmatched brace, is passed through as literal text. Partial
//! spreadsheet data is normal in this domain and must never abort a job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A named message template with `{token}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    /// Template name, used only for reporting and logs
    #[serde(default)]
    pub name: String,
    /// Subject line (may contain placeholders)
    pub subject: String,
    /// Body text (may contain placeholders)
    pub body: String,
}

impl Template {
    pub fn new(name: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// True when there is nothing to send: both subject and body are blank.
    pub fn is_empty(&self) -> bool {
        self.subject.trim().is_empty() && self.body.trim().is_empty()
    }
}

/// A template rendered for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendered {
    pub subject: String,
    pub body: String,
}

/// Render a template against a set of variables.
///
/// Every `{token}` occurrence in subject and body is replaced by the
/// matching variable value. Token names are case-sensitive; the source
/// layer normalizes keys before they get here. Unknown tokens are left
/// as literal text.
pub fn render(template: &Template, variables: &BTreeMap<String, String>) -> Rendered {
    Rendered {
        subject: substitute(&template.subject, variables),
        body: substitute(&template.body, variables),
    }
}

/// Substitute `{token}` placeholders in a single string.
fn substitute(text: &str, variables: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];

        // A token runs to the next closing brace, as long as no new
        // opening brace starts first.
        match after_open.find(|c| c == '}' || c == '{') {
            Some(end) if after_open.as_bytes()[end] == b'}' => {
                let token = &after_open[..end];
                match variables.get(token) {
                    Some(value) => out.push_str(value),
                    None => {
                        // Unknown token: keep the braces and the name.
                        out.push('{');
                        out.push_str(token);
                        out.push('}');
                    }
                }
                rest = &after_open[end + 1..];
            }
            Some(end) => {
                // Another '{' before any '}': the first brace was literal.
                out.push('{');
                out.push_str(&after_open[..end]);
                rest = &after_open[end..];
            }
            None => {
                // Unmatched opening brace at the tail.
                out.push('{');
                out.push_str(after_open);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}
