//! Email address helpers shared across the pipeline.

/// Check whether a string is a usable email address.
///
/// The bar is deliberately low: a non-empty local part, an `@`, and a
/// non-empty domain containing a dot. Anything stricter belongs to the
/// delivery endpoint, which is the real authority on deliverability.
pub fn is_valid_email(candidate: &str) -> bool {
    let candidate = candidate.trim();
    let Some((local, domain)) = candidate.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !candidate.contains(char::is_whitespace)
}

/// Split a `;`-separated address cell into individual trimmed addresses,
/// dropping empty segments and anything that fails validation.
pub fn parse_address_list(cell: &str) -> Vec<String> {
    cell.split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty() && is_valid_email(part))
        .map(str::to_string)
        .collect()
}

/// The part of an email address before the `@`, or the whole string if
/// there is no `@`.
pub fn local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

/// Extract the domain of an email address, lowercased.
pub fn email_domain(email: &str) -> Option<String> {
    email.split_once('@').map(|(_, domain)| domain.trim().to_lowercase())
}

/// Normalize a string for fuzzy matching: lowercase with spaces and
/// hyphens removed. Used to pair attachment file names with recipient
/// names.
pub fn normalize_for_match(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_email() {
        assert!(is_valid_email("a@x.com"));
        assert!(is_valid_email("  user.name@sub.example.org  "));
        assert!(!is_valid_email("bad-email"));
        assert!(!is_valid_email("@x.com"));
        assert!(!is_valid_email("a@"));
        assert!(!is_valid_email("a@nodot"));
        assert!(!is_valid_email("a@.com"));
        assert!(!is_valid_email("a b@x.com"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn test_parse_address_list() {
        let parsed = parse_address_list("one@x.com; two@y.com ; ;not-an-email; three@z.org");
        assert_eq!(
            parsed,
            vec![
                "one@x.com".to_string(),
                "two@y.com".to_string(),
                "three@z.org".to_string()
            ]
        );
    }

    #[test]
    fn test_parse_address_list_empty() {
        assert!(parse_address_list("").is_empty());
        assert!(parse_address_list(" ; ; ").is_empty());
    }

    #[test]
    fn test_local_part() {
        assert_eq!(local_part("user@example.com"), "user");
        assert_eq!(local_part("no-at-sign"), "no-at-sign");
    }

    #[test]
    fn test_email_domain() {
        assert_eq!(email_domain("user@Example.COM"), Some("example.com".to_string()));
        assert_eq!(email_domain("plain"), None);
    }

    #[test]
    fn test_normalize_for_match() {
        assert_eq!(normalize_for_match("Jane Smith-Jones"), "janesmithjones");
        assert_eq!(normalize_for_match("  J A N E  "), "jane");
        assert_eq!(normalize_for_match(""), "");
    }
}
