//! Contact-channel validation, normalisation and masking.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{CoreError, CoreResult};
use crate::types::ContactMethod;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"));

/// National (`0`), international (`0041`) or E.164 (`+41`) prefix followed by
/// nine significant digits, the first of which is non-zero.
static SWISS_PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\+41|0041|0)([1-9]\d{8})$").expect("valid regex"));

/// Longest contact value accepted before any parsing.
const MAX_CONTACT_LEN: usize = 254;

pub fn is_valid_email(value: &str) -> bool {
    value.len() <= MAX_CONTACT_LEN && EMAIL_RE.is_match(value.trim())
}

/// Strip the formatting characters people type into phone fields.
fn strip_phone_formatting(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect()
}

pub fn is_valid_swiss_phone(value: &str) -> bool {
    value.len() <= MAX_CONTACT_LEN && SWISS_PHONE_RE.is_match(&strip_phone_formatting(value))
}

/// Validate `value` against the declared channel and return its canonical
/// form: lowercase email, or `+41` followed by nine digits.
pub fn normalize_contact(method: ContactMethod, value: &str) -> CoreResult<String> {
    match method {
        ContactMethod::Email => {
            if !is_valid_email(value) {
                return Err(CoreError::Validation("Invalid email format".into()));
            }
            Ok(value.trim().to_lowercase())
        }
        ContactMethod::Phone => {
            let stripped = strip_phone_formatting(value);
            let caps = SWISS_PHONE_RE
                .captures(&stripped)
                .filter(|_| value.len() <= MAX_CONTACT_LEN)
                .ok_or_else(|| CoreError::Validation("Invalid Swiss phone number format".into()))?;
            Ok(format!("+41{}", &caps[2]))
        }
    }
}

/// Mask a contact value for logs: `us***@example.ch`, `+41***67`.
pub fn mask_contact(value: &str) -> String {
    if let Some((local, domain)) = value.split_once('@') {
        let keep: String = local.chars().take(2).collect();
        return format!("{keep}***@{domain}");
    }

    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 5 {
        return "***".to_string();
    }
    let head_len = if value.starts_with('+') { 3 } else { 2 };
    let head: String = chars[..head_len].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}***{tail}")
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn accepts_reasonable_emails() {
        assert!(is_valid_email("user@example.ch"));
        assert!(is_valid_email("first.last+tag@sub.example.com"));
        assert!(!is_valid_email("user@example"));
        assert!(!is_valid_email("user example@ch.ch"));
        assert!(!is_valid_email("@example.ch"));
    }

    #[test]
    fn accepts_swiss_phone_formats() {
        assert!(is_valid_swiss_phone("+41 79 123 45 67"));
        assert!(is_valid_swiss_phone("0041791234567"));
        assert!(is_valid_swiss_phone("079-123-45-67"));
        assert!(is_valid_swiss_phone("(044) 123 45 67"));
        assert!(!is_valid_swiss_phone("+49 79 123 45 67"));
        assert!(!is_valid_swiss_phone("0012345678"));
        assert!(!is_valid_swiss_phone("079 123 45 6"));
    }

    #[test]
    fn phone_numbers_normalise_to_one_key() {
        let a = normalize_contact(ContactMethod::Phone, "079 123 45 67").unwrap();
        let b = normalize_contact(ContactMethod::Phone, "+41791234567").unwrap();
        let c = normalize_contact(ContactMethod::Phone, "0041 79 123 45 67").unwrap();
        assert_eq!(a, "+41791234567");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn email_normalises_case_and_whitespace() {
        let e = normalize_contact(ContactMethod::Email, "  User@Example.CH ").unwrap();
        assert_eq!(e, "user@example.ch");
    }

    #[test]
    fn method_and_value_must_agree() {
        assert_matches!(
            normalize_contact(ContactMethod::Phone, "user@example.ch"),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            normalize_contact(ContactMethod::Email, "+41791234567"),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn masking_hides_the_middle() {
        assert_eq!(mask_contact("user@example.ch"), "us***@example.ch");
        assert_eq!(mask_contact("+41791234567"), "+41***67");
        assert_eq!(mask_contact("123"), "***");
    }
}
