//! Field rules for payment intents and card data.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::Datelike;
use regex::Regex;

use super::{BillingAddress, CardDetails, PaymentIntentRequest, PaymentPolicy};
use crate::error::FieldViolation;
use crate::types::Timestamp;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\p{L}\s'\-]+$").expect("valid regex"));

static STREET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\p{L}0-9\s'\-.,/]+$").expect("valid regex"));

static POSTAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}$").expect("valid regex"));

static CVC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{3,4}$").expect("valid regex"));

const MAX_ID_LEN: usize = 128;

// ---------------------------------------------------------------------------
// Intent schema
// ---------------------------------------------------------------------------

/// Shape and bounds checks that run before fraud scoring.
pub fn validate_intent(intent: &PaymentIntentRequest, policy: &PaymentPolicy) -> Vec<FieldViolation> {
    let mut errors = Vec::new();

    if intent.amount_cents < policy.min_amount_cents || intent.amount_cents > policy.max_amount_cents
    {
        errors.push(FieldViolation::new(
            "amountCents",
            format!(
                "Amount must be between {} and {} cents",
                policy.min_amount_cents, policy.max_amount_cents
            ),
        ));
    }
    if intent.currency != policy.currency {
        errors.push(FieldViolation::new(
            "currency",
            format!("Only {} is supported", policy.currency),
        ));
    }
    if intent.payment_methods.is_empty() {
        errors.push(FieldViolation::new(
            "paymentMethods",
            "At least one payment method is required",
        ));
    } else if intent.payment_methods.iter().collect::<HashSet<_>>().len()
        != intent.payment_methods.len()
    {
        errors.push(FieldViolation::new(
            "paymentMethods",
            "Payment methods must not repeat",
        ));
    }
    check_id(&mut errors, "userId", &intent.user_id, 1);
    check_id(&mut errors, "formSessionId", &intent.form_session_id, 1);
    check_id(
        &mut errors,
        "idempotencyKey",
        &intent.idempotency_key,
        policy.min_idempotency_key_len,
    );

    let address = &intent.billing_address;
    check_len(&mut errors, "billingAddress.firstName", &address.first_name, 2, 50);
    check_len(&mut errors, "billingAddress.lastName", &address.last_name, 2, 50);
    check_len(&mut errors, "billingAddress.street", &address.street, 3, 100);
    check_len(&mut errors, "billingAddress.city", &address.city, 2, 50);
    if !POSTAL_RE.is_match(&address.postal_code) {
        errors.push(FieldViolation::new(
            "billingAddress.postalCode",
            "Postal code must be exactly 4 digits",
        ));
    }
    if address.country != policy.country {
        errors.push(FieldViolation::new(
            "billingAddress.country",
            format!("Country must be {}", policy.country),
        ));
    }

    errors
}

/// Character-set rules for the address, run after fraud scoring so that
/// fixture-like submissions surface as policy blocks.
pub fn validate_address_charset(address: &BillingAddress) -> Vec<FieldViolation> {
    let mut errors = Vec::new();
    for (field, value) in [
        ("billingAddress.firstName", &address.first_name),
        ("billingAddress.lastName", &address.last_name),
        ("billingAddress.city", &address.city),
    ] {
        if !NAME_RE.is_match(value) {
            errors.push(FieldViolation::new(field, "Contains invalid characters"));
        }
    }
    if !STREET_RE.is_match(&address.street) {
        errors.push(FieldViolation::new(
            "billingAddress.street",
            "Contains invalid characters",
        ));
    }
    errors
}

fn check_len(errors: &mut Vec<FieldViolation>, field: &str, value: &str, min: usize, max: usize) {
    let len = value.trim().chars().count();
    if len < min || len > max {
        errors.push(FieldViolation::new(
            field,
            format!("Must be between {min} and {max} characters"),
        ));
    }
}

fn check_id(errors: &mut Vec<FieldViolation>, field: &str, value: &str, min: usize) {
    let len = value.trim().chars().count();
    if len < min || len > MAX_ID_LEN {
        errors.push(FieldViolation::new(
            field,
            format!("Must be between {min} and {MAX_ID_LEN} characters"),
        ));
    }
}

// ---------------------------------------------------------------------------
// Cards
// ---------------------------------------------------------------------------

/// Luhn checksum over a 12–19 digit card number. Spaces and hyphens are
/// ignored.
pub fn luhn_valid(number: &str) -> bool {
    let digits: Vec<u32> = number
        .chars()
        .filter(|c| *c != ' ' && *c != '-')
        .map(|c| c.to_digit(10))
        .collect::<Option<_>>()
        .unwrap_or_default();

    if !(12..=19).contains(&digits.len()) {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// All problems with `card` as of `now`. Nothing here is retained.
pub fn validate_card(card: &CardDetails, now: Timestamp) -> Vec<String> {
    let mut errors = Vec::new();

    if !luhn_valid(&card.number) {
        errors.push("Invalid card number".to_string());
    }

    if !(1..=12).contains(&card.expiry_month) {
        errors.push("Invalid expiry month".to_string());
    } else {
        let year = now.year();
        let month = now.month();
        let expiry_year = i32::from(card.expiry_year);
        if expiry_year < year || (expiry_year == year && card.expiry_month < month) {
            errors.push("Card has expired".to_string());
        }
    }

    if !CVC_RE.is_match(&card.cvc) {
        errors.push("Invalid CVC".to_string());
    }

    errors
}
