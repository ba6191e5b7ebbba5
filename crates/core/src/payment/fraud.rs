//! Additive fraud heuristics over a submitted payment intent.

use serde::Serialize;

use super::PaymentIntentRequest;

#[derive(Debug, Clone)]
pub struct FraudPolicy {
    /// Scores strictly above this are refused.
    pub block_threshold: u8,
    pub large_amount_cents: u64,
    pub large_amount_weight: u8,
    /// More simultaneously requested methods than this looks like probing.
    pub max_plain_methods: usize,
    pub many_methods_weight: u8,
    pub address_mismatch_weight: u8,
    pub digits_in_name_weight: u8,
    pub test_street_weight: u8,
}

impl Default for FraudPolicy {
    fn default() -> Self {
        Self {
            block_threshold: 75,
            large_amount_cents: 50_000,
            large_amount_weight: 20,
            max_plain_methods: 2,
            many_methods_weight: 15,
            address_mismatch_weight: 30,
            digits_in_name_weight: 25,
            test_street_weight: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudAssessment {
    /// 0..=100.
    pub score: u8,
    pub signals: Vec<&'static str>,
}

impl FraudAssessment {
    pub fn is_blocked(&self, policy: &FraudPolicy) -> bool {
        self.score > policy.block_threshold
    }
}

/// Score an intent. `address_consistent` is the postal/canton lookup result.
pub fn assess(
    intent: &PaymentIntentRequest,
    address_consistent: bool,
    policy: &FraudPolicy,
) -> FraudAssessment {
    let mut score: u32 = 0;
    let mut signals = Vec::new();
    let mut add = |hit: bool, weight: u8, signal: &'static str| {
        if hit {
            score += u32::from(weight);
            signals.push(signal);
        }
    };

    let address = &intent.billing_address;
    add(
        u64::try_from(intent.amount_cents).is_ok_and(|a| a > policy.large_amount_cents),
        policy.large_amount_weight,
        "large_amount",
    );
    add(
        intent.payment_methods.len() > policy.max_plain_methods,
        policy.many_methods_weight,
        "many_payment_methods",
    );
    add(
        !address_consistent,
        policy.address_mismatch_weight,
        "address_mismatch",
    );
    add(
        has_digit(&address.first_name) || has_digit(&address.last_name),
        policy.digits_in_name_weight,
        "digits_in_name",
    );
    add(
        address.street.to_lowercase().contains("test"),
        policy.test_street_weight,
        "test_street",
    );

    FraudAssessment {
        score: score.min(100) as u8,
        signals,
    }
}

fn has_digit(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_digit())
}
