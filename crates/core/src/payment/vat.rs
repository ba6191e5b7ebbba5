//! VAT-inclusive amount breakdown.
//!
//! Gross prices include Swiss VAT. The net share is rounded half up to the
//! nearest cent with integer arithmetic, and VAT is whatever remains, so
//! `net + vat == gross` always holds exactly.

use serde::Serialize;

use crate::reference::BASIS_POINTS;

/// Swiss standard VAT rate, 7.7 %.
pub const DEFAULT_VAT_RATE_BP: u32 = 770;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AmountBreakdown {
    pub gross_cents: u64,
    pub net_cents: u64,
    pub vat_cents: u64,
    pub vat_rate_basis_points: u32,
    pub currency: String,
}

/// Split a VAT-inclusive gross amount into `(net, vat)`.
pub fn split_gross(gross_cents: u64, vat_rate_bp: u32) -> (u64, u64) {
    let numerator = u128::from(gross_cents) * u128::from(BASIS_POINTS);
    let denominator = u128::from(BASIS_POINTS + vat_rate_bp);
    // round(n / d) with halves rounded up: floor((2n + d) / 2d)
    let net = ((2 * numerator + denominator) / (2 * denominator)) as u64;
    (net, gross_cents - net)
}

pub fn breakdown(gross_cents: u64, vat_rate_bp: u32, currency: &str) -> AmountBreakdown {
    let (net_cents, vat_cents) = split_gross(gross_cents, vat_rate_bp);
    AmountBreakdown {
        gross_cents,
        net_cents,
        vat_cents,
        vat_rate_basis_points: vat_rate_bp,
        currency: currency.to_string(),
    }
}
