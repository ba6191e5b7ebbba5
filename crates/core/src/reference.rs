//! Static Swiss reference tables: insurers, canton costs, postal prefixes.
//!
//! These are read-only configuration consumed by the payment and
//! eligibility services. [`ReferenceData::swiss_defaults`] carries the
//! tables in production use; tests and deployments may build their own.

use std::collections::HashMap;

use serde::Serialize;

use crate::types::{Canton, InsuranceModel};

/// Basis points in one whole (100 %).
pub const BASIS_POINTS: u32 = 10_000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsurerInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub supported_models: Vec<InsuranceModel>,
    pub requires_gp_referral: bool,
    /// Share of the monitoring cost the insurer reimburses.
    pub reimbursement_rate_bp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CantonCost {
    pub base_price_chf: u32,
    /// Default reimbursement rate when the insurer is unknown.
    pub coverage_rate_bp: u32,
}

#[derive(Debug, Clone)]
pub struct ReferenceData {
    pub insurers: Vec<InsurerInfo>,
    pub canton_costs: HashMap<Canton, CantonCost>,
    /// Two-digit postal-code prefixes in use per canton. Cantons without an
    /// entry are not checked.
    pub postal_prefixes: HashMap<Canton, Vec<&'static str>>,
}

impl ReferenceData {
    pub fn insurer(&self, id: &str) -> Option<&InsurerInfo> {
        self.insurers.iter().find(|i| i.id.eq_ignore_ascii_case(id))
    }

    pub fn canton_cost(&self, canton: Canton) -> Option<CantonCost> {
        self.canton_costs.get(&canton).copied()
    }

    /// Whether `postal_code` plausibly belongs to `canton`.
    pub fn postal_code_matches(&self, canton: Canton, postal_code: &str) -> bool {
        match self.postal_prefixes.get(&canton) {
            None => true,
            Some(prefixes) => prefixes.iter().any(|p| postal_code.starts_with(p)),
        }
    }

    pub fn swiss_defaults() -> Self {
        use InsuranceModel::*;

        let insurers = vec![
            insurer("css", "CSS", &[Standard, Flex, Hmo, Hausarzt], false, 9_000),
            insurer("helsana", "Helsana", &[Standard, Flex, Hmo, Telmed], true, 8_500),
            insurer("swica", "SWICA", &[Standard, Hmo, Hausarzt, Telmed], true, 8_800),
            insurer("assura", "Assura", &[Standard, Flex], false, 8_000),
            insurer("groupe_mutuel", "Groupe Mutuel", &[Standard, Flex, Hmo], false, 8_500),
            insurer("atupri", "Atupri", &[Standard, Hausarzt, Telmed], true, 8_700),
            insurer("concordia", "Concordia", &[Standard, Flex, Hmo, Hausarzt], true, 8_600),
            insurer("kpt", "KPT", &[Standard, Hmo, Telmed], true, 8_300),
            insurer("sanitas", "Sanitas", &[Standard, Flex, Hausarzt], false, 8_900),
        ];

        let canton_costs = [
            (Canton::Zh, 350, 9_000),
            (Canton::Be, 340, 8_800),
            (Canton::Ge, 360, 8_500),
            (Canton::Vd, 355, 8_700),
            (Canton::Ag, 345, 8_900),
            (Canton::Sg, 330, 9_000),
            (Canton::Lu, 325, 9_100),
            (Canton::Ti, 340, 8_800),
            (Canton::Vs, 320, 9_200),
            (Canton::Bl, 350, 8_900),
            (Canton::Bs, 365, 8_600),
            (Canton::So, 335, 9_000),
            (Canton::Tg, 330, 9_100),
            (Canton::Gr, 325, 9_200),
            (Canton::Fr, 340, 8_800),
            (Canton::Sh, 345, 8_900),
            (Canton::Ne, 350, 8_700),
            (Canton::Ju, 335, 9_000),
            (Canton::Zg, 360, 8_500),
            (Canton::Sz, 340, 8_800),
            (Canton::Ow, 320, 9_300),
            (Canton::Nw, 325, 9_200),
            (Canton::Gl, 330, 9_100),
            (Canton::Ur, 315, 9_400),
            (Canton::Ai, 310, 9_500),
            (Canton::Ar, 325, 9_200),
        ]
        .into_iter()
        .map(|(canton, base_price_chf, coverage_rate_bp)| {
            (
                canton,
                CantonCost {
                    base_price_chf,
                    coverage_rate_bp,
                },
            )
        })
        .collect();

        let postal_prefixes = HashMap::from([
            (Canton::Zh, vec!["80", "81", "82", "84", "89"]),
            (Canton::Be, vec!["30", "31", "32", "33", "34", "35", "36", "37", "38"]),
            (Canton::Ge, vec!["12"]),
        ]);

        Self {
            insurers,
            canton_costs,
            postal_prefixes,
        }
    }
}

fn insurer(
    id: &'static str,
    name: &'static str,
    models: &[InsuranceModel],
    requires_gp_referral: bool,
    reimbursement_rate_bp: u32,
) -> InsurerInfo {
    InsurerInfo {
        id,
        name,
        supported_models: models.to_vec(),
        requires_gp_referral,
        reimbursement_rate_bp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_canton_has_a_cost_entry() {
        let data = ReferenceData::swiss_defaults();
        for canton in Canton::ALL {
            assert!(data.canton_cost(canton).is_some(), "missing cost for {canton}");
        }
    }

    #[test]
    fn insurer_lookup_is_case_insensitive() {
        let data = ReferenceData::swiss_defaults();
        let helsana = data.insurer("Helsana").unwrap();
        assert!(helsana.requires_gp_referral);
        assert_eq!(helsana.reimbursement_rate_bp, 8_500);
        assert!(data.insurer("unknown").is_none());
    }

    #[test]
    fn postal_prefixes_check_listed_cantons_only() {
        let data = ReferenceData::swiss_defaults();
        assert!(data.postal_code_matches(Canton::Zh, "8001"));
        assert!(!data.postal_code_matches(Canton::Zh, "9999"));
        assert!(data.postal_code_matches(Canton::Ge, "1201"));
        assert!(!data.postal_code_matches(Canton::Ge, "8001"));
        // No table for Ticino, so anything passes.
        assert!(data.postal_code_matches(Canton::Ti, "6900"));
    }
}
