//! Eligibility score, pathway and urgency rules.
//!
//! Everything here is a pure function of the request, the patient's age and
//! the policy tables.

use serde::Serialize;

use super::MedicalInfo;
use crate::reference::{CantonCost, InsurerInfo, BASIS_POINTS};
use crate::types::InsuranceModel;

#[derive(Debug, Clone)]
pub struct EligibilityPolicy {
    pub min_age: u32,
    pub max_age: u32,
    pub senior_age: u32,
    pub max_age_penalty: i32,
    pub senior_penalty: i32,
    pub risk_factor_bonus: i32,
    pub risk_factor_cap: i32,
    pub symptoms_bonus: i32,
    pub history_bonus: i32,
    pub medication_bonus: i32,
    /// Lowest score that counts as eligible.
    pub referral_threshold: u8,
    /// Lowest score that is reimbursed without a referral, model permitting.
    pub reimbursed_threshold: u8,
    /// Patient share above which the deductible is flagged.
    pub deductible_floor_chf: u32,
    pub contraindications: Vec<String>,
    pub emergency_indicators: Vec<String>,
    pub urgent_indicators: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self {
            min_age: 18,
            max_age: 80,
            senior_age: 65,
            max_age_penalty: 30,
            senior_penalty: 10,
            risk_factor_bonus: 5,
            risk_factor_cap: 20,
            symptoms_bonus: 15,
            history_bonus: 10,
            medication_bonus: 10,
            referral_threshold: 60,
            reimbursed_threshold: 80,
            deductible_floor_chf: 50,
            contraindications: strings(&[
                "pacemaker",
                "pregnancy",
                "severe_heart_failure",
                "active_cardiac_surgery",
                "skin_allergies",
                "chronic_wound",
            ]),
            emergency_indicators: strings(&["chest_pain", "shortness_of_breath", "syncope"]),
            urgent_indicators: strings(&["palpitations", "dizziness", "fatigue"]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pathway {
    Reimbursed,
    GpReferralRequired,
    SelfPay,
    Ineligible,
}

impl Pathway {
    pub fn as_str(self) -> &'static str {
        match self {
            Pathway::Reimbursed => "reimbursed",
            Pathway::GpReferralRequired => "gp_referral_required",
            Pathway::SelfPay => "self_pay",
            Pathway::Ineligible => "ineligible",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    Routine,
    Urgent,
    Emergency,
}

impl UrgencyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            UrgencyLevel::Routine => "routine",
            UrgencyLevel::Urgent => "urgent",
            UrgencyLevel::Emergency => "emergency",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Score {
    pub value: u8,
    /// Adjustments applied, in order.
    pub reasons: Vec<String>,
}

/// Additive score starting at 100, clamped to `0..=100`. Hard exclusions
/// (under-age, disallowed contraindication) force 0 after everything else.
pub fn score(age: u32, medical: &MedicalInfo, policy: &EligibilityPolicy) -> Score {
    let mut value: i32 = 100;
    let mut reasons = Vec::new();

    if age > policy.max_age {
        value -= policy.max_age_penalty;
        reasons.push(format!("Age above {}: -{}", policy.max_age, policy.max_age_penalty));
    }
    if age > policy.senior_age {
        value -= policy.senior_penalty;
        reasons.push(format!("Age above {}: -{}", policy.senior_age, policy.senior_penalty));
    }

    let risk_count = i32::try_from(medical.risk_factors.len()).unwrap_or(i32::MAX);
    if risk_count > 0 {
        let bonus = risk_count
            .saturating_mul(policy.risk_factor_bonus)
            .min(policy.risk_factor_cap);
        value += bonus;
        reasons.push(format!("{risk_count} risk factor(s): +{bonus}"));
    }
    if medical.has_cardiac_symptoms {
        value += policy.symptoms_bonus;
        reasons.push(format!("Cardiac symptoms: +{}", policy.symptoms_bonus));
    }
    if medical.has_cardiac_history {
        value += policy.history_bonus;
        reasons.push(format!("Cardiac history: +{}", policy.history_bonus));
    }
    if medical.takes_cardiac_medication {
        value += policy.medication_bonus;
        reasons.push(format!("Cardiac medication: +{}", policy.medication_bonus));
    }

    let mut value = value.clamp(0, 100) as u8;

    if age < policy.min_age {
        value = 0;
        reasons.push(format!("Below minimum age {}: excluded", policy.min_age));
    }
    let excluded: Vec<&str> = medical
        .contraindications
        .iter()
        .filter(|c| policy.contraindications.contains(*c))
        .map(String::as_str)
        .collect();
    if !excluded.is_empty() {
        value = 0;
        reasons.push(format!("Contraindication ({}): excluded", excluded.join(", ")));
    }

    Score { value, reasons }
}

/// Map a final score to a pathway. `insurer` is `None` for providers missing
/// from the reference table, which are treated as requiring a referral.
pub fn pathway(
    score: u8,
    model: InsuranceModel,
    insurer: Option<&InsurerInfo>,
    policy: &EligibilityPolicy,
) -> Pathway {
    if score == 0 {
        return Pathway::Ineligible;
    }
    if score < policy.referral_threshold {
        return Pathway::SelfPay;
    }
    if model.forces_referral() {
        return Pathway::GpReferralRequired;
    }
    if score >= policy.reimbursed_threshold {
        return Pathway::Reimbursed;
    }
    match insurer {
        Some(info) if !info.requires_gp_referral => Pathway::Reimbursed,
        _ => Pathway::GpReferralRequired,
    }
}

pub fn urgency(medical: &MedicalInfo, policy: &EligibilityPolicy) -> UrgencyLevel {
    let any_in = |list: &[String]| medical.risk_factors.iter().any(|r| list.contains(r));
    if any_in(&policy.emergency_indicators) {
        UrgencyLevel::Emergency
    } else if any_in(&policy.urgent_indicators)
        || (medical.has_cardiac_symptoms && medical.has_cardiac_history)
    {
        UrgencyLevel::Urgent
    } else {
        UrgencyLevel::Routine
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimate {
    pub base_cost_chf: u32,
    pub insurance_covered_chf: u32,
    pub patient_cost_chf: u32,
    pub coverage_rate_basis_points: u32,
    pub deductible_applies: bool,
}

/// Canton base price times the insurer's reimbursement rate, falling back to
/// the canton default when the insurer is unknown.
pub fn cost_estimate(
    cost: CantonCost,
    insurer: Option<&InsurerInfo>,
    policy: &EligibilityPolicy,
) -> CostEstimate {
    let rate = insurer.map_or(cost.coverage_rate_bp, |i| i.reimbursement_rate_bp);
    let numerator = u64::from(cost.base_price_chf) * u64::from(rate);
    let denominator = u64::from(BASIS_POINTS);
    let covered = ((2 * numerator + denominator) / (2 * denominator)) as u32;
    let covered = covered.min(cost.base_price_chf);
    let patient = cost.base_price_chf - covered;
    CostEstimate {
        base_cost_chf: cost.base_price_chf,
        insurance_covered_chf: covered,
        patient_cost_chf: patient,
        coverage_rate_basis_points: rate,
        deductible_applies: patient > policy.deductible_floor_chf,
    }
}

pub fn next_steps(pathway: Pathway, urgency: UrgencyLevel, medical: &MedicalInfo) -> Vec<String> {
    let mut steps: Vec<&str> = match pathway {
        Pathway::Reimbursed => vec![
            "Complete registration process",
            "Schedule device delivery",
            if urgency == UrgencyLevel::Urgent {
                "Priority scheduling within 2-3 business days"
            } else {
                "Standard scheduling within 5-7 business days"
            },
        ],
        Pathway::GpReferralRequired => {
            let mut steps = vec![
                "Download GP referral packet",
                "Schedule appointment with your general practitioner",
                "Present the monitoring request to your GP",
                "Return with signed referral to complete registration",
            ];
            if urgency == UrgencyLevel::Urgent {
                steps.push("Inform GP of urgent medical need");
            }
            steps
        }
        Pathway::SelfPay => vec![
            "Review self-pay pricing",
            "Complete payment process",
            "Schedule device delivery",
            "Consider discussing with insurance for potential reimbursement",
        ],
        Pathway::Ineligible => {
            let mut steps = vec![
                "Consult with healthcare provider",
                "Consider alternative cardiac monitoring options",
            ];
            if !medical.contraindications.is_empty() {
                steps.push("Address contraindications with medical professional");
            }
            steps
        }
    };
    if urgency == UrgencyLevel::Emergency {
        steps.insert(
            0,
            "URGENT: Contact emergency services if experiencing chest pain or severe symptoms",
        );
    }
    steps.into_iter().map(String::from).collect()
}

pub fn summary_reason(pathway: Pathway) -> &'static str {
    match pathway {
        Pathway::Ineligible => "Medical contraindications or age restrictions prevent eligibility",
        Pathway::Reimbursed => "Eligible for the reimbursed pathway",
        Pathway::GpReferralRequired => "Eligible with GP referral required",
        Pathway::SelfPay => "Eligibility score below threshold - self-pay option available",
    }
}
