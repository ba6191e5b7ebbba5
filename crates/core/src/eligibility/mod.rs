//! Insurance-eligibility scoring for the monitoring service.
//!
//! Results are a pure function of the validated request, the clock's current
//! date and the reference tables. The service only adds the consent gate,
//! field validation and the audit trail around [`scoring`].

pub mod referral;
pub mod scoring;

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audit::{action_types, resources, AuditEvent, AuditLog, AuditResult, SecurityLevel};
use crate::clock::SharedClock;
use crate::error::{CoreError, CoreResult, FieldViolation};
use crate::reference::{InsurerInfo, ReferenceData};
use crate::types::{Canton, ClientContext, InsuranceModel};

use referral::{PatientContactInfo, ReferralDocument};
use scoring::{CostEstimate, EligibilityPolicy, Pathway, UrgencyLevel};

const MAX_LIST_ITEMS: usize = 32;
const MAX_ITEM_LEN: usize = 64;
const MAX_AGE_YEARS: u32 = 130;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PersonalInfo {
    /// `YYYY-MM-DD`.
    pub date_of_birth: String,
    pub canton: Canton,
    pub insurance_provider: String,
    pub insurance_model: InsuranceModel,
    #[serde(default)]
    pub insurance_number: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MedicalInfo {
    #[serde(default)]
    pub has_cardiac_symptoms: bool,
    #[serde(default)]
    pub takes_cardiac_medication: bool,
    #[serde(default)]
    pub has_cardiac_history: bool,
    #[serde(default)]
    pub contraindications: Vec<String>,
    #[serde(default)]
    pub risk_factors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EligibilityRequest {
    pub session_id: String,
    pub personal_info: PersonalInfo,
    pub medical_info: MedicalInfo,
    #[serde(default)]
    pub consent_given: bool,
    #[serde(default)]
    pub data_processing_consent: bool,
}

impl EligibilityRequest {
    pub fn has_consent(&self) -> bool {
        self.consent_given && self.data_processing_consent
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReferralRequest {
    pub eligibility_request: EligibilityRequest,
    pub patient_contact_info: PatientContactInfo,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityResult {
    pub eligible: bool,
    pub pathway: Pathway,
    pub reason: &'static str,
    pub eligibility_score: u8,
    pub reasons: Vec<String>,
    pub next_steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_coverage: Option<CostEstimate>,
    pub gp_referral_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_provider: Option<&'static str>,
    pub urgency_level: UrgencyLevel,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathwayDistribution {
    pub reimbursed: u64,
    pub gp_referral_required: u64,
    pub self_pay: u64,
    pub ineligible: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrgencyDistribution {
    pub routine: u64,
    pub urgent: u64,
    pub emergency: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityMetrics {
    pub calculations: u64,
    pub referrals_generated: u64,
    pub consent_blocked: u64,
    pub average_score: u64,
    pub pathway_distribution: PathwayDistribution,
    pub urgency_distribution: UrgencyDistribution,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct EligibilityScoringService {
    policy: EligibilityPolicy,
    reference: Arc<ReferenceData>,
    audit: Arc<AuditLog>,
    clock: SharedClock,
}

impl EligibilityScoringService {
    pub fn new(
        policy: EligibilityPolicy,
        reference: Arc<ReferenceData>,
        audit: Arc<AuditLog>,
        clock: SharedClock,
    ) -> Self {
        Self {
            policy,
            reference,
            audit,
            clock,
        }
    }

    pub fn policy(&self) -> &EligibilityPolicy {
        &self.policy
    }

    pub fn insurance_providers(&self) -> &[InsurerInfo] {
        &self.reference.insurers
    }

    /// Score a request for `user_id`.
    pub fn calculate(
        &self,
        request: &EligibilityRequest,
        user_id: &str,
        client: &ClientContext,
    ) -> CoreResult<EligibilityResult> {
        // 1. Consent gate, before anything is computed.
        self.require_consent(request, user_id, client, "calculate")?;

        // 2. Field rules.
        let (age, insurer) = self.validate(request, user_id, client)?;

        // 3. Score and classify.
        let personal = &request.personal_info;
        let medical = &request.medical_info;
        let score = scoring::score(age, medical, &self.policy);
        let pathway = scoring::pathway(score.value, personal.insurance_model, insurer, &self.policy);
        let urgency = scoring::urgency(medical, &self.policy);
        let eligible = score.value >= self.policy.referral_threshold;
        let estimated_coverage = if eligible {
            self.reference
                .canton_cost(personal.canton)
                .map(|cost| scoring::cost_estimate(cost, insurer, &self.policy))
        } else {
            None
        };

        let result = EligibilityResult {
            eligible,
            pathway,
            reason: scoring::summary_reason(pathway),
            eligibility_score: score.value,
            reasons: score.reasons,
            next_steps: scoring::next_steps(pathway, urgency, medical),
            estimated_coverage,
            gp_referral_required: pathway == Pathway::GpReferralRequired,
            recommended_provider: insurer.map(|i| i.name),
            urgency_level: urgency,
        };

        self.audit_eligibility(
            action_types::ELIGIBILITY_CALCULATED,
            AuditResult::Success,
            user_id,
            client,
            json!({
                "eligibilityScore": result.eligibility_score,
                "pathway": pathway.as_str(),
                "urgencyLevel": urgency.as_str(),
                "insuranceProvider": personal.insurance_provider,
                "insuranceModel": personal.insurance_model,
                "canton": personal.canton,
            }),
        );

        Ok(result)
    }

    /// Produce a referral document for the same inputs. The urgency is
    /// classified again; the score is not.
    pub fn generate_referral(
        &self,
        request: &ReferralRequest,
        user_id: &str,
        client: &ClientContext,
    ) -> CoreResult<ReferralDocument> {
        let eligibility = &request.eligibility_request;
        self.require_consent(eligibility, user_id, client, "referral")?;

        let contact_errors = request.patient_contact_info.validate();
        if !contact_errors.is_empty() {
            self.audit_validation_failure(user_id, client, &contact_errors);
            return Err(CoreError::InvalidFields(contact_errors));
        }
        self.validate(eligibility, user_id, client)?;

        let urgency = scoring::urgency(&eligibility.medical_info, &self.policy);
        let document = referral::build(
            eligibility,
            &request.patient_contact_info,
            urgency,
            self.clock.now(),
        );

        self.audit_eligibility(
            action_types::REFERRAL_GENERATED,
            AuditResult::Success,
            user_id,
            client,
            json!({
                "documentId": document.document_id,
                "urgencyLevel": urgency.as_str(),
                "insuranceProvider": eligibility.personal_info.insurance_provider,
            }),
        );

        Ok(document)
    }

    pub fn metrics(&self) -> EligibilityMetrics {
        let since = self.clock.now() - Duration::hours(1);
        let mut metrics = EligibilityMetrics::default();
        let mut score_total = 0u64;

        for entry in self.audit.since(since) {
            match entry.action.as_str() {
                action_types::ELIGIBILITY_CALCULATED => {
                    metrics.calculations += 1;
                    score_total += entry.details["eligibilityScore"].as_u64().unwrap_or(0);
                    let pathways = &mut metrics.pathway_distribution;
                    match entry.details["pathway"].as_str() {
                        Some("reimbursed") => pathways.reimbursed += 1,
                        Some("gp_referral_required") => pathways.gp_referral_required += 1,
                        Some("self_pay") => pathways.self_pay += 1,
                        Some("ineligible") => pathways.ineligible += 1,
                        _ => {}
                    }
                    let urgency = &mut metrics.urgency_distribution;
                    match entry.details["urgencyLevel"].as_str() {
                        Some("routine") => urgency.routine += 1,
                        Some("urgent") => urgency.urgent += 1,
                        Some("emergency") => urgency.emergency += 1,
                        _ => {}
                    }
                }
                action_types::REFERRAL_GENERATED => metrics.referrals_generated += 1,
                action_types::ELIGIBILITY_CONSENT_MISSING => metrics.consent_blocked += 1,
                _ => {}
            }
        }

        if metrics.calculations > 0 {
            metrics.average_score =
                (score_total + metrics.calculations / 2) / metrics.calculations;
        }
        metrics
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn require_consent(
        &self,
        request: &EligibilityRequest,
        user_id: &str,
        client: &ClientContext,
        operation: &str,
    ) -> CoreResult<()> {
        if request.has_consent() {
            return Ok(());
        }
        self.audit_eligibility(
            action_types::ELIGIBILITY_CONSENT_MISSING,
            AuditResult::Blocked,
            user_id,
            client,
            json!({
                "operation": operation,
                "consentGiven": request.consent_given,
                "dataProcessingConsent": request.data_processing_consent,
            }),
        );
        Err(CoreError::ConsentRequired(
            "Patient consent and data-processing consent are both required".into(),
        ))
    }

    /// Field rules. Returns the patient's age and the insurer, if known.
    fn validate(
        &self,
        request: &EligibilityRequest,
        user_id: &str,
        client: &ClientContext,
    ) -> CoreResult<(u32, Option<&InsurerInfo>)> {
        let mut errors = Vec::new();
        let personal = &request.personal_info;
        let today = self.clock.now().date_naive();

        let session_len = request.session_id.trim().len();
        if session_len == 0 || session_len > 128 {
            errors.push(FieldViolation::new(
                "sessionId",
                "Must be between 1 and 128 characters",
            ));
        }

        let age = match NaiveDate::parse_from_str(&personal.date_of_birth, "%Y-%m-%d") {
            Err(_) => {
                errors.push(FieldViolation::new(
                    "personalInfo.dateOfBirth",
                    "Date of birth must be in YYYY-MM-DD format",
                ));
                None
            }
            Ok(dob) => match today.years_since(dob) {
                Some(age) if age <= MAX_AGE_YEARS => Some(age),
                Some(_) => {
                    errors.push(FieldViolation::new(
                        "personalInfo.dateOfBirth",
                        "Date of birth is implausibly far in the past",
                    ));
                    None
                }
                None => {
                    errors.push(FieldViolation::new(
                        "personalInfo.dateOfBirth",
                        "Date of birth cannot be in the future",
                    ));
                    None
                }
            },
        };

        let provider = personal.insurance_provider.trim();
        let insurer = self.reference.insurer(provider);
        if provider.is_empty() || provider.len() > MAX_ITEM_LEN {
            errors.push(FieldViolation::new(
                "personalInfo.insuranceProvider",
                "Insurance provider is required",
            ));
        } else if let Some(info) = insurer {
            if !info.supported_models.contains(&personal.insurance_model) {
                errors.push(FieldViolation::new(
                    "personalInfo.insuranceModel",
                    format!(
                        "{} does not offer the {} model",
                        info.name,
                        personal.insurance_model.as_str()
                    ),
                ));
            }
        }

        for (field, list) in [
            ("medicalInfo.contraindications", &request.medical_info.contraindications),
            ("medicalInfo.riskFactors", &request.medical_info.risk_factors),
        ] {
            let bad_item = list
                .iter()
                .any(|item| item.trim().is_empty() || item.len() > MAX_ITEM_LEN);
            if list.len() > MAX_LIST_ITEMS || bad_item {
                errors.push(FieldViolation::new(
                    field,
                    format!(
                        "At most {MAX_LIST_ITEMS} entries of 1 to {MAX_ITEM_LEN} characters"
                    ),
                ));
            }
        }

        match age {
            Some(age) if errors.is_empty() => Ok((age, insurer)),
            _ => {
                self.audit_validation_failure(user_id, client, &errors);
                Err(CoreError::InvalidFields(errors))
            }
        }
    }

    fn audit_validation_failure(
        &self,
        user_id: &str,
        client: &ClientContext,
        errors: &[FieldViolation],
    ) {
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        self.audit_eligibility(
            action_types::ELIGIBILITY_VALIDATION_FAILED,
            AuditResult::Failure,
            user_id,
            client,
            json!({ "fields": fields }),
        );
    }

    fn audit_eligibility(
        &self,
        action: &'static str,
        result: AuditResult,
        user_id: &str,
        client: &ClientContext,
        details: serde_json::Value,
    ) {
        self.audit.record(
            AuditEvent::new(action, resources::ELIGIBILITY_SERVICE, result)
                .with_actor(user_id)
                .with_client(client)
                .with_level(SecurityLevel::Restricted)
                .with_details(details),
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
