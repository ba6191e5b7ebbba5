//! GP referral document formatting.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::scoring::UrgencyLevel;
use super::EligibilityRequest;
use crate::contact::{is_valid_email, is_valid_swiss_phone};
use crate::error::FieldViolation;
use crate::tokens::random_upper_alphanumeric;
use crate::types::{Canton, InsuranceModel, Timestamp};

pub const REFERRAL_VALIDITY_DAYS: i64 = 30;

const REQUESTED_SERVICE: &str = "Wearable ECG heart monitoring";
const MONITORING_DURATION: &str = "10 days";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContactAddress {
    pub street: String,
    pub postal_code: String,
    pub city: String,
    pub canton: Canton,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PatientContactInfo {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub address: ContactAddress,
}

impl PatientContactInfo {
    pub fn validate(&self) -> Vec<FieldViolation> {
        let mut errors = Vec::new();
        let name_len = self.name.trim().chars().count();
        if !(2..=100).contains(&name_len) {
            errors.push(FieldViolation::new(
                "patientContactInfo.name",
                "Must be between 2 and 100 characters",
            ));
        }
        if !is_valid_swiss_phone(&self.phone) {
            errors.push(FieldViolation::new(
                "patientContactInfo.phone",
                "Invalid Swiss phone number format",
            ));
        }
        if !is_valid_email(&self.email) {
            errors.push(FieldViolation::new(
                "patientContactInfo.email",
                "Invalid email format",
            ));
        }
        let postal = &self.address.postal_code;
        if postal.len() != 4 || !postal.chars().all(|c| c.is_ascii_digit()) {
            errors.push(FieldViolation::new(
                "patientContactInfo.address.postalCode",
                "Postal code must be exactly 4 digits",
            ));
        }
        for (field, value) in [
            ("patientContactInfo.address.street", &self.address.street),
            ("patientContactInfo.address.city", &self.address.city),
        ] {
            if value.trim().is_empty() || value.chars().count() > 100 {
                errors.push(FieldViolation::new(field, "Must be between 1 and 100 characters"));
            }
        }
        errors
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralAddress {
    pub first_name: String,
    pub last_name: String,
    pub street: String,
    pub postal_code: String,
    pub city: String,
    pub canton: Canton,
    pub country: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientInfo {
    pub name: String,
    pub date_of_birth: String,
    pub address: ReferralAddress,
    pub phone: String,
    pub email: String,
    pub insurance_number: String,
    pub insurance_provider: String,
    pub insurance_model: InsuranceModel,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalContext {
    pub symptoms: Vec<String>,
    pub risk_factors: Vec<String>,
    pub current_medications: Vec<String>,
    pub medical_history: Vec<String>,
    pub urgency_level: UrgencyLevel,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetails {
    pub requested_service: &'static str,
    pub duration: &'static str,
    pub justification: String,
    pub clinical_indication: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralDocument {
    pub document_id: String,
    pub generated_at: Timestamp,
    pub valid_until: Timestamp,
    pub patient_info: PatientInfo,
    pub medical_context: MedicalContext,
    pub request_details: RequestDetails,
}

/// Format a referral. Eligibility is not recomputed here.
pub fn build(
    request: &EligibilityRequest,
    contact: &PatientContactInfo,
    urgency: UrgencyLevel,
    now: Timestamp,
) -> ReferralDocument {
    let personal = &request.personal_info;
    let medical = &request.medical_info;

    let mut parts = contact.name.split_whitespace();
    let first_name = parts.next().unwrap_or_default().to_string();
    let last_name = parts.collect::<Vec<_>>().join(" ");

    let mut symptoms = Vec::new();
    if medical.has_cardiac_symptoms {
        symptoms.push("Reported cardiac symptoms".to_string());
    }
    symptoms.extend(medical.risk_factors.iter().cloned());

    ReferralDocument {
        document_id: format!(
            "REF-{}-{}",
            now.timestamp_millis(),
            random_upper_alphanumeric(6)
        ),
        generated_at: now,
        valid_until: now + Duration::days(REFERRAL_VALIDITY_DAYS),
        patient_info: PatientInfo {
            name: contact.name.trim().to_string(),
            date_of_birth: personal.date_of_birth.clone(),
            address: ReferralAddress {
                first_name,
                last_name,
                street: contact.address.street.clone(),
                postal_code: contact.address.postal_code.clone(),
                city: contact.address.city.clone(),
                canton: contact.address.canton,
                country: "CH",
            },
            phone: contact.phone.clone(),
            email: contact.email.clone(),
            insurance_number: personal
                .insurance_number
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or("Not provided")
                .to_string(),
            insurance_provider: personal.insurance_provider.clone(),
            insurance_model: personal.insurance_model,
        },
        medical_context: MedicalContext {
            symptoms,
            risk_factors: medical.risk_factors.clone(),
            current_medications: if medical.takes_cardiac_medication {
                vec!["Cardiac medications (details to be provided)".to_string()]
            } else {
                Vec::new()
            },
            medical_history: if medical.has_cardiac_history {
                vec!["Previous cardiac history".to_string()]
            } else {
                Vec::new()
            },
            urgency_level: urgency,
        },
        request_details: RequestDetails {
            requested_service: REQUESTED_SERVICE,
            duration: MONITORING_DURATION,
            justification: justification(request, urgency),
            clinical_indication: clinical_indication(request),
        },
    }
}

fn justification(request: &EligibilityRequest, urgency: UrgencyLevel) -> String {
    let medical = &request.medical_info;
    let mut lines = Vec::new();
    if medical.has_cardiac_symptoms {
        lines.push("Patient reports cardiac symptoms requiring monitoring".to_string());
    }
    if medical.has_cardiac_history {
        lines.push("Previous cardiac history indicates need for ongoing monitoring".to_string());
    }
    if medical.takes_cardiac_medication {
        lines.push(
            "Patient on cardiac medication requiring monitoring for effectiveness".to_string(),
        );
    }
    if !medical.risk_factors.is_empty() {
        lines.push(format!(
            "Cardiovascular risk factors present: {}",
            medical.risk_factors.join(", ")
        ));
    }
    if urgency != UrgencyLevel::Routine {
        lines.push("Clinical presentation suggests urgent need for cardiac monitoring".to_string());
    }

    if lines.is_empty() {
        "Preventive cardiac monitoring requested for cardiovascular risk assessment.".to_string()
    } else {
        format!("{}.", lines.join(". "))
    }
}

fn clinical_indication(request: &EligibilityRequest) -> String {
    let medical = &request.medical_info;
    let mut parts = vec!["Ambulatory cardiac monitoring"];
    if medical.has_cardiac_symptoms {
        parts.push("symptom correlation");
    }
    if medical.has_cardiac_history {
        parts.push("disease progression monitoring");
    }
    if medical.takes_cardiac_medication {
        parts.push("medication response assessment");
    }
    parts.join(" - ")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::super::tests::{contact, request};
    use super::*;

    #[test]
    fn document_has_id_and_thirty_day_window() {
        let now = Utc::now();
        let doc = build(&request(), &contact(), UrgencyLevel::Routine, now);
        let prefix = format!("REF-{}-", now.timestamp_millis());
        assert!(doc.document_id.starts_with(&prefix));
        let suffix = &doc.document_id[prefix.len()..];
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert_eq!(doc.valid_until - doc.generated_at, Duration::days(30));
    }

    #[test]
    fn name_is_split_and_insurance_number_defaults() {
        let mut c = contact();
        c.name = "Anna Maria  Meier".into();
        let doc = build(&request(), &c, UrgencyLevel::Routine, Utc::now());
        assert_eq!(doc.patient_info.address.first_name, "Anna");
        assert_eq!(doc.patient_info.address.last_name, "Maria Meier");
        assert_eq!(doc.patient_info.insurance_number, "Not provided");
        assert_eq!(doc.patient_info.address.country, "CH");
    }

    #[test]
    fn justification_and_indication_follow_medical_flags() {
        let mut r = request();
        r.medical_info.has_cardiac_history = true;
        r.medical_info.takes_cardiac_medication = true;
        let doc = build(&r, &contact(), UrgencyLevel::Urgent, Utc::now());
        assert_eq!(
            doc.request_details.clinical_indication,
            "Ambulatory cardiac monitoring - symptom correlation - disease progression monitoring - medication response assessment"
        );
        assert!(doc.request_details.justification.ends_with("urgent need for cardiac monitoring."));
        assert_eq!(doc.medical_context.medical_history, vec!["Previous cardiac history"]);
        assert_eq!(doc.request_details.duration, "10 days");
    }

    #[test]
    fn preventive_text_without_findings() {
        let mut r = request();
        r.medical_info.has_cardiac_symptoms = false;
        let doc = build(&r, &contact(), UrgencyLevel::Routine, Utc::now());
        assert!(doc.request_details.justification.starts_with("Preventive"));
        assert_eq!(doc.request_details.clinical_indication, "Ambulatory cardiac monitoring");
    }

    #[test]
    fn contact_validation_reports_each_field() {
        let mut c = contact();
        c.phone = "12345".into();
        c.email = "nope".into();
        c.address.postal_code = "80a1".into();
        let fields: Vec<_> = c.validate().into_iter().map(|v| v.field).collect();
        assert_eq!(
            fields,
            vec![
                "patientContactInfo.phone",
                "patientContactInfo.email",
                "patientContactInfo.address.postalCode"
            ]
        );
        assert!(contact().validate().is_empty());
    }
}
