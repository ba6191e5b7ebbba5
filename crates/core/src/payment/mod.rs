//! Payment-intent validation, fraud screening and confirmation.
//!
//! An intent moves `created -> processing -> succeeded | failed` and never
//! backwards. Intents are stored under their idempotency key, so a retried
//! create resolves to the same record through one atomic lookup-or-insert.
//! A second table maps the public intent id back to that key.

pub mod fraud;
pub mod processor;
pub mod validation;
pub mod vat;

use std::fmt;
use std::sync::Arc;

use chrono::{Datelike, Duration};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audit::{action_types, resources, AuditEvent, AuditLog, AuditResult, SecurityLevel};
use crate::clock::SharedClock;
use crate::error::{CoreError, CoreResult, FieldViolation};
use crate::hashing::sha256_hex;
use crate::reference::ReferenceData;
use crate::store::{Expiring, KeyValueStore, MemoryStore};
use crate::tokens::{random_digits, random_hex, random_lower_alphanumeric};
use crate::types::{Canton, ClientContext, PaymentMethodKind, Timestamp};

use fraud::{FraudAssessment, FraudPolicy};
use processor::{ChargeRequest, PaymentProcessor, ProcessorError};
use vat::AmountBreakdown;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PaymentPolicy {
    pub min_amount_cents: i64,
    pub max_amount_cents: i64,
    pub currency: String,
    pub country: String,
    pub vat_rate_bp: u32,
    pub intent_ttl: Duration,
    pub max_confirm_attempts: u32,
    pub min_idempotency_key_len: usize,
    pub invoice_prefix: String,
}

impl Default for PaymentPolicy {
    fn default() -> Self {
        Self {
            min_amount_cents: 100,
            max_amount_cents: 100_000,
            currency: "CHF".into(),
            country: "CH".into(),
            vat_rate_bp: vat::DEFAULT_VAT_RATE_BP,
            intent_ttl: Duration::minutes(15),
            max_confirm_attempts: 3,
            min_idempotency_key_len: 16,
            invoice_prefix: "INV".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BillingAddress {
    pub first_name: String,
    pub last_name: String,
    pub street: String,
    pub postal_code: String,
    pub city: String,
    pub canton: Canton,
    pub country: String,
}

/// Caller-submitted intent. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PaymentIntentRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub payment_methods: Vec<PaymentMethodKind>,
    pub billing_address: BillingAddress,
    pub user_id: String,
    pub form_session_id: String,
    pub idempotency_key: String,
}

/// Card data for the card rail. Validated once and dropped.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CardDetails {
    pub number: String,
    pub expiry_month: u32,
    pub expiry_year: u16,
    pub cvc: String,
}

impl fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits: String = self.number.chars().filter(char::is_ascii_digit).collect();
        let last4 = digits.get(digits.len().saturating_sub(4)..).unwrap_or("");
        f.debug_struct("CardDetails")
            .field("number", &format_args!("****{last4}"))
            .field("expiry_month", &self.expiry_month)
            .field("expiry_year", &self.expiry_year)
            .field("cvc", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfirmPaymentRequest {
    pub intent_id: String,
    pub payment_method: PaymentMethodKind,
    #[serde(default)]
    pub card_details: Option<CardDetails>,
}

// ---------------------------------------------------------------------------
// Records and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Created,
    Processing,
    Succeeded,
    Failed,
}

impl IntentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IntentStatus::Created => "created",
            IntentStatus::Processing => "processing",
            IntentStatus::Succeeded => "succeeded",
            IntentStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentIntentRecord {
    pub intent_id: String,
    pub intent: PaymentIntentRequest,
    /// Digest of the submitted intent, compared on idempotent replay.
    pub fingerprint: String,
    pub client_secret: String,
    pub status: IntentStatus,
    pub fraud_score: u8,
    pub breakdown: AmountBreakdown,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub attempts: u32,
    pub payment_id: Option<String>,
    pub invoice_number: Option<String>,
}

impl Expiring for PaymentIntentRecord {
    fn expires_at(&self) -> Option<Timestamp> {
        Some(self.expires_at)
    }
}

#[derive(Debug, Clone)]
pub struct IntentIndexEntry {
    pub idempotency_key: String,
    pub expires_at: Timestamp,
}

impl Expiring for IntentIndexEntry {
    fn expires_at(&self) -> Option<Timestamp> {
        Some(self.expires_at)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedIntent {
    pub intent_id: String,
    pub client_secret: String,
    pub amount_breakdown: AmountBreakdown,
    pub expires_at: Timestamp,
    /// True when an earlier intent was returned for the same idempotency key.
    pub replayed: bool,
    #[serde(skip)]
    pub fraud_score: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedPayment {
    pub success: bool,
    pub payment_id: String,
    pub invoice_number: String,
    pub status: IntentStatus,
    pub amount_breakdown: AmountBreakdown,
}

/// Display data for a supported payment rail.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodInfo {
    pub id: PaymentMethodKind,
    pub name: &'static str,
    pub description: &'static str,
    pub processing_time: &'static str,
}

pub fn supported_payment_methods() -> Vec<PaymentMethodInfo> {
    vec![
        PaymentMethodInfo {
            id: PaymentMethodKind::Card,
            name: "Credit/Debit Card",
            description: "Visa, Mastercard, American Express",
            processing_time: "instant",
        },
        PaymentMethodInfo {
            id: PaymentMethodKind::Postfinance,
            name: "PostFinance",
            description: "PostFinance Card and E-Finance",
            processing_time: "1-2 business days",
        },
        PaymentMethodInfo {
            id: PaymentMethodKind::Twint,
            name: "TWINT",
            description: "Swiss mobile payment",
            processing_time: "instant",
        },
    ]
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMetrics {
    pub active_intents: usize,
    pub created_last_hour: u64,
    pub confirmed_last_hour: u64,
    pub blocked_last_hour: u64,
    pub failed_last_hour: u64,
    pub average_fraud_score: f64,
}

enum ConfirmStep {
    Missing,
    Expired,
    NotPending(IntentStatus),
    Exhausted,
    WrongMethod,
    BadCard(Vec<String>),
    Proceed(PaymentIntentRecord),
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct PaymentValidationService {
    intents: Arc<dyn KeyValueStore<PaymentIntentRecord>>,
    intent_index: Arc<dyn KeyValueStore<IntentIndexEntry>>,
    reference: Arc<ReferenceData>,
    processor: Arc<dyn PaymentProcessor>,
    audit: Arc<AuditLog>,
    policy: PaymentPolicy,
    fraud_policy: FraudPolicy,
    clock: SharedClock,
}

impl PaymentValidationService {
    pub fn new(
        policy: PaymentPolicy,
        fraud_policy: FraudPolicy,
        reference: Arc<ReferenceData>,
        processor: Arc<dyn PaymentProcessor>,
        audit: Arc<AuditLog>,
        clock: SharedClock,
    ) -> Self {
        Self {
            intents: Arc::new(MemoryStore::new()),
            intent_index: Arc::new(MemoryStore::new()),
            reference,
            processor,
            audit,
            policy,
            fraud_policy,
            clock,
        }
    }

    pub fn policy(&self) -> &PaymentPolicy {
        &self.policy
    }

    pub fn processor(&self) -> &Arc<dyn PaymentProcessor> {
        &self.processor
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    pub fn create_intent(
        &self,
        intent: PaymentIntentRequest,
        client: &ClientContext,
    ) -> CoreResult<CreatedIntent> {
        // 1. Shape and bounds.
        let violations = validation::validate_intent(&intent, &self.policy);
        if !violations.is_empty() {
            self.audit_validation_failure(&intent, client, &violations);
            return Err(CoreError::InvalidFields(violations));
        }

        // 2. Fraud screening over the raw submission.
        let address = &intent.billing_address;
        let address_consistent = self
            .reference
            .postal_code_matches(address.canton, &address.postal_code);
        let assessment = fraud::assess(&intent, address_consistent, &self.fraud_policy);
        if assessment.is_blocked(&self.fraud_policy) {
            self.audit_payment(
                action_types::PAYMENT_BLOCKED,
                AuditResult::Blocked,
                &intent.user_id,
                client,
                json!({
                    "fraudScore": assessment.score,
                    "signals": assessment.signals,
                    "threshold": self.fraud_policy.block_threshold,
                    "amountCents": intent.amount_cents,
                    "canton": address.canton,
                }),
            );
            return Err(CoreError::FraudBlocked {
                score: assessment.score,
            });
        }

        // 3. Address character sets and postal/canton consistency.
        let mut violations = validation::validate_address_charset(address);
        if !address_consistent {
            violations.push(FieldViolation::new(
                "billingAddress.postalCode",
                format!(
                    "Postal code {} does not belong to canton {}",
                    address.postal_code, address.canton
                ),
            ));
        }
        if !violations.is_empty() {
            self.audit_validation_failure(&intent, client, &violations);
            return Err(CoreError::InvalidFields(violations));
        }

        // 4. Idempotent lookup-or-insert under the key's lock.
        self.insert_or_replay(intent, assessment, client)
    }

    fn insert_or_replay(
        &self,
        intent: PaymentIntentRequest,
        assessment: FraudAssessment,
        client: &ClientContext,
    ) -> CoreResult<CreatedIntent> {
        let now = self.clock.now();
        let fingerprint = fingerprint(&intent)?;
        let idempotency_key = intent.idempotency_key.clone();
        let user_id = intent.user_id.clone();

        let mut pending = Some(intent);
        let mut result: Option<CoreResult<(PaymentIntentRecord, bool)>> = None;
        let mut stale_intent_id = None;

        self.intents.update(&idempotency_key, &mut |slot| {
            if let Some(existing) = slot.as_ref() {
                if !existing.is_expired(now) {
                    result = Some(if existing.fingerprint == fingerprint {
                        Ok((existing.clone(), true))
                    } else {
                        Err(CoreError::IdempotencyConflict)
                    });
                    return;
                }
                stale_intent_id = Some(existing.intent_id.clone());
            }

            let Some(intent) = pending.take() else {
                return;
            };
            let gross = intent.amount_cents.unsigned_abs();
            let record = PaymentIntentRecord {
                intent_id: format!("pi_{}", random_lower_alphanumeric(24)),
                breakdown: vat::breakdown(gross, self.policy.vat_rate_bp, &self.policy.currency),
                intent,
                fingerprint: fingerprint.clone(),
                client_secret: format!("pi_{}", random_hex(32)),
                status: IntentStatus::Created,
                fraud_score: assessment.score,
                created_at: now,
                expires_at: now + self.policy.intent_ttl,
                attempts: 0,
                payment_id: None,
                invoice_number: None,
            };
            *slot = Some(record.clone());
            result = Some(Ok((record, false)));
        });

        if let Some(old) = stale_intent_id {
            self.intent_index.delete(&old);
        }

        let (record, replayed) = result.unwrap_or_else(|| {
            Err(CoreError::Internal("Intent table update did not run".into()))
        })
        .inspect_err(|e| {
            if matches!(e, CoreError::IdempotencyConflict) {
                self.audit_payment(
                    action_types::PAYMENT_VALIDATION_FAILED,
                    AuditResult::Failure,
                    &user_id,
                    client,
                    json!({ "reason": "idempotency_conflict" }),
                );
            }
        })?;

        if replayed {
            self.audit_payment(
                action_types::PAYMENT_INTENT_REPLAYED,
                AuditResult::Success,
                &user_id,
                client,
                json!({ "intentId": record.intent_id }),
            );
        } else {
            self.intent_index.set(
                &record.intent_id,
                IntentIndexEntry {
                    idempotency_key: idempotency_key.clone(),
                    expires_at: record.expires_at,
                },
            );
            self.audit_payment(
                action_types::PAYMENT_INTENT_CREATED,
                AuditResult::Success,
                &user_id,
                client,
                json!({
                    "intentId": record.intent_id,
                    "amountCents": record.breakdown.gross_cents,
                    "fraudScore": record.fraud_score,
                    "paymentMethods": record.intent.payment_methods,
                }),
            );
        }

        Ok(CreatedIntent {
            intent_id: record.intent_id,
            client_secret: record.client_secret,
            amount_breakdown: record.breakdown,
            expires_at: record.expires_at,
            replayed,
            fraud_score: record.fraud_score,
        })
    }

    // -----------------------------------------------------------------------
    // Confirmation
    // -----------------------------------------------------------------------

    /// Confirm an intent owned by `owner_id`. Intents belonging to someone
    /// else are reported as not found.
    pub async fn confirm(
        &self,
        request: ConfirmPaymentRequest,
        owner_id: &str,
        client: &ClientContext,
    ) -> CoreResult<ConfirmedPayment> {
        let intent_id = request.intent_id.clone();
        let Some(index) = self.intent_index.get(&intent_id) else {
            self.audit_confirm_failure(owner_id, client, &intent_id, "not_found");
            return Err(CoreError::not_found("payment intent", intent_id));
        };
        let key = index.idempotency_key;

        // 1. Atomic attempt accounting and pre-checks.
        let step = self.begin_confirmation(&key, &request, owner_id);
        let record = match step {
            ConfirmStep::Proceed(record) => record,
            ConfirmStep::Missing => {
                self.audit_confirm_failure(owner_id, client, &intent_id, "not_found");
                return Err(CoreError::not_found("payment intent", intent_id));
            }
            ConfirmStep::Expired => {
                self.intent_index.delete(&intent_id);
                self.audit_confirm_failure(owner_id, client, &intent_id, "expired");
                return Err(CoreError::Expired {
                    entity: "payment intent",
                });
            }
            ConfirmStep::NotPending(status) => {
                self.audit_confirm_failure(owner_id, client, &intent_id, "not_pending");
                return Err(CoreError::Validation(format!(
                    "Payment intent is already {}",
                    status.as_str()
                )));
            }
            ConfirmStep::Exhausted => {
                self.intent_index.delete(&intent_id);
                self.audit_payment(
                    action_types::PAYMENT_CONFIRMATION_FAILED,
                    AuditResult::Blocked,
                    owner_id,
                    client,
                    json!({ "intentId": intent_id, "reason": "max_attempts_exceeded" }),
                );
                return Err(CoreError::AttemptsExceeded {
                    entity: "payment intent",
                });
            }
            ConfirmStep::WrongMethod => {
                self.audit_confirm_failure(owner_id, client, &intent_id, "invalid_payment_method");
                return Err(CoreError::InvalidPaymentMethod(
                    request.payment_method.as_str().to_string(),
                ));
            }
            ConfirmStep::BadCard(errors) => {
                self.audit_confirm_failure(owner_id, client, &intent_id, "invalid_card");
                return Err(CoreError::InvalidCard(errors));
            }
        };

        // 2. Charge outside the table lock; the intent sits in `processing`.
        let charge = self
            .processor
            .charge(ChargeRequest {
                intent_id: &record.intent_id,
                amount_cents: record.breakdown.gross_cents,
                currency: &record.breakdown.currency,
                method: request.payment_method,
                card: request.card_details.as_ref(),
            })
            .await;

        // 3. Settle the status.
        match charge {
            Ok(receipt) => {
                let invoice_number = self.invoice_number();
                let (payment_id, invoice) = (receipt.payment_id, invoice_number);
                self.intents.update(&key, &mut |slot| {
                    if let Some(r) = slot.as_mut() {
                        r.status = IntentStatus::Succeeded;
                        r.payment_id = Some(payment_id.clone());
                        r.invoice_number = Some(invoice.clone());
                    }
                });
                self.audit_payment(
                    action_types::PAYMENT_CONFIRMED,
                    AuditResult::Success,
                    owner_id,
                    client,
                    json!({
                        "intentId": intent_id,
                        "paymentId": payment_id,
                        "invoiceNumber": invoice,
                        "paymentMethod": request.payment_method,
                        "amountCents": record.breakdown.gross_cents,
                    }),
                );
                Ok(ConfirmedPayment {
                    success: true,
                    payment_id,
                    invoice_number: invoice,
                    status: IntentStatus::Succeeded,
                    amount_breakdown: record.breakdown,
                })
            }
            Err(err) => {
                self.intents.update(&key, &mut |slot| {
                    if let Some(r) = slot.as_mut() {
                        r.status = IntentStatus::Failed;
                    }
                });
                self.audit_confirm_failure(owner_id, client, &intent_id, "processor_declined");
                match err {
                    ProcessorError::Declined(reason) => Err(CoreError::PaymentDeclined(reason)),
                    ProcessorError::Unavailable => Err(CoreError::Internal(
                        "Payment processor unavailable".into(),
                    )),
                }
            }
        }
    }

    fn begin_confirmation(
        &self,
        key: &str,
        request: &ConfirmPaymentRequest,
        owner_id: &str,
    ) -> ConfirmStep {
        let now = self.clock.now();
        let max_attempts = self.policy.max_confirm_attempts;
        let mut step = ConfirmStep::Missing;

        self.intents.update(key, &mut |slot| {
            let Some(record) = slot.as_mut() else {
                step = ConfirmStep::Missing;
                return;
            };
            if record.intent.user_id != owner_id {
                step = ConfirmStep::Missing;
                return;
            }
            if record.is_expired(now) {
                *slot = None;
                step = ConfirmStep::Expired;
                return;
            }
            if record.status != IntentStatus::Created {
                step = ConfirmStep::NotPending(record.status);
                return;
            }
            record.attempts += 1;
            if record.attempts > max_attempts {
                *slot = None;
                step = ConfirmStep::Exhausted;
                return;
            }
            if !record.intent.payment_methods.contains(&request.payment_method) {
                step = ConfirmStep::WrongMethod;
                return;
            }
            if request.payment_method == PaymentMethodKind::Card {
                let errors = match request.card_details.as_ref() {
                    Some(card) => validation::validate_card(card, now),
                    None => vec!["Card details are required".to_string()],
                };
                if !errors.is_empty() {
                    step = ConfirmStep::BadCard(errors);
                    return;
                }
            }
            record.status = IntentStatus::Processing;
            step = ConfirmStep::Proceed(record.clone());
        });

        step
    }

    // -----------------------------------------------------------------------
    // Housekeeping
    // -----------------------------------------------------------------------

    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        self.intent_index.sweep_expired(now);
        self.intents.sweep_expired(now)
    }

    pub fn metrics(&self) -> PaymentMetrics {
        let now = self.clock.now();
        let live: Vec<_> = self
            .intents
            .values()
            .into_iter()
            .filter(|r| !r.is_expired(now))
            .collect();
        let average_fraud_score = if live.is_empty() {
            0.0
        } else {
            live.iter().map(|r| f64::from(r.fraud_score)).sum::<f64>() / live.len() as f64
        };
        let summary = self.audit.summary(now - Duration::hours(1));
        PaymentMetrics {
            active_intents: live.len(),
            created_last_hour: summary.action(action_types::PAYMENT_INTENT_CREATED),
            confirmed_last_hour: summary.action(action_types::PAYMENT_CONFIRMED),
            blocked_last_hour: summary.action(action_types::PAYMENT_BLOCKED),
            failed_last_hour: summary.action(action_types::PAYMENT_VALIDATION_FAILED)
                + summary.action(action_types::PAYMENT_CONFIRMATION_FAILED),
            average_fraud_score,
        }
    }

    fn invoice_number(&self) -> String {
        format!(
            "{}-{}-{}",
            self.policy.invoice_prefix,
            self.clock.now().year(),
            random_digits(6)
        )
    }

    fn audit_payment(
        &self,
        action: &'static str,
        result: AuditResult,
        actor: &str,
        client: &ClientContext,
        details: serde_json::Value,
    ) {
        self.audit.record(
            AuditEvent::new(action, resources::PAYMENT_SERVICE, result)
                .with_actor(actor)
                .with_client(client)
                .with_level(SecurityLevel::Restricted)
                .with_details(details),
        );
    }

    fn audit_validation_failure(
        &self,
        intent: &PaymentIntentRequest,
        client: &ClientContext,
        violations: &[FieldViolation],
    ) {
        let fields: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();
        self.audit_payment(
            action_types::PAYMENT_VALIDATION_FAILED,
            AuditResult::Failure,
            &intent.user_id,
            client,
            json!({ "reason": "invalid_fields", "fields": fields }),
        );
    }

    fn audit_confirm_failure(
        &self,
        actor: &str,
        client: &ClientContext,
        intent_id: &str,
        reason: &str,
    ) {
        self.audit_payment(
            action_types::PAYMENT_CONFIRMATION_FAILED,
            AuditResult::Failure,
            actor,
            client,
            json!({ "intentId": intent_id, "reason": reason }),
        );
    }
}

fn fingerprint(intent: &PaymentIntentRequest) -> CoreResult<String> {
    let canonical = serde_json::to_vec(intent)
        .map_err(|e| CoreError::Internal(format!("Intent serialisation failed: {e}")))?;
    Ok(sha256_hex(&canonical))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use super::processor::{ChargeReceipt, SimulatedProcessor};
    use super::*;
    use crate::audit::DEFAULT_CAPACITY;
    use crate::clock::{Clock, ManualClock};

    pub(crate) fn valid_intent() -> PaymentIntentRequest {
        PaymentIntentRequest {
            amount_cents: 35_000,
            currency: "CHF".into(),
            payment_methods: vec![PaymentMethodKind::Card, PaymentMethodKind::Twint],
            billing_address: BillingAddress {
                first_name: "Anna".into(),
                last_name: "Meier".into(),
                street: "Bahnhofstrasse 1".into(),
                postal_code: "8001".into(),
                city: "Zürich".into(),
                canton: Canton::Zh,
                country: "CH".into(),
            },
            user_id: "usr_1".into(),
            form_session_id: "form_1".into(),
            idempotency_key: "idem-key-0000000001".into(),
        }
    }

    fn visa() -> CardDetails {
        CardDetails {
            number: "4111111111111111".into(),
            expiry_month: 12,
            expiry_year: 2099,
            cvc: "123".into(),
        }
    }

    struct DecliningProcessor;

    #[async_trait]
    impl PaymentProcessor for DecliningProcessor {
        async fn charge(&self, _: ChargeRequest<'_>) -> Result<ChargeReceipt, ProcessorError> {
            Err(ProcessorError::Declined("insufficient funds".into()))
        }
    }

    struct Harness {
        service: PaymentValidationService,
        clock: Arc<ManualClock>,
        audit: Arc<AuditLog>,
    }

    fn harness_with(processor: Arc<dyn PaymentProcessor>) -> Harness {
        let clock = Arc::new(ManualClock::starting_now());
        let audit = Arc::new(AuditLog::new(DEFAULT_CAPACITY, clock.clone()));
        let service = PaymentValidationService::new(
            PaymentPolicy::default(),
            FraudPolicy::default(),
            Arc::new(ReferenceData::swiss_defaults()),
            processor,
            Arc::clone(&audit),
            clock.clone(),
        );
        Harness {
            service,
            clock,
            audit,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(SimulatedProcessor))
    }

    fn client() -> ClientContext {
        ClientContext::new("203.0.113.9", "ua")
    }

    fn confirm_card(intent_id: &str) -> ConfirmPaymentRequest {
        ConfirmPaymentRequest {
            intent_id: intent_id.into(),
            payment_method: PaymentMethodKind::Card,
            card_details: Some(visa()),
        }
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    #[test]
    fn valid_zurich_intent_is_created() {
        let h = harness();
        let created = h.service.create_intent(valid_intent(), &client()).unwrap();
        assert!(created.intent_id.starts_with("pi_"));
        assert_eq!(created.client_secret.len(), 3 + 64);
        assert!(!created.replayed);
        assert!(created.fraud_score < 75);
        let b = &created.amount_breakdown;
        assert_eq!(b.net_cents + b.vat_cents, 35_000);
        assert_eq!(created.expires_at, h.clock.now() + Duration::minutes(15));
    }

    #[test]
    fn same_key_same_payload_replays() {
        let h = harness();
        let first = h.service.create_intent(valid_intent(), &client()).unwrap();
        let second = h.service.create_intent(valid_intent(), &client()).unwrap();
        assert_eq!(first.intent_id, second.intent_id);
        assert_eq!(first.client_secret, second.client_secret);
        assert!(second.replayed);
        assert_eq!(h.service.metrics().active_intents, 1);
    }

    #[test]
    fn same_key_different_payload_conflicts() {
        let h = harness();
        h.service.create_intent(valid_intent(), &client()).unwrap();
        let mut changed = valid_intent();
        changed.amount_cents = 36_000;
        assert_matches!(
            h.service.create_intent(changed, &client()),
            Err(CoreError::IdempotencyConflict)
        );
    }

    #[test]
    fn concurrent_creates_with_one_key_make_one_intent() {
        let h = harness();
        let service = Arc::new(h.service);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = Arc::clone(&service);
                std::thread::spawn(move || {
                    service
                        .create_intent(valid_intent(), &client())
                        .unwrap()
                        .intent_id
                })
            })
            .collect();
        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(service.metrics().active_intents, 1);
    }

    #[test]
    fn expired_key_can_be_reused() {
        let h = harness();
        let first = h.service.create_intent(valid_intent(), &client()).unwrap();
        h.clock.advance(Duration::minutes(16));
        let second = h.service.create_intent(valid_intent(), &client()).unwrap();
        assert_ne!(first.intent_id, second.intent_id);
        assert!(!second.replayed);
    }

    #[test]
    fn fixture_like_submission_is_fraud_blocked() {
        let h = harness();
        let mut intent = valid_intent();
        intent.billing_address.street = "Test Street 999".into();
        intent.billing_address.postal_code = "9999".into();
        intent.payment_methods = PaymentMethodKind::ALL.to_vec();

        assert_matches!(
            h.service.create_intent(intent, &client()),
            Err(CoreError::FraudBlocked { score: 85 })
        );
        assert_eq!(h.service.metrics().active_intents, 0);
        let entry = &h.audit.recent(1)[0];
        assert_eq!(entry.action, action_types::PAYMENT_BLOCKED);
        assert_eq!(entry.result, AuditResult::Blocked);
    }

    #[test]
    fn postal_mismatch_below_threshold_is_a_validation_error() {
        let h = harness();
        let mut intent = valid_intent();
        intent.billing_address.postal_code = "9999".into();
        let err = h.service.create_intent(intent, &client()).unwrap_err();
        assert_matches!(err, CoreError::InvalidFields(ref v) if v[0].field == "billingAddress.postalCode");
        assert_eq!(h.audit.recent(1)[0].result, AuditResult::Failure);
    }

    #[test]
    fn schema_errors_come_before_fraud() {
        let h = harness();
        let mut intent = valid_intent();
        intent.currency = "EUR".into();
        intent.billing_address.street = "Test Street 999".into();
        assert_matches!(
            h.service.create_intent(intent, &client()),
            Err(CoreError::InvalidFields(_))
        );
    }

    // -----------------------------------------------------------------------
    // Confirmation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn card_confirmation_succeeds_once() {
        let h = harness();
        let created = h.service.create_intent(valid_intent(), &client()).unwrap();
        let confirmed = h
            .service
            .confirm(confirm_card(&created.intent_id), "usr_1", &client())
            .await
            .unwrap();
        assert!(confirmed.success);
        assert!(confirmed.payment_id.starts_with("pay_"));
        let year = h.clock.now().year();
        assert!(confirmed.invoice_number.starts_with(&format!("INV-{year}-")));
        assert_eq!(confirmed.invoice_number.len(), format!("INV-{year}-").len() + 6);

        let again = h
            .service
            .confirm(confirm_card(&created.intent_id), "usr_1", &client())
            .await;
        assert_matches!(again, Err(CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_intent_is_not_found() {
        let h = harness();
        let result = h
            .service
            .confirm(confirm_card("pi_missing"), "usr_1", &client())
            .await;
        assert_matches!(result, Err(CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn other_users_intent_is_not_found() {
        let h = harness();
        let created = h.service.create_intent(valid_intent(), &client()).unwrap();
        let result = h
            .service
            .confirm(confirm_card(&created.intent_id), "usr_2", &client())
            .await;
        assert_matches!(result, Err(CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn method_outside_intent_is_rejected() {
        let h = harness();
        let created = h.service.create_intent(valid_intent(), &client()).unwrap();
        let request = ConfirmPaymentRequest {
            intent_id: created.intent_id,
            payment_method: PaymentMethodKind::Postfinance,
            card_details: None,
        };
        assert_matches!(
            h.service.confirm(request, "usr_1", &client()).await,
            Err(CoreError::InvalidPaymentMethod(m)) if m == "postfinance"
        );
    }

    #[tokio::test]
    async fn fourth_attempt_destroys_intent_even_with_valid_card() {
        let h = harness();
        let created = h.service.create_intent(valid_intent(), &client()).unwrap();
        let bad = || ConfirmPaymentRequest {
            intent_id: created.intent_id.clone(),
            payment_method: PaymentMethodKind::Card,
            card_details: Some(CardDetails {
                number: "4111111111111112".into(),
                ..visa()
            }),
        };
        for _ in 0..3 {
            assert_matches!(
                h.service.confirm(bad(), "usr_1", &client()).await,
                Err(CoreError::InvalidCard(_))
            );
        }
        assert_matches!(
            h.service
                .confirm(confirm_card(&created.intent_id), "usr_1", &client())
                .await,
            Err(CoreError::AttemptsExceeded { .. })
        );
        assert_matches!(
            h.service
                .confirm(confirm_card(&created.intent_id), "usr_1", &client())
                .await,
            Err(CoreError::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn expired_intent_is_removed() {
        let h = harness();
        let created = h.service.create_intent(valid_intent(), &client()).unwrap();
        h.clock.advance(Duration::minutes(15));
        assert_matches!(
            h.service
                .confirm(confirm_card(&created.intent_id), "usr_1", &client())
                .await,
            Err(CoreError::Expired { .. })
        );
        assert_eq!(h.service.metrics().active_intents, 0);
    }

    #[tokio::test]
    async fn twint_needs_no_card() {
        let h = harness();
        let created = h.service.create_intent(valid_intent(), &client()).unwrap();
        let request = ConfirmPaymentRequest {
            intent_id: created.intent_id,
            payment_method: PaymentMethodKind::Twint,
            card_details: None,
        };
        assert!(h.service.confirm(request, "usr_1", &client()).await.is_ok());
    }

    #[tokio::test]
    async fn card_rail_without_card_is_invalid() {
        let h = harness();
        let created = h.service.create_intent(valid_intent(), &client()).unwrap();
        let request = ConfirmPaymentRequest {
            intent_id: created.intent_id,
            payment_method: PaymentMethodKind::Card,
            card_details: None,
        };
        assert_matches!(
            h.service.confirm(request, "usr_1", &client()).await,
            Err(CoreError::InvalidCard(_))
        );
    }

    #[tokio::test]
    async fn decline_marks_intent_failed() {
        let h = harness_with(Arc::new(DecliningProcessor));
        let created = h.service.create_intent(valid_intent(), &client()).unwrap();
        assert_matches!(
            h.service
                .confirm(confirm_card(&created.intent_id), "usr_1", &client())
                .await,
            Err(CoreError::PaymentDeclined(_))
        );
        assert_matches!(
            h.service
                .confirm(confirm_card(&created.intent_id), "usr_1", &client())
                .await,
            Err(CoreError::Validation(msg)) if msg.contains("failed")
        );
    }

    #[test]
    fn card_debug_never_prints_the_number() {
        let rendered = format!("{:?}", visa());
        assert!(!rendered.contains("4111111111111111"));
        assert!(rendered.contains("****1111"));
        assert!(!rendered.contains("123\""));
    }

    #[test]
    fn methods_catalog_lists_all_rails() {
        let ids: Vec<_> = supported_payment_methods().iter().map(|m| m.id).collect();
        assert_eq!(ids, PaymentMethodKind::ALL.to_vec());
    }
}
