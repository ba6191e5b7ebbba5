//! Append-only audit trail for security-relevant outcomes.
//!
//! Entries live in a bounded in-memory ring and are mirrored to `tracing`
//! under the `audit` target so a log shipper can persist them. Entries are
//! never edited; when the ring is full the oldest tenth is dropped in one go.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::types::{ClientContext, Timestamp};

/// Default ring capacity.
pub const DEFAULT_CAPACITY: usize = 10_000;

// ---------------------------------------------------------------------------
// Action type constants
// ---------------------------------------------------------------------------

/// Known action types for audit log entries.
pub mod action_types {
    // Pipeline
    pub const CORS_BLOCKED: &str = "cors_blocked";
    pub const RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";
    pub const REQUEST_VALIDATION_FAILED: &str = "request_validation_failed";
    pub const AUTHENTICATION_FAILED: &str = "authentication_failed";
    pub const CSRF_VALIDATION_FAILED: &str = "csrf_validation_failed";
    pub const REQUEST_PROCESSED: &str = "request_processed";
    pub const MIDDLEWARE_ERROR: &str = "middleware_error";

    // Verification codes
    pub const OTP_GENERATION_FAILED: &str = "otp_generation_failed";
    pub const OTP_GENERATED: &str = "otp_generated";
    pub const OTP_RATE_LIMITED: &str = "otp_rate_limited";
    pub const OTP_VERIFICATION_FAILED: &str = "otp_verification_failed";
    pub const OTP_ATTEMPTS_EXCEEDED: &str = "otp_attempts_exceeded";
    pub const OTP_VERIFIED: &str = "otp_verified";

    // Sessions
    pub const SESSION_CREATED: &str = "session_created";
    pub const SESSION_INVALIDATED: &str = "session_invalidated";

    // Payments
    pub const PAYMENT_VALIDATION_FAILED: &str = "payment_validation_failed";
    pub const PAYMENT_BLOCKED: &str = "payment_blocked";
    pub const PAYMENT_INTENT_CREATED: &str = "payment_intent_created";
    pub const PAYMENT_INTENT_REPLAYED: &str = "payment_intent_replayed";
    pub const PAYMENT_CONFIRMATION_FAILED: &str = "payment_confirmation_failed";
    pub const PAYMENT_CONFIRMED: &str = "payment_confirmed";

    // Eligibility
    pub const ELIGIBILITY_CONSENT_MISSING: &str = "eligibility_consent_missing";
    pub const ELIGIBILITY_VALIDATION_FAILED: &str = "eligibility_validation_failed";
    pub const ELIGIBILITY_CALCULATED: &str = "eligibility_calculated";
    pub const REFERRAL_GENERATED: &str = "referral_generated";
}

/// Resource names used in the `resource` column.
pub mod resources {
    pub const SECURITY_MIDDLEWARE: &str = "security_middleware";
    pub const OTP_SERVICE: &str = "otp_service";
    pub const SESSION_STORE: &str = "session_store";
    pub const PAYMENT_SERVICE: &str = "payment_service";
    pub const ELIGIBILITY_SERVICE: &str = "eligibility_service";
}

// ---------------------------------------------------------------------------
// Entry types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
    /// A deliberate policy denial, as opposed to an error.
    Blocked,
}

impl AuditResult {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditResult::Success => "success",
            AuditResult::Failure => "failure",
            AuditResult::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    Public,
    Internal,
    Confidential,
    /// Medical or cardholder context.
    Restricted,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    pub action: String,
    pub resource: String,
    pub ip_address: String,
    pub user_agent: String,
    pub result: AuditResult,
    pub security_level: SecurityLevel,
    pub details: Value,
}

/// Builder for an entry; the log stamps `id` and `timestamp` on append.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    action: &'static str,
    resource: &'static str,
    result: AuditResult,
    security_level: SecurityLevel,
    actor_id: Option<String>,
    ip_address: String,
    user_agent: String,
    details: Value,
}

impl AuditEvent {
    pub fn new(action: &'static str, resource: &'static str, result: AuditResult) -> Self {
        Self {
            action,
            resource,
            result,
            security_level: SecurityLevel::Internal,
            actor_id: None,
            ip_address: "unknown".to_string(),
            user_agent: "unknown".to_string(),
            details: Value::Object(Default::default()),
        }
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with_client(mut self, client: &ClientContext) -> Self {
        self.ip_address = client.ip_address.clone();
        self.user_agent = client.user_agent.clone();
        self
    }

    pub fn with_level(mut self, level: SecurityLevel) -> Self {
        self.security_level = level;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Counts over a time slice of the log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSummary {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub blocked: u64,
    pub by_action: BTreeMap<String, u64>,
}

impl AuditSummary {
    pub fn action(&self, action: &str) -> u64 {
        self.by_action.get(action).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Log
// ---------------------------------------------------------------------------

pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
    clock: SharedClock,
}

impl AuditLog {
    pub fn new(capacity: usize, clock: SharedClock) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            clock,
        }
    }

    /// Append an event. Details are redacted before they are stored or
    /// emitted.
    pub fn record(&self, event: AuditEvent) -> AuditEntry {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            timestamp: self.clock.now(),
            actor_id: event.actor_id,
            action: event.action.to_string(),
            resource: event.resource.to_string(),
            ip_address: event.ip_address,
            user_agent: event.user_agent,
            result: event.result,
            security_level: event.security_level,
            details: redact_sensitive_fields(&event.details),
        };

        emit(&entry);

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push_back(entry.clone());
        if entries.len() > self.capacity {
            let excess = entries.len() - self.capacity;
            let drop = excess.max(self.capacity / 10).min(entries.len());
            entries.drain(..drop);
        }
        entry
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The newest `limit` entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Entries at or after `since`, oldest first.
    pub fn since(&self, since: Timestamp) -> Vec<AuditEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect()
    }

    pub fn summary(&self, since: Timestamp) -> AuditSummary {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut summary = AuditSummary::default();
        for entry in entries.iter().filter(|e| e.timestamp >= since) {
            summary.total += 1;
            match entry.result {
                AuditResult::Success => summary.success += 1,
                AuditResult::Failure => summary.failure += 1,
                AuditResult::Blocked => summary.blocked += 1,
            }
            *summary.by_action.entry(entry.action.clone()).or_default() += 1;
        }
        summary
    }
}

fn emit(entry: &AuditEntry) {
    let actor = entry.actor_id.as_deref().unwrap_or("-");
    match entry.result {
        AuditResult::Success => tracing::info!(
            target: "audit",
            audit_id = %entry.id,
            action = %entry.action,
            resource = %entry.resource,
            result = entry.result.as_str(),
            actor,
            ip = %entry.ip_address,
            details = %entry.details,
            "Audit event"
        ),
        AuditResult::Failure | AuditResult::Blocked => tracing::warn!(
            target: "audit",
            audit_id = %entry.id,
            action = %entry.action,
            resource = %entry.resource,
            result = entry.result.as_str(),
            actor,
            ip = %entry.ip_address,
            details = %entry.details,
            "Audit event"
        ),
    }
}

// ---------------------------------------------------------------------------
// Sensitive field redaction
// ---------------------------------------------------------------------------

/// Key fragments that mark a credential anywhere in a key name.
pub const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "token",
    "secret",
    "authorization",
    "credential",
    "code_hash",
    "codehash",
];

/// Cardholder data keys, compared after lowercasing and stripping `_`/`-`.
pub const CARDHOLDER_FIELDS: &[&str] = &[
    "cardnumber",
    "cvc",
    "cvv",
    "pan",
    "track1",
    "track2",
    "pin",
    "carddetails",
];

fn normalise_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

fn is_cardholder_key(key: &str) -> bool {
    let normalised = normalise_key(key);
    CARDHOLDER_FIELDS.contains(&normalised.as_str())
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    is_cardholder_key(key) || SENSITIVE_FIELDS.iter().any(|f| lower.contains(f))
}

/// Redact credentials and cardholder data from a JSON value, recursively.
///
/// Replaces the value of any matching key with `"[REDACTED]"` so the audit
/// trail still shows the field was present.
pub fn redact_sensitive_fields(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) {
                    redacted.insert(key.clone(), Value::String("[REDACTED]".to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_fields(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(redact_sensitive_fields).collect()),
        other => other.clone(),
    }
}

/// Remove cardholder data keys from a JSON value, recursively.
///
/// Used on payment responses, where the field must not appear at all.
pub fn scrub_cardholder_data(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !is_cardholder_key(key))
                .map(|(key, val)| (key.clone(), scrub_cardholder_data(val)))
                .collect(),
        ),
        Value::Array(arr) => Value::Array(arr.iter().map(scrub_cardholder_data).collect()),
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
