use std::sync::Arc;

use medintake_core::audit::AuditLog;
use medintake_core::clock::SharedClock;
use medintake_core::eligibility::EligibilityScoringService;
use medintake_core::error::CoreResult;
use medintake_core::otp::delivery::CodeDelivery;
use medintake_core::otp::CodeVerificationService;
use medintake_core::payment::processor::PaymentProcessor;
use medintake_core::payment::PaymentValidationService;
use medintake_core::rate_limit::RateLimiter;
use medintake_core::reference::ReferenceData;
use medintake_core::session::SessionStore;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (every service is behind an `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (read by the security pipeline and handlers).
    pub config: Arc<ServerConfig>,
    pub clock: SharedClock,
    pub audit: Arc<AuditLog>,
    /// Shared by endpoint throttling and code issuance; keys are namespaced.
    pub rate_limiter: Arc<RateLimiter>,
    pub sessions: Arc<SessionStore>,
    pub codes: Arc<CodeVerificationService>,
    pub payments: Arc<PaymentValidationService>,
    pub eligibility: Arc<EligibilityScoringService>,
}

/// External systems the services call out to.
pub struct Collaborators {
    pub delivery: Arc<dyn CodeDelivery>,
    pub processor: Arc<dyn PaymentProcessor>,
    pub reference: Arc<ReferenceData>,
}

impl AppState {
    /// Wire every service from configuration. Used by `main` and by the
    /// integration tests so both run the same graph.
    pub fn build(
        config: ServerConfig,
        clock: SharedClock,
        collaborators: Collaborators,
    ) -> CoreResult<Self> {
        let audit = Arc::new(AuditLog::new(config.audit_capacity, clock.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_policy(), clock.clone()));
        let sessions = Arc::new(SessionStore::new(config.session_policy(), clock.clone()));

        let codes = CodeVerificationService::new(
            config.code_policy(),
            Arc::clone(&rate_limiter),
            Arc::clone(&sessions),
            Arc::clone(&audit),
            collaborators.delivery,
            clock.clone(),
        )?;

        let payments = PaymentValidationService::new(
            config.payment_policy(),
            config.fraud_policy(),
            Arc::clone(&collaborators.reference),
            collaborators.processor,
            Arc::clone(&audit),
            clock.clone(),
        );

        let eligibility = EligibilityScoringService::new(
            config.eligibility_policy(),
            collaborators.reference,
            Arc::clone(&audit),
            clock.clone(),
        );

        Ok(Self {
            config: Arc::new(config),
            clock,
            audit,
            rate_limiter,
            sessions,
            codes: Arc::new(codes),
            payments: Arc::new(payments),
            eligibility: Arc::new(eligibility),
        })
    }
}
