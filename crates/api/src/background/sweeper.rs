//! Periodic removal of expired codes, sessions, payment intents and
//! rate-limit windows.
//!
//! Every store also drops expired entries lazily on access; the sweep keeps
//! memory bounded for keys that are never looked at again.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Counts removed by a single sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub codes: usize,
    pub sessions: usize,
    pub intents: usize,
    pub rate_limit_keys: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.codes + self.sessions + self.intents + self.rate_limit_keys
    }
}

/// Sweep every store once.
pub fn sweep_once(state: &AppState) -> SweepReport {
    SweepReport {
        codes: state.codes.sweep(),
        sessions: state.sessions.sweep(),
        intents: state.payments.sweep(),
        rate_limit_keys: state.rate_limiter.sweep(),
    }
}

/// Run the sweep loop every `interval` until `cancel` is triggered.
pub async fn run(state: AppState, interval: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = interval.as_secs(), "Expiry sweeper started");

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Expiry sweeper stopping");
                break;
            }
            _ = ticker.tick() => {
                let report = sweep_once(&state);
                if report.total() > 0 {
                    tracing::info!(
                        codes = report.codes,
                        sessions = report.sessions,
                        intents = report.intents,
                        rate_limit_keys = report.rate_limit_keys,
                        "Expiry sweeper: purged expired records"
                    );
                } else {
                    tracing::debug!("Expiry sweeper: nothing to purge");
                }
            }
        }
    }
}
