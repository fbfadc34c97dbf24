//! Shared ESI error budget.
//!
//! ESI reports how many errors the whole service may still produce in the
//! current window (`X-Esi-Error-Limit-Remain`) and when that window resets
//! (`X-Esi-Error-Limit-Reset`). Every upstream response updates the snapshot
//! through [`ErrorLimitCollector`]; every inbound request consults it first.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use axum::http::{Extensions, HeaderMap};
use chrono::{DateTime, TimeDelta, Utc};
use reqwest_middleware::{Middleware, Next};

pub const HEADER_REMAIN: &str = "x-esi-error-limit-remain";
pub const HEADER_RESET: &str = "x-esi-error-limit-reset";

/// Default threshold at or below which requests are refused.
pub const DEFAULT_THRESHOLD: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorBudgetState {
    pub remaining: i64,
    pub reset_secs: i64,
    pub recorded_at: DateTime<Utc>,
}

impl ErrorBudgetState {
    /// Stale once `recorded_at + reset < now`. A reset window too large to
    /// represent counts as stale.
    pub fn is_current_at(&self, now: DateTime<Utc>) -> bool {
        TimeDelta::try_seconds(self.reset_secs)
            .and_then(|reset| self.recorded_at.checked_add_signed(reset))
            .is_some_and(|resets_at| resets_at >= now)
    }
}

/// Process-wide gate. Cloning shares the same snapshot.
#[derive(Debug, Clone)]
pub struct ErrorBudgetGate {
    snapshot: Arc<RwLock<Option<ErrorBudgetState>>>,
    threshold: i64,
}

impl Default for ErrorBudgetGate {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl ErrorBudgetGate {
    pub fn new(threshold: i64) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(None)),
            threshold,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.is_exhausted_at(Utc::now())
    }

    pub fn is_exhausted_at(&self, now: DateTime<Utc>) -> bool {
        match self.snapshot() {
            Some(state) => state.is_current_at(now) && state.remaining <= self.threshold,
            None => false,
        }
    }

    /// Last write wins.
    pub fn record(&self, remaining: i64, reset_secs: i64, observed_at: DateTime<Utc>) {
        let state = ErrorBudgetState {
            remaining,
            reset_secs,
            recorded_at: observed_at,
        };
        match self.snapshot.write() {
            Ok(mut guard) => *guard = Some(state),
            Err(poisoned) => *poisoned.into_inner() = Some(state),
        }
    }

    pub fn snapshot(&self) -> Option<ErrorBudgetState> {
        match self.snapshot.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Records the budget from response headers; responses without both headers are ignored.
    pub fn record_headers(&self, headers: &HeaderMap, observed_at: DateTime<Utc>) -> bool {
        let (Some(remaining), Some(reset)) = (
            header_i64(headers, HEADER_REMAIN),
            header_i64(headers, HEADER_RESET),
        ) else {
            return false;
        };
        self.record(remaining, reset, observed_at);
        true
    }
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Upstream client middleware feeding every ESI response into the gate.
pub struct ErrorLimitCollector {
    gate: ErrorBudgetGate,
}

impl ErrorLimitCollector {
    pub fn new(gate: ErrorBudgetGate) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl Middleware for ErrorLimitCollector {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        let url = req.url().clone();
        let response = next.run(req, extensions).await?;

        if self.gate.record_headers(response.headers(), Utc::now()) {
            tracing::debug!(
                url = %url,
                snapshot = ?self.gate.snapshot(),
                "recorded ESI error limit"
            );
        }

        if let Some(warning) = response.headers().get("warning").and_then(|v| v.to_str().ok()) {
            tracing::warn!(url = %url, warning, "ESI route warning");
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Duration;

    #[test]
    fn test_low_budget_is_exhausted() {
        let gate = ErrorBudgetGate::new(20);
        let now = Utc::now();
        gate.record(5, 60, now);
        assert!(gate.is_exhausted_at(now));

        gate.record(50, 60, now);
        assert!(!gate.is_exhausted_at(now));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let gate = ErrorBudgetGate::new(20);
        let now = Utc::now();
        gate.record(20, 60, now);
        assert!(gate.is_exhausted_at(now));
        gate.record(21, 60, now);
        assert!(!gate.is_exhausted_at(now));
    }

    #[test]
    fn test_expired_snapshot_never_blocks() {
        let gate = ErrorBudgetGate::new(20);
        let observed = Utc::now();
        gate.record(0, 60, observed);

        assert!(gate.is_exhausted_at(observed + Duration::seconds(60)));
        assert!(!gate.is_exhausted_at(observed + Duration::seconds(61)));
        assert!(!gate.is_exhausted_at(observed + Duration::seconds(3600)));
    }

    #[test]
    fn test_out_of_range_reset_never_blocks() {
        let gate = ErrorBudgetGate::new(20);
        let now = Utc::now();
        gate.record(5, i64::MAX, now);
        assert!(!gate.is_exhausted_at(now));
        assert!(!gate.is_exhausted());

        let mut headers = HeaderMap::new();
        headers.insert(HEADER_REMAIN, HeaderValue::from_static("0"));
        headers.insert(HEADER_RESET, HeaderValue::from_static("9223372036854775807"));
        assert!(gate.record_headers(&headers, now));
        assert!(!gate.is_exhausted());
    }

    #[test]
    fn test_empty_gate_is_open() {
        let gate = ErrorBudgetGate::default();
        assert!(!gate.is_exhausted());
        assert!(gate.snapshot().is_none());
    }

    #[test]
    fn test_clones_share_snapshot() {
        let gate = ErrorBudgetGate::new(20);
        let other = gate.clone();
        other.record(1, 60, Utc::now());
        assert!(gate.is_exhausted());
    }

    #[test]
    fn test_record_headers_requires_both_values() {
        let gate = ErrorBudgetGate::new(20);
        let now = Utc::now();

        let mut headers = HeaderMap::new();
        headers.insert(HEADER_REMAIN, HeaderValue::from_static("10"));
        assert!(!gate.record_headers(&headers, now));
        assert!(gate.snapshot().is_none());

        headers.insert(HEADER_RESET, HeaderValue::from_static("42"));
        assert!(gate.record_headers(&headers, now));
        assert_eq!(
            gate.snapshot(),
            Some(ErrorBudgetState {
                remaining: 10,
                reset_secs: 42,
                recorded_at: now
            })
        );

        headers.insert(HEADER_RESET, HeaderValue::from_static("soon"));
        assert!(!gate.record_headers(&headers, now));
    }

    #[tokio::test]
    async fn test_concurrent_records_never_tear() {
        let gate = ErrorBudgetGate::new(20);
        let now = Utc::now();
        let mut handles = Vec::new();
        for i in 0..16_i64 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    gate.record(i, i, now);
                    let state = gate.snapshot().unwrap();
                    assert_eq!(state.remaining, state.reset_secs);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
