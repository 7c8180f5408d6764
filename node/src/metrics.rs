//! # Prometheus Metrics
//!
//! Operational metrics for the vault host, scraped by Prometheus at the
//! `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] with
//! the `heirloom` prefix so they do not collide with any default global
//! registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use heirloom_contracts::{InheritanceVault, VaultEvent};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct VaultMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Successful deposits.
    pub deposits_total: IntCounter,
    /// Successful withdrawals.
    pub withdrawals_total: IntCounter,
    /// Heir changes, including the one that accompanies a claim.
    pub heir_changes_total: IntCounter,
    /// Successful ownership claims.
    pub ownership_claims_total: IntCounter,
    /// Rejected calls, labelled by error kind.
    pub rejected_calls_total: IntCounterVec,
    /// Vault balance in base units, clamped to `i64::MAX`.
    pub vault_balance: IntGauge,
    /// Seconds since the owner last proved activity.
    pub seconds_since_activity: IntGauge,
    /// Histogram of vault call latency in seconds.
    pub call_latency_seconds: Histogram,
}

impl VaultMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("heirloom".into()), None)
            .expect("failed to create prometheus registry");

        let deposits_total = IntCounter::new("deposits_total", "Total number of deposits")
            .expect("metric creation");
        registry
            .register(Box::new(deposits_total.clone()))
            .expect("metric registration");

        let withdrawals_total =
            IntCounter::new("withdrawals_total", "Total number of owner withdrawals")
                .expect("metric creation");
        registry
            .register(Box::new(withdrawals_total.clone()))
            .expect("metric registration");

        let heir_changes_total =
            IntCounter::new("heir_changes_total", "Total number of heir designations")
                .expect("metric creation");
        registry
            .register(Box::new(heir_changes_total.clone()))
            .expect("metric registration");

        let ownership_claims_total = IntCounter::new(
            "ownership_claims_total",
            "Total number of successful ownership claims by an heir",
        )
        .expect("metric creation");
        registry
            .register(Box::new(ownership_claims_total.clone()))
            .expect("metric registration");

        let rejected_calls_total = IntCounterVec::new(
            Opts::new("rejected_calls_total", "Vault calls rejected, by error kind"),
            &["kind"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(rejected_calls_total.clone()))
            .expect("metric registration");

        let vault_balance = IntGauge::new("vault_balance", "Vault balance in base units")
            .expect("metric creation");
        registry
            .register(Box::new(vault_balance.clone()))
            .expect("metric registration");

        let seconds_since_activity = IntGauge::new(
            "seconds_since_activity",
            "Seconds since the owner last withdrew or changed the heir",
        )
        .expect("metric creation");
        registry
            .register(Box::new(seconds_since_activity.clone()))
            .expect("metric registration");

        let call_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "call_latency_seconds",
                "Vault call latency, including persistence, in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(call_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            deposits_total,
            withdrawals_total,
            heir_changes_total,
            ownership_claims_total,
            rejected_calls_total,
            vault_balance,
            seconds_since_activity,
            call_latency_seconds,
        }
    }

    /// Bumps the counter matching `event`.
    pub fn record_event(&self, event: &VaultEvent) {
        match event {
            VaultEvent::FundsDeposited { .. } => self.deposits_total.inc(),
            VaultEvent::FundsWithdrawn { .. } => self.withdrawals_total.inc(),
            VaultEvent::HeirChanged { .. } => self.heir_changes_total.inc(),
            VaultEvent::OwnershipTransferred { .. } => self.ownership_claims_total.inc(),
        }
    }

    pub fn record_rejection(&self, kind: &str) {
        self.rejected_calls_total.with_label_values(&[kind]).inc();
    }

    /// Refreshes the gauges from the current vault state.
    pub fn observe_vault(&self, vault: &InheritanceVault, now: DateTime<Utc>) {
        let balance = i64::try_from(vault.balance().base_units()).unwrap_or(i64::MAX);
        self.vault_balance.set(balance);
        let idle = now.signed_duration_since(vault.last_activity()).num_seconds();
        self.seconds_since_activity.set(idle.max(0));
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

impl Default for VaultMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<VaultMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
