//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring the bridge, fed from committed events
//! and aborted invocations.
//!
//! # Metrics
//!
//! - `bridge_submissions_total` - Wallet transactions created
//! - `bridge_executions_total` - Wallet transactions executed
//! - `bridge_claims_total` - Sequences paid out
//! - `bridge_payout_rejections_total` - Batch payouts bounced by the receiver
//! - `bridge_aborted_invocations_total` - Invocations rolled back
//! - `bridge_outbound_locks_total` - Outbound transfers locked
//! - `bridge_provisioned_pending` - Provisioned sequences not yet claimed
//!
//! [`router`] exposes them as `GET /metrics` in the Prometheus text format.

use crate::events::{BridgeEvent, EventRecord};
use axum::{extract::State, http::StatusCode, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Wallet transactions created
    pub submissions_total: IntCounter,

    /// Wallet transactions executed
    pub executions_total: IntCounter,

    /// Sequences paid out
    pub claims_total: IntCounter,

    /// Batch payouts rejected
    pub payout_rejections_total: IntCounter,

    /// Invocations rolled back
    pub aborted_total: IntCounter,

    /// Outbound locks recorded
    pub outbound_locks_total: IntCounter,

    /// Provisioned, unclaimed sequences
    pub provisioned_pending: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector on a private registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let submissions_total =
            IntCounter::new("bridge_submissions_total", "Wallet transactions created")?;
        registry.register(Box::new(submissions_total.clone()))?;

        let executions_total =
            IntCounter::new("bridge_executions_total", "Wallet transactions executed")?;
        registry.register(Box::new(executions_total.clone()))?;

        let claims_total = IntCounter::new("bridge_claims_total", "Sequences paid out")?;
        registry.register(Box::new(claims_total.clone()))?;

        let payout_rejections_total = IntCounter::new(
            "bridge_payout_rejections_total",
            "Batch payouts rejected by the receiver",
        )?;
        registry.register(Box::new(payout_rejections_total.clone()))?;

        let aborted_total = IntCounter::new(
            "bridge_aborted_invocations_total",
            "Invocations rolled back",
        )?;
        registry.register(Box::new(aborted_total.clone()))?;

        let outbound_locks_total =
            IntCounter::new("bridge_outbound_locks_total", "Outbound transfers locked")?;
        registry.register(Box::new(outbound_locks_total.clone()))?;

        let provisioned_pending = IntGauge::new(
            "bridge_provisioned_pending",
            "Provisioned sequences not yet claimed",
        )?;
        registry.register(Box::new(provisioned_pending.clone()))?;

        Ok(Self {
            submissions_total,
            executions_total,
            claims_total,
            payout_rejections_total,
            aborted_total,
            outbound_locks_total,
            provisioned_pending,
            registry,
        })
    }

    /// Account for newly committed events
    pub fn record_events(&self, records: &[EventRecord]) {
        for record in records {
            match &record.event {
                BridgeEvent::Submitted { .. } => self.submissions_total.inc(),
                BridgeEvent::Executed { .. } => self.executions_total.inc(),
                BridgeEvent::Provisioned { .. } => self.provisioned_pending.inc(),
                BridgeEvent::Claimed { .. } | BridgeEvent::UnclaimableResolved { .. } => {
                    self.claims_total.inc();
                    self.provisioned_pending.dec();
                }
                BridgeEvent::ProvisionRemoved { .. } => self.provisioned_pending.dec(),
                BridgeEvent::ClaimFailed { .. } => self.payout_rejections_total.inc(),
                BridgeEvent::OutboundLocked { .. } => self.outbound_locks_total.inc(),
                _ => {}
            }
        }
    }

    /// Record a rolled-back invocation
    pub fn record_abort(&self) {
        self.aborted_total.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text format
    pub fn export(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

// Prometheus metrics endpoint
async fn metrics_handler(State(metrics): State<Metrics>) -> Result<String, (StatusCode, String)> {
    metrics.export().map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to export metrics: {}", e),
        )
    })
}

/// HTTP routes serving the metrics
pub fn router(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}
