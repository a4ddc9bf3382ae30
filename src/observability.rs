use std::net::SocketAddr;

// ── Booking metrics ─────────────────────────────────────────────

/// Counter: reservations committed (direct, approved, not imports).
pub const BOOKINGS_COMMITTED_TOTAL: &str = "roomgate_bookings_committed_total";

/// Counter: booking requests refused. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "roomgate_bookings_rejected_total";

/// Histogram: full store rewrite duration in seconds.
pub const STORE_REWRITE_DURATION_SECONDS: &str = "roomgate_store_rewrite_duration_seconds";

// ── Approval metrics ────────────────────────────────────────────

/// Counter: passcodes delivered (start + resend).
pub const OTP_SENT_TOTAL: &str = "roomgate_otp_sent_total";

/// Counter: verification attempts. Labels: outcome.
pub const OTP_VERIFY_TOTAL: &str = "roomgate_otp_verify_total";

/// Gauge: pending approval sessions.
pub const OTP_SESSIONS_ACTIVE: &str = "roomgate_otp_sessions_active";

/// Counter: notification deliveries that failed or timed out.
pub const DELIVERY_FAILURES_TOTAL: &str = "roomgate_delivery_failures_total";

/// Histogram: notification delivery duration in seconds.
pub const DELIVERY_DURATION_SECONDS: &str = "roomgate_delivery_duration_seconds";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a rejected request.
pub fn rejection_label(err: &crate::workflow::WorkflowError) -> &'static str {
    use crate::workflow::WorkflowError;
    match err {
        WorkflowError::Validation(_) => "validation",
        WorkflowError::RateLimited { .. } => "rate_limited",
        WorkflowError::Session(_) => "session",
        WorkflowError::Delivery(_) => "delivery",
        WorkflowError::ResendDeliveryFailed(_) => "resend_delivery",
        WorkflowError::ApprovalConflict(_) => "approval_conflict",
        WorkflowError::Store(_) => "store",
    }
}
