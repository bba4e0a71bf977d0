use std::net::SocketAddr;

use crate::request::Request;

// ── Decision metrics ────────────────────────────────────────────

/// Counter: validated requests. Labels: operation, outcome (accepted or a rejection code).
pub const DECISIONS_TOTAL: &str = "vetsched_decisions_total";

/// Histogram: validate-and-commit latency in seconds. Labels: operation.
pub const DECISION_DURATION_SECONDS: &str = "vetsched_decision_duration_seconds";

/// Histogram: time spent waiting for a doctor or vaccine lock, in seconds.
pub const LOCK_WAIT_SECONDS: &str = "vetsched_lock_wait_seconds";

/// Counter: commits the store rejected with a unique-constraint violation.
pub const COMMIT_CONFLICTS_TOTAL: &str = "vetsched_commit_conflicts_total";

// ── Boundary metrics ────────────────────────────────────────────

/// Counter: request lines handled by the harness. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "vetsched_requests_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Request variant to a short label for metrics.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::BookAppointment(_) => "book_appointment",
        Request::RescheduleAppointment { .. } => "reschedule_appointment",
        Request::CancelAppointment { .. } => "cancel_appointment",
        Request::AddAvailability { .. } => "add_availability",
        Request::UpdateAvailability { .. } => "update_availability",
        Request::RemoveAvailability { .. } => "remove_availability",
        Request::RegisterVaccine(_) => "register_vaccine",
        Request::UpdateVaccine { .. } => "update_vaccine",
        Request::RemoveVaccine { .. } => "remove_vaccine",
        Request::IsAvailable { .. } => "is_available",
        Request::AvailableDays { .. } => "available_days",
        Request::DoctorAppointments { .. } => "doctor_appointments",
        Request::AnimalAppointments { .. } => "animal_appointments",
        Request::AnimalVaccines { .. } => "animal_vaccines",
        Request::VaccinesAppliedBetween { .. } => "vaccines_applied_between",
        Request::VaccinesExpiringBetween { .. } => "vaccines_expiring_between",
        Request::NextEligibleDate { .. } => "next_eligible_date",
    }
}
