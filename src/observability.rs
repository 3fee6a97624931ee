use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "bookwire_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "bookwire_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "bookwire_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "bookwire_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "bookwire_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "bookwire_tenants_active";

/// Counter: customer notices handed to the mailer.
pub const NOTICES_TOTAL: &str = "bookwire_notices_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bookwire_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bookwire_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if
/// `port` is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertProvider { .. } => "insert_provider",
        Command::UpdateProvider { .. } => "update_provider",
        Command::DeleteProvider { .. } => "delete_provider",
        Command::InsertScheduleRule { .. } => "insert_schedule_rule",
        Command::UpdateScheduleRule { .. } => "update_schedule_rule",
        Command::DeleteScheduleRule { .. } => "delete_schedule_rule",
        Command::InsertModifier { .. } => "insert_modifier",
        Command::DeleteModifier { .. } => "delete_modifier",
        Command::ToggleModifier { .. } => "toggle_modifier",
        Command::InsertAppointmentType { .. } => "insert_appointment_type",
        Command::DeleteAppointmentType { .. } => "delete_appointment_type",
        Command::InsertAppointment { .. } => "insert_appointment",
        Command::DeleteAppointment { .. } => "delete_appointment",
        Command::SelectProviders => "select_providers",
        Command::SelectSchedule { .. } => "select_schedule",
        Command::SelectModifiers { .. } => "select_modifiers",
        Command::SelectAppointmentTypes { .. } => "select_appointment_types",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectCalendar { .. } => "select_calendar",
    }
}
