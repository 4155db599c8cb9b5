use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "drivebook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "drivebook_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "drivebook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "drivebook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "drivebook_connections_rejected_total";

/// Gauge: number of active schools (loaded engines).
pub const SCHOOLS_ACTIVE: &str = "drivebook_schools_active";

/// Counter: connections with an unparseable caller identity.
pub const AUTH_FAILURES_TOTAL: &str = "drivebook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "drivebook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "drivebook_wal_flush_batch_size";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::RegisterInstructor { .. } => "register_instructor",
        Command::RegisterVehicle { .. } => "register_vehicle",
        Command::DefineCategory { .. } => "define_category",
        Command::DefineExamForm { .. } => "define_exam_form",
        Command::AddExamItems { .. } => "add_exam_items",
        Command::OpenFile { .. } => "open_file",
        Command::InsertAvailability { .. } => "insert_availability",
        Command::UpdateAvailability { .. } => "update_availability",
        Command::DeleteAvailability { .. } => "delete_availability",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectSlots { .. } => "select_slots",
        Command::InsertAppointment { .. } => "insert_appointment",
        Command::UpdateAppointment { .. } => "update_appointment",
        Command::DeleteAppointment { .. } => "delete_appointment",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::StartForm { .. } => "start_form",
        Command::MarkMistake { .. } => "mark_mistake",
        Command::FinalizeForm { .. } => "finalize_form",
        Command::SelectForm { .. } => "select_form",
        Command::SelectFormsByStudent { .. } => "select_forms_by_student",
        Command::SelectTrend { .. } => "select_trend",
        Command::SelectHeatmap { .. } => "select_heatmap",
        Command::SelectAverage { .. } => "select_average",
    }
}
