use axum::{
    routing::{get, patch, post},
    Router,
};

use super::handlers::{
    bulk_preview, cancel_run, create_device, create_job, create_run, delete_device, delete_job,
    device_preview, dry_run_job, get_job, get_run, get_run_logs, health_check, import_devices_csv,
    list_devices, list_jobs, list_ports, root, run_report_csv, run_report_json, update_device,
    AppState,
};

pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        // Health and root banner
        .route("/health", get(health_check))
        .route("/", get(root))
        // Job lifecycle
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/:job_id", get(get_job).delete(delete_job))
        // Device lifecycle
        .route("/jobs/:job_id/devices", post(create_device).get(list_devices))
        .route("/jobs/:job_id/devices/import-csv", post(import_devices_csv))
        .route("/devices/:device_id", patch(update_device).delete(delete_device))
        // Validation and previews over the pure core
        .route("/jobs/:job_id/dry-run", post(dry_run_job))
        .route(
            "/jobs/:job_id/devices/:device_id/preview",
            get(device_preview),
        )
        .route("/jobs/:job_id/preview", post(bulk_preview))
        // Runs and reporting
        .route("/jobs/:job_id/runs", post(create_run))
        .route("/runs/:run_id", get(get_run))
        .route("/runs/:run_id/logs", get(get_run_logs))
        .route("/runs/:run_id/cancel", post(cancel_run))
        .route("/runs/:run_id/report.json", get(run_report_json))
        .route("/runs/:run_id/report.csv", get(run_report_csv))
        // Console ports
        .route("/ports", get(list_ports))
}
