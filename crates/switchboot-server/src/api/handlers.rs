use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use switchboot_core::csv_import::parse_devices_csv;
use switchboot_core::models::{
    Device, DeviceUpdate, EventLog, Job, NewDevice, NewJob, Run, ValidationError,
};
use switchboot_core::policy::validate_device;
use switchboot_core::serial::{discover_ports, MAX_PORTS};
use switchboot_core::vendors::vendor_for;
use switchboot_core::{render_command_stream, template_hash, CoreError};

use crate::config::AppConfig;
use crate::report::ReportService;
use crate::scheduler::{RunScheduler, MAX_PARALLELISM};
use crate::storage::Repository;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub scheduler: Arc<RunScheduler>,
    pub config: Arc<AppConfig>,
}

fn internal<E: std::fmt::Display>(err: E) -> StatusCode {
    error!(error = %err, "Request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

/// Liveness plus storage and serial enumeration. Unauthenticated.
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let db_ok = state.repo.health_check().await.is_ok();
    let ports = discover_ports(&state.config.serial_port_base_path);

    Json(json!({
        "status": if db_ok { "healthy" } else { "degraded" },
        "database": if db_ok { "ok" } else { "error" },
        "serial_ports": {
            "count": ports.len(),
            "available": ports,
        },
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn root() -> Json<Value> {
    Json(json!({
        "message": "Switchboot serial bootstrap controller",
        "health": "/health",
    }))
}

// Jobs

pub async fn create_job(
    State(state): State<AppState>,
    Json(new): Json<NewJob>,
) -> Result<Json<Job>, StatusCode> {
    let job = state.repo.create_job(&new).await.map_err(internal)?;
    info!(job_id = job.id, name = %job.name, "Job created");
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub skip: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Job>>, StatusCode> {
    let jobs = state
        .repo
        .list_jobs(params.skip.unwrap_or(0), params.limit.unwrap_or(100))
        .await
        .map_err(internal)?;
    Ok(Json(jobs))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<Job>, StatusCode> {
    match state.repo.get_job(job_id).await.map_err(internal)? {
        Some(job) => Ok(Json(job)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<Value>, StatusCode> {
    if state.repo.delete_job(job_id).await.map_err(internal)? {
        Ok(Json(json!({"status": "deleted"})))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

// Devices

pub async fn create_device(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    Json(new): Json<NewDevice>,
) -> Result<Json<Device>, StatusCode> {
    if state.repo.get_job(job_id).await.map_err(internal)?.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    let device = state
        .repo
        .create_device(job_id, &new)
        .await
        .map_err(internal)?;
    Ok(Json(device))
}

pub async fn list_devices(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<Vec<Device>>, StatusCode> {
    let devices = state.repo.list_devices(job_id).await.map_err(internal)?;
    Ok(Json(devices))
}

pub async fn update_device(
    State(state): State<AppState>,
    Path(device_id): Path<i64>,
    Json(update): Json<DeviceUpdate>,
) -> Result<Json<Device>, StatusCode> {
    match state
        .repo
        .update_device(device_id, &update)
        .await
        .map_err(internal)?
    {
        Some(device) => Ok(Json(device)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

pub async fn delete_device(
    State(state): State<AppState>,
    Path(device_id): Path<i64>,
) -> Result<Json<Value>, StatusCode> {
    if state.repo.delete_device(device_id).await.map_err(internal)? {
        Ok(Json(json!({"status": "deleted"})))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

pub async fn import_devices_csv(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    mut multipart: Multipart,
) -> Result<Json<Value>, StatusCode> {
    if state.repo.get_job(job_id).await.map_err(internal)?.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }

    let mut content = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        if field.name() == Some("file") || field.file_name().is_some() {
            content = Some(field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?);
            break;
        }
    }
    let Some(content) = content else {
        warn!(job_id = job_id, "CSV import without a file field");
        return Err(StatusCode::BAD_REQUEST);
    };

    let outcome = parse_devices_csv(&content);
    let mut errors = outcome.errors;
    let mut success_count = 0;
    for draft in outcome.devices {
        match state.repo.create_device(job_id, &draft).await {
            Ok(_) => success_count += 1,
            Err(err) => errors.push(format!("Error creating device '{}': {}", draft.hostname, err)),
        }
    }

    info!(
        job_id = job_id,
        success_count = success_count,
        error_count = errors.len(),
        "CSV import finished"
    );
    Ok(Json(json!({
        "job_id": job_id,
        "success_count": success_count,
        "errors": errors,
    })))
}

// Validation and previews

pub async fn dry_run_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<Vec<ValidationError>>, StatusCode> {
    if state.repo.get_job(job_id).await.map_err(internal)?.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    let devices = state.repo.list_devices(job_id).await.map_err(internal)?;

    let mut all_errors = Vec::new();
    for device in &devices {
        all_errors.extend(validate_device(device, &devices));
    }
    Ok(Json(all_errors))
}

#[derive(Debug, Serialize)]
pub struct DevicePreview {
    pub device_id: i64,
    pub hostname: String,
    pub vendor: String,
    pub commands: String,
    pub hash: String,
}

fn build_preview(device: &Device) -> Result<DevicePreview, CoreError> {
    let vendor = vendor_for(device.vendor.as_deref().unwrap_or("generic"));
    let blocks = vendor.bootstrap_commands(&device.bootstrap_params())?;
    let commands = render_command_stream(&blocks);
    let hash = template_hash(&commands);
    Ok(DevicePreview {
        device_id: device.id,
        hostname: device.hostname.clone(),
        vendor: vendor.vendor_id().to_string(),
        commands,
        hash,
    })
}

pub async fn device_preview(
    State(state): State<AppState>,
    Path((job_id, device_id)): Path<(i64, i64)>,
) -> Result<Json<DevicePreview>, StatusCode> {
    let device = state
        .repo
        .get_device(device_id)
        .await
        .map_err(internal)?
        .filter(|d| d.job_id == job_id)
        .ok_or(StatusCode::NOT_FOUND)?;

    match build_preview(&device) {
        Ok(preview) => Ok(Json(preview)),
        Err(err) => {
            warn!(device_id = device_id, error = %err, "Preview rendering failed");
            Err(StatusCode::UNPROCESSABLE_ENTITY)
        }
    }
}

pub async fn bulk_preview(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<Vec<DevicePreview>>, StatusCode> {
    if state.repo.get_job(job_id).await.map_err(internal)?.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    let devices = state.repo.list_devices(job_id).await.map_err(internal)?;

    let mut previews = Vec::with_capacity(devices.len());
    for device in &devices {
        match build_preview(device) {
            Ok(preview) => previews.push(preview),
            Err(err) => {
                warn!(device_id = device.id, error = %err, "Preview rendering failed");
                return Err(StatusCode::UNPROCESSABLE_ENTITY);
            }
        }
    }
    Ok(Json(previews))
}

// Runs

#[derive(Debug, Default, Deserialize)]
pub struct CreateRunRequest {
    #[serde(default)]
    pub parallelism: Option<u32>,
}

pub async fn create_run(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    body: Option<Json<CreateRunRequest>>,
) -> Result<Json<Run>, StatusCode> {
    if state.repo.get_job(job_id).await.map_err(internal)?.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }

    let parallelism = body
        .and_then(|Json(request)| request.parallelism)
        .unwrap_or(state.config.default_parallelism)
        .clamp(1, MAX_PARALLELISM);

    let run = state
        .repo
        .create_run(job_id, parallelism)
        .await
        .map_err(internal)?;

    // Execution continues in the background; the caller gets the run row now.
    state.scheduler.spawn_run(run.id);

    info!(run_id = run.id, job_id = job_id, parallelism = parallelism, "Run launched");
    Ok(Json(run))
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> Result<Json<Run>, StatusCode> {
    match state.repo.get_run(run_id).await.map_err(internal)? {
        Some(run) => Ok(Json(run)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

pub async fn get_run_logs(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> Result<Json<Vec<EventLog>>, StatusCode> {
    let events = state.repo.list_events(run_id).await.map_err(internal)?;
    Ok(Json(events))
}

pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> Result<Json<Value>, StatusCode> {
    if state.repo.get_run(run_id).await.map_err(internal)?.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    let cancelled = state.scheduler.cancel_run(run_id);
    Ok(Json(json!({"run_id": run_id, "cancelled": cancelled})))
}

pub async fn run_report_json(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> Result<impl IntoResponse, StatusCode> {
    let service = ReportService::new(Arc::clone(&state.repo));
    match service.json_report(run_id).await.map_err(internal)? {
        Some(report) => Ok(Json(report)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

pub async fn run_report_csv(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> Result<impl IntoResponse, StatusCode> {
    let service = ReportService::new(Arc::clone(&state.repo));
    match service.csv_report(run_id).await.map_err(internal)? {
        Some(csv) => Ok((
            [
                (header::CONTENT_TYPE, "text/csv".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=report_{}.csv", run_id),
                ),
            ],
            csv,
        )),
        None => Err(StatusCode::NOT_FOUND),
    }
}

// Ports

/// Sixteen-entry map of the controller's console ports. A port is `busy`
/// when any device in the store has it assigned.
pub async fn list_ports(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let assigned = state.repo.assigned_ports().await.map_err(internal)?;

    let mut ports = serde_json::Map::new();
    for n in 1..=MAX_PORTS {
        let status = if assigned.contains(&n) {
            "busy"
        } else {
            "available"
        };
        ports.insert(format!("port{}", n), json!(status));
    }
    Ok(Json(Value::Object(ports)))
}
