use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use switchboot_core::models::{RunDeviceStatus, RunStatus, VerifyTask};

use crate::error::ServerError;
use crate::storage::Repository;

/// Projects a run into the JSON and CSV report shapes.
pub struct ReportService {
    repo: Arc<dyn Repository>,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: i64,
    pub job_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub parallelism: u32,
    pub devices: Vec<DeviceReport>,
}

#[derive(Debug, Serialize)]
pub struct DeviceReport {
    pub hostname: String,
    pub mgmt_ip: String,
    pub port: Option<u8>,
    pub status: RunDeviceStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub template_hash: Option<String>,
    pub tasks: Vec<VerifyTask>,
}

impl ReportService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub async fn json_report(&self, run_id: i64) -> Result<Option<RunReport>, ServerError> {
        let Some(run) = self.repo.get_run(run_id).await? else {
            return Ok(None);
        };
        let job_name = self
            .repo
            .get_job(run.job_id)
            .await?
            .map(|job| job.name)
            .unwrap_or_else(|| "Unknown".to_string());

        let mut devices = Vec::new();
        for rd in self.repo.list_run_devices(run_id).await? {
            let device = self.repo.get_device(rd.device_id).await?;
            let duration_seconds = match (rd.started_at, rd.finished_at) {
                (Some(started), Some(finished)) => {
                    Some((finished - started).num_milliseconds() as f64 / 1000.0)
                }
                _ => None,
            };
            devices.push(DeviceReport {
                hostname: device
                    .as_ref()
                    .map(|d| d.hostname.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
                mgmt_ip: device
                    .as_ref()
                    .map(|d| d.mgmt_ip.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
                port: device.as_ref().and_then(|d| d.port),
                status: rd.status,
                started_at: rd.started_at,
                finished_at: rd.finished_at,
                duration_seconds,
                error_message: rd.error_message,
                error_code: rd.error_code,
                template_hash: rd.template_hash,
                tasks: rd.tasks,
            });
        }

        Ok(Some(RunReport {
            run_id: run.id,
            job_name,
            status: run.status,
            started_at: run.started_at,
            finished_at: run.finished_at,
            parallelism: run.parallelism,
            devices,
        }))
    }

    pub async fn csv_report(&self, run_id: i64) -> Result<Option<String>, ServerError> {
        let Some(report) = self.json_report(run_id).await? else {
            return Ok(None);
        };

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record([
                "hostname",
                "mgmt_ip",
                "port",
                "status",
                "started_at",
                "finished_at",
                "duration_seconds",
                "error_message",
                "error_code",
                "template_hash",
                "tasks_summary",
            ])
            .map_err(|e| ServerError::Internal(format!("CSV write failed: {}", e)))?;

        for device in &report.devices {
            writer
                .write_record([
                    device.hostname.clone(),
                    device.mgmt_ip.clone(),
                    device.port.map(|p| p.to_string()).unwrap_or_default(),
                    device.status.to_string(),
                    device
                        .started_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default(),
                    device
                        .finished_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default(),
                    device
                        .duration_seconds
                        .map(|d| d.to_string())
                        .unwrap_or_default(),
                    device.error_message.clone().unwrap_or_default(),
                    device.error_code.clone().unwrap_or_default(),
                    device.template_hash.clone().unwrap_or_default(),
                    tasks_summary(&device.tasks),
                ])
                .map_err(|e| ServerError::Internal(format!("CSV write failed: {}", e)))?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| ServerError::Internal(format!("CSV write failed: {}", e)))?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| ServerError::Internal(format!("CSV encoding failed: {}", e)))
    }
}

/// Flatten the verification task list into `"name: status; ..."` for the CSV
/// projection.
pub fn tasks_summary(tasks: &[VerifyTask]) -> String {
    tasks
        .iter()
        .map(|t| format!("{}: {}", t.name, t.status))
        .collect::<Vec<_>>()
        .join("; ")
}
