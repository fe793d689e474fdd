use async_trait::async_trait;
use switchboot_core::models::{
    Device, DeviceUpdate, EventLog, Job, NewDevice, NewEvent, NewJob, Run, RunDevice,
    RunDeviceStatus, RunStatus, VerifyTask,
};

use crate::error::StorageError;

/// Optional fields attached to a run-device status transition.
#[derive(Debug, Clone, Default)]
pub struct RunDeviceUpdate {
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub template_hash: Option<String>,
    pub tasks: Option<Vec<VerifyTask>>,
}

/// Trait defining the storage interface for jobs, devices, runs, and the
/// append-only event log.
#[async_trait]
pub trait Repository: Send + Sync {
    // Jobs
    async fn create_job(&self, new: &NewJob) -> Result<Job, StorageError>;
    async fn get_job(&self, job_id: i64) -> Result<Option<Job>, StorageError>;
    async fn list_jobs(&self, skip: i64, limit: i64) -> Result<Vec<Job>, StorageError>;
    /// Delete a job and everything it owns (devices, runs, run records, logs).
    async fn delete_job(&self, job_id: i64) -> Result<bool, StorageError>;

    // Devices
    async fn create_device(&self, job_id: i64, new: &NewDevice) -> Result<Device, StorageError>;
    async fn get_device(&self, device_id: i64) -> Result<Option<Device>, StorageError>;
    async fn list_devices(&self, job_id: i64) -> Result<Vec<Device>, StorageError>;
    async fn update_device(
        &self,
        device_id: i64,
        update: &DeviceUpdate,
    ) -> Result<Option<Device>, StorageError>;
    async fn delete_device(&self, device_id: i64) -> Result<bool, StorageError>;
    /// Console ports currently assigned to any device in the store.
    async fn assigned_ports(&self) -> Result<Vec<u8>, StorageError>;

    // Runs
    async fn create_run(&self, job_id: i64, parallelism: u32) -> Result<Run, StorageError>;
    async fn get_run(&self, run_id: i64) -> Result<Option<Run>, StorageError>;
    /// Stamps `finished_at` when the status is terminal.
    async fn set_run_status(&self, run_id: i64, status: RunStatus) -> Result<(), StorageError>;

    // Run devices
    /// Create the PENDING row for (run, device) if it does not exist yet.
    async fn begin_run_device(&self, run_id: i64, device_id: i64) -> Result<(), StorageError>;
    /// Idempotent upsert of the run-device status. Stamps `started_at` on the
    /// first RUNNING transition and `finished_at` on VERIFIED/FAILED; refuses
    /// to overwrite a terminal status with a non-terminal one.
    async fn set_run_device_status(
        &self,
        run_id: i64,
        device_id: i64,
        status: RunDeviceStatus,
        update: RunDeviceUpdate,
    ) -> Result<(), StorageError>;
    async fn get_run_device(
        &self,
        run_id: i64,
        device_id: i64,
    ) -> Result<Option<RunDevice>, StorageError>;
    async fn list_run_devices(&self, run_id: i64) -> Result<Vec<RunDevice>, StorageError>;

    // Event log (append-only)
    async fn append_event(&self, event: &NewEvent) -> Result<(), StorageError>;
    async fn list_events(&self, run_id: i64) -> Result<Vec<EventLog>, StorageError>;

    /// Health check for the storage.
    async fn health_check(&self) -> Result<(), StorageError>;
}
