mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{memory_repo, new_device, seed_job, MockTransportFactory};
use switchboot_core::models::{
    Device, DeviceUpdate, EventLog, Job, NewDevice, NewEvent, NewJob, Run, RunDevice,
    RunDeviceStatus, RunStatus,
};
use switchboot_server::error::StorageError;
use switchboot_server::scheduler::RunScheduler;
use switchboot_server::storage::{Repository, RunDeviceUpdate};

#[tokio::test]
async fn bounded_parallelism_is_respected() {
    let repo = memory_repo().await;
    let job_id = seed_job(&repo, "Batch Job").await;
    for n in 1..=8u8 {
        repo.create_device(
            job_id,
            &new_device(
                &format!("sw{}", n),
                &format!("10.0.0.{}", n),
                Some(n),
                Some("generic"),
            ),
        )
        .await
        .unwrap();
    }
    let run = repo.create_run(job_id, 4).await.unwrap();

    let factory = Arc::new(MockTransportFactory::new().with_delay(Duration::from_millis(20)));
    let counters = Arc::clone(&factory.counters);
    let scheduler = RunScheduler::new(Arc::clone(&repo), factory);
    scheduler.execute_run(run.id).await;

    let run = repo.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.finished_at.is_some());

    let run_devices = repo.list_run_devices(run.id).await.unwrap();
    assert_eq!(run_devices.len(), 8);
    assert!(run_devices
        .iter()
        .all(|rd| rd.status == RunDeviceStatus::Verified));

    let max_active = counters.max_active.load(Ordering::SeqCst);
    assert!(max_active >= 2, "expected real concurrency, saw {}", max_active);
    assert!(max_active <= 4, "parallelism bound exceeded: {}", max_active);
    assert_eq!(counters.opened.load(Ordering::SeqCst), 8);
    assert_eq!(counters.active.load(Ordering::SeqCst), 0, "port leaked");
}

#[tokio::test]
async fn zero_parallelism_is_clamped_to_one() {
    let repo = memory_repo().await;
    let job_id = seed_job(&repo, "Serial Job").await;
    for n in 1..=3u8 {
        repo.create_device(
            job_id,
            &new_device(
                &format!("sw{}", n),
                &format!("10.0.0.{}", n),
                Some(n),
                Some("generic"),
            ),
        )
        .await
        .unwrap();
    }
    let run = repo.create_run(job_id, 0).await.unwrap();

    let factory = Arc::new(MockTransportFactory::new().with_delay(Duration::from_millis(5)));
    let counters = Arc::clone(&factory.counters);
    let scheduler = RunScheduler::new(Arc::clone(&repo), factory);
    scheduler.execute_run(run.id).await;

    assert_eq!(counters.max_active.load(Ordering::SeqCst), 1);
    let run = repo.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
}

#[tokio::test]
async fn empty_job_completes_immediately() {
    let repo = memory_repo().await;
    let job_id = seed_job(&repo, "Empty Job").await;
    let run = repo.create_run(job_id, 4).await.unwrap();

    let scheduler = RunScheduler::new(Arc::clone(&repo), Arc::new(MockTransportFactory::new()));
    scheduler.execute_run(run.id).await;

    let run = repo.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(repo.list_run_devices(run.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn per_device_failure_does_not_fail_the_run() {
    let repo = memory_repo().await;
    let job_id = seed_job(&repo, "Mixed Job").await;
    // One healthy device and one with no console port assigned.
    let ok = repo
        .create_device(job_id, &new_device("sw1", "10.0.0.1", Some(1), Some("generic")))
        .await
        .unwrap();
    let broken = repo
        .create_device(job_id, &new_device("sw2", "10.0.0.2", None, Some("generic")))
        .await
        .unwrap();
    let run = repo.create_run(job_id, 2).await.unwrap();

    let scheduler = RunScheduler::new(Arc::clone(&repo), Arc::new(MockTransportFactory::new()));
    scheduler.execute_run(run.id).await;

    let run = repo.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    let ok_rd = repo.get_run_device(run.id, ok.id).await.unwrap().unwrap();
    assert_eq!(ok_rd.status, RunDeviceStatus::Verified);
    let broken_rd = repo.get_run_device(run.id, broken.id).await.unwrap().unwrap();
    assert_eq!(broken_rd.status, RunDeviceStatus::Failed);
    assert_eq!(broken_rd.error_code.as_deref(), Some("VALIDATION_ERROR"));
}

/// Delegates to a real repository but panics on the first RUNNING write for
/// one device, simulating a worker that dies before terminalizing its row.
struct PanickingRepo {
    inner: Arc<dyn Repository>,
    panic_device: i64,
}

#[async_trait]
impl Repository for PanickingRepo {
    async fn create_job(&self, new: &NewJob) -> Result<Job, StorageError> {
        self.inner.create_job(new).await
    }
    async fn get_job(&self, job_id: i64) -> Result<Option<Job>, StorageError> {
        self.inner.get_job(job_id).await
    }
    async fn list_jobs(&self, skip: i64, limit: i64) -> Result<Vec<Job>, StorageError> {
        self.inner.list_jobs(skip, limit).await
    }
    async fn delete_job(&self, job_id: i64) -> Result<bool, StorageError> {
        self.inner.delete_job(job_id).await
    }
    async fn create_device(&self, job_id: i64, new: &NewDevice) -> Result<Device, StorageError> {
        self.inner.create_device(job_id, new).await
    }
    async fn get_device(&self, device_id: i64) -> Result<Option<Device>, StorageError> {
        self.inner.get_device(device_id).await
    }
    async fn list_devices(&self, job_id: i64) -> Result<Vec<Device>, StorageError> {
        self.inner.list_devices(job_id).await
    }
    async fn update_device(
        &self,
        device_id: i64,
        update: &DeviceUpdate,
    ) -> Result<Option<Device>, StorageError> {
        self.inner.update_device(device_id, update).await
    }
    async fn delete_device(&self, device_id: i64) -> Result<bool, StorageError> {
        self.inner.delete_device(device_id).await
    }
    async fn assigned_ports(&self) -> Result<Vec<u8>, StorageError> {
        self.inner.assigned_ports().await
    }
    async fn create_run(&self, job_id: i64, parallelism: u32) -> Result<Run, StorageError> {
        self.inner.create_run(job_id, parallelism).await
    }
    async fn get_run(&self, run_id: i64) -> Result<Option<Run>, StorageError> {
        self.inner.get_run(run_id).await
    }
    async fn set_run_status(&self, run_id: i64, status: RunStatus) -> Result<(), StorageError> {
        self.inner.set_run_status(run_id, status).await
    }
    async fn begin_run_device(&self, run_id: i64, device_id: i64) -> Result<(), StorageError> {
        self.inner.begin_run_device(run_id, device_id).await
    }
    async fn set_run_device_status(
        &self,
        run_id: i64,
        device_id: i64,
        status: RunDeviceStatus,
        update: RunDeviceUpdate,
    ) -> Result<(), StorageError> {
        if device_id == self.panic_device && status == RunDeviceStatus::Running {
            panic!("injected worker fault");
        }
        self.inner
            .set_run_device_status(run_id, device_id, status, update)
            .await
    }
    async fn get_run_device(
        &self,
        run_id: i64,
        device_id: i64,
    ) -> Result<Option<RunDevice>, StorageError> {
        self.inner.get_run_device(run_id, device_id).await
    }
    async fn list_run_devices(&self, run_id: i64) -> Result<Vec<RunDevice>, StorageError> {
        self.inner.list_run_devices(run_id).await
    }
    async fn append_event(&self, event: &NewEvent) -> Result<(), StorageError> {
        self.inner.append_event(event).await
    }
    async fn list_events(&self, run_id: i64) -> Result<Vec<EventLog>, StorageError> {
        self.inner.list_events(run_id).await
    }
    async fn health_check(&self) -> Result<(), StorageError> {
        self.inner.health_check().await
    }
}

#[tokio::test]
async fn worker_panic_fails_the_run_and_terminalizes_the_stuck_device() {
    let inner = memory_repo().await;
    let job_id = seed_job(&inner, "Panicky Job").await;
    let healthy = inner
        .create_device(job_id, &new_device("sw1", "10.0.0.1", Some(1), Some("generic")))
        .await
        .unwrap();
    let doomed = inner
        .create_device(job_id, &new_device("sw2", "10.0.0.2", Some(2), Some("generic")))
        .await
        .unwrap();
    let run = inner.create_run(job_id, 2).await.unwrap();

    let repo: Arc<dyn Repository> = Arc::new(PanickingRepo {
        inner: Arc::clone(&inner),
        panic_device: doomed.id,
    });
    let scheduler = RunScheduler::new(repo, Arc::new(MockTransportFactory::new()));
    scheduler.execute_run(run.id).await;

    let run = inner.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.finished_at.is_some());

    let healthy_rd = inner
        .get_run_device(run.id, healthy.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(healthy_rd.status, RunDeviceStatus::Verified);

    // The panicked worker never moved its row past PENDING; the scheduler
    // must still leave it terminal.
    let doomed_rd = inner
        .get_run_device(run.id, doomed.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doomed_rd.status, RunDeviceStatus::Failed);
    assert_eq!(
        doomed_rd.error_message.as_deref(),
        Some("Bootstrap worker exited unexpectedly")
    );
    assert!(doomed_rd.started_at.is_some());
    assert!(doomed_rd.finished_at.is_some());
}

#[tokio::test]
async fn cancelling_a_live_run_fails_pending_devices() {
    let repo = memory_repo().await;
    let job_id = seed_job(&repo, "Cancelled Job").await;
    for n in 1..=4u8 {
        repo.create_device(
            job_id,
            &new_device(
                &format!("sw{}", n),
                &format!("10.0.0.{}", n),
                Some(n),
                Some("generic"),
            ),
        )
        .await
        .unwrap();
    }
    let run = repo.create_run(job_id, 2).await.unwrap();

    let factory = Arc::new(MockTransportFactory::new().with_delay(Duration::from_millis(10)));
    let scheduler = RunScheduler::new(Arc::clone(&repo), factory);

    let task = {
        let scheduler = Arc::clone(&scheduler);
        let run_id = run.id;
        tokio::spawn(async move { scheduler.execute_run(run_id).await })
    };

    // The flag registers as soon as execution starts; flip it before any
    // device can reach a terminal state.
    while !scheduler.cancel_run(run.id) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    task.await.unwrap();

    let run = repo.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    let run_devices = repo.list_run_devices(run.id).await.unwrap();
    assert_eq!(run_devices.len(), 4);
    assert!(run_devices.iter().all(|rd| rd.status.is_terminal()));
    assert!(run_devices
        .iter()
        .all(|rd| rd.status == RunDeviceStatus::Failed
            && rd.error_message.as_deref() == Some("cancelled")));
}
