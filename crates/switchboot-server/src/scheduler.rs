use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use switchboot_core::models::{RunDeviceStatus, RunStatus};
use switchboot_core::serial::TransportFactory;

use crate::error::ServerError;
use crate::runner::BootstrapRunner;
use crate::storage::{Repository, RunDeviceUpdate};

/// Upper bound on concurrent workers; each worker holds one of the
/// controller's physical console ports exclusively.
pub const MAX_PARALLELISM: u32 = 16;

/// Fans a run out into per-device bootstrap workers under a bounded
/// concurrency gate and assigns the terminal run status.
pub struct RunScheduler {
    repo: Arc<dyn Repository>,
    transports: Arc<dyn TransportFactory>,
    cancel_flags: Mutex<HashMap<i64, Arc<AtomicBool>>>,
}

impl RunScheduler {
    pub fn new(repo: Arc<dyn Repository>, transports: Arc<dyn TransportFactory>) -> Arc<Self> {
        Arc::new(Self {
            repo,
            transports,
            cancel_flags: Mutex::new(HashMap::new()),
        })
    }

    /// Dispatch run execution in the background; the caller returns to its
    /// client as soon as the run row exists.
    pub fn spawn_run(self: &Arc<Self>, run_id: i64) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.execute_run(run_id).await;
        });
    }

    /// Execute a run to completion. Per-device failures land in the
    /// run-device records; the whole run is marked FAILED only on a
    /// scheduler-level failure or when a worker dies without leaving its
    /// device terminal.
    pub async fn execute_run(self: Arc<Self>, run_id: i64) {
        let cancel = self.register(run_id);
        match self.drive_run(run_id, cancel).await {
            Ok(()) => info!(run_id = run_id, "Run execution finished"),
            Err(err) => {
                error!(run_id = run_id, error = %err, "Run scheduler failed");
                if let Err(err) = self.repo.set_run_status(run_id, RunStatus::Failed).await {
                    error!(run_id = run_id, error = %err, "Failed to mark run as FAILED");
                }
            }
        }
        self.unregister(run_id);
    }

    async fn drive_run(&self, run_id: i64, cancel: Arc<AtomicBool>) -> Result<(), ServerError> {
        let run = self
            .repo
            .get_run(run_id)
            .await?
            .ok_or_else(|| ServerError::NotFound(format!("Run {} not found", run_id)))?;

        let devices = self.repo.list_devices(run.job_id).await?;
        if devices.is_empty() {
            info!(run_id = run_id, "No devices in job; completing run");
            self.repo.set_run_status(run_id, RunStatus::Completed).await?;
            return Ok(());
        }

        let parallelism = run.parallelism.clamp(1, MAX_PARALLELISM) as usize;
        info!(
            run_id = run_id,
            devices = devices.len(),
            parallelism = parallelism,
            "Fanning out bootstrap workers"
        );

        // Materialize every per-device record up front so observers see the
        // full PENDING set immediately.
        for device in &devices {
            self.repo.begin_run_device(run_id, device.id).await?;
        }

        let semaphore = Arc::new(Semaphore::new(parallelism));
        let mut handles = Vec::with_capacity(devices.len());

        for device in devices {
            let semaphore = Arc::clone(&semaphore);
            let repo = Arc::clone(&self.repo);
            let transports = Arc::clone(&self.transports);
            let cancel = Arc::clone(&cancel);

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                let mut runner =
                    BootstrapRunner::new(repo, transports, run_id, device.id, cancel);
                runner.run().await;
            }));
        }

        for handle in handles {
            if let Err(err) = handle.await {
                warn!(run_id = run_id, error = %err, "Bootstrap worker panicked");
            }
        }

        // A panicked worker can leave its row short of a terminal state; the
        // run status must never claim every device terminated when one did
        // not. Force stragglers to FAILED so the records stay consistent.
        let mut all_terminated = true;
        for rd in self.repo.list_run_devices(run_id).await? {
            if !rd.status.is_terminal() {
                all_terminated = false;
                warn!(
                    run_id = run_id,
                    device_id = rd.device_id,
                    status = %rd.status,
                    "Worker exited without a terminal run-device status"
                );
                self.repo
                    .set_run_device_status(
                        run_id,
                        rd.device_id,
                        RunDeviceStatus::Failed,
                        RunDeviceUpdate {
                            error_message: Some(
                                "Bootstrap worker exited unexpectedly".to_string(),
                            ),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }

        let status = if all_terminated {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        self.repo.set_run_status(run_id, status).await?;
        Ok(())
    }

    /// Flag a live run for cancellation. Workers observe the flag between
    /// commands and at block boundaries. Returns false when the run is not
    /// currently executing.
    pub fn cancel_run(&self, run_id: i64) -> bool {
        let flags = self.cancel_flags.lock();
        match flags.get(&run_id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    fn register(&self, run_id: i64) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.cancel_flags.lock().insert(run_id, Arc::clone(&flag));
        flag
    }

    fn unregister(&self, run_id: i64) {
        self.cancel_flags.lock().remove(&run_id);
    }
}
