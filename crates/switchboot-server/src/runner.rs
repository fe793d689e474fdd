use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use switchboot_core::models::{ErrorCode, LogLevel, NewEvent, RunDeviceStatus};
use switchboot_core::serial::{default_prompt, ReadOutcome, Transport, TransportFactory};
use switchboot_core::vendor_error_patterns::check_for_errors;
use switchboot_core::vendors::{vendor_for, VendorAdapter};
use switchboot_core::{render_command_stream, template_hash, CoreError};

use crate::error::ServerError;
use crate::storage::{Repository, RunDeviceUpdate};

/// Drives one device through connect -> detect -> configure -> verify -> save,
/// writing every event and the final status through the repository. One
/// instance per (run, device); the serial session it opens is owned
/// exclusively and released on every exit path.
pub struct BootstrapRunner {
    repo: Arc<dyn Repository>,
    transports: Arc<dyn TransportFactory>,
    run_id: i64,
    device_id: i64,
    cancel: Arc<AtomicBool>,
    port: Option<u8>,
    transport: Option<Box<dyn Transport>>,
}

impl BootstrapRunner {
    pub fn new(
        repo: Arc<dyn Repository>,
        transports: Arc<dyn TransportFactory>,
        run_id: i64,
        device_id: i64,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            repo,
            transports,
            run_id,
            device_id,
            cancel,
            port: None,
            transport: None,
        }
    }

    /// Run the device to a terminal status. Errors are absorbed into the
    /// run-device record and the event log; siblings are never affected.
    pub async fn run(&mut self) {
        if let Err(err) = self.execute().await {
            let code = classify_error(&err);
            let message = err.to_string();
            error!(
                run_id = self.run_id,
                device_id = self.device_id,
                error = %message,
                "Bootstrap execution error"
            );
            let _ = self
                .log_event(
                    LogLevel::Error,
                    format!("Execution error: {}", message),
                    None,
                    Some(code),
                )
                .await;
            let _ = self.finish_failed(&message, Some(code)).await;
        }
        self.close_transport().await;
    }

    async fn execute(&mut self) -> Result<(), ServerError> {
        let Some(device) = self.repo.get_device(self.device_id).await? else {
            self.log_event(LogLevel::Error, "Device not found", None, None)
                .await?;
            return self
                .finish_failed("Device not found", Some(ErrorCode::ValidationError))
                .await;
        };
        self.port = device.port;

        let Some(port) = device.port else {
            self.log_event(
                LogLevel::Error,
                "Device has no console port assigned",
                None,
                Some(ErrorCode::ValidationError),
            )
            .await?;
            return self
                .finish_failed(
                    "Device has no console port assigned",
                    Some(ErrorCode::ValidationError),
                )
                .await;
        };

        let vendor = vendor_for(device.vendor.as_deref().unwrap_or("generic"));

        self.repo
            .set_run_device_status(
                self.run_id,
                self.device_id,
                RunDeviceStatus::Running,
                RunDeviceUpdate::default(),
            )
            .await?;
        self.log_event(
            LogLevel::Info,
            format!("Connecting to port{} as {}", port, vendor.vendor_id()),
            None,
            None,
        )
        .await?;

        self.transport = Some(self.transports.create(port)?);
        self.with_transport(|t| t.open()).await?;

        // Prove the remote end is sitting at an interactive prompt before
        // sending any configuration.
        self.log_event(LogLevel::Info, "Synchronizing prompt...", None, None)
            .await?;
        let sync = self.exchange(String::new()).await?;
        if sync.timed_out {
            self.log_event(
                LogLevel::Error,
                format!("No prompt detected on port{}", port),
                Some(sync.output),
                Some(ErrorCode::PromptNotFound),
            )
            .await?;
            return self
                .finish_failed(
                    &format!("No prompt detected on port{}", port),
                    Some(ErrorCode::PromptNotFound),
                )
                .await;
        }
        self.log_event(
            LogLevel::Debug,
            "Initial prompt detected",
            Some(sync.output),
            None,
        )
        .await?;

        let params = device.bootstrap_params();
        let blocks = match vendor.bootstrap_commands(&params) {
            Ok(blocks) => blocks,
            Err(err) => {
                self.log_event(
                    LogLevel::Error,
                    format!("Template rendering failed: {}", err),
                    None,
                    Some(ErrorCode::TemplateError),
                )
                .await?;
                return self
                    .finish_failed(&err.to_string(), Some(ErrorCode::TemplateError))
                    .await;
            }
        };

        // Persist what we are about to apply before the first command goes
        // out, so partial failures remain attributable.
        let hash = template_hash(&render_command_stream(&blocks));
        self.repo
            .set_run_device_status(
                self.run_id,
                self.device_id,
                RunDeviceStatus::Running,
                RunDeviceUpdate {
                    template_hash: Some(hash.clone()),
                    ..Default::default()
                },
            )
            .await?;

        self.log_event(
            LogLevel::Info,
            format!(
                "Applying {} configuration blocks (hash: {})...",
                blocks.len(),
                hash
            ),
            None,
            None,
        )
        .await?;

        for block in &blocks {
            if self.cancelled() {
                return self.finish_cancelled().await;
            }
            self.log_event(
                LogLevel::Info,
                format!("Running block: {}", block.name),
                None,
                None,
            )
            .await?;

            for command in &block.commands {
                if command.trim().is_empty() {
                    continue;
                }
                if self.cancelled() {
                    return self.finish_cancelled().await;
                }

                let outcome = self.exchange(command.clone()).await?;
                if outcome.timed_out {
                    self.log_event(
                        LogLevel::Error,
                        format!("Serial timeout on command: {}", command),
                        Some(outcome.output),
                        Some(ErrorCode::SerialTimeout),
                    )
                    .await?;
                    return self
                        .finish_failed(
                            &format!("Timeout on {}", command),
                            Some(ErrorCode::SerialTimeout),
                        )
                        .await;
                }

                if let Some(marker) = check_for_errors(&outcome.output) {
                    debug!(
                        run_id = self.run_id,
                        device_id = self.device_id,
                        marker = %marker,
                        "Vendor error marker in transcript"
                    );
                    self.log_event(
                        LogLevel::Error,
                        format!("Command failed: {}", command),
                        Some(outcome.output),
                        Some(ErrorCode::CommandError),
                    )
                    .await?;
                    if block.critical {
                        return self
                            .finish_failed(
                                &format!("Critical Error in {}: {}", block.name, command),
                                Some(ErrorCode::CommandError),
                            )
                            .await;
                    }
                    self.log_event(
                        LogLevel::Warning,
                        format!("Ignoring non-critical error in {}", block.name),
                        None,
                        None,
                    )
                    .await?;
                } else {
                    self.log_event(
                        LogLevel::Debug,
                        format!("Output for: {}", command),
                        Some(outcome.output),
                        None,
                    )
                    .await?;
                }
            }
        }

        if self.cancelled() {
            return self.finish_cancelled().await;
        }

        self.log_event(LogLevel::Info, "Verifying configuration...", None, None)
            .await?;
        let mut transcript = String::new();
        for command in vendor.verify_commands(&params) {
            let outcome = self.exchange(command.clone()).await?;
            if outcome.timed_out {
                self.log_event(
                    LogLevel::Error,
                    format!("Serial timeout on command: {}", command),
                    Some(outcome.output),
                    Some(ErrorCode::SerialTimeout),
                )
                .await?;
                return self
                    .finish_failed(
                        &format!("Timeout on {}", command),
                        Some(ErrorCode::SerialTimeout),
                    )
                    .await;
            }
            transcript.push_str(&outcome.output);
        }

        let report = vendor.parse_verify(&transcript, &params);
        if !report.success {
            self.log_event(
                LogLevel::Error,
                format!("Verification failed: {}", report.details),
                Some(transcript),
                Some(ErrorCode::VerifyFailed),
            )
            .await?;
            self.repo
                .set_run_device_status(
                    self.run_id,
                    self.device_id,
                    RunDeviceStatus::Failed,
                    RunDeviceUpdate {
                        error_message: Some(format!("Verification failed: {}", report.details)),
                        error_code: Some(ErrorCode::VerifyFailed.as_str().to_string()),
                        tasks: Some(report.tasks),
                        ..Default::default()
                    },
                )
                .await?;
            return Ok(());
        }

        self.log_event(
            LogLevel::Info,
            format!("Verification successful: {}", report.details),
            None,
            None,
        )
        .await?;
        self.repo
            .set_run_device_status(
                self.run_id,
                self.device_id,
                RunDeviceStatus::Verified,
                RunDeviceUpdate {
                    tasks: Some(report.tasks),
                    ..Default::default()
                },
            )
            .await?;

        // The configuration is already applied and verified; save-phase
        // problems are logged but never revert VERIFIED.
        self.log_event(LogLevel::Info, "Saving configuration...", None, None)
            .await?;
        self.run_save_phase(vendor, &params).await?;

        Ok(())
    }

    async fn run_save_phase(
        &mut self,
        vendor: &'static dyn VendorAdapter,
        params: &switchboot_core::models::BootstrapParams,
    ) -> Result<(), ServerError> {
        for command in vendor.save_commands(params) {
            match self.exchange(command.clone()).await {
                Ok(outcome) => {
                    if outcome.timed_out || check_for_errors(&outcome.output).is_some() {
                        warn!(
                            run_id = self.run_id,
                            device_id = self.device_id,
                            command = %command,
                            "Save command reported a problem"
                        );
                        self.log_event(
                            LogLevel::Warning,
                            format!("Save command '{}' reported a problem", command),
                            Some(outcome.output),
                            None,
                        )
                        .await?;
                    }
                }
                Err(err) => {
                    self.log_event(
                        LogLevel::Warning,
                        format!("Save command '{}' failed: {}", command, err),
                        None,
                        None,
                    )
                    .await?;
                    break;
                }
            }
        }
        Ok(())
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    async fn finish_cancelled(&mut self) -> Result<(), ServerError> {
        self.log_event(LogLevel::Warning, "Run cancelled by operator", None, None)
            .await?;
        self.finish_failed("cancelled", None).await
    }

    async fn finish_failed(
        &mut self,
        message: &str,
        code: Option<ErrorCode>,
    ) -> Result<(), ServerError> {
        self.repo
            .set_run_device_status(
                self.run_id,
                self.device_id,
                RunDeviceStatus::Failed,
                RunDeviceUpdate {
                    error_message: Some(message.to_string()),
                    error_code: code.map(|c| c.as_str().to_string()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    async fn log_event(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        raw: Option<String>,
        code: Option<ErrorCode>,
    ) -> Result<(), ServerError> {
        self.repo
            .append_event(&NewEvent {
                run_id: self.run_id,
                device_id: Some(self.device_id),
                port: self.port,
                level,
                message: message.into(),
                raw,
                error_code: code.map(|c| c.as_str().to_string()),
            })
            .await?;
        Ok(())
    }

    /// Send one line and read back to the prompt. The blocking serial calls
    /// run on the blocking thread pool so the control surface is never
    /// starved.
    async fn exchange(&mut self, command: String) -> Result<ReadOutcome, ServerError> {
        self.with_transport(move |t| {
            t.send_line(&command)?;
            t.read_until_prompt(default_prompt(), None)
        })
        .await
    }

    async fn with_transport<T, F>(&mut self, op: F) -> Result<T, ServerError>
    where
        F: FnOnce(&mut dyn Transport) -> Result<T, CoreError> + Send + 'static,
        T: Send + 'static,
    {
        let mut transport = self
            .transport
            .take()
            .ok_or_else(|| ServerError::Internal("serial session not open".to_string()))?;
        let (transport, result) = tokio::task::spawn_blocking(move || {
            let result = op(transport.as_mut());
            (transport, result)
        })
        .await
        .map_err(|e| ServerError::Internal(format!("serial worker panicked: {}", e)))?;
        self.transport = Some(transport);
        result.map_err(ServerError::from)
    }

    async fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            let _ = tokio::task::spawn_blocking(move || transport.close()).await;
        }
    }
}

// Maps an unexpected failure onto the closed error-code set by its text, the
// same way the dialog layer classifies transport exceptions.
fn classify_error(err: &ServerError) -> ErrorCode {
    let text = err.to_string().to_lowercase();
    if text.contains("timeout") {
        ErrorCode::SerialTimeout
    } else if text.contains("prompt") {
        ErrorCode::PromptNotFound
    } else {
        ErrorCode::CommandError
    }
}
