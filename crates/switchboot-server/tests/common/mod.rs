#![allow(dead_code)]

use parking_lot::Mutex;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use switchboot_core::models::{NewDevice, NewJob};
use switchboot_core::serial::{ReadOutcome, Transport, TransportFactory};
use switchboot_core::CoreError;
use switchboot_server::storage::{Repository, SqliteRepository};

pub async fn memory_repo() -> Arc<dyn Repository> {
    Arc::new(
        SqliteRepository::new("sqlite::memory:")
            .await
            .expect("in-memory sqlite"),
    )
}

pub fn new_device(hostname: &str, ip: &str, port: Option<u8>, vendor: Option<&str>) -> NewDevice {
    NewDevice {
        port,
        vendor: vendor.map(str::to_string),
        model: None,
        hostname: hostname.to_string(),
        mgmt_ip: ip.to_string(),
        mask: "/24".to_string(),
        gateway: "10.0.0.254".to_string(),
        mgmt_vlan: None,
        status: "pending".to_string(),
    }
}

pub async fn seed_job(repo: &Arc<dyn Repository>, name: &str) -> i64 {
    repo.create_job(&NewJob {
        name: name.to_string(),
        customer: None,
    })
    .await
    .expect("create job")
    .id
}

/// One scripted response from the fake device.
#[derive(Debug, Clone)]
pub enum Step {
    /// Read completes with this output and the prompt found.
    Prompt(&'static str),
    /// Read times out, returning this partial output.
    Timeout(&'static str),
}

#[derive(Default)]
pub struct Counters {
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub opened: AtomicUsize,
}

/// Transport that replays a script instead of touching hardware. Reads pop
/// queued steps first, then fall back to command-matched rules, then to a
/// clean default prompt.
pub struct ScriptedTransport {
    steps: VecDeque<Step>,
    rules: Vec<(&'static str, Step)>,
    default_output: &'static str,
    delay: Duration,
    last_line: String,
    counters: Option<Arc<Counters>>,
    open: bool,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            rules: Vec::new(),
            default_output: "sw1#",
            delay: Duration::ZERO,
            last_line: String::new(),
            counters: None,
            open: false,
        }
    }
}

impl Transport for ScriptedTransport {
    fn open(&mut self) -> Result<(), CoreError> {
        self.open = true;
        if let Some(counters) = &self.counters {
            counters.opened.fetch_add(1, Ordering::SeqCst);
            let now = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
            counters.max_active.fetch_max(now, Ordering::SeqCst);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), CoreError> {
        if self.open {
            self.open = false;
            if let Some(counters) = &self.counters {
                counters.active.fetch_sub(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn send_line(&mut self, line: &str) -> Result<(), CoreError> {
        self.last_line = line.to_string();
        Ok(())
    }

    fn read_until_prompt(
        &mut self,
        _prompt: &Regex,
        _timeout: Option<Duration>,
    ) -> Result<ReadOutcome, CoreError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let step = self.steps.pop_front().or_else(|| {
            self.rules
                .iter()
                .find(|(pattern, _)| self.last_line.contains(pattern))
                .map(|(_, step)| step.clone())
        });

        Ok(match step {
            Some(Step::Prompt(output)) => ReadOutcome {
                output: output.to_string(),
                timed_out: false,
            },
            Some(Step::Timeout(output)) => ReadOutcome {
                output: output.to_string(),
                timed_out: true,
            },
            None => ReadOutcome {
                output: self.default_output.to_string(),
                timed_out: false,
            },
        })
    }

    fn flush_buffers(&mut self) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Factory handing out scripted transports. The queued scripts apply to
/// successive `create` calls; later calls get an unscripted transport that
/// always answers with a clean prompt.
pub struct MockTransportFactory {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    rules: Vec<(&'static str, Step)>,
    delay: Duration,
    pub counters: Arc<Counters>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            rules: Vec::new(),
            delay: Duration::ZERO,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn with_script(steps: Vec<Step>) -> Self {
        let factory = Self::new();
        factory.scripts.lock().push_back(steps);
        factory
    }

    pub fn with_rule(mut self, command_fragment: &'static str, step: Step) -> Self {
        self.rules.push((command_fragment, step));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, _port: u8) -> Result<Box<dyn Transport>, CoreError> {
        let steps = self.scripts.lock().pop_front().unwrap_or_default();
        let mut transport = ScriptedTransport::new(steps);
        transport.rules = self.rules.clone();
        transport.delay = self.delay;
        transport.counters = Some(Arc::clone(&self.counters));
        Ok(Box::new(transport))
    }
}
