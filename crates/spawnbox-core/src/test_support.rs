//! Recording mock backend for lifecycle tests
//!
//! Scripts status replies, optionally fails the launcher immediately,
//! and records every call so tests can assert ordering and counts.

use async_trait::async_trait;
use spawnbox_exec::{
    signals::HOST_DOWN_MARKER, CommandOutput, ExecError, LaunchConfig, MachineBackend,
    MachineStatus, Result, RunOptions,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Launch { machine: String },
    Run { machine: String, command: String },
    QueryStatus { machine: String },
    Terminate { machine: String },
}

pub struct MockBackend {
    calls: Mutex<Vec<BackendCall>>,
    /// Scripted status words; the last entry repeats once drained.
    status_script: Mutex<VecDeque<String>>,
    /// When set, launch() fails right away with this exit code and stderr.
    launch_failure: Option<(i32, String)>,
    /// Report the bus as down once terminate() has been seen.
    terminated: AtomicBool,
    run_exit_code: Mutex<i32>,
    run_stdout: Mutex<String>,
}

impl MockBackend {
    /// Backend whose launcher blocks forever and whose status script is
    /// the given sequence of words.
    pub fn with_statuses(words: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            status_script: Mutex::new(words.iter().map(|w| w.to_string()).collect()),
            launch_failure: None,
            terminated: AtomicBool::new(false),
            run_exit_code: Mutex::new(0),
            run_stdout: Mutex::new(String::new()),
        })
    }

    /// Backend whose launcher fails immediately.
    pub fn failing_launch(exit_code: i32, stderr: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            status_script: Mutex::new(VecDeque::new()),
            launch_failure: Some((exit_code, stderr.to_string())),
            terminated: AtomicBool::new(false),
            run_exit_code: Mutex::new(0),
            run_stdout: Mutex::new(String::new()),
        })
    }

    /// Script the outcome of in-machine command runs.
    pub fn set_run_result(&self, exit_code: i32, stdout: &str) {
        *self.run_exit_code.lock().unwrap() = exit_code;
        *self.run_stdout.lock().unwrap() = stdout.to_string();
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn terminate_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::Terminate { .. }))
            .count()
    }

    pub fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_status(&self) -> MachineStatus {
        if self.terminated.load(Ordering::SeqCst) {
            return MachineStatus::new(
                "",
                format!("Failed to connect to bus: {}", HOST_DOWN_MARKER),
            );
        }
        let mut script = self.status_script.lock().unwrap();
        let word = if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap_or_else(|| "offline".to_string())
        };
        MachineStatus::new(word, String::new())
    }
}

#[async_trait]
impl MachineBackend for MockBackend {
    async fn launch(&self, config: &LaunchConfig) -> Result<CommandOutput> {
        self.record(BackendCall::Launch {
            machine: config.machine.clone(),
        });
        if let Some((exit_code, stderr)) = &self.launch_failure {
            return Err(ExecError::CommandFailed {
                command: format!("systemd-nspawn --machine={}", config.machine),
                exit_code: *exit_code,
                stdout: String::new(),
                stderr: stderr.clone(),
            });
        }
        // A healthy launcher runs for the container's whole life.
        std::future::pending::<()>().await;
        unreachable!("pending launcher resumed")
    }

    async fn run(&self, machine: &str, command: &str, opts: &RunOptions) -> Result<CommandOutput> {
        self.record(BackendCall::Run {
            machine: machine.to_string(),
            command: command.to_string(),
        });
        let exit_code = *self.run_exit_code.lock().unwrap();
        let stdout = self.run_stdout.lock().unwrap().clone();
        if opts.check && exit_code != 0 {
            return Err(ExecError::CommandFailed {
                command: command.to_string(),
                exit_code,
                stdout,
                stderr: String::new(),
            });
        }
        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr: String::new(),
        })
    }

    async fn query_status(&self, machine: &str) -> Result<MachineStatus> {
        self.record(BackendCall::QueryStatus {
            machine: machine.to_string(),
        });
        Ok(self.next_status())
    }

    async fn terminate(&self, machine: &str) -> Result<()> {
        self.record(BackendCall::Terminate {
            machine: machine.to_string(),
        });
        self.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }
}
