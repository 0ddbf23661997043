// src/server/process.rs
use crate::config::{RuntimeConfig, TerminationPolicy};
use crate::error::{Error, Result};
use crate::planner::ResourcePlan;
use crate::server::output::{self, OutputBuffer, Stream};
use crate::server::probe::{self, Delivery};
use crate::server::record::ProcessRecord;
use crate::workspace::ARTIFACT_FILE;
use async_process::{Child, Command, Stdio};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;

// Bound on collecting the last output of a child that already exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

// Bound on reaping a child killed because its record could not be written.
const ABORT_SPAWN_TIMEOUT: Duration = Duration::from_secs(5);

/// State of a process handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HandleState {
    /// Nothing spawned yet
    Unstarted,
    /// Spawned, inside the startup confirmation window
    Launching,
    /// Survived the confirmation window, or re-acquired from a record
    Running,
    /// Exited on its own
    Exited,
    /// Terminated by this manager
    Killed,
}

/// Program and arguments used to launch a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Heap bounds, tuning flags, configured extra flags, the artifact
    /// reference and the server arguments, in that order. The artifact is
    /// referenced relative to the workspace, which is the working directory.
    pub fn build(runtime: &RuntimeConfig, plan: &ResourcePlan) -> Self {
        let mut args = plan.runtime_args();
        args.extend(runtime.extra_flags.iter().cloned());
        args.push("-jar".to_string());
        args.push(ARTIFACT_FILE.to_string());
        args.extend(runtime.server_args.iter().cloned());

        Self::new(runtime.executable.clone(), args)
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Result of a stop request that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StopOutcome {
    /// The process was signalled and the OS confirmed it is gone.
    Stopped { pid: u32, stopped_at: DateTime<Utc> },
    /// A record existed but its process had already exited.
    AlreadyStopped { pid: u32, stopped_at: DateTime<Utc> },
    /// Nothing was recorded for the server.
    NotRunning,
    /// The record was unreadable and has been removed. Whatever process it
    /// described was not signalled.
    RecordCleared { reason: String },
}

/// One spawned (or re-acquired) server process.
///
/// A handle created with [`ProcessHandle::new`] owns the child it spawns:
/// it can reap it and read its output. A handle created with
/// [`ProcessHandle::reacquire`] only knows the persisted record and works
/// through the OS process id.
///
/// Dropping a handle that is still inside its startup window kills the
/// child; its record is left behind and cleaned up by the next status or
/// start call.
pub struct ProcessHandle {
    name: String,
    record_path: PathBuf,
    record: Option<ProcessRecord>,
    child: Option<Child>,
    state: HandleState,
    output: OutputBuffer,
    readers: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    pub fn new(name: impl Into<String>, record_path: impl Into<PathBuf>, output_lines: usize) -> Self {
        Self {
            name: name.into(),
            record_path: record_path.into(),
            record: None,
            child: None,
            state: HandleState::Unstarted,
            output: OutputBuffer::new(output_lines),
            readers: Vec::new(),
        }
    }

    /// Builds a handle from a persisted record, for a process this handle
    /// did not spawn.
    pub fn reacquire(
        name: impl Into<String>,
        record_path: impl Into<PathBuf>,
        record: ProcessRecord,
    ) -> Self {
        Self {
            name: name.into(),
            record_path: record_path.into(),
            record: Some(record),
            child: None,
            state: HandleState::Running,
            output: OutputBuffer::new(1),
            readers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.record.as_ref().map(|r| r.pid)
    }

    pub fn record(&self) -> Option<&ProcessRecord> {
        self.record.as_ref()
    }

    /// Whether this handle owns the child process itself.
    pub fn is_owned(&self) -> bool {
        self.child.is_some()
    }

    /// Most recent output lines of the child, oldest first.
    pub fn output(&self) -> Vec<String> {
        self.output.snapshot()
    }

    /// Spawns the child and persists its record before returning.
    ///
    /// Must be called inside a Tokio runtime: output capture runs on
    /// spawned tasks.
    #[tracing::instrument(skip(self, command, working_dir), fields(server_name = %self.name))]
    pub async fn spawn(&mut self, command: &LaunchCommand, working_dir: &Path) -> Result<ProcessRecord> {
        if self.state != HandleState::Unstarted {
            return Err(Error::AlreadyRunning {
                name: self.name.clone(),
                pid: self.pid().unwrap_or_default(),
            });
        }

        tracing::info!(command = %command, cwd = %working_dir.display(), "Spawning server process");

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            tracing::error!(error = %e, "OS refused to create the process");
            Error::SpawnFailed {
                name: self.name.clone(),
                reason: e.to_string(),
                output: Vec::new(),
            }
        })?;

        let pid = child.id();
        self.state = HandleState::Launching;

        if let Some(stdout) = child.stdout.take() {
            self.readers.push(output::capture(
                self.name.clone(),
                Stream::Stdout,
                stdout,
                self.output.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            self.readers.push(output::capture(
                self.name.clone(),
                Stream::Stderr,
                stderr,
                self.output.clone(),
            ));
        }

        let record = ProcessRecord::new(&self.name, pid);
        if let Err(e) = record.store(&self.record_path) {
            tracing::error!(pid, error = %e, "Could not persist process record, killing child");
            self.state = HandleState::Killed;
            let _ = child.kill();
            let _ = tokio::time::timeout(ABORT_SPAWN_TIMEOUT, child.status()).await;
            self.drain_output().await;
            return Err(Error::SpawnFailed {
                name: self.name.clone(),
                reason: format!("failed to persist process record: {}", e),
                output: self.output.snapshot(),
            });
        }

        tracing::debug!(pid, record = %self.record_path.display(), "Process record saved");
        self.child = Some(child);
        self.record = Some(record.clone());
        Ok(record)
    }

    /// Races process exit against `window`.
    ///
    /// An exit inside the window is a startup crash and carries the
    /// captured output; a process still alive when the window elapses is
    /// running in the background. Slow or silent startup is never a crash.
    #[tracing::instrument(skip(self), fields(server_name = %self.name))]
    pub async fn confirm_startup(&mut self, window: Duration) -> Result<()> {
        if self.state != HandleState::Launching {
            return Err(Error::NotRunning(format!(
                "'{}' is not launching (state {:?})",
                self.name, self.state
            )));
        }
        let Some(child) = self.child.as_mut() else {
            return Err(Error::NotRunning(self.name.clone()));
        };

        let exited = tokio::select! {
            status = child.status() => Some(status),
            _ = tokio::time::sleep(window) => None,
        };

        let Some(status) = exited else {
            self.state = HandleState::Running;
            tracing::info!(pid = ?self.pid(), "Server running in background");
            return Ok(());
        };

        let exit_code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read exit status");
                None
            }
        };
        self.child = None;
        self.state = HandleState::Exited;
        self.drain_output().await;
        let output = self.output.snapshot();
        tracing::error!(?exit_code, lines = output.len(), "Server exited during startup");
        self.clear_record()?;

        Err(Error::StartupCrashed {
            name: self.name.clone(),
            exit_code,
            output,
        })
    }

    /// Non-blocking liveness probe. Does not change the handle state.
    pub fn is_alive(&mut self) -> bool {
        if let Some(child) = self.child.as_mut() {
            match child.try_status() {
                Ok(None) => return true,
                Ok(Some(_)) => return false,
                Err(e) => {
                    tracing::debug!(error = %e, "try_status failed, probing by pid");
                }
            }
        }

        match &self.record {
            Some(record) => probe::is_alive(record.pid, Some(record.started_at)),
            None => false,
        }
    }

    /// Terminates the process and deletes its record once the OS confirms
    /// it is gone.
    ///
    /// With [`TerminationPolicy::Force`] the process is killed outright.
    /// An id that no longer names a live process is reported as
    /// [`StopOutcome::AlreadyStopped`]. If the process cannot be signalled
    /// or outlives `timeout`, the record is kept and
    /// [`Error::TerminationFailed`] is returned.
    #[tracing::instrument(skip(self), fields(server_name = %self.name))]
    pub async fn terminate(
        &mut self,
        policy: TerminationPolicy,
        timeout: Duration,
    ) -> Result<StopOutcome> {
        let Some(pid) = self.pid() else {
            return Ok(StopOutcome::NotRunning);
        };

        if !self.is_alive() {
            tracing::info!(pid, "Process already gone");
            self.finish(HandleState::Exited).await?;
            return Ok(StopOutcome::AlreadyStopped {
                pid,
                stopped_at: Utc::now(),
            });
        }

        if let TerminationPolicy::Graceful { grace_period_ms } = policy {
            let grace = Duration::from_millis(grace_period_ms);
            match probe::request_shutdown(pid) {
                Ok(Delivery::Sent) => {
                    tracing::info!(pid, ?grace, "Requested shutdown");
                    if self.wait_for_exit(grace).await {
                        self.finish(HandleState::Killed).await?;
                        return Ok(StopOutcome::Stopped {
                            pid,
                            stopped_at: Utc::now(),
                        });
                    }
                    tracing::warn!(pid, "Grace period elapsed, killing");
                }
                Ok(Delivery::Gone) => {
                    self.finish(HandleState::Exited).await?;
                    return Ok(StopOutcome::AlreadyStopped {
                        pid,
                        stopped_at: Utc::now(),
                    });
                }
                Err(reason) => {
                    tracing::warn!(pid, %reason, "Shutdown request failed, killing");
                }
            }
        }

        let delivery = match self.child.as_mut() {
            Some(child) => match child.kill() {
                Ok(()) => Ok(Delivery::Sent),
                Err(e) => Err(e.to_string()),
            },
            None => probe::kill(pid),
        };

        match delivery {
            Ok(Delivery::Sent) => tracing::info!(pid, "Sent kill signal"),
            Ok(Delivery::Gone) => {
                self.finish(HandleState::Exited).await?;
                return Ok(StopOutcome::AlreadyStopped {
                    pid,
                    stopped_at: Utc::now(),
                });
            }
            Err(reason) => {
                if !self.is_alive() {
                    self.finish(HandleState::Exited).await?;
                    return Ok(StopOutcome::AlreadyStopped {
                        pid,
                        stopped_at: Utc::now(),
                    });
                }
                tracing::error!(pid, %reason, "Could not signal process");
                return Err(Error::TerminationFailed {
                    name: self.name.clone(),
                    pid,
                    reason,
                });
            }
        }

        if !self.wait_for_exit(timeout).await {
            tracing::error!(pid, ?timeout, "Process survived kill signal");
            return Err(Error::TerminationFailed {
                name: self.name.clone(),
                pid,
                reason: format!("still alive {:?} after kill signal", timeout),
            });
        }

        self.finish(HandleState::Killed).await?;
        let stopped_at = Utc::now();
        tracing::info!(pid, "Server process terminated");
        Ok(StopOutcome::Stopped { pid, stopped_at })
    }

    async fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        if let Some(child) = self.child.as_mut() {
            match tokio::time::timeout(timeout, child.status()).await {
                Ok(Ok(_)) => return true,
                Ok(Err(e)) => tracing::debug!(error = %e, "Waiting on child failed, probing by pid"),
                Err(_) => return false,
            }
        }

        match &self.record {
            Some(record) => probe::wait_for_exit(record.pid, Some(record.started_at), timeout).await,
            None => true,
        }
    }

    async fn finish(&mut self, state: HandleState) -> Result<()> {
        self.child = None;
        self.state = state;
        self.drain_output().await;
        self.clear_record()
    }

    async fn drain_output(&mut self) {
        let readers = std::mem::take(&mut self.readers);
        if readers.is_empty() {
            return;
        }

        let drained = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, async {
            for reader in readers {
                let _ = reader.await;
            }
        })
        .await;

        if drained.is_err() {
            tracing::debug!("Output pipes still open after exit, detaching readers");
        }
    }

    // Only deletes the file if it still describes this handle's launch.
    fn clear_record(&mut self) -> Result<()> {
        let Some(record) = self.record.take() else {
            return Ok(());
        };

        match ProcessRecord::load(&self.record_path) {
            Ok(Some(on_disk)) if on_disk.launch_id != record.launch_id => {
                tracing::warn!(
                    launch_id = %on_disk.launch_id,
                    "Process record belongs to another launch, leaving it"
                );
                Ok(())
            }
            _ => {
                ProcessRecord::remove(&self.record_path)?;
                tracing::debug!(pid = record.pid, "Process record removed");
                Ok(())
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.state != HandleState::Launching {
            return;
        }
        if let Some(child) = self.child.as_mut() {
            tracing::warn!(
                server = %self.name,
                pid = child.id(),
                "Start abandoned after spawn, killing child"
            );
            let _ = child.kill();
        }
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("record", &self.record)
            .field("owned", &self.child.is_some())
            .finish()
    }
}
