use crate::config::{LifecycleConfig, RuntimeConfig};
use crate::error::{Error, Result};
use crate::host::HostResources;
use crate::planner::{self, HeapRequest, ResourcePlan};
use crate::server::process::{LaunchCommand, ProcessHandle, StopOutcome};
use crate::server::record::{LaunchId, ProcessRecord};
use crate::workspace::{Workspace, Workspaces, guard};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const MAX_EVENTS: usize = 1000;

/// Server lifecycle event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServerLifecycleEvent {
    /// Server started
    Started,
    /// Server stopped
    Stopped,
    /// Server failed to start, or could not be stopped
    Failed,
    /// Server restarted
    Restarted,
}

/// Server lifecycle event
#[derive(Debug, Clone, Serialize)]
pub struct ServerEvent {
    /// Server name
    pub name: String,
    /// Event type
    pub event: ServerLifecycleEvent,
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    /// Event details
    pub details: Option<String>,
}

/// Observed status of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServerStatus {
    /// A live process is recorded for the server
    Running,
    /// Nothing is recorded for the server
    Stopped,
    /// A record existed but its process is gone or the record was
    /// unreadable. The record has been cleared; treat as stopped.
    Unknown,
}

/// Successful start of a server.
#[derive(Debug, Clone, Serialize)]
pub struct StartReport {
    pub name: String,
    pub pid: u32,
    pub launch_id: LaunchId,
    pub started_at: DateTime<Utc>,
    /// Plan used for the launch, including any clamp warning.
    pub plan: ResourcePlan,
    pub command: LaunchCommand,
}

/// Successful restart of a server.
#[derive(Debug, Clone, Serialize)]
pub struct RestartReport {
    /// Result of the stop half. `NotRunning` when nothing was running.
    pub stopped: StopOutcome,
    pub started: StartReport,
}

type Slot = Arc<tokio::sync::Mutex<Option<ProcessHandle>>>;

/// Server lifecycle manager
///
/// Owns the in-memory handles of the servers it started and serializes
/// start/stop/restart/rename per server name: calls for the same name run
/// one after another, calls for different names run concurrently. Status
/// queries never wait behind them.
///
/// The process record in each workspace is the source of truth. The
/// in-memory handles are a cache; every path works without them, so a new
/// manager can stop or query servers started by a previous one.
///
/// # Examples
///
/// ```no_run
/// use moonlight::config::Config;
/// use moonlight::host::SystemHost;
/// use moonlight::server::LifecycleManager;
/// use moonlight::workspace::Workspaces;
/// use std::sync::Arc;
///
/// # async fn run() -> moonlight::Result<()> {
/// let config = Config::default();
/// let manager = LifecycleManager::new(
///     Workspaces::new(&config.paths),
///     Arc::new(SystemHost::new()),
///     config.runtime.clone(),
///     config.lifecycle.clone(),
/// );
///
/// let report = manager.start("survival", None).await?;
/// println!("started pid {}", report.pid);
/// manager.stop("survival").await?;
/// # Ok(())
/// # }
/// ```
pub struct ServerLifecycleManager {
    workspaces: Workspaces,
    host: Arc<dyn HostResources>,
    runtime: RuntimeConfig,
    settings: LifecycleConfig,
    /// Per-name handle slots
    slots: Mutex<HashMap<String, Slot>>,
    /// Server events
    events: Mutex<Vec<ServerEvent>>,
}

/// Short name used throughout the crate.
pub type LifecycleManager = ServerLifecycleManager;

impl ServerLifecycleManager {
    /// Create a new server lifecycle manager
    pub fn new(
        workspaces: Workspaces,
        host: Arc<dyn HostResources>,
        runtime: RuntimeConfig,
        settings: LifecycleConfig,
    ) -> Self {
        Self {
            workspaces,
            host,
            runtime,
            settings,
            slots: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn workspaces(&self) -> &Workspaces {
        &self.workspaces
    }

    pub fn settings(&self) -> &LifecycleConfig {
        &self.settings
    }

    /// Starts the named server.
    ///
    /// Fails with [`Error::WorkspaceMissing`], [`Error::NotLaunchable`],
    /// [`Error::AlreadyRunning`] (a live process is already recorded),
    /// [`Error::SpawnFailed`] or [`Error::StartupCrashed`]. Returns once
    /// the process has survived the confirmation window.
    #[tracing::instrument(skip(self), fields(server_name = %name))]
    pub async fn start(&self, name: &str, request: Option<HeapRequest>) -> Result<StartReport> {
        let slot = self.slot(name)?;
        let mut handle = slot.lock().await;
        self.start_locked(name, request, &mut handle).await
    }

    /// Stops the named server.
    ///
    /// Returns [`StopOutcome::NotRunning`] when nothing is recorded and
    /// [`StopOutcome::RecordCleared`] when the record was unreadable. Uses
    /// the in-memory handle when this manager started the server, the
    /// persisted record otherwise.
    #[tracing::instrument(skip(self), fields(server_name = %name))]
    pub async fn stop(&self, name: &str) -> Result<StopOutcome> {
        let slot = self.slot(name)?;
        let mut handle = slot.lock().await;
        self.stop_locked(name, &mut handle).await
    }

    /// Stops the server (if running), waits the settle interval, then
    /// starts it again. Both halves run under the same per-name lock.
    #[tracing::instrument(skip(self), fields(server_name = %name))]
    pub async fn restart(&self, name: &str, request: Option<HeapRequest>) -> Result<RestartReport> {
        let slot = self.slot(name)?;
        let mut handle = slot.lock().await;

        let stopped = self.stop_locked(name, &mut handle).await?;
        if stopped == StopOutcome::NotRunning {
            tracing::debug!("Nothing to stop before restart");
        }

        let settle = self.settings.settle_interval();
        tracing::debug!(?settle, "Waiting for the previous process to release its resources");
        tokio::time::sleep(settle).await;

        let started = self.start_locked(name, request, &mut handle).await?;
        self.record_event(
            name,
            ServerLifecycleEvent::Restarted,
            Some(format!("pid {}", started.pid)),
        );
        Ok(RestartReport { stopped, started })
    }

    /// Current status of the named server.
    ///
    /// A record whose process is gone (or an unreadable record) is cleared
    /// and reported as [`ServerStatus::Unknown`], including for a server
    /// this manager started that has since exited on its own.
    ///
    /// Never waits for a start, stop, restart or rename of the same server. While
    /// one is in flight the answer comes from the persisted record alone,
    /// which is left for that operation to clean up.
    #[tracing::instrument(skip(self), fields(server_name = %name))]
    pub async fn status(&self, name: &str) -> Result<ServerStatus> {
        let workspace = self.workspaces.ensure_exists(name)?;
        let slot = self.slot(name)?;
        let Ok(mut handle) = slot.try_lock() else {
            tracing::debug!("Server is busy, answering from its record");
            return self.peek_record(&workspace);
        };

        if let Some(warm) = handle.as_mut() {
            if warm.is_alive() {
                return Ok(ServerStatus::Running);
            }
        }
        if let Some(mut exited) = handle.take() {
            tracing::warn!(pid = ?exited.pid(), "Server process exited on its own");
            let outcome = exited
                .terminate(self.settings.termination, self.settings.termination_timeout())
                .await?;
            self.record_event(name, ServerLifecycleEvent::Stopped, Some(format!("{:?}", outcome)));
            return Ok(match outcome {
                StopOutcome::NotRunning => ServerStatus::Stopped,
                _ => ServerStatus::Unknown,
            });
        }

        let record = match self.load_record(&workspace) {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(ServerStatus::Stopped),
            Err(Error::RecordCorrupt { path, reason }) => {
                tracing::warn!(path = %path.display(), %reason, "Clearing unreadable process record");
                ProcessRecord::remove(&path)?;
                return Ok(ServerStatus::Unknown);
            }
            Err(e) => return Err(e),
        };

        if ProcessHandle::reacquire(name, workspace.record_path(), record.clone()).is_alive() {
            return Ok(ServerStatus::Running);
        }
        tracing::warn!(pid = record.pid, "Recorded process is gone, clearing stale record");
        ProcessRecord::remove(&workspace.record_path())?;
        Ok(ServerStatus::Unknown)
    }

    /// Statuses of every workspace, sorted by name.
    pub async fn status_all(&self) -> Result<Vec<(String, ServerStatus)>> {
        let mut statuses = Vec::new();
        for name in self.workspaces.list()? {
            let status = self.status(&name).await?;
            statuses.push((name, status));
        }
        Ok(statuses)
    }

    /// Renames a server workspace. Refused with [`Error::AlreadyRunning`]
    /// while a live process is recorded for it.
    ///
    /// Holds the server's lock for the check and the move, so no start can
    /// land in between.
    #[tracing::instrument(skip(self))]
    pub async fn rename(&self, old_name: &str, new_name: &str) -> Result<Workspace> {
        let workspace = self.workspaces.ensure_exists(old_name)?;
        let slot = self.slot(old_name)?;
        let mut handle = slot.lock().await;

        if let Err(e) = self.refuse_if_running(&workspace, &mut handle) {
            tracing::warn!(error = %e, "Refusing to rename a running server");
            return Err(e);
        }
        self.workspaces.rename(old_name, new_name)
    }

    /// Diagnostic output captured from a server this manager started.
    pub async fn output(&self, name: &str) -> Result<Vec<String>> {
        let slot = self.slot(name)?;
        let handle = slot.lock().await;
        Ok(handle.as_ref().map(|h| h.output()).unwrap_or_default())
    }

    /// Get recent events for a server, newest first
    pub fn get_server_events(&self, name: &str, limit: Option<usize>) -> Result<Vec<ServerEvent>> {
        let events = self
            .events
            .lock()
            .map_err(|_| Error::Other("Failed to lock server events".to_string()))?;

        let mut server_events: Vec<ServerEvent> =
            events.iter().filter(|e| e.name == name).cloned().collect();
        server_events.reverse();

        if let Some(limit) = limit {
            server_events.truncate(limit);
        }

        Ok(server_events)
    }

    /// Get all events, newest first
    pub fn get_all_events(&self, limit: Option<usize>) -> Result<Vec<ServerEvent>> {
        let events = self
            .events
            .lock()
            .map_err(|_| Error::Other("Failed to lock server events".to_string()))?;

        let mut all_events = events.clone();
        all_events.reverse();

        if let Some(limit) = limit {
            all_events.truncate(limit);
        }

        Ok(all_events)
    }

    async fn start_locked(
        &self,
        name: &str,
        request: Option<HeapRequest>,
        slot: &mut Option<ProcessHandle>,
    ) -> Result<StartReport> {
        let workspace = self.workspaces.ensure_exists(name)?;
        self.refuse_if_running(&workspace, slot)?;

        guard::ensure(&workspace)?;

        let total_mb = self.host.total_memory_mb().await?;
        let plan = planner::plan(total_mb, request)?;
        if let Some(clamp) = plan.clamp {
            tracing::warn!(
                requested_max_mb = clamp.requested_max_mb,
                applied_max_mb = clamp.applied_max_mb,
                host_total_mb = total_mb,
                "Max heap reduced to fit host memory"
            );
        }

        let command = LaunchCommand::build(&self.runtime, &plan);
        let mut handle = ProcessHandle::new(
            name,
            workspace.record_path(),
            self.settings.output_buffer_lines,
        );

        let record = match handle.spawn(&command, workspace.root()).await {
            Ok(record) => record,
            Err(e) => {
                self.record_event(name, ServerLifecycleEvent::Failed, Some(e.to_string()));
                return Err(e);
            }
        };

        if let Err(e) = handle
            .confirm_startup(self.settings.confirmation_window())
            .await
        {
            self.record_event(name, ServerLifecycleEvent::Failed, Some(e.to_string()));
            return Err(e);
        }

        *slot = Some(handle);
        self.record_event(
            name,
            ServerLifecycleEvent::Started,
            Some(format!("pid {}", record.pid)),
        );
        tracing::info!(pid = record.pid, "Server started successfully");

        Ok(StartReport {
            name: name.to_string(),
            pid: record.pid,
            launch_id: record.launch_id,
            started_at: record.started_at,
            plan,
            command,
        })
    }

    async fn stop_locked(&self, name: &str, slot: &mut Option<ProcessHandle>) -> Result<StopOutcome> {
        let workspace = self.workspaces.ensure_exists(name)?;

        let mut handle = match slot.take() {
            Some(handle) => handle,
            None => match self.load_record(&workspace) {
                Ok(Some(record)) => {
                    tracing::debug!(pid = record.pid, "Re-acquiring process from record");
                    ProcessHandle::reacquire(name, workspace.record_path(), record)
                }
                Ok(None) => {
                    tracing::info!("No process recorded, nothing to stop");
                    return Ok(StopOutcome::NotRunning);
                }
                Err(Error::RecordCorrupt { path, reason }) => {
                    tracing::warn!(path = %path.display(), %reason, "Clearing unreadable process record");
                    ProcessRecord::remove(&path)?;
                    self.record_event(
                        name,
                        ServerLifecycleEvent::Stopped,
                        Some(format!("cleared unreadable record: {}", reason)),
                    );
                    return Ok(StopOutcome::RecordCleared { reason });
                }
                Err(e) => return Err(e),
            },
        };

        match handle
            .terminate(self.settings.termination, self.settings.termination_timeout())
            .await
        {
            Ok(outcome) => {
                self.record_event(name, ServerLifecycleEvent::Stopped, Some(format!("{:?}", outcome)));
                Ok(outcome)
            }
            Err(e) => {
                self.record_event(name, ServerLifecycleEvent::Failed, Some(e.to_string()));
                if handle.is_owned() {
                    *slot = Some(handle);
                }
                Err(e)
            }
        }
    }

    // Enforces at most one live process per workspace. Stale state is
    // cleared on the way.
    fn refuse_if_running(&self, workspace: &Workspace, slot: &mut Option<ProcessHandle>) -> Result<()> {
        if let Some(warm) = slot.as_mut() {
            if warm.is_alive() {
                return Err(Error::AlreadyRunning {
                    name: workspace.name().to_string(),
                    pid: warm.pid().unwrap_or_default(),
                });
            }
        }
        // An exited handle still owns its record; dropping it leaves the
        // record for the check below.
        *slot = None;

        match self.load_record(workspace) {
            Ok(Some(record)) => {
                if ProcessHandle::reacquire(workspace.name(), workspace.record_path(), record.clone())
                    .is_alive()
                {
                    return Err(Error::AlreadyRunning {
                        name: workspace.name().to_string(),
                        pid: record.pid,
                    });
                }
                tracing::warn!(pid = record.pid, "Clearing stale process record");
                ProcessRecord::remove(&workspace.record_path())
            }
            Ok(None) => Ok(()),
            Err(Error::RecordCorrupt { path, reason }) => {
                tracing::warn!(path = %path.display(), %reason, "Clearing unreadable process record");
                ProcessRecord::remove(&path)
            }
            Err(e) => Err(e),
        }
    }

    fn load_record(&self, workspace: &Workspace) -> Result<Option<ProcessRecord>> {
        ProcessRecord::load(&workspace.record_path())
    }

    // Read-only status for a server whose lock is held elsewhere.
    fn peek_record(&self, workspace: &Workspace) -> Result<ServerStatus> {
        let record = match self.load_record(workspace) {
            Ok(Some(record)) => record,
            Ok(None) | Err(Error::RecordCorrupt { .. }) => return Ok(ServerStatus::Stopped),
            Err(e) => return Err(e),
        };
        let alive = ProcessHandle::reacquire(workspace.name(), workspace.record_path(), record).is_alive();
        Ok(if alive {
            ServerStatus::Running
        } else {
            ServerStatus::Stopped
        })
    }

    // Slots are only created for names that resolve to a workspace.
    fn slot(&self, name: &str) -> Result<Slot> {
        self.workspaces.ensure_exists(name)?;
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| Error::Other("Failed to lock server slots".to_string()))?;
        Ok(Arc::clone(slots.entry(name.to_string()).or_default()))
    }

    /// Record a server event
    fn record_event(&self, name: &str, event: ServerLifecycleEvent, details: Option<String>) {
        let server_event = ServerEvent {
            name: name.to_string(),
            event,
            timestamp: Utc::now(),
            details,
        };

        match self.events.lock() {
            Ok(mut events) => {
                events.push(server_event);
                if events.len() > MAX_EVENTS {
                    events.remove(0);
                }
            }
            Err(_) => tracing::warn!("Failed to lock server events"),
        }
    }
}
