/// Server process lifecycle for Moonlight.
///
/// This module spawns, supervises and terminates server processes, persists
/// the identity of each spawned process so a later manager can take control
/// of it again, and samples host resources for display.
/// All public async operations are instrumented with `tracing` spans.
///
/// # Components
///
/// * `lifecycle` - Per-name serialized start/stop/restart/status and the event history
/// * `monitor` - Periodic host CPU and memory readings
/// * `process` - One spawned or re-acquired server process
///
/// # Examples
///
/// Stopping a server started by an earlier run:
///
/// ```no_run
/// use moonlight::config::Config;
/// use moonlight::host::SystemHost;
/// use moonlight::server::{LifecycleManager, StopOutcome};
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
/// match manager.stop("survival").await? {
///     StopOutcome::Stopped { pid, .. } => println!("stopped {}", pid),
///     StopOutcome::AlreadyStopped { .. } => println!("was already gone"),
///     StopOutcome::NotRunning => println!("not running"),
///     StopOutcome::RecordCleared { reason } => println!("cleared record: {}", reason),
/// }
/// # Ok(())
/// # }
/// ```
///
/// Watching host resources:
///
/// ```no_run
/// use moonlight::host::SystemHost;
/// use moonlight::server::MonitorFeed;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn run() -> moonlight::Result<()> {
/// let feed = MonitorFeed::new(Arc::new(SystemHost::new()), Duration::from_secs(2));
/// feed.start()?;
///
/// let mut readings = feed.subscribe();
/// while readings.changed().await.is_ok() {
///     println!("{}", *readings.borrow());
/// }
/// # Ok(())
/// # }
/// ```
pub mod lifecycle;
pub mod monitor;
mod output;
mod probe;
mod process;
mod record;

pub use lifecycle::{
    LifecycleManager, RestartReport, ServerEvent, ServerLifecycleEvent, ServerLifecycleManager,
    ServerStatus, StartReport,
};
pub use monitor::{MonitorFeed, MonitorReading};
pub use output::{OutputBuffer, Stream};
pub use process::{HandleState, LaunchCommand, ProcessHandle, StopOutcome};
pub use record::{LaunchId, ProcessRecord};
