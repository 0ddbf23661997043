/*!
 # Moonlight

 A Rust library for running and supervising game server processes.

 ## Overview

 Moonlight provides functionality to:
 - Keep server workspaces: a directory per server holding the launchable
   artifact, its license acceptance and its properties file
 - Size the runtime heap from host memory before every launch
 - Start servers in the background and tell a startup crash from a slow start
 - Stop and restart servers, including ones started by an earlier run, using
   the process record kept in each workspace
 - Sample host CPU and memory usage for display

 ## Basic Usage

 ```no_run
 use moonlight::{ServerManager, Result};
 use moonlight::planner::HeapRequest;

 #[tokio::main]
 async fn main() -> Result<()> {
     // Create a manager from config file
     let manager = ServerManager::from_config_file("moonlight/config.json")?;

     // Start a server with an explicit heap
     let report = manager
         .start("survival", Some(HeapRequest { min_mb: 2048, max_mb: 4096 }))
         .await?;
     println!("Started pid {} with {}", report.pid, report.command);

     // Later, possibly from another process
     println!("Status: {:?}", manager.status("survival").await?);
     manager.stop("survival").await?;

     Ok(())
 }
 ```

 ## Features

 - **Process lifecycle**: Start, stop, restart and query servers by name
 - **Durable identity**: A record per running server survives manager restarts
 - **Resource planning**: Heap limits derived from host memory with a safety reserve
 - **Configuration**: Configure paths and timings through a JSON config file
 - **Error Handling**: Startup failures carry the server's own output
 - **Async Support**: Full async/await support
*/

pub mod config;
pub mod error;
pub mod host;
pub mod planner;
pub mod server;
pub mod workspace;

pub use config::Config;
pub use error::{Error, Result};
pub use server::{LifecycleManager, MonitorFeed, ServerStatus, StopOutcome};
pub use workspace::Workspaces;

use host::{HostResources, SystemHost};
use planner::HeapRequest;
use server::{RestartReport, StartReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Configure and run game servers
///
/// This struct is the main entry point for managing server workspaces and
/// the lifecycles of their processes.
/// All public async methods are instrumented with `tracing` spans.
pub struct ServerManager {
    /// Configuration
    config: Config,
    /// Lifecycle manager
    lifecycle: Arc<LifecycleManager>,
    /// Host resource feed
    monitor: MonitorFeed,
}

impl ServerManager {
    /// Create a new server manager from a configuration file path
    ///
    /// The file is created with default settings when it does not exist.
    #[tracing::instrument(skip(path), fields(config_path = ?path.as_ref()))]
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        tracing::info!("Loading configuration from file");
        let config = Config::load_or_init(path)?;
        Self::new(config)
    }

    /// Create a new server manager from a configuration string
    #[tracing::instrument(skip(config))]
    pub fn from_config_str(config: &str) -> Result<Self> {
        tracing::info!("Loading configuration from string");
        let config = Config::parse_from_str(config)?;
        Self::new(config)
    }

    /// Create a new server manager from a configuration, measuring the
    /// local host.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_host(config, Arc::new(SystemHost::new()))
    }

    /// Create a new server manager with a custom host resource source
    #[tracing::instrument(skip(config, host), fields(servers_dir = %config.paths.servers_dir.display()))]
    pub fn with_host(config: Config, host: Arc<dyn HostResources>) -> Result<Self> {
        config::validate_config(&config)?;
        tracing::info!("Creating new ServerManager");

        let lifecycle = Arc::new(LifecycleManager::new(
            Workspaces::new(&config.paths),
            Arc::clone(&host),
            config.runtime.clone(),
            config.lifecycle.clone(),
        ));
        let monitor = MonitorFeed::new(host, config.monitor.interval());

        Ok(Self {
            config,
            lifecycle,
            monitor,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workspaces(&self) -> &Workspaces {
        self.lifecycle.workspaces()
    }

    /// Shared lifecycle manager, for callers that outlive `self`.
    pub fn lifecycle(&self) -> Arc<LifecycleManager> {
        Arc::clone(&self.lifecycle)
    }

    pub fn monitor(&self) -> &MonitorFeed {
        &self.monitor
    }

    /// Start a server
    #[tracing::instrument(skip(self), fields(server_name = %name))]
    pub async fn start(&self, name: &str, request: Option<HeapRequest>) -> Result<StartReport> {
        self.lifecycle.start(name, request).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to start server");
            e
        })
    }

    /// Stop a server
    #[tracing::instrument(skip(self), fields(server_name = %name))]
    pub async fn stop(&self, name: &str) -> Result<StopOutcome> {
        self.lifecycle.stop(name).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to stop server");
            e
        })
    }

    /// Restart a server
    #[tracing::instrument(skip(self), fields(server_name = %name))]
    pub async fn restart(&self, name: &str, request: Option<HeapRequest>) -> Result<RestartReport> {
        self.lifecycle.restart(name, request).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to restart server");
            e
        })
    }

    /// Status of a server
    pub async fn status(&self, name: &str) -> Result<ServerStatus> {
        self.lifecycle.status(name).await
    }

    /// Status of every server, sorted by name
    pub async fn status_all(&self) -> Result<Vec<(String, ServerStatus)>> {
        self.lifecycle.status_all().await
    }

    /// Create a server workspace from a starter artifact
    pub fn create(&self, name: &str, starter: &str) -> Result<PathBuf> {
        self.workspaces()
            .create(name, starter)
            .map(|workspace| workspace.root().to_path_buf())
    }

    /// Rename a server workspace. Refused while the server is running.
    #[tracing::instrument(skip(self))]
    pub async fn rename(&self, old_name: &str, new_name: &str) -> Result<PathBuf> {
        self.lifecycle
            .rename(old_name, new_name)
            .await
            .map(|workspace| workspace.root().to_path_buf())
    }

    /// Copy a server workspace into the backups directory
    pub fn backup(&self, name: &str) -> Result<PathBuf> {
        self.workspaces().backup(name)
    }
}
