use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the server runtime is launched.
///
/// The executable is never hardcoded by the lifecycle core; it always comes
/// from here.
///
/// # Examples
///
/// ```
/// use moonlight::config::RuntimeConfig;
///
/// let runtime = RuntimeConfig {
///     executable: "/usr/lib/jvm/java-21/bin/java".to_string(),
///     extra_flags: vec!["-Dfile.encoding=UTF-8".to_string()],
///     server_args: vec!["nogui".to_string()],
/// };
/// assert_eq!(runtime.server_args, vec!["nogui"]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Runtime executable, an absolute path or a command available in the PATH.
    #[serde(default = "default_executable")]
    pub executable: String,

    /// Flags appended after the heap bounds and tuning flags.
    #[serde(default)]
    pub extra_flags: Vec<String>,

    /// Arguments passed to the server after the artifact reference.
    #[serde(default = "default_server_args")]
    pub server_args: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            extra_flags: Vec::new(),
            server_args: default_server_args(),
        }
    }
}

/// Directory layout used by the workspace store and the log writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// One sub-directory per server workspace.
    #[serde(default = "default_servers_dir")]
    pub servers_dir: PathBuf,

    /// Starter artifacts (`*.jar`) new servers are created from.
    #[serde(default = "default_starters_dir")]
    pub starters_dir: PathBuf,

    /// Destination of workspace backups.
    #[serde(default = "default_backups_dir")]
    pub backups_dir: PathBuf,

    /// Directory holding `server_manager.log`.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            servers_dir: default_servers_dir(),
            starters_dir: default_starters_dir(),
            backups_dir: default_backups_dir(),
            log_dir: default_log_dir(),
        }
    }
}

/// Policy applied by `ProcessHandle::terminate`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TerminationPolicy {
    /// Kill immediately, no cooperative shutdown.
    #[default]
    Force,
    /// Ask the process to exit, then kill it once the grace period runs out.
    Graceful {
        /// Milliseconds to wait between the polite and the forceful signal.
        grace_period_ms: u64,
    },
}

/// Timing and buffering knobs of the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Startup confirmation window. An exit inside it is a startup crash.
    #[serde(default = "default_confirmation_window_ms")]
    pub confirmation_window_ms: u64,

    /// Pause between stop and start during a restart.
    #[serde(default = "default_settle_interval_ms")]
    pub settle_interval_ms: u64,

    /// Upper bound on waiting for the OS to confirm a process is gone.
    #[serde(default = "default_termination_timeout_ms")]
    pub termination_timeout_ms: u64,

    /// Number of stdout/stderr lines kept per process for diagnostics.
    #[serde(default = "default_output_buffer_lines")]
    pub output_buffer_lines: usize,

    /// How processes are terminated.
    #[serde(default)]
    pub termination: TerminationPolicy,
}

impl LifecycleConfig {
    pub fn confirmation_window(&self) -> Duration {
        Duration::from_millis(self.confirmation_window_ms)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }

    pub fn termination_timeout(&self) -> Duration {
        Duration::from_millis(self.termination_timeout_ms)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            confirmation_window_ms: default_confirmation_window_ms(),
            settle_interval_ms: default_settle_interval_ms(),
            termination_timeout_ms: default_termination_timeout_ms(),
            output_buffer_lines: default_output_buffer_lines(),
            termination: TerminationPolicy::default(),
        }
    }
}

/// Host monitor polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Sampling interval in milliseconds.
    #[serde(default = "default_monitor_interval_ms")]
    pub interval_ms: u64,
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_monitor_interval_ms(),
        }
    }
}

/// Main configuration for Moonlight.
///
/// Every section and field is optional in the JSON document; missing values
/// fall back to their defaults.
///
/// # JSON Schema
///
/// ```json
/// {
///   "runtime": {
///     "executable": "java",
///     "extra_flags": [],
///     "server_args": ["nogui"]
///   },
///   "paths": {
///     "servers_dir": "servers",
///     "starters_dir": "assets/Server Starters",
///     "backups_dir": "backups",
///     "log_dir": "."
///   },
///   "lifecycle": {
///     "confirmation_window_ms": 15000,
///     "settle_interval_ms": 2000,
///     "termination_timeout_ms": 10000,
///     "output_buffer_lines": 200,
///     "termination": { "mode": "force" }
///   },
///   "monitor": { "interval_ms": 2000 }
/// }
/// ```
///
/// # Examples
///
/// ```
/// use moonlight::config::Config;
///
/// let config = Config::parse_from_str(r#"{ "runtime": { "executable": "java21" } }"#).unwrap();
/// assert_eq!(config.runtime.executable, "java21");
/// assert_eq!(config.lifecycle.settle_interval_ms, 2000);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Config {
    /// Loads a configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be read
    /// * The file contents are not valid JSON
    /// * The JSON does not conform to the expected schema
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        Self::parse_from_str(&content)
    }

    /// Parses a configuration from a JSON string.
    ///
    /// The document must be a JSON object. Every section may be omitted.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))?;
        if !value.is_object() {
            return Err(Error::ConfigParse(
                "Failed to parse JSON config: expected an object at the top level".to_string(),
            ));
        }
        serde_json::from_value(value)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }

    /// Loads the configuration at `path`, writing the defaults there first
    /// when the file does not exist yet.
    pub fn load_or_init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::from_file(path);
        }

        let config = Self::default();
        config.save(path)?;
        tracing::info!(config_path = %path.display(), "Wrote default configuration");
        Ok(config)
    }

    /// Writes the configuration as pretty-printed JSON, creating parent
    /// directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Other(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

fn default_executable() -> String {
    "java".to_string()
}

fn default_server_args() -> Vec<String> {
    vec!["nogui".to_string()]
}

fn default_servers_dir() -> PathBuf {
    PathBuf::from("servers")
}

fn default_starters_dir() -> PathBuf {
    PathBuf::from("assets/Server Starters")
}

fn default_backups_dir() -> PathBuf {
    PathBuf::from("backups")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_confirmation_window_ms() -> u64 {
    15_000
}

fn default_settle_interval_ms() -> u64 {
    2_000
}

fn default_termination_timeout_ms() -> u64 {
    10_000
}

fn default_output_buffer_lines() -> usize {
    200
}

fn default_monitor_interval_ms() -> u64 {
    2_000
}
