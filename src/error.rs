/// Error handling module for Moonlight.
///
/// This module defines the error types used throughout the library.
/// Every failure a lifecycle operation can report is a variant here, so a
/// front end can render a specific message for each outcome.
///
/// # Example
///
/// ```
/// use moonlight::error::{Error, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Operation succeeded"),
///         Err(Error::WorkspaceMissing(name)) => println!("No server named '{}'", name),
///         Err(Error::AlreadyRunning { name, pid }) => {
///             println!("'{}' is already running as pid {}", name, pid)
///         }
///         Err(e @ Error::StartupCrashed { .. }) => {
///             println!("{}", e);
///             for line in e.diagnostic_output() {
///                 println!("  {}", line);
///             }
///         }
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the moonlight library.
///
/// Stopping a server that is not running is not an error; see
/// [`StopOutcome`](crate::server::StopOutcome).
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to parse configuration from a file or string.
    ///
    /// This error occurs when:
    /// - The configuration file cannot be read
    /// - The configuration JSON is malformed
    /// - Field types are incorrect
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration parsed but contains invalid values.
    ///
    /// This error occurs when:
    /// - The runtime executable is empty
    /// - A timing or buffer setting is zero
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A server name that cannot be used as a directory name.
    #[error("Invalid server name: '{0}'")]
    InvalidName(String),

    /// The named server workspace does not exist.
    #[error("Server workspace not found: {0}")]
    WorkspaceMissing(String),

    /// A workspace with this name already exists.
    ///
    /// This error occurs when:
    /// - Creating a server under a name that is taken
    /// - Renaming a server onto an existing name
    #[error("Server workspace already exists: {0}")]
    WorkspaceExists(String),

    /// The requested starter artifact is not in the starters directory.
    #[error("Starter template not found: {0}")]
    TemplateMissing(String),

    /// The workspace has no launch artifact.
    #[error("Server '{name}' is not launchable: {} is missing", .artifact.display())]
    NotLaunchable {
        /// Server name
        name: String,
        /// Expected artifact location
        artifact: PathBuf,
    },

    /// A live process is already recorded for this server.
    #[error("Server '{name}' is already running (pid {pid})")]
    AlreadyRunning {
        /// Server name
        name: String,
        /// Process id of the live process
        pid: u32,
    },

    /// The operation needs a process but the handle holds none.
    ///
    /// This error occurs when:
    /// - Waiting on the startup window of a handle that was never spawned
    #[error("Not running: {0}")]
    NotRunning(String),

    /// The operating system refused to create the process.
    #[error("Failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        /// Server name
        name: String,
        /// OS or persistence failure
        reason: String,
        /// Diagnostic output captured before the failure
        output: Vec<String>,
    },

    /// The process exited inside the startup confirmation window.
    #[error("Server '{name}' exited during startup ({})", describe_exit(.exit_code))]
    StartupCrashed {
        /// Server name
        name: String,
        /// Exit code, if the process exited normally
        exit_code: Option<i32>,
        /// Diagnostic output captured from stdout and stderr
        output: Vec<String>,
    },

    /// The process could not be signalled, or did not die in time.
    ///
    /// The process record is kept so the stop can be retried.
    #[error("Failed to terminate server '{name}' (pid {pid}): {reason}")]
    TerminationFailed {
        /// Server name
        name: String,
        /// Process id that was signalled
        pid: u32,
        /// OS failure or timeout description
        reason: String,
    },

    /// The persisted process record could not be read.
    #[error("Process record {} is corrupt: {reason}", .path.display())]
    RecordCorrupt {
        /// Location of the record file
        path: PathBuf,
        /// Parse failure
        reason: String,
    },

    /// Heap sizing input that admits no valid plan.
    #[error("Invalid resource plan: {0}")]
    InvalidPlan(String),

    /// Host memory or CPU figures could not be read.
    #[error("Host resources unavailable: {0}")]
    HostResources(String),

    /// Unexpected filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error not covered by the above categories.
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Captured child output attached to a spawn or startup failure.
    ///
    /// Empty for every other variant.
    pub fn diagnostic_output(&self) -> &[String] {
        match self {
            Error::SpawnFailed { output, .. } | Error::StartupCrashed { output, .. } => output,
            _ => &[],
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// Result type for moonlight operations.
pub type Result<T> = std::result::Result<T, Error>;
