use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use moonlight::planner::HeapRequest;
use moonlight::{Config, ServerManager, ServerStatus, StopOutcome};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LOG_FILE: &str = "server_manager.log";

// How often an attached `start` checks that the server is still alive.
const ATTACHED_POLL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "moonlight", version, about = "Game server process manager")]
struct Cli {
    /// Path to config file (JSON). Written with defaults when missing.
    #[arg(long, short, default_value = "moonlight/config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List servers and their status.
    List,
    /// List starter artifacts available to `create`.
    Templates,
    /// Create a server from a starter artifact.
    Create {
        name: String,
        /// Starter file name, as shown by `templates`.
        #[arg(long, short)]
        starter: String,
    },
    /// Rename a stopped server.
    Rename { old_name: String, new_name: String },
    /// Show or edit a server's properties.
    Settings {
        name: String,
        /// Property to set, as key=value. Repeatable.
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
    /// Copy a server into the backups directory.
    Backup { name: String },
    /// Start a server. Stays attached until Ctrl-C (which stops it) unless --detach.
    Start {
        name: String,
        #[command(flatten)]
        heap: HeapArgs,
        /// Return once the server is confirmed running.
        #[arg(long, short)]
        detach: bool,
    },
    /// Stop a server.
    Stop { name: String },
    /// Stop a server, wait for it to settle, and start it again.
    Restart {
        name: String,
        #[command(flatten)]
        heap: HeapArgs,
    },
    /// Show the status of one server, or all of them.
    Status { name: Option<String> },
    /// Print host CPU and memory usage every interval.
    Monitor,
}

#[derive(clap::Args)]
struct HeapArgs {
    /// Minimum heap in MB. Requires --max-mb.
    #[arg(long, requires = "max_mb")]
    min_mb: Option<u64>,
    /// Maximum heap in MB, reduced to fit host memory. Requires --min-mb.
    #[arg(long, requires = "min_mb")]
    max_mb: Option<u64>,
}

impl HeapArgs {
    fn request(&self) -> Option<HeapRequest> {
        match (self.min_mb, self.max_mb) {
            (Some(min_mb), Some(max_mb)) => Some(HeapRequest { min_mb, max_mb }),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = log_dir_for(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let _guard = init_logging(&log_dir)?;

    let manager = ServerManager::from_config_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match run(&manager, cli.command).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let output = e
                .downcast_ref::<moonlight::Error>()
                .map(|e| e.diagnostic_output())
                .unwrap_or_default();
            if !output.is_empty() {
                eprintln!("--- server output ---");
                for line in output {
                    eprintln!("{}", line);
                }
                eprintln!("---------------------");
            }
            Err(e)
        }
    }
}

async fn run(manager: &ServerManager, command: Commands) -> Result<()> {
    match command {
        Commands::List => {
            for (name, status) in manager.status_all().await? {
                println!("{:<24} {:?}", name, status);
            }
        }
        Commands::Templates => {
            for template in manager.workspaces().templates()? {
                println!("{}", template);
            }
        }
        Commands::Create { name, starter } => {
            let root = manager.create(&name, &starter)?;
            println!("Created '{}' at {}", name, root.display());
        }
        Commands::Rename { old_name, new_name } => {
            let root = manager.rename(&old_name, &new_name).await?;
            println!("Renamed '{}' to '{}' ({})", old_name, new_name, root.display());
        }
        Commands::Settings { name, set } => {
            let updates = set
                .iter()
                .map(|pair| {
                    pair.split_once('=')
                        .map(|(k, v)| (k.trim(), v.trim()))
                        .with_context(|| format!("Expected KEY=VALUE, got '{}'", pair))
                })
                .collect::<Result<Vec<_>>>()?;
            if !updates.is_empty() {
                manager.workspaces().update_properties(&name, &updates)?;
            }
            for (key, value) in manager.workspaces().properties(&name)? {
                println!("{}={}", key, value);
            }
        }
        Commands::Backup { name } => {
            let target = manager.backup(&name)?;
            println!("Backed up '{}' to {}", name, target.display());
        }
        Commands::Start { name, heap, detach } => {
            let report = manager.start(&name, heap.request()).await?;
            if let Some(clamp) = report.plan.clamp {
                println!(
                    "Max heap reduced from {} MB to {} MB to fit host memory",
                    clamp.requested_max_mb, clamp.applied_max_mb
                );
            }
            println!("Started '{}' (pid {}): {}", name, report.pid, report.command);

            if !detach {
                attach(manager, &name).await?;
            }
        }
        Commands::Stop { name } => print_stop(&name, &manager.stop(&name).await?),
        Commands::Restart { name, heap } => {
            let report = manager.restart(&name, heap.request()).await?;
            print_stop(&name, &report.stopped);
            println!("Started '{}' (pid {})", name, report.started.pid);
        }
        Commands::Status { name: Some(name) } => {
            println!("{:?}", manager.status(&name).await?);
        }
        Commands::Status { name: None } => {
            for (name, status) in manager.status_all().await? {
                println!("{:<24} {:?}", name, status);
            }
        }
        Commands::Monitor => {
            let mut interval = tokio::time::interval(manager.monitor().interval());
            loop {
                tokio::select! {
                    _ = interval.tick() => println!("{}", manager.monitor().sample().await),
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }
    Ok(())
}

// Waits for Ctrl-C (stopping the server) or for the server to exit.
async fn attach(manager: &ServerManager, name: &str) -> Result<()> {
    println!("Attached. Press Ctrl-C to stop the server.");
    let mut poll = tokio::time::interval(ATTACHED_POLL);

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                print_stop(name, &manager.stop(name).await?);
                return Ok(());
            }
            _ = poll.tick() => {
                // Taken first: a status check on an exited server releases its handle.
                let output = manager.lifecycle().output(name).await?;
                if manager.status(name).await? != ServerStatus::Running {
                    for line in output.iter().rev().take(20).rev() {
                        println!("{}", line);
                    }
                    bail!("Server '{}' exited", name);
                }
            }
        }
    }
}

fn print_stop(name: &str, outcome: &StopOutcome) {
    match outcome {
        StopOutcome::Stopped { pid, .. } => println!("Stopped '{}' (pid {})", name, pid),
        StopOutcome::AlreadyStopped { pid, .. } => {
            println!("'{}' (pid {}) had already exited", name, pid)
        }
        StopOutcome::NotRunning => println!("'{}' is not running", name),
        StopOutcome::RecordCleared { reason } => {
            println!("'{}' had an unreadable process record ({}); it was removed", name, reason)
        }
    }
}

// Logging comes up before the manager, so configuration loading is logged too.
fn log_dir_for(config_path: &Path) -> moonlight::Result<PathBuf> {
    let config = if config_path.exists() {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };
    Ok(config.paths.log_dir)
}

fn init_logging(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    Ok(guard)
}
