#![allow(dead_code)]

use async_trait::async_trait;
use mockall::mock;
use moonlight::config::Config;
use moonlight::error::Result;
use moonlight::host::{HostResources, HostSample};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tempfile::TempDir;

mock! {
    pub Host {}

    #[async_trait]
    impl HostResources for Host {
        async fn total_memory_mb(&self) -> Result<u64>;
        async fn sample(&self) -> Result<HostSample>;
    }
}

/// Host mock reporting a fixed amount of memory.
pub fn host_with_memory(total_mb: u64) -> MockHost {
    let mut host = MockHost::new();
    host.expect_total_memory_mb().returning(move || Ok(total_mb));
    host.expect_sample().returning(move || Ok(sample(10.0, 50.0, total_mb)));
    host
}

pub fn sample(cpu_percent: f32, memory_percent: f32, total_memory_mb: u64) -> HostSample {
    HostSample {
        cpu_percent,
        memory_percent,
        total_memory_mb,
        available_memory_mb: total_memory_mb / 2,
    }
}

// Stand-in for the runtime executable: records its arguments in the working
// directory, then runs the workspace's "server.jar" as a shell script.
const FAKE_RUNTIME: &str = r#"#!/bin/sh
echo "$@" > launch-args.txt
while [ "$#" -gt 0 ]; do
    if [ "$1" = "-jar" ]; then
        shift
        jar="$1"
        shift
        exec sh "$jar" "$@"
    fi
    shift
done
echo "no -jar argument" >&2
exit 64
"#;

/// Server that keeps running.
pub const LONG_RUNNING: &str = "echo \"Starting minecraft server\"\nexec sleep 30\n";

/// Server that dies right away, printing to both streams.
pub const CRASHING: &str =
    "echo \"Loading libraries\"\necho \"Failed to bind to port 25565\" >&2\nexit 3\n";

/// Server that keeps running and ignores the polite shutdown request.
pub const IGNORES_TERM: &str = "trap '' TERM\necho \"Stubborn server\"\nwhile true; do sleep 1; done\n";

/// Path of the fake runtime, written once per test binary.
///
/// Written before any test spawns a process so no spawn can observe the file
/// still open for writing.
#[cfg(unix)]
pub fn fake_runtime() -> &'static Path {
    use std::os::unix::fs::PermissionsExt;

    static RUNTIME: OnceLock<(TempDir, PathBuf)> = OnceLock::new();
    let (_, path) = RUNTIME.get_or_init(|| {
        let dir = TempDir::new().expect("create runtime dir");
        let path = dir.path().join("fake-java");
        std::fs::write(&path, FAKE_RUNTIME).expect("write fake runtime");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("make fake runtime executable");
        (dir, path)
    });
    path
}

/// Temporary root holding servers, starters and backups.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: Config,
}

#[cfg(unix)]
impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let mut config = Config::default();
        config.runtime.executable = fake_runtime().display().to_string();
        config.paths.servers_dir = dir.path().join("servers");
        config.paths.starters_dir = dir.path().join("starters");
        config.paths.backups_dir = dir.path().join("backups");
        config.paths.log_dir = dir.path().to_path_buf();
        config.lifecycle.confirmation_window_ms = 1_500;
        config.lifecycle.settle_interval_ms = 300;
        config.lifecycle.termination_timeout_ms = 5_000;
        config.lifecycle.output_buffer_lines = 50;
        config.monitor.interval_ms = 50;
        std::fs::create_dir_all(&config.paths.servers_dir).expect("create servers dir");
        Self { dir, config }
    }

    pub fn server_dir(&self, name: &str) -> PathBuf {
        self.config.paths.servers_dir.join(name)
    }

    /// Creates a workspace whose server runs `script`.
    pub fn add_server(&self, name: &str, script: &str) -> PathBuf {
        let root = self.server_dir(name);
        std::fs::create_dir_all(&root).expect("create workspace");
        std::fs::write(root.join("server.jar"), script).expect("write server script");
        std::fs::write(root.join("server.properties"), "motd=Test\n").expect("write properties");
        root
    }

    /// Creates a workspace with no launch artifact.
    pub fn add_empty_server(&self, name: &str) -> PathBuf {
        let root = self.server_dir(name);
        std::fs::create_dir_all(&root).expect("create workspace");
        root
    }

    pub fn record_path(&self, name: &str) -> PathBuf {
        self.server_dir(name).join("server.pid")
    }

    pub fn launch_args(&self, name: &str) -> String {
        std::fs::read_to_string(self.server_dir(name).join("launch-args.txt"))
            .expect("read launch args")
            .trim_end()
            .to_string()
    }
}

/// Writes a record naming `pid` with a start time long before any live
/// process, so the id reads as reused.
pub fn write_old_record(path: &Path, workspace: &str, pid: u32) {
    let json = format!(
        r#"{{"workspace":"{}","pid":{},"launch_id":"6f1c2f0e-8d1b-4a57-9a3e-2b7d4c1e5f60","started_at":"2020-01-01T00:00:00Z"}}"#,
        workspace, pid
    );
    std::fs::write(path, json).expect("write record");
}

/// Whether a process with `pid` exists and is not a zombie.
pub fn pid_alive(pid: u32) -> bool {
    let stat = match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat,
        Err(_) => return false,
    };
    // State is the first field after the parenthesised command name.
    stat.rsplit_once(')')
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .is_some_and(|state| state != "Z" && state != "X")
}

/// Polls `check` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
