// OS process probing and signalling by raw process id.
//
// Used for processes this manager instance did not spawn itself (or no longer
// holds a handle to), where only the persisted record is available.
use chrono::{DateTime, Utc};
use std::time::Duration;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

// OS start times have one-second resolution and are taken before the record
// timestamp.
const START_TIME_SLACK_SECS: i64 = 2;

/// Result of sending a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Sent,
    /// No such process.
    Gone,
}

/// Whether `pid` names a live process.
///
/// Zombies count as dead. With `launched_at`, a process that the OS says
/// started after that moment is a different process reusing the id.
pub(crate) fn is_alive(pid: u32, launched_at: Option<DateTime<Utc>>) -> bool {
    if pid == 0 {
        return false;
    }

    let sys_pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);

    let Some(process) = system.process(sys_pid) else {
        return false;
    };
    if process.status() == ProcessStatus::Zombie {
        return false;
    }

    match launched_at {
        Some(launched_at) => {
            let started = i64::try_from(process.start_time()).unwrap_or(i64::MAX);
            if started > launched_at.timestamp() + START_TIME_SLACK_SECS {
                tracing::debug!(pid, "Process id was reused by a newer process");
                return false;
            }
            true
        }
        None => true,
    }
}

/// Polls until `pid` is gone or `timeout` elapses. Returns whether it died.
pub(crate) async fn wait_for_exit(
    pid: u32,
    launched_at: Option<DateTime<Utc>>,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !is_alive(pid, launched_at) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Sends the forceful kill signal.
pub(crate) fn kill(pid: u32) -> Result<Delivery, String> {
    send(pid, Request::Kill)
}

/// Asks the process to shut down.
pub(crate) fn request_shutdown(pid: u32) -> Result<Delivery, String> {
    send(pid, Request::Shutdown)
}

enum Request {
    Kill,
    Shutdown,
}

#[cfg(unix)]
fn send(pid: u32, request: Request) -> Result<Delivery, String> {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;

    // 0 and negative ids address process groups.
    let raw = i32::try_from(pid)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| format!("refusing to signal invalid pid {}", pid))?;

    let sig = match request {
        Request::Kill => Signal::SIGKILL,
        Request::Shutdown => Signal::SIGTERM,
    };

    match signal::kill(NixPid::from_raw(raw), sig) {
        Ok(()) => Ok(Delivery::Sent),
        Err(Errno::ESRCH) => Ok(Delivery::Gone),
        Err(e) => Err(format!("{:?} failed: {}", sig, e)),
    }
}

#[cfg(not(unix))]
fn send(pid: u32, request: Request) -> Result<Delivery, String> {
    if pid == 0 {
        return Err(format!("refusing to signal invalid pid {}", pid));
    }

    let sys_pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
    let Some(process) = system.process(sys_pid) else {
        return Ok(Delivery::Gone);
    };

    let delivered = match request {
        Request::Kill => process.kill(),
        Request::Shutdown => process
            .kill_with(sysinfo::Signal::Term)
            .unwrap_or_else(|| process.kill()),
    };
    if delivered {
        Ok(Delivery::Sent)
    } else {
        Err(format!("OS refused to terminate pid {}", pid))
    }
}
