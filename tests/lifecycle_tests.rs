#![cfg(target_os = "linux")]

mod common;

use common::{TestEnv, host_with_memory, pid_alive, write_old_record, CRASHING, LONG_RUNNING};
use moonlight::error::{Error, Result};
use moonlight::planner::HeapRequest;
use moonlight::server::{LifecycleManager, ServerLifecycleEvent, ServerStatus, StopOutcome};
use moonlight::workspace::Workspaces;
use std::sync::Arc;
use std::time::Duration;

fn manager(env: &TestEnv, total_mb: u64) -> LifecycleManager {
    LifecycleManager::new(
        Workspaces::new(&env.config.paths),
        Arc::new(host_with_memory(total_mb)),
        env.config.runtime.clone(),
        env.config.lifecycle.clone(),
    )
}

#[tokio::test]
async fn test_start_without_artifact_is_not_launchable() -> Result<()> {
    let env = TestEnv::new();
    let root = env.add_empty_server("vanilla");
    let manager = manager(&env, 8_192);

    let err = manager.start("vanilla", None).await.unwrap_err();

    assert!(matches!(err, Error::NotLaunchable { ref name, .. } if name == "vanilla"));
    assert!(!env.record_path("vanilla").exists());
    // The license is normalized even though the launch is refused.
    assert_eq!(std::fs::read_to_string(root.join("eula.txt"))?, "eula=true\n");
    Ok(())
}

#[tokio::test]
async fn test_start_unknown_server() {
    let env = TestEnv::new();
    let manager = manager(&env, 8_192);

    let err = manager.start("ghost", None).await.unwrap_err();
    assert!(matches!(err, Error::WorkspaceMissing(ref name) if name == "ghost"));

    let err = manager.start("../escape", None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidName(_)));
}

#[tokio::test]
async fn test_start_status_stop() -> Result<()> {
    let env = TestEnv::new();
    env.add_server("survival", LONG_RUNNING);
    let manager = manager(&env, 8_192);

    let report = manager.start("survival", None).await?;

    assert!(pid_alive(report.pid));
    assert_eq!(manager.status("survival").await?, ServerStatus::Running);
    let record: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(env.record_path("survival"))?).unwrap();
    assert_eq!(record["pid"], report.pid);
    assert_eq!(record["workspace"], "survival");

    let outcome = manager.stop("survival").await?;

    assert!(matches!(outcome, StopOutcome::Stopped { pid, .. } if pid == report.pid));
    assert!(!env.record_path("survival").exists());
    assert!(!pid_alive(report.pid));
    assert_eq!(manager.status("survival").await?, ServerStatus::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_second_start_is_refused() -> Result<()> {
    let env = TestEnv::new();
    env.add_server("survival", LONG_RUNNING);
    let manager = manager(&env, 8_192);

    let first = manager.start("survival", None).await?;
    let err = manager.start("survival", None).await.unwrap_err();

    assert!(matches!(err, Error::AlreadyRunning { pid, .. } if pid == first.pid));
    let records: Vec<_> = std::fs::read_dir(env.server_dir("survival"))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("server.pid"))
        .collect();
    assert_eq!(records.len(), 1);

    manager.stop("survival").await?;
    Ok(())
}

#[tokio::test]
async fn test_concurrent_starts_admit_one() -> Result<()> {
    let env = TestEnv::new();
    env.add_server("survival", LONG_RUNNING);
    let manager = Arc::new(manager(&env, 8_192));

    let (a, b) = tokio::join!(
        {
            let manager = Arc::clone(&manager);
            async move { manager.start("survival", None).await }
        },
        {
            let manager = Arc::clone(&manager);
            async move { manager.start("survival", None).await }
        }
    );

    let started = [&a, &b].iter().filter(|r| r.is_ok()).count();
    let refused = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Err(Error::AlreadyRunning { .. })))
        .count();
    assert_eq!((started, refused), (1, 1));

    manager.stop("survival").await?;
    Ok(())
}

#[tokio::test]
async fn test_different_servers_start_independently() -> Result<()> {
    let env = TestEnv::new();
    env.add_server("alpha", LONG_RUNNING);
    env.add_server("beta", LONG_RUNNING);
    let manager = Arc::new(manager(&env, 8_192));

    let started = std::time::Instant::now();
    let (a, b) = tokio::join!(manager.start("alpha", None), manager.start("beta", None));
    let (a, b) = (a?, b?);

    // Both confirmation windows ran at the same time.
    assert!(started.elapsed() < Duration::from_millis(2_900));
    assert_ne!(a.pid, b.pid);

    manager.stop("alpha").await?;
    manager.stop("beta").await?;
    Ok(())
}

#[tokio::test]
async fn test_stop_without_record_is_not_running() -> Result<()> {
    let env = TestEnv::new();
    env.add_server("survival", LONG_RUNNING);
    let manager = manager(&env, 8_192);

    assert_eq!(manager.stop("survival").await?, StopOutcome::NotRunning);
    assert_eq!(manager.status("survival").await?, ServerStatus::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_startup_crash_reports_output() -> Result<()> {
    let env = TestEnv::new();
    env.add_server("broken", CRASHING);
    let manager = manager(&env, 8_192);

    let err = manager.start("broken", None).await.unwrap_err();

    match &err {
        Error::StartupCrashed { exit_code, output, .. } => {
            assert_eq!(*exit_code, Some(3));
            assert!(output.iter().any(|l| l == "Loading libraries"));
            assert!(output.iter().any(|l| l == "[stderr] Failed to bind to port 25565"));
        }
        other => panic!("expected StartupCrashed, got {:?}", other),
    }
    assert!(!err.diagnostic_output().is_empty());
    assert!(!env.record_path("broken").exists());
    assert_eq!(manager.status("broken").await?, ServerStatus::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_stop_from_new_manager() -> Result<()> {
    let env = TestEnv::new();
    env.add_server("survival", LONG_RUNNING);

    let first = manager(&env, 8_192);
    let report = first.start("survival", None).await?;
    drop(first);

    assert!(pid_alive(report.pid));

    let second = manager(&env, 8_192);
    assert_eq!(second.status("survival").await?, ServerStatus::Running);

    let outcome = second.stop("survival").await?;

    assert!(matches!(outcome, StopOutcome::Stopped { pid, .. } if pid == report.pid));
    assert!(!pid_alive(report.pid));
    assert!(!env.record_path("survival").exists());
    Ok(())
}

#[tokio::test]
async fn test_start_refused_for_process_of_previous_manager() -> Result<()> {
    let env = TestEnv::new();
    env.add_server("survival", LONG_RUNNING);

    let first = manager(&env, 8_192);
    let report = first.start("survival", None).await?;
    drop(first);

    let second = manager(&env, 8_192);
    let err = second.start("survival", None).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyRunning { pid, .. } if pid == report.pid));

    second.stop("survival").await?;
    Ok(())
}

#[tokio::test]
async fn test_record_of_reused_pid_is_stale() -> Result<()> {
    let env = TestEnv::new();
    env.add_server("survival", LONG_RUNNING);
    // Our own pid is alive, but started long after the record claims.
    write_old_record(&env.record_path("survival"), "survival", std::process::id());
    let manager = manager(&env, 8_192);

    assert_eq!(manager.status("survival").await?, ServerStatus::Unknown);
    assert!(!env.record_path("survival").exists());

    write_old_record(&env.record_path("survival"), "survival", std::process::id());
    let outcome = manager.stop("survival").await?;
    assert!(matches!(outcome, StopOutcome::AlreadyStopped { pid, .. } if pid == std::process::id()));
    assert!(!env.record_path("survival").exists());
    Ok(())
}

#[tokio::test]
async fn test_stale_record_does_not_block_start() -> Result<()> {
    let env = TestEnv::new();
    env.add_server("survival", LONG_RUNNING);
    write_old_record(&env.record_path("survival"), "survival", std::process::id());
    let manager = manager(&env, 8_192);

    let report = manager.start("survival", None).await?;

    assert_ne!(report.pid, std::process::id());
    manager.stop("survival").await?;
    Ok(())
}

#[tokio::test]
async fn test_corrupt_record() -> Result<()> {
    let env = TestEnv::new();
    env.add_server("survival", LONG_RUNNING);
    let manager = manager(&env, 8_192);

    std::fs::write(env.record_path("survival"), "not a record")?;
    assert_eq!(manager.status("survival").await?, ServerStatus::Unknown);
    assert!(!env.record_path("survival").exists());

    std::fs::write(env.record_path("survival"), "{\"pid\":")?;
    let outcome = manager.stop("survival").await?;
    assert!(matches!(outcome, StopOutcome::RecordCleared { .. }), "{:?}", outcome);
    assert_ne!(outcome, StopOutcome::NotRunning);
    assert!(!env.record_path("survival").exists());
    let events = manager.get_server_events("survival", Some(1))?;
    assert!(events[0].details.as_deref().unwrap_or_default().contains("unreadable record"));
    Ok(())
}

#[tokio::test]
async fn test_restart_waits_settle_interval() -> Result<()> {
    let env = TestEnv::new();
    env.add_server("survival", LONG_RUNNING);
    let manager = manager(&env, 8_192);

    let first = manager.start("survival", None).await?;
    let report = manager.restart("survival", None).await?;

    let stopped_at = match report.stopped {
        StopOutcome::Stopped { pid, stopped_at } => {
            assert_eq!(pid, first.pid);
            stopped_at
        }
        other => panic!("expected Stopped, got {:?}", other),
    };
    let settle = chrono::Duration::milliseconds(env.config.lifecycle.settle_interval_ms as i64);
    assert!(report.started.started_at - stopped_at >= settle);
    assert_ne!(report.started.launch_id, first.launch_id);
    assert!(!pid_alive(first.pid));
    assert_eq!(manager.status("survival").await?, ServerStatus::Running);

    manager.stop("survival").await?;
    Ok(())
}

#[tokio::test]
async fn test_restart_of_stopped_server_starts_it() -> Result<()> {
    let env = TestEnv::new();
    env.add_server("survival", LONG_RUNNING);
    let manager = manager(&env, 8_192);

    let report = manager.restart("survival", None).await?;

    assert_eq!(report.stopped, StopOutcome::NotRunning);
    assert_eq!(manager.status("survival").await?, ServerStatus::Running);

    let events = manager.get_server_events("survival", Some(1))?;
    assert_eq!(events[0].event, ServerLifecycleEvent::Restarted);

    manager.stop("survival").await?;
    Ok(())
}

#[tokio::test]
async fn test_default_heap_follows_host_memory() -> Result<()> {
    let env = TestEnv::new();
    env.add_server("survival", LONG_RUNNING);
    let manager = manager(&env, 16_384);

    let report = manager.start("survival", None).await?;

    assert_eq!(report.plan.max_heap_mb, 8_192);
    let args = env.launch_args("survival");
    assert!(args.starts_with("-Xms8192M -Xmx8192M -XX:+UseG1GC"));
    assert!(args.ends_with("-jar server.jar nogui"));

    manager.stop("survival").await?;
    Ok(())
}

#[tokio::test]
async fn test_requested_heap_is_clamped() -> Result<()> {
    let env = TestEnv::new();
    env.add_server("survival", LONG_RUNNING);
    let manager = manager(&env, 4_096);

    let report = manager
        .start(
            "survival",
            Some(HeapRequest {
                min_mb: 4_096,
                max_mb: 8_192,
            }),
        )
        .await?;

    let clamp = report.plan.clamp.expect("plan should be clamped");
    assert_eq!(clamp.requested_max_mb, 8_192);
    assert_eq!(clamp.applied_max_mb, 2_048);
    assert!(env.launch_args("survival").starts_with("-Xms2048M -Xmx2048M"));

    manager.stop("survival").await?;
    Ok(())
}

#[tokio::test]
async fn test_host_memory_read_on_every_start() -> Result<()> {
    let env = TestEnv::new();
    env.add_server("survival", LONG_RUNNING);

    let mut host = common::MockHost::new();
    let mut readings = vec![16_384u64, 4_096].into_iter();
    host.expect_total_memory_mb()
        .times(2)
        .returning(move || Ok(readings.next().unwrap_or(4_096)));
    let manager = LifecycleManager::new(
        Workspaces::new(&env.config.paths),
        Arc::new(host),
        env.config.runtime.clone(),
        env.config.lifecycle.clone(),
    );

    let first = manager.start("survival", None).await?;
    manager.stop("survival").await?;
    let second = manager.start("survival", None).await?;
    manager.stop("survival").await?;

    assert_eq!(first.plan.max_heap_mb, 8_192);
    assert_eq!(second.plan.max_heap_mb, 2_048);
    Ok(())
}

#[tokio::test]
async fn test_host_failure_prevents_launch() {
    let env = TestEnv::new();
    env.add_server("survival", LONG_RUNNING);

    let mut host = common::MockHost::new();
    host.expect_total_memory_mb()
        .returning(|| Err(Error::HostResources("sampling unavailable".to_string())));
    let manager = LifecycleManager::new(
        Workspaces::new(&env.config.paths),
        Arc::new(host),
        env.config.runtime.clone(),
        env.config.lifecycle.clone(),
    );

    let err = manager.start("survival", None).await.unwrap_err();

    assert!(matches!(err, Error::HostResources(_)));
    assert!(!env.record_path("survival").exists());
    assert!(!env.server_dir("survival").join("launch-args.txt").exists());
}

#[tokio::test]
async fn test_missing_runtime_is_spawn_failure() {
    let env = TestEnv::new();
    env.add_server("survival", LONG_RUNNING);
    let mut runtime = env.config.runtime.clone();
    runtime.executable = env.dir.path().join("no-such-java").display().to_string();
    let manager = LifecycleManager::new(
        Workspaces::new(&env.config.paths),
        Arc::new(host_with_memory(8_192)),
        runtime,
        env.config.lifecycle.clone(),
    );

    let err = manager.start("survival", None).await.unwrap_err();

    assert!(matches!(err, Error::SpawnFailed { .. }));
    assert!(!env.record_path("survival").exists());
}

#[tokio::test]
async fn test_events_are_recorded() -> Result<()> {
    let env = TestEnv::new();
    env.add_server("survival", LONG_RUNNING);
    env.add_server("broken", CRASHING);
    let manager = manager(&env, 8_192);

    manager.start("survival", None).await?;
    manager.stop("survival").await?;
    let _ = manager.start("broken", None).await;

    let events = manager.get_server_events("survival", None)?;
    let kinds: Vec<_> = events.iter().map(|e| e.event).collect();
    assert_eq!(
        kinds,
        vec![ServerLifecycleEvent::Stopped, ServerLifecycleEvent::Started]
    );

    let all = manager.get_all_events(Some(1))?;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name, "broken");
    assert_eq!(all[0].event, ServerLifecycleEvent::Failed);
    Ok(())
}

#[tokio::test]
async fn test_status_all_lists_every_server() -> Result<()> {
    let env = TestEnv::new();
    env.add_server("alpha", LONG_RUNNING);
    env.add_empty_server("beta");
    let manager = manager(&env, 8_192);

    manager.start("alpha", None).await?;
    let statuses = manager.status_all().await?;

    assert_eq!(
        statuses,
        vec![
            ("alpha".to_string(), ServerStatus::Running),
            ("beta".to_string(), ServerStatus::Stopped),
        ]
    );

    manager.stop("alpha").await?;
    Ok(())
}

#[tokio::test]
async fn test_server_exiting_after_confirmation_reads_unknown() -> Result<()> {
    let env = TestEnv::new();
    env.add_server("short", "echo \"Done loading\"\nsleep 2\n");
    let manager = manager(&env, 8_192);

    let report = manager.start("short", None).await?;
    assert!(env.record_path("short").exists());
    assert!(common::eventually(Duration::from_secs(5), || !pid_alive(report.pid)).await);

    assert_eq!(manager.output("short").await?, vec!["Done loading"]);
    assert_eq!(manager.status("short").await?, ServerStatus::Unknown);
    assert!(!env.record_path("short").exists());
    assert_eq!(manager.status("short").await?, ServerStatus::Stopped);
    assert_eq!(manager.stop("short").await?, StopOutcome::NotRunning);
    Ok(())
}

#[tokio::test]
async fn test_status_does_not_wait_for_start() -> Result<()> {
    let env = TestEnv::new();
    env.add_server("survival", LONG_RUNNING);
    let manager = manager(&env, 8_192);
    let window = env.config.lifecycle.confirmation_window();

    let (started, during) = tokio::join!(manager.start("survival", None), async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let begun = std::time::Instant::now();
        let status = tokio::time::timeout(Duration::from_millis(500), manager.status("survival")).await;
        (status, begun.elapsed())
    });

    let report = started?;
    let (status, elapsed) = during;
    let status = status.expect("status waited for the start to finish")?;
    assert_eq!(status, ServerStatus::Running);
    assert!(elapsed < window, "{:?}", elapsed);
    // The start still owns the handle and the record.
    assert_eq!(manager.status("survival").await?, ServerStatus::Running);
    assert!(matches!(manager.stop("survival").await?, StopOutcome::Stopped { pid, .. } if pid == report.pid));
    Ok(())
}
