//! Host resource source.
//!
//! The lifecycle core never measures the OS itself; it asks a
//! [`HostResources`] implementation. [`SystemHost`] is the production one,
//! backed by `sysinfo`.
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use sysinfo::System;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// One host-wide measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostSample {
    /// CPU usage across all cores since the previous sample.
    pub cpu_percent: f32,
    /// Share of physical memory in use.
    pub memory_percent: f32,
    pub total_memory_mb: u64,
    pub available_memory_mb: u64,
}

/// Provider of host memory and CPU figures.
#[async_trait]
pub trait HostResources: Send + Sync {
    /// Total physical memory in megabytes, read fresh on every call.
    async fn total_memory_mb(&self) -> Result<u64>;

    /// Instantaneous CPU and memory usage.
    async fn sample(&self) -> Result<HostSample>;
}

/// `sysinfo` implementation of [`HostResources`].
///
/// A single `System` is kept between calls: CPU usage is computed from the
/// difference between two refreshes, so the very first sample reports 0%.
#[derive(Clone)]
pub struct SystemHost {
    system: Arc<Mutex<System>>,
}

impl SystemHost {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    async fn with_system<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut System) -> T + Send + 'static,
    {
        let system = Arc::clone(&self.system);
        tokio::task::spawn_blocking(move || {
            let mut system = system
                .lock()
                .map_err(|_| Error::HostResources("Failed to lock system handle".to_string()))?;
            Ok(f(&mut system))
        })
        .await
        .map_err(|e| Error::HostResources(format!("Sampling task failed: {}", e)))?
    }
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostResources for SystemHost {
    async fn total_memory_mb(&self) -> Result<u64> {
        let total = self
            .with_system(|system| {
                system.refresh_memory();
                system.total_memory() / BYTES_PER_MB
            })
            .await?;

        if total == 0 {
            return Err(Error::HostResources(
                "Host reported zero total memory".to_string(),
            ));
        }
        Ok(total)
    }

    async fn sample(&self) -> Result<HostSample> {
        let (cpu, total, available, used) = self
            .with_system(|system| {
                system.refresh_cpu_usage();
                system.refresh_memory();
                (
                    system.global_cpu_usage(),
                    system.total_memory(),
                    system.available_memory(),
                    system.used_memory(),
                )
            })
            .await?;

        if total == 0 {
            return Err(Error::HostResources(
                "Host reported zero total memory".to_string(),
            ));
        }

        Ok(HostSample {
            cpu_percent: cpu,
            memory_percent: (used as f64 / total as f64 * 100.0) as f32,
            total_memory_mb: total / BYTES_PER_MB,
            available_memory_mb: available / BYTES_PER_MB,
        })
    }
}
