use crate::error::{Error, Result};
use crate::host::{HostResources, HostSample};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

/// One reading of host-wide CPU and memory usage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MonitorReading {
    /// Fresh measurement
    Live(HostSample),
    /// Sampling failed; last known measurement
    Stale { sample: HostSample, error: String },
    /// Sampling failed and nothing was ever measured
    Unavailable { error: String },
}

impl MonitorReading {
    /// The measurement carried by the reading, fresh or not.
    pub fn sample(&self) -> Option<&HostSample> {
        match self {
            MonitorReading::Live(sample) | MonitorReading::Stale { sample, .. } => Some(sample),
            MonitorReading::Unavailable { .. } => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, MonitorReading::Live(_))
    }
}

impl fmt::Display for MonitorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorReading::Live(s) => {
                write!(f, "CPU: {:.1}% | RAM: {:.1}%", s.cpu_percent, s.memory_percent)
            }
            MonitorReading::Stale { sample, .. } => write!(
                f,
                "CPU: {:.1}% | RAM: {:.1}% (stale)",
                sample.cpu_percent, sample.memory_percent
            ),
            MonitorReading::Unavailable { .. } => write!(f, "CPU: n/a | RAM: n/a"),
        }
    }
}

/// Periodic host resource feed for display.
///
/// [`MonitorFeed::sample`] never fails: a sampling error degrades to the
/// last known measurement, or to [`MonitorReading::Unavailable`] before the
/// first successful one. [`MonitorFeed::start`] runs a background task that
/// publishes a reading every interval to all subscribers.
pub struct MonitorFeed {
    /// Host resource source
    host: Arc<dyn HostResources>,
    /// Polling interval of the background task
    interval: Duration,
    /// Last successful measurement
    last: Arc<Mutex<Option<HostSample>>>,
    /// Latest published reading
    sender: watch::Sender<MonitorReading>,
    /// Monitor task
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorFeed {
    /// Create a new monitor feed
    pub fn new(host: Arc<dyn HostResources>, interval: Duration) -> Self {
        let (sender, _) = watch::channel(MonitorReading::Unavailable {
            error: "no sample taken yet".to_string(),
        });
        Self {
            host,
            interval,
            last: Arc::new(Mutex::new(None)),
            sender,
            monitor_task: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Takes one measurement now.
    pub async fn sample(&self) -> MonitorReading {
        take_reading(self.host.as_ref(), &self.last).await
    }

    /// Receiver of the readings published by the background task.
    pub fn subscribe(&self) -> watch::Receiver<MonitorReading> {
        self.sender.subscribe()
    }

    /// Start the background task. Starting a running feed is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut task = self
            .monitor_task
            .lock()
            .map_err(|_| Error::Other("Failed to lock monitor task".to_string()))?;

        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }

        let host = Arc::clone(&self.host);
        let last = Arc::clone(&self.last);
        let sender = self.sender.clone();
        let period = self.interval;

        *task = Some(tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let reading = take_reading(host.as_ref(), &last).await;
                tracing::trace!(%reading, "Host sample");
                sender.send_replace(reading);
            }
        }));

        tracing::debug!(interval = ?self.interval, "Monitor feed started");
        Ok(())
    }

    /// Stop the background task
    pub fn stop(&self) -> Result<()> {
        let mut task = self
            .monitor_task
            .lock()
            .map_err(|_| Error::Other("Failed to lock monitor task".to_string()))?;

        if let Some(task) = task.take() {
            task.abort();
            tracing::debug!("Monitor feed stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.monitor_task
            .lock()
            .map(|task| task.as_ref().is_some_and(|t| !t.is_finished()))
            .unwrap_or(false)
    }
}

impl Drop for MonitorFeed {
    fn drop(&mut self) {
        if let Ok(mut task) = self.monitor_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

async fn take_reading(
    host: &dyn HostResources,
    last: &Mutex<Option<HostSample>>,
) -> MonitorReading {
    match host.sample().await {
        Ok(sample) => {
            if let Ok(mut last) = last.lock() {
                *last = Some(sample);
            }
            MonitorReading::Live(sample)
        }
        Err(e) => {
            let error = e.to_string();
            tracing::debug!(%error, "Host sampling failed");
            match last.lock().ok().and_then(|last| *last) {
                Some(sample) => MonitorReading::Stale { sample, error },
                None => MonitorReading::Unavailable { error },
            }
        }
    }
}
