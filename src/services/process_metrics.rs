//! Process metrics probe.
//!
//! Samples CPU, resident memory, and network bytes for a pid over a short
//! window. Consumed by the status footer; a dead pid yields `None`, never
//! an error.

use std::time::Duration;

use serde::Serialize;
use sysinfo::{Pid, System};
use tokio::sync::Mutex;

/// One sample for a pid.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ProcessSample {
    pub pid: u32,
    /// CPU usage over the sample window, percent of one core.
    pub cpu_percent: f32,
    /// Resident set size in bytes.
    pub rss_bytes: u64,
    /// Bytes received, from `/proc/<pid>/net/dev` (Linux; zero elsewhere).
    pub net_rx_bytes: u64,
    /// Bytes transmitted, same source.
    pub net_tx_bytes: u64,
}

/// Samples process metrics via `sysinfo`.
///
/// CPU percentages need two refreshes separated by a window; the probe owns
/// its `System` so repeated samples reuse the previous refresh point.
pub struct ProcessMetricsProbe {
    system: Mutex<System>,
}

impl Default for ProcessMetricsProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMetricsProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Sample `pid` over `window`. Returns `None` when the process is gone.
    pub async fn sample(&self, pid: u32, window: Duration) -> Option<ProcessSample> {
        let sys_pid = Pid::from_u32(pid);

        {
            let mut system = self.system.lock().await;
            if !system.refresh_process(sys_pid) {
                return None;
            }
        }

        tokio::time::sleep(window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)).await;

        let mut system = self.system.lock().await;
        if !system.refresh_process(sys_pid) {
            return None;
        }
        let process = system.process(sys_pid)?;

        let (net_rx_bytes, net_tx_bytes) = read_proc_net_dev(pid).unwrap_or((0, 0));

        Some(ProcessSample {
            pid,
            cpu_percent: process.cpu_usage(),
            rss_bytes: process.memory(),
            net_rx_bytes,
            net_tx_bytes,
        })
    }
}

/// Sum rx/tx bytes across interfaces in the pid's network namespace.
#[cfg(target_os = "linux")]
fn read_proc_net_dev(pid: u32) -> Option<(u64, u64)> {
    let content = std::fs::read_to_string(format!("/proc/{pid}/net/dev")).ok()?;
    let mut rx = 0u64;
    let mut tx = 0u64;
    // First two lines are headers; data lines are "iface: rx ... tx ...".
    for line in content.lines().skip(2) {
        let Some((_, counters)) = line.split_once(':') else {
            continue;
        };
        let fields: Vec<&str> = counters.split_whitespace().collect();
        if fields.len() >= 9 {
            rx += fields[0].parse::<u64>().unwrap_or(0);
            tx += fields[8].parse::<u64>().unwrap_or(0);
        }
    }
    Some((rx, tx))
}

#[cfg(not(target_os = "linux"))]
fn read_proc_net_dev(_pid: u32) -> Option<(u64, u64)> {
    None
}
