//! Telemetry aggregator
//!
//! Merges a frequently-refreshed fast metric set (CPU, memory, temperature,
//! uptime) with an infrequently-refreshed slow set (disk usage, active
//! network interfaces) into one snapshot broadcast to every open channel.
//!
//! The slow set is cached between refreshes; staleness of up to one slow
//! interval is acceptable. If either read fails the previous cached values
//! are retained: a failure is logged and never surfaced to clients, so
//! there is no broadcast gap and no missing field, even before the first
//! slow refresh completes (defaults are served).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use sysinfo::{Components, Disks, Networks, System};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::{Error, Result};
use crate::events::AgentEvent;
use crate::registry::SessionRegistry;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One active network interface and its address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetInterface {
    /// Interface name (e.g. `eth0`)
    pub iface: String,
    /// Primary address on that interface
    pub address: String,
}

/// Metrics refreshed every fast interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FastMetrics {
    /// Overall CPU load percentage
    pub cpu_pct: f32,
    /// Memory in use as a percentage of total
    pub mem_pct: f32,
    /// Memory in use, GiB
    pub mem_used_gb: f64,
    /// Total memory, GiB
    pub mem_total_gb: f64,
    /// Hottest component temperature, °C (0 when no sensor reports)
    pub temp_c: f32,
    /// Seconds since boot
    pub uptime_secs: u64,
}

/// Metrics refreshed every slow interval and cached in between.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SlowMetrics {
    /// Root filesystem usage, GiB
    pub disk_used_gb: f64,
    /// Root filesystem capacity, GiB
    pub disk_total_gb: f64,
    /// Active non-loopback interfaces
    pub interfaces: Vec<NetInterface>,
}

/// The merged fast+slow value broadcast to all channels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    /// Overall CPU load percentage
    pub cpu_pct: f32,
    /// Memory in use as a percentage of total
    pub mem_pct: f32,
    /// Memory in use, GiB
    pub mem_used_gb: f64,
    /// Total memory, GiB
    pub mem_total_gb: f64,
    /// Hottest component temperature, °C
    pub temp_c: f32,
    /// Seconds since boot
    pub uptime_secs: u64,
    /// Root filesystem usage, GiB
    pub disk_used_gb: f64,
    /// Root filesystem capacity, GiB
    pub disk_total_gb: f64,
    /// Active non-loopback interfaces
    pub interfaces: Vec<NetInterface>,
}

impl TelemetrySnapshot {
    /// Merge a fast reading with the cached slow set.
    pub fn merge(fast: &FastMetrics, slow: &SlowMetrics) -> Self {
        Self {
            cpu_pct: fast.cpu_pct,
            mem_pct: fast.mem_pct,
            mem_used_gb: fast.mem_used_gb,
            mem_total_gb: fast.mem_total_gb,
            temp_c: fast.temp_c,
            uptime_secs: fast.uptime_secs,
            disk_used_gb: slow.disk_used_gb,
            disk_total_gb: slow.disk_total_gb,
            interfaces: slow.interfaces.clone(),
        }
    }
}

/// Collaborator interface over the host's metric sources.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Read the fast metric set (CPU, memory, temperature, uptime).
    async fn fast(&self) -> Result<FastMetrics>;
    /// Read the slow metric set (disk usage, network interfaces).
    async fn slow(&self) -> Result<SlowMetrics>;
}

/// Production provider backed by `sysinfo`. Reads run on the blocking pool.
#[derive(Debug, Default)]
pub struct SystemMetrics;

#[async_trait]
impl MetricsProvider for SystemMetrics {
    async fn fast(&self) -> Result<FastMetrics> {
        tokio::task::spawn_blocking(collect_fast)
            .await
            .map_err(|e| Error::Telemetry(e.to_string()))
    }

    async fn slow(&self) -> Result<SlowMetrics> {
        tokio::task::spawn_blocking(collect_slow)
            .await
            .map_err(|e| Error::Telemetry(e.to_string()))
    }
}

fn collect_fast() -> FastMetrics {
    let mut sys = System::new();
    sys.refresh_cpu_all();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_all();
    sys.refresh_memory();

    let total = sys.total_memory();
    let used = sys.used_memory();
    let mem_pct = if total > 0 {
        (used as f64 / total as f64 * 100.0) as f32
    } else {
        0.0
    };

    let components = Components::new_with_refreshed_list();
    let temp_c = components
        .iter()
        .map(|c| c.temperature())
        .fold(0.0f32, f32::max);

    FastMetrics {
        cpu_pct: sys.global_cpu_usage(),
        mem_pct,
        mem_used_gb: used as f64 / GIB,
        mem_total_gb: total as f64 / GIB,
        temp_c,
        uptime_secs: System::uptime(),
    }
}

fn collect_slow() -> SlowMetrics {
    let disks = Disks::new_with_refreshed_list();
    // Prefer the root mount; fall back to the first disk.
    let root = disks
        .iter()
        .find(|d| d.mount_point() == std::path::Path::new("/"))
        .or_else(|| disks.iter().next());
    let (disk_used_gb, disk_total_gb) = match root {
        Some(d) => {
            let total = d.total_space();
            let used = total.saturating_sub(d.available_space());
            (used as f64 / GIB, total as f64 / GIB)
        }
        None => (0.0, 0.0),
    };

    let networks = Networks::new_with_refreshed_list();
    let mut interfaces: Vec<NetInterface> = networks
        .iter()
        .filter(|(name, _)| *name != "lo")
        .filter_map(|(name, data)| {
            data.ip_networks()
                .iter()
                .find(|ip| !ip.addr.is_loopback())
                .map(|ip| NetInterface {
                    iface: name.clone(),
                    address: ip.addr.to_string(),
                })
        })
        .collect();
    interfaces.sort_by(|a, b| a.iface.cmp(&b.iface));

    SlowMetrics {
        disk_used_gb,
        disk_total_gb,
        interfaces,
    }
}

/// Merges fast and slow readings and broadcasts to all registered channels.
///
/// The slow cache is the only state shared across channels; it is written
/// only by `refresh_slow` and read-cloned by `refresh_fast`, with the lock
/// held just for the assignment.
pub struct TelemetryAggregator {
    provider: Arc<dyn MetricsProvider>,
    registry: SessionRegistry,
    slow_cache: RwLock<SlowMetrics>,
}

impl TelemetryAggregator {
    /// Create an aggregator over the given provider and channel registry.
    pub fn new(provider: Arc<dyn MetricsProvider>, registry: SessionRegistry) -> Self {
        Self {
            provider,
            registry,
            slow_cache: RwLock::new(SlowMetrics::default()),
        }
    }

    /// Refresh the cached slow metric set.
    pub async fn refresh_slow(&self) -> Result<()> {
        match self.provider.slow().await {
            Ok(slow) => {
                *self.slow_cache.write().await = slow;
            }
            Err(e) => {
                warn!(error = %e, "slow telemetry refresh failed; serving cached values");
            }
        }
        Ok(())
    }

    /// Read fast metrics, merge with the cached slow set, broadcast to all.
    pub async fn refresh_fast(&self) -> Result<()> {
        match self.provider.fast().await {
            Ok(fast) => {
                let slow = self.slow_cache.read().await.clone();
                let stats = TelemetrySnapshot::merge(&fast, &slow);
                self.registry.broadcast(AgentEvent::Telemetry { stats }).await;
            }
            Err(e) => {
                warn!(error = %e, "fast telemetry refresh failed; skipping broadcast");
            }
        }
        Ok(())
    }
}
