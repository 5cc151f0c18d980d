//! Process snapshot
//!
//! Collects the host's process table and reduces it to the top entries by
//! CPU usage for the per-channel process-watch job. Ranking and truncation
//! are pure so they can be tested without touching the OS.

use serde::Serialize;
use sysinfo::{ProcessesToUpdate, System, Users};

use crate::error::{Error, Result};

/// Maximum entries in one snapshot.
pub const MAX_SNAPSHOT_LEN: usize = 15;

/// One process in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessEntry {
    /// OS process id
    pub pid: u32,
    /// Executable name
    pub name: String,
    /// CPU usage percentage, one decimal
    pub cpu: f32,
    /// Memory usage as a percentage of total, one decimal
    pub mem: f32,
    /// Owning user name (empty when unresolvable)
    pub user: String,
}

/// Sort by CPU descending and truncate to [`MAX_SNAPSHOT_LEN`].
pub fn rank(mut entries: Vec<ProcessEntry>) -> Vec<ProcessEntry> {
    entries.sort_by(|a, b| b.cpu.partial_cmp(&a.cpu).unwrap_or(std::cmp::Ordering::Equal));
    entries.truncate(MAX_SNAPSHOT_LEN);
    entries
}

/// Collect the current top processes by CPU usage.
pub async fn top_processes() -> Result<Vec<ProcessEntry>> {
    let entries = tokio::task::spawn_blocking(collect)
        .await
        .map_err(|e| Error::Telemetry(e.to_string()))?;
    Ok(rank(entries))
}

fn collect() -> Vec<ProcessEntry> {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All);
    // CPU usage is measured between two refreshes.
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_processes(ProcessesToUpdate::All);
    sys.refresh_memory();

    let users = Users::new_with_refreshed_list();
    let total_memory = sys.total_memory();

    sys.processes()
        .values()
        .map(|p| {
            let mem_pct = if total_memory > 0 {
                p.memory() as f64 / total_memory as f64 * 100.0
            } else {
                0.0
            };
            let user = p
                .user_id()
                .and_then(|uid| users.get_user_by_id(uid))
                .map(|u| u.name().to_string())
                .unwrap_or_default();
            ProcessEntry {
                pid: p.pid().as_u32(),
                name: p.name().to_string_lossy().into_owned(),
                cpu: round1(p.cpu_usage()),
                mem: round1(mem_pct as f32),
                user,
            }
        })
        .collect()
}

fn round1(v: f32) -> f32 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pid: u32, cpu: f32) -> ProcessEntry {
        ProcessEntry {
            pid,
            name: format!("proc{pid}"),
            cpu,
            mem: 0.0,
            user: "root".to_string(),
        }
    }

    #[test]
    fn test_rank_orders_by_cpu_descending() {
        let ranked = rank(vec![
            entry(1, 3.2),
            entry(2, 9.9),
            entry(3, 1.0),
            entry(4, 9.9),
        ]);

        let cpus: Vec<f32> = ranked.iter().map(|e| e.cpu).collect();
        assert_eq!(cpus, vec![9.9, 9.9, 3.2, 1.0]);
    }

    #[test]
    fn test_rank_truncates_to_fifteen() {
        let entries = (0..40).map(|i| entry(i, i as f32)).collect();
        let ranked = rank(entries);

        assert_eq!(ranked.len(), MAX_SNAPSHOT_LEN);
        assert_eq!(ranked[0].cpu, 39.0);
    }

    #[test]
    fn test_round1() {
        assert_eq!(round1(3.24), 3.2);
        assert_eq!(round1(3.25), 3.3);
        assert_eq!(round1(0.0), 0.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_top_processes_bounded_and_sorted() {
        let procs = top_processes().await.unwrap();
        assert!(procs.len() <= MAX_SNAPSHOT_LEN);
        for pair in procs.windows(2) {
            assert!(pair[0].cpu >= pair[1].cpu);
        }
    }
}
