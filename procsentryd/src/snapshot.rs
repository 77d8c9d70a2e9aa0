//! Host and per-process metric sampling.
//!
//! CPU percentages come from sysinfo's delta accounting: each refresh reports
//! usage since the previous refresh of the same [`System`], so a snapshot never
//! sleeps waiting for a sampling window. The first snapshot after construction
//! reports deltas against the priming refresh done in [`Snapshotter::new`].

use crate::collectors::gpu;
use crate::types::{ProcessRecord, ProcessTable, SystemSnapshot, current_epoch_secs};
use log::debug;
use std::path::Path;
use sysinfo::{
    Disks, Networks, Process, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System,
    UpdateKind, Users,
};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const BYTES_PER_GB: f64 = BYTES_PER_MB * 1024.0;

/// Anything able to produce a consistent read of system and process state.
pub trait ProcessSource: Send {
    fn snapshot(&mut self) -> (SystemSnapshot, ProcessTable);

    /// Process rows only; sources may override this with a cheaper path.
    fn process_table(&mut self) -> ProcessTable {
        self.snapshot().1
    }
}

pub struct Snapshotter {
    system: System,
    users: Users,
    gpu_enabled: bool,
}

impl Snapshotter {
    pub fn new(gpu_enabled: bool) -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh_kind());
        Self {
            system,
            users: Users::new_with_refreshed_list(),
            gpu_enabled,
        }
    }

    fn refresh_processes(&mut self) -> ProcessTable {
        self.system
            .refresh_processes_specifics(ProcessesToUpdate::All, true, refresh_kind());

        let now = current_epoch_secs();
        let records: Vec<ProcessRecord> = self
            .system
            .processes()
            .values()
            .filter_map(|process| record_for(process, &self.users, now))
            .collect();

        ProcessTable::new(records)
    }

    fn system_stats(&mut self) -> SystemSnapshot {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let total = self.system.total_memory() as f64;
        let used = self.system.used_memory() as f64;
        let mem_percent = if total > 0.0 {
            (used / total * 100.0) as f32
        } else {
            0.0
        };

        let (disk_percent, disk_free_gb) = root_disk_usage();
        let (net_tx_bytes, net_rx_bytes) = network_totals();

        SystemSnapshot {
            timestamp: current_epoch_secs(),
            cpu_percent: round1(self.system.global_cpu_usage()),
            cpu_per_core: self
                .system
                .cpus()
                .iter()
                .map(|cpu| round1(cpu.cpu_usage()))
                .collect(),
            mem_percent: round1(mem_percent),
            mem_used_mb: used / BYTES_PER_MB,
            mem_available_mb: self.system.available_memory() as f64 / BYTES_PER_MB,
            mem_total_mb: total / BYTES_PER_MB,
            disk_percent,
            disk_free_gb,
            net_tx_bytes,
            net_rx_bytes,
            process_count: self
                .system
                .processes()
                .values()
                .filter(|p| p.thread_kind().is_none())
                .count(),
            boot_time: System::boot_time(),
            gpu: if self.gpu_enabled { gpu::query() } else { None },
        }
    }
}

impl ProcessSource for Snapshotter {
    fn snapshot(&mut self) -> (SystemSnapshot, ProcessTable) {
        let table = self.refresh_processes();
        let stats = self.system_stats();
        (stats, table)
    }

    fn process_table(&mut self) -> ProcessTable {
        self.refresh_processes()
    }
}

fn refresh_kind() -> ProcessRefreshKind {
    ProcessRefreshKind::nothing()
        .without_tasks()
        .with_cpu()
        .with_memory()
        .with_disk_usage()
        .with_user(UpdateKind::OnlyIfNotSet)
}

/// Convert one sysinfo process into a row. `None` means the process vanished
/// or became unreadable mid-scan and is left out of this tick.
/// Threads that sysinfo lists as tasks are skipped too.
fn record_for(process: &Process, users: &Users, now: u64) -> Option<ProcessRecord> {
    if process.thread_kind().is_some()
        || matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
    {
        return None;
    }

    let pid = process.pid().as_u32();
    let (threads, ctx_switches) = scheduler_counters(pid)?;
    let disk = process.disk_usage();
    let age_secs = now.saturating_sub(process.start_time());

    Some(ProcessRecord {
        pid,
        name: process.name().to_string_lossy().into_owned(),
        cpu: round1(process.cpu_usage()),
        memory_mb: (process.memory() as f64 / BYTES_PER_MB * 10.0).round() / 10.0,
        threads,
        ctx_switches,
        age_min: (age_secs as f64 / 60.0 * 10.0).round() / 10.0,
        disk_read_bytes: disk.total_read_bytes,
        disk_write_bytes: disk.total_written_bytes,
        parent: process.parent().map(|p| p.as_u32()),
        status: process.status().to_string().to_lowercase(),
        user: process
            .user_id()
            .and_then(|uid| users.get_user_by_id(uid))
            .map(|user| user.name().to_string()),
    })
}

/// Thread count and voluntary + involuntary context switches.
#[cfg(target_os = "linux")]
fn scheduler_counters(pid: u32) -> Option<(u64, u64)> {
    let pid = i32::try_from(pid).ok()?;
    match procfs::process::Process::new(pid).and_then(|p| p.status()) {
        Ok(status) => {
            let switches = status.voluntary_ctxt_switches.unwrap_or(0)
                + status.nonvoluntary_ctxt_switches.unwrap_or(0);
            Some((status.threads, switches))
        }
        Err(procfs::ProcError::NotFound(_)) | Err(procfs::ProcError::PermissionDenied(_)) => {
            debug!("[snapshot] pid {pid} vanished or denied mid-scan");
            None
        }
        Err(err) => {
            debug!("[snapshot] pid {pid} status unreadable: {err}");
            Some((0, 0))
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn scheduler_counters(_pid: u32) -> Option<(u64, u64)> {
    Some((0, 0))
}

fn root_disk_usage() -> (f32, f64) {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .find(|disk| disk.mount_point() == Path::new("/"))
        .or_else(|| disks.list().first())
        .map(|disk| {
            let total = disk.total_space() as f64;
            let free = disk.available_space() as f64;
            let percent = if total > 0.0 {
                ((total - free) / total * 100.0) as f32
            } else {
                0.0
            };
            (round1(percent), free / BYTES_PER_GB)
        })
        .unwrap_or((0.0, 0.0))
}

fn network_totals() -> (u64, u64) {
    let networks = Networks::new_with_refreshed_list();
    networks
        .list()
        .values()
        .fold((0u64, 0u64), |(tx, rx), data| {
            (
                tx.saturating_add(data.total_transmitted()),
                rx.saturating_add(data.total_received()),
            )
        })
}

fn round1(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_contains_current_process() {
        let mut snapshotter = Snapshotter::new(false);
        let (stats, table) = snapshotter.snapshot();
        let own = std::process::id();

        assert!(table.iter().any(|p| p.pid == own));
        assert!(stats.process_count >= table.len());
        assert!(stats.mem_total_mb > 0.0);
        assert!(stats.gpu.is_none());
    }

    #[test]
    fn table_is_sorted_by_memory() {
        let mut snapshotter = Snapshotter::new(false);
        let table = snapshotter.process_table();
        let sorted = table
            .records()
            .windows(2)
            .all(|w| w[0].memory_mb >= w[1].memory_mb);
        assert!(sorted);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn own_process_reports_threads() {
        let mut snapshotter = Snapshotter::new(false);
        let table = snapshotter.process_table();
        let own = table
            .iter()
            .find(|p| p.pid == std::process::id())
            .expect("own process present");
        assert!(own.threads >= 1);
        assert!(own.memory_mb > 0.0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn threads_are_not_listed_as_processes() {
        use std::sync::{Arc, Barrier};

        let release = Arc::new(Barrier::new(5));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let release = release.clone();
                std::thread::spawn(move || release.wait())
            })
            .collect();

        let own = std::process::id();
        let tids: Vec<u32> = std::fs::read_dir("/proc/self/task")
            .unwrap()
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
            .filter(|tid| *tid != own)
            .collect();
        assert!(tids.len() >= 4);

        let mut snapshotter = Snapshotter::new(false);
        let (stats, table) = snapshotter.snapshot();
        release.wait();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(table.iter().filter(|p| p.pid == own).count(), 1);
        assert!(
            table.iter().all(|p| !tids.contains(&p.pid)),
            "thread ids leaked into the process table"
        );
        assert!(stats.process_count >= table.len());
    }

    #[test]
    fn scheduler_counters_skip_missing_pid() {
        #[cfg(target_os = "linux")]
        assert!(scheduler_counters(4_194_305).is_none());
        #[cfg(not(target_os = "linux"))]
        assert!(scheduler_counters(4_194_305).is_some());
    }
}
