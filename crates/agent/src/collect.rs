//! Best-effort host measurements.
//!
//! Everything here reads `/proc` (or shells out to `df` for disk usage)
//! and degrades to `None` when a source is missing or unparseable. A
//! report with gaps is still worth sending; the server treats absent
//! fields as "no new information".

use std::fs;
use std::process::Command;

use tracing::debug;

use stakewatch_common::report::{ServiceStatus, SoftwareVersions, SystemMetrics};

// ════════════════════════════════════════════════════════════════════════════
// SYSTEM METRICS
// ════════════════════════════════════════════════════════════════════════════

/// Gather cpu/ram/disk usage, each independently best-effort.
pub fn system_metrics() -> SystemMetrics {
    SystemMetrics {
        cpu_percent: cpu_percent(),
        ram_percent: ram_percent(),
        disk_percent: disk_percent(),
    }
}

/// 1-minute load average scaled by core count, as a 0..=100 percentage.
fn cpu_percent() -> Option<f64> {
    let loadavg = fs::read_to_string("/proc/loadavg").ok()?;
    let cpuinfo = fs::read_to_string("/proc/cpuinfo").ok()?;
    let cores = count_cores(&cpuinfo);
    parse_loadavg(&loadavg, cores)
}

fn count_cores(cpuinfo: &str) -> usize {
    let n = cpuinfo
        .lines()
        .filter(|l| l.starts_with("processor"))
        .count();
    n.max(1)
}

fn parse_loadavg(loadavg: &str, cores: usize) -> Option<f64> {
    let load: f64 = loadavg.split_whitespace().next()?.parse().ok()?;
    Some((load / cores as f64 * 100.0).clamp(0.0, 100.0))
}

fn ram_percent() -> Option<f64> {
    let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo(&meminfo)
}

fn parse_meminfo(meminfo: &str) -> Option<f64> {
    let total = meminfo_field(meminfo, "MemTotal:")?;
    let available = meminfo_field(meminfo, "MemAvailable:")?;
    if total == 0.0 {
        return None;
    }
    Some(((1.0 - available / total) * 100.0).clamp(0.0, 100.0))
}

fn meminfo_field(meminfo: &str, key: &str) -> Option<f64> {
    meminfo
        .lines()
        .find(|l| l.starts_with(key))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

/// Root filesystem usage via `df -P /`.
fn disk_percent() -> Option<f64> {
    let output = Command::new("df").args(["-P", "/"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    parse_df(&String::from_utf8_lossy(&output.stdout))
}

fn parse_df(df: &str) -> Option<f64> {
    // POSIX format: header line, then one data line whose fifth column
    // is "NN%"
    let line = df.lines().nth(1)?;
    let used = line.split_whitespace().nth(4)?;
    used.strip_suffix('%')?.parse().ok()
}

// ════════════════════════════════════════════════════════════════════════════
// SERVICES AND VERSIONS
// ════════════════════════════════════════════════════════════════════════════

/// Liveness of the configured client processes, by `/proc/<pid>/comm` scan.
///
/// A `None` process name means "not configured here", which reports as
/// `None` rather than `false` so the server keeps whatever it knew.
pub fn service_status(execution: Option<&str>, consensus: Option<&str>) -> ServiceStatus {
    ServiceStatus {
        execution_running: execution.map(process_running),
        consensus_running: consensus.map(process_running),
    }
}

fn process_running(name: &str) -> bool {
    let entries = match fs::read_dir("/proc") {
        Ok(e) => e,
        Err(_) => return false,
    };
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        if !file_name.to_string_lossy().chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let comm_path = entry.path().join("comm");
        if let Ok(comm) = fs::read_to_string(&comm_path) {
            if comm.trim() == name {
                return true;
            }
        }
    }
    false
}

/// Probe `<binary> --version` for the configured clients. Each probe is
/// independently best-effort; a missing binary just yields `None`.
pub fn software_versions(execution: Option<&str>, consensus: Option<&str>) -> SoftwareVersions {
    SoftwareVersions {
        execution: execution.and_then(probe_version),
        consensus: consensus.and_then(probe_version),
    }
}

fn probe_version(binary: &str) -> Option<String> {
    let output = Command::new(binary).arg("--version").output().ok()?;
    if !output.status.success() {
        debug!(binary, "version probe exited nonzero");
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(first.to_string())
    }
}
