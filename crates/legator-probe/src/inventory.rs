//! Best-effort host inventory collection.
//!
//! Everything here degrades gracefully: a probe on an unusual host reports
//! whatever it can read and leaves the rest empty.

use legator_wire::{InventorySnapshot, NetworkInterface};
use std::collections::BTreeMap;

/// The host name, or `unknown` when it cannot be read.
#[must_use]
pub fn hostname() -> String {
    std::fs::read_to_string("/etc/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Collect a snapshot of this host.
#[must_use]
pub fn collect(labels: BTreeMap<String, String>) -> InventorySnapshot {
    InventorySnapshot {
        hostname: hostname(),
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        kernel: read_trimmed("/proc/sys/kernel/osrelease"),
        cpu_count: u32::try_from(
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(0),
        )
        .unwrap_or(0),
        mem_total_kb: meminfo_total_kb(),
        disk_total_kb: 0,
        interfaces: interfaces(),
        services: Vec::new(),
        users: users(),
        package_count: None,
        labels,
        k8s_pod: k8s_pod_metadata(),
    }
}

fn read_trimmed(path: &str) -> String {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn meminfo_total_kb() -> u64 {
    let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") else {
        return 0;
    };
    meminfo
        .lines()
        .find(|l| l.starts_with("MemTotal:"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn interfaces() -> Vec<NetworkInterface> {
    let Ok(entries) = std::fs::read_dir("/sys/class/net") else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| NetworkInterface {
            name: entry.file_name().to_string_lossy().into_owned(),
            addresses: Vec::new(),
        })
        .collect()
}

fn users() -> Vec<String> {
    let Ok(passwd) = std::fs::read_to_string("/etc/passwd") else {
        return Vec::new();
    };
    passwd
        .lines()
        .filter_map(|line| line.split(':').next())
        .map(ToString::to_string)
        .collect()
}

fn k8s_pod_metadata() -> Option<BTreeMap<String, String>> {
    // The downward-API service account mount marks in-cluster pods.
    if !std::path::Path::new("/var/run/secrets/kubernetes.io/serviceaccount").exists() {
        return None;
    }
    let mut meta = BTreeMap::new();
    if let Ok(pod) = std::env::var("HOSTNAME") {
        meta.insert("pod".to_string(), pod);
    }
    if let Ok(ns) = std::fs::read_to_string(
        "/var/run/secrets/kubernetes.io/serviceaccount/namespace",
    ) {
        meta.insert("namespace".to_string(), ns.trim().to_string());
    }
    Some(meta)
}
