//! Inventory snapshot types pushed by probes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One network interface with its addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// Interface name, e.g. `eth0`.
    pub name: String,
    /// Assigned addresses in CIDR or plain form.
    #[serde(default)]
    pub addresses: Vec<String>,
}

/// A probe's view of its host, pushed on connect and every inventory tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    /// Host name.
    pub hostname: String,
    /// Operating system, e.g. `linux`.
    pub os: String,
    /// CPU architecture, e.g. `x86_64`.
    pub arch: String,
    /// Kernel release string.
    pub kernel: String,
    /// Logical CPU count.
    pub cpu_count: u32,
    /// Total memory in kibibytes.
    pub mem_total_kb: u64,
    /// Total disk capacity in kibibytes, summed over mounts.
    pub disk_total_kb: u64,
    /// Network interfaces.
    #[serde(default)]
    pub interfaces: Vec<NetworkInterface>,
    /// Names of detected services.
    #[serde(default)]
    pub services: Vec<String>,
    /// Local user names.
    #[serde(default)]
    pub users: Vec<String>,
    /// Count of installed packages, when a package manager was found.
    #[serde(default)]
    pub package_count: Option<u64>,
    /// Operator-assigned labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Pod metadata when the probe runs inside Kubernetes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s_pod: Option<BTreeMap<String, String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_round_trip() {
        let snap = InventorySnapshot {
            hostname: "web-1".into(),
            os: "linux".into(),
            arch: "x86_64".into(),
            kernel: "6.8.0".into(),
            cpu_count: 8,
            mem_total_kb: 16_384_000,
            disk_total_kb: 512_000_000,
            interfaces: vec![NetworkInterface {
                name: "eth0".into(),
                addresses: vec!["10.0.0.5/24".into()],
            }],
            services: vec!["nginx".into()],
            users: vec!["root".into(), "deploy".into()],
            package_count: Some(1423),
            labels: BTreeMap::from([("env".into(), "prod".into())]),
            k8s_pod: None,
        };
        let json = serde_json::to_string(&snap).unwrap();
        let back: InventorySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
        // Absent pod metadata is omitted entirely.
        assert!(!json.contains("k8s_pod"));
    }
}
