//! Datacenter topology tree and its canonical fingerprint.
//!
//! Field names on the wire are the simulator's camelCase (`coreCount`,
//! `memorySize`, `modelType`, ...) so `topology.json` can be written verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::timestamp;

/// CPU power model family understood by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerModelType {
    Asymptotic,
    Linear,
    Mse,
    Square,
    Cubic,
    Sqrt,
}

/// How host CPU utilization translates to power draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuPowerModel {
    pub model_type: PowerModelType,
    /// Nominal power consumption in watts.
    pub power: f64,
    /// Power at 0% utilization in watts.
    pub idle_power: f64,
    /// Power at 100% utilization in watts.
    pub max_power: f64,
    /// Asymptotic utilization coefficient, in `[0, 1]`.
    #[serde(default = "default_asym_util")]
    pub asym_util: f64,
    /// Dynamic voltage and frequency scaling.
    #[serde(default)]
    pub dvfs: bool,
}

fn default_asym_util() -> f64 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cpu {
    pub core_count: i32,
    /// Per-core speed in MHz.
    pub core_speed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// Memory size in bytes.
    pub memory_size: i64,
}

/// A host type within a cluster; `count` identical physical machines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub name: String,
    pub count: i32,
    pub cpu: Cpu,
    pub memory: Memory,
    pub cpu_power_model: CpuPowerModel,
}

/// Power source configuration carried through to the simulator untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerSource {
    pub carbon_trace_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    pub hosts: Vec<Host>,
    #[serde(rename = "powerSource", default, skip_serializing_if = "Option::is_none")]
    pub power_source: Option<PowerSource>,
}

/// The datacenter hardware description fed to the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub clusters: Vec<Cluster>,
}

impl Topology {
    /// Canonical JSON serialization: object keys sorted, numeric formatting
    /// fixed by `serde_json`. Equal topologies produce identical bytes.
    pub fn canonical_json(&self) -> serde_json::Result<String> {
        let value = serde_json::to_value(self)?;
        serde_json::to_string(&value)
    }

    /// Stable SHA-256 fingerprint of the canonical serialization, used as the
    /// cache discriminator and for change detection.
    pub fn fingerprint(&self) -> serde_json::Result<String> {
        let canonical = self.canonical_json()?;
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(digest.iter().fold(String::with_capacity(64), |mut acc, b| {
            use std::fmt::Write;
            let _ = write!(acc, "{b:02x}");
            acc
        }))
    }

    pub fn total_host_count(&self) -> i64 {
        self.clusters
            .iter()
            .flat_map(|c| c.hosts.iter())
            .map(|h| i64::from(h.count))
            .sum()
    }

    pub fn total_core_count(&self) -> i64 {
        self.clusters
            .iter()
            .flat_map(|c| c.hosts.iter())
            .map(|h| i64::from(h.count) * i64::from(h.cpu.core_count))
            .sum()
    }
}

/// Timestamped topology, the payload of both compacted topology channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub topology: Topology,
}

/// Compaction key shared by both topology channels: a single datacenter.
pub const DATACENTER_KEY: &str = "datacenter";
