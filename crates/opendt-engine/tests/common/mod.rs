//! Shared fixtures for the integration suites: a scripted simulation
//! backend and message builders.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::DateTime;

use opendt_sim::{SimulationBackend, SimulationSpec};
use opendt_types::{
    Cluster, Cpu, CpuPowerModel, Host, Memory, PowerModelType, PowerSample, SeriesPoint,
    SimulationResult, Task, Topology, WorkloadMessage,
};

pub const MIN_MS: i64 = 60_000;

type Responder = Box<dyn Fn(&SimulationSpec) -> opendt_sim::Result<SimulationResult> + Send + Sync>;
type DelayFn = Box<dyn Fn(&SimulationSpec) -> StdDuration + Send + Sync>;

/// A scripted [`SimulationBackend`] that records every invocation.
pub struct FakeBackend {
    invocations: Mutex<Vec<SimulationSpec>>,
    responder: Responder,
    delay: Option<DelayFn>,
}

impl FakeBackend {
    pub fn ok() -> Arc<Self> {
        Self::with(|_| Ok(ok_result()))
    }

    pub fn with<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&SimulationSpec) -> opendt_sim::Result<SimulationResult> + Send + Sync + 'static,
    {
        Arc::new(Self {
            invocations: Mutex::new(Vec::new()),
            responder: Box::new(responder),
            delay: None,
        })
    }

    pub fn with_delays<F, D>(responder: F, delay: D) -> Arc<Self>
    where
        F: Fn(&SimulationSpec) -> opendt_sim::Result<SimulationResult> + Send + Sync + 'static,
        D: Fn(&SimulationSpec) -> StdDuration + Send + Sync + 'static,
    {
        Arc::new(Self {
            invocations: Mutex::new(Vec::new()),
            responder: Box::new(responder),
            delay: Some(Box::new(delay)),
        })
    }

    pub fn invocations(&self) -> Vec<SimulationSpec> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl SimulationBackend for FakeBackend {
    async fn simulate(&self, spec: SimulationSpec) -> opendt_sim::Result<SimulationResult> {
        self.invocations.lock().unwrap().push(spec.clone());
        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(&spec)).await;
        }
        (self.responder)(&spec)
    }
}

pub fn ok_result() -> SimulationResult {
    SimulationResult {
        energy_kwh: 1.25,
        max_power_w: 400.0,
        mean_cpu_util: 0.4,
        runtime_hours: 0.1,
        power_series: vec![SeriesPoint(0, 380.0), SeriesPoint(150_000, 400.0)],
        ..SimulationResult::empty_ok()
    }
}

/// An OK result whose power series is flat at `watts` over `minutes` whole
/// minutes starting at epoch zero.
pub fn flat_power_result(watts: f64, minutes: i64) -> SimulationResult {
    SimulationResult {
        max_power_w: watts,
        power_series: (0..=minutes).map(|m| SeriesPoint(m * MIN_MS, watts)).collect(),
        ..SimulationResult::empty_ok()
    }
}

pub fn topology(asym_util: f64) -> Topology {
    Topology {
        clusters: vec![Cluster {
            name: "C01".into(),
            power_source: None,
            hosts: vec![Host {
                name: "H01".into(),
                count: 4,
                cpu: Cpu {
                    core_count: 32,
                    core_speed: 2_400.0,
                },
                memory: Memory {
                    memory_size: 256_000_000_000,
                },
                cpu_power_model: CpuPowerModel {
                    model_type: PowerModelType::Asymptotic,
                    power: 350.0,
                    idle_power: 120.0,
                    max_power: 500.0,
                    asym_util,
                    dvfs: false,
                },
            }],
        }],
    }
}

pub fn asym_util_of(topology: &Topology) -> f64 {
    topology.clusters[0].hosts[0].cpu_power_model.asym_util
}

pub fn task_message(id: i64, offset_ms: i64) -> WorkloadMessage {
    let timestamp = DateTime::from_timestamp_millis(offset_ms).unwrap();
    WorkloadMessage::Task {
        timestamp,
        task: Task {
            id,
            submission_time: timestamp,
            duration: 60_000,
            cpu_count: 2,
            cpu_capacity: 2_400.0,
            mem_capacity: 4_096,
            fragments: vec![],
        },
    }
}

pub fn heartbeat(offset_ms: i64) -> WorkloadMessage {
    WorkloadMessage::Heartbeat {
        timestamp: DateTime::from_timestamp_millis(offset_ms).unwrap(),
        task: None,
    }
}

pub fn power_sample(minute: i64, watts: f64) -> PowerSample {
    PowerSample {
        timestamp: DateTime::from_timestamp_millis(minute * MIN_MS).unwrap(),
        power_draw: watts,
        energy_usage: watts * 60.0,
    }
}
