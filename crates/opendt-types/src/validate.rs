//! Ingress validation.
//!
//! Messages are validated once, at the boundary where they enter the core;
//! everything downstream treats the records as plain values.

use crate::power::PowerSample;
use crate::task::Task;
use crate::topology::Topology;

/// A malformed inbound record. Never fatal: the caller drops the record and
/// bumps a counter.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("task {id}: {detail}")]
    Task { id: i64, detail: String },

    #[error("power sample at {at}: {detail}")]
    Power { at: String, detail: String },

    #[error("topology: {detail}")]
    Topology { detail: String },
}

pub fn validate_task(task: &Task) -> Result<(), ValidationError> {
    let fail = |detail: String| ValidationError::Task {
        id: task.id,
        detail,
    };
    if task.duration < 0 {
        return Err(fail(format!("negative duration {}", task.duration)));
    }
    if task.cpu_count < 1 {
        return Err(fail(format!("cpu_count {} < 1", task.cpu_count)));
    }
    if task.cpu_capacity < 0.0 || !task.cpu_capacity.is_finite() {
        return Err(fail(format!("invalid cpu_capacity {}", task.cpu_capacity)));
    }
    if task.mem_capacity < 0 {
        return Err(fail(format!("negative mem_capacity {}", task.mem_capacity)));
    }
    for fragment in &task.fragments {
        if fragment.duration < 0 {
            return Err(fail(format!(
                "fragment {} has negative duration",
                fragment.id
            )));
        }
        if fragment.cpu_count < 1 {
            return Err(fail(format!("fragment {} cpu_count < 1", fragment.id)));
        }
        if fragment.cpu_usage < 0.0 || !fragment.cpu_usage.is_finite() {
            return Err(fail(format!(
                "fragment {} has invalid cpu_usage",
                fragment.id
            )));
        }
    }
    Ok(())
}

pub fn validate_power_sample(sample: &PowerSample) -> Result<(), ValidationError> {
    let fail = |detail: String| ValidationError::Power {
        at: sample.timestamp.to_rfc3339(),
        detail,
    };
    if sample.power_draw < 0.0 || !sample.power_draw.is_finite() {
        return Err(fail(format!("invalid power_draw {}", sample.power_draw)));
    }
    if sample.energy_usage < 0.0 || !sample.energy_usage.is_finite() {
        return Err(fail(format!("invalid energy_usage {}", sample.energy_usage)));
    }
    Ok(())
}

pub fn validate_topology(topology: &Topology) -> Result<(), ValidationError> {
    let fail = |detail: String| ValidationError::Topology { detail };
    if topology.clusters.is_empty() {
        return Err(fail("no clusters".into()));
    }
    for cluster in &topology.clusters {
        if cluster.hosts.is_empty() {
            return Err(fail(format!("cluster '{}' has no hosts", cluster.name)));
        }
        for host in &cluster.hosts {
            if host.count < 1 {
                return Err(fail(format!("host '{}' count < 1", host.name)));
            }
            if host.cpu.core_count < 1 {
                return Err(fail(format!("host '{}' core_count < 1", host.name)));
            }
            if host.cpu.core_speed <= 0.0 {
                return Err(fail(format!("host '{}' core_speed <= 0", host.name)));
            }
            if host.memory.memory_size <= 0 {
                return Err(fail(format!("host '{}' memory_size <= 0", host.name)));
            }
            let pm = &host.cpu_power_model;
            if pm.power <= 0.0 || pm.max_power <= 0.0 {
                return Err(fail(format!("host '{}' power bounds <= 0", host.name)));
            }
            if pm.idle_power < 0.0 {
                return Err(fail(format!("host '{}' idle_power < 0", host.name)));
            }
            if !(0.0..=1.0).contains(&pm.asym_util) {
                return Err(fail(format!(
                    "host '{}' asym_util {} outside [0, 1]",
                    host.name, pm.asym_util
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Fragment;
    use chrono::DateTime;

    fn base_task() -> Task {
        Task {
            id: 1,
            submission_time: DateTime::from_timestamp(0, 0).unwrap(),
            duration: 1000,
            cpu_count: 2,
            cpu_capacity: 2400.0,
            mem_capacity: 1024,
            fragments: vec![],
        }
    }

    #[test]
    fn accepts_well_formed_task() {
        assert_eq!(validate_task(&base_task()), Ok(()));
    }

    #[test]
    fn rejects_zero_cpu_count() {
        let mut task = base_task();
        task.cpu_count = 0;
        assert!(validate_task(&task).is_err());
    }

    #[test]
    fn rejects_bad_fragment() {
        let mut task = base_task();
        task.fragments.push(Fragment {
            id: 1,
            task_id: 1,
            duration: -5,
            cpu_count: 1,
            cpu_usage: 0.5,
        });
        assert!(validate_task(&task).is_err());
    }

    #[test]
    fn rejects_negative_power() {
        let sample = PowerSample {
            timestamp: DateTime::from_timestamp(0, 0).unwrap(),
            power_draw: -1.0,
            energy_usage: 0.0,
        };
        assert!(validate_power_sample(&sample).is_err());
    }

    #[test]
    fn rejects_asym_util_out_of_range() {
        let mut topology = crate::topology::tests::sample_topology();
        topology.clusters[0].hosts[0].cpu_power_model.asym_util = 1.5;
        assert!(validate_topology(&topology).is_err());
    }
}
