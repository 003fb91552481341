//! The seam between the windowing/calibration engines and the simulator.

use std::sync::Arc;

use async_trait::async_trait;

use opendt_types::{SimulationResult, Task, Topology};

use crate::error::Result;

/// One simulation request: a topology and the cumulative task list, under a
/// caller-chosen run id that names the scratch/archive directory.
#[derive(Debug, Clone)]
pub struct SimulationSpec {
    pub run_id: String,
    pub topology: Arc<Topology>,
    pub tasks: Arc<Vec<Task>>,
}

/// Anything that can turn a [`SimulationSpec`] into a result.
///
/// The production implementation is [`OpenDcDriver`](crate::OpenDcDriver);
/// tests inject scripted fakes. A failed simulator *run* is an
/// `Ok(status=error)` result; `Err` is reserved for infrastructure failures
/// the caller may retry (scratch allocation, spawn failure).
#[async_trait]
pub trait SimulationBackend: Send + Sync {
    async fn simulate(&self, spec: SimulationSpec) -> Result<SimulationResult>;
}
