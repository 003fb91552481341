//! Current-topology cells with change notification.
//!
//! Two cells: `observed` (the real datacenter, fed by the observed-topology
//! channel) and `calibrated` (what the simulator runs against, fed by the
//! calibration engine). Each carries a fingerprint and a monotonically
//! increasing generation; setting an identical topology is a no-op. Change
//! notifications go through `tokio::sync::watch`, so subscriber handlers run
//! on the subscriber's own loop.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use opendt_types::Topology;

use crate::error::Result;

/// One cell's current value.
#[derive(Debug, Clone)]
pub struct TopologyCell {
    pub generation: u64,
    pub fingerprint: String,
    pub topology: Arc<Topology>,
}

struct Cells {
    observed: watch::Sender<Option<TopologyCell>>,
    calibrated: watch::Sender<Option<TopologyCell>>,
}

/// Holder of the observed and calibrated topology cells.
pub struct TopologyState {
    cells: Mutex<Cells>,
}

impl TopologyState {
    pub fn new() -> Self {
        let (observed, _) = watch::channel(None);
        let (calibrated, _) = watch::channel(None);
        Self {
            cells: Mutex::new(Cells {
                observed,
                calibrated,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Cells> {
        // A poisoned lock only means a panicked writer; the cells themselves
        // are always internally consistent, so recover the guard.
        self.cells.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Update the observed cell. Returns `true` when the fingerprint changed
    /// (and a new generation was published). The calibrated cell is
    /// initialized to a copy of the first observed topology.
    pub fn set_observed(&self, topology: Topology) -> Result<bool> {
        let fingerprint = topology.fingerprint()?;
        let cells = self.lock();
        let changed = set_cell(&cells.observed, fingerprint.clone(), &topology);
        if changed && cells.calibrated.borrow().is_none() {
            set_cell(&cells.calibrated, fingerprint, &topology);
            tracing::info!("Initialized calibrated topology from first observed snapshot");
        }
        Ok(changed)
    }

    /// Update the calibrated cell (only the calibration engine publishes
    /// these, via the compacted channel).
    pub fn set_calibrated(&self, topology: Topology) -> Result<bool> {
        let fingerprint = topology.fingerprint()?;
        let cells = self.lock();
        Ok(set_cell(&cells.calibrated, fingerprint, &topology))
    }

    pub fn observed(&self) -> watch::Receiver<Option<TopologyCell>> {
        self.lock().observed.subscribe()
    }

    pub fn calibrated(&self) -> watch::Receiver<Option<TopologyCell>> {
        self.lock()
            .calibrated
            .subscribe()
    }

    pub fn current_observed(&self) -> Option<TopologyCell> {
        self.lock()
            .observed
            .borrow()
            .clone()
    }

    pub fn current_calibrated(&self) -> Option<TopologyCell> {
        self.lock()
            .calibrated
            .borrow()
            .clone()
    }
}

impl Default for TopologyState {
    fn default() -> Self {
        Self::new()
    }
}

fn set_cell(
    cell: &watch::Sender<Option<TopologyCell>>,
    fingerprint: String,
    topology: &Topology,
) -> bool {
    let current = cell.borrow().clone();
    if let Some(existing) = &current {
        if existing.fingerprint == fingerprint {
            return false;
        }
    }
    let generation = current.map_or(1, |c| c.generation + 1);
    let _ = cell.send(Some(TopologyCell {
        generation,
        fingerprint,
        topology: Arc::new(topology.clone()),
    }));
    true
}
