//! External simulator driver.
//!
//! Converts `(Topology, [Task])` into a single simulator invocation: writes
//! the file-based input contract (topology.json, tasks/fragments parquet,
//! experiment.json) into a per-run scratch directory, launches the binary
//! with a discovered Java home, enforces the timeout with SIGTERM→SIGKILL
//! escalation, and parses the output parquet artifacts into a
//! [`SimulationResult`](opendt_types::SimulationResult).

pub mod backend;
pub mod driver;
pub mod error;
pub mod experiment;
pub mod java_home;
pub mod output;
pub mod scratch;
pub mod workload_io;

pub use backend::{SimulationBackend, SimulationSpec};
pub use driver::{OpenDcDriver, OpenDcDriverConfig};
pub use error::{Result, SimError};
pub use scratch::ScratchDir;
