//! Core orchestration crate for the OpenDT streaming pipeline.
//!
//! The window engine converts the workload stream, heartbeats, and the
//! current calibrated topology into a sequence of cumulative simulator
//! invocations, one per closed event-time window. The calibration engine
//! independently grid-searches a topology parameter against measured power
//! and promotes the best fit over the compacted calibrated-topology channel.

pub mod cache;
pub mod calibration;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod power_tracker;
pub mod sink;
pub mod topology_state;
pub mod window;

pub use cache::{CacheKey, ResultCache};
pub use calibration::{CalibrationConfig, CalibrationEngine, CalibrationEvent};
pub use config::Config;
pub use engine::{WindowEngine, WindowEngineConfig};
pub use error::{EngineError, Result};
pub use metrics::{CalibrationMetrics, EngineMetrics};
pub use power_tracker::PowerTracker;
pub use sink::{AggRow, OutputSink};
pub use topology_state::{TopologyCell, TopologyState};
pub use window::{WindowSet, WindowState};
