//! Experiment descriptor for the simulator binary.

use std::path::Path;

use serde_json::json;

use opendt_types::Topology;

use crate::error::Result;

/// Default export cadence of simulated metrics, in seconds.
pub const DEFAULT_EXPORT_INTERVAL_SECS: u64 = 150;

const EXPORTED_FILES: &[&str] = &["powerSource", "host", "service"];

/// Write `topology.json` exactly as the simulator expects it (the wire
/// representation is already camelCase).
pub fn write_topology_json(topology: &Topology, path: &Path) -> Result<()> {
    let payload = serde_json::to_vec_pretty(topology)?;
    std::fs::write(path, payload)?;
    Ok(())
}

/// Write `experiment.json` declaring the input paths, the export model, and
/// the run's output folder.
pub fn write_experiment_json(
    name: &str,
    workload_dir: &Path,
    topology_file: &Path,
    output_folder: &Path,
    export_interval_secs: u64,
    path: &Path,
) -> Result<()> {
    let experiment = json!({
        "name": name,
        "topologies": [{ "pathToFile": topology_file.to_string_lossy() }],
        "workloads": [{
            "pathToFile": workload_dir.to_string_lossy(),
            "type": "ComputeWorkload",
        }],
        "outputFolder": output_folder.to_string_lossy(),
        "exportModels": [{
            "exportInterval": export_interval_secs,
            "filesToExport": EXPORTED_FILES,
            "computeExportConfig": {
                "powerSourceExportColumns": ["energy_usage", "power_draw"],
            },
        }],
    });
    std::fs::write(path, serde_json::to_vec_pretty(&experiment)?)?;
    Ok(())
}
