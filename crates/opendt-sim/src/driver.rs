//! Simulator subprocess orchestration.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

use opendt_types::SimulationResult;

use crate::backend::{SimulationBackend, SimulationSpec};
use crate::error::{Result, SimError};
use crate::experiment::{write_experiment_json, write_topology_json, DEFAULT_EXPORT_INTERVAL_SECS};
use crate::java_home::detect_java_home;
use crate::output::parse_outputs;
use crate::scratch::ScratchDir;
use crate::workload_io::{write_fragments_parquet, write_tasks_parquet};

/// How much of the subprocess stderr is kept in an error result.
const STDERR_TAIL_BYTES: usize = 4096;

#[derive(Debug, Clone)]
pub struct OpenDcDriverConfig {
    /// Path to the experiment-runner binary.
    pub binary: PathBuf,
    /// Root under which per-run directories are allocated.
    pub output_root: PathBuf,
    /// Per-invocation wall-clock timeout.
    pub timeout: Duration,
    /// Grace between SIGTERM and SIGKILL on timeout or shutdown.
    pub kill_grace: Duration,
    /// Export cadence passed through to the experiment descriptor.
    pub export_interval_secs: u64,
    /// Keep per-run input/output directories after the run.
    pub archive: bool,
    /// Reject a run id whose archive already exists instead of replacing it.
    pub strict_archive: bool,
    /// Java home handed to the subprocess; auto-discovered when unset.
    pub java_home: Option<PathBuf>,
}

impl Default for OpenDcDriverConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/app/opendc/bin/OpenDCExperimentRunner/bin/OpenDCExperimentRunner"),
            output_root: PathBuf::from("data"),
            timeout: Duration::from_secs(120),
            kill_grace: Duration::from_secs(10),
            export_interval_secs: DEFAULT_EXPORT_INTERVAL_SECS,
            archive: false,
            strict_archive: false,
            java_home: None,
        }
    }
}

/// Drives the external simulator binary through its file-based contract.
pub struct OpenDcDriver {
    config: OpenDcDriverConfig,
    java_home: PathBuf,
}

impl OpenDcDriver {
    /// Verify the binary exists and resolve a Java home once up front.
    pub fn new(config: OpenDcDriverConfig) -> Result<Self> {
        if !config.binary.exists() {
            return Err(SimError::Input(format!(
                "simulator binary not found at {}",
                config.binary.display()
            )));
        }
        let java_home = match config.java_home.clone() {
            Some(path) => path,
            None => detect_java_home()?,
        };
        tracing::info!(
            binary = %config.binary.display(),
            java_home = %java_home.display(),
            "Simulator driver initialized"
        );
        Ok(Self { config, java_home })
    }

    async fn run(&self, spec: SimulationSpec) -> Result<SimulationResult> {
        if spec.tasks.is_empty() {
            tracing::debug!(run_id = %spec.run_id, "Empty workload, skipping invocation");
            return Ok(SimulationResult::empty_ok());
        }

        let scratch = ScratchDir::create(&self.config.output_root, &spec.run_id)?;
        let input_dir = scratch.path().join("input");
        let workload_dir = input_dir.join("workload");
        let output_dir = scratch.path().join("output");
        std::fs::create_dir_all(&workload_dir)?;
        std::fs::create_dir_all(&output_dir)?;

        let topology_file = input_dir.join("topology.json");
        let experiment_file = input_dir.join("experiment.json");

        write_tasks_parquet(&spec.tasks, &workload_dir.join("tasks.parquet"))?;
        write_fragments_parquet(&spec.tasks, &workload_dir.join("fragments.parquet"))?;
        write_topology_json(&spec.topology, &topology_file)?;
        write_experiment_json(
            &spec.run_id,
            &workload_dir,
            &topology_file,
            &output_dir,
            self.config.export_interval_secs,
            &experiment_file,
        )?;

        tracing::info!(
            run_id = %spec.run_id,
            tasks = spec.tasks.len(),
            "Launching simulator"
        );
        let exec = self.execute(&experiment_file).await?;

        let result = match exec {
            Execution::TimedOut => SimulationResult::error(format!(
                "simulator timed out after {}s",
                self.config.timeout.as_secs()
            )),
            Execution::Finished {
                exit_code, stderr, ..
            } if exit_code != 0 => {
                tracing::error!(run_id = %spec.run_id, exit_code, "Simulator failed");
                let detail = tail(&stderr, STDERR_TAIL_BYTES);
                if detail.is_empty() {
                    SimulationResult::error(format!("simulator exited with code {exit_code}"))
                } else {
                    SimulationResult::error(detail)
                }
            }
            Execution::Finished { stdout, stderr, .. } => {
                std::fs::write(output_dir.join("opendc.stdout.log"), &stdout)?;
                std::fs::write(output_dir.join("opendc.stderr.log"), &stderr)?;
                match parse_outputs(&output_dir) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        tracing::warn!(
                            run_id = %spec.run_id,
                            "Simulator exited cleanly but output parsing failed: {err}"
                        );
                        SimulationResult::error(err.to_string())
                    }
                }
            }
        };

        if self.config.archive {
            let dest = self.config.output_root.join(&spec.run_id);
            let published = if self.config.strict_archive {
                scratch.persist_strict(&dest)?
            } else {
                scratch.persist(&dest)?
            };
            tracing::debug!(run_id = %spec.run_id, archive = %published.display(), "Run archived");
        }

        Ok(result)
    }

    async fn execute(&self, experiment_file: &std::path::Path) -> Result<Execution> {
        let mut child = Command::new(&self.config.binary)
            .arg("--experiment-path")
            .arg(experiment_file)
            .env("JAVA_HOME", &self.java_home)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SimError::Spawn(e.to_string()))?;

        // Drain both pipes while waiting so a chatty subprocess cannot fill
        // the pipe buffer and deadlock against its own exit.
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let status = match tokio::time::timeout(self.config.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                self.terminate(&mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                return Ok(Execution::TimedOut);
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        Ok(Execution::Finished {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    /// SIGTERM, wait out the grace period, then SIGKILL.
    async fn terminate(&self, child: &mut Child) {
        send_sigterm(child);
        if tokio::time::timeout(self.config.kill_grace, child.wait())
            .await
            .is_ok()
        {
            return;
        }
        tracing::warn!("Simulator ignored SIGTERM, sending SIGKILL");
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

enum Execution {
    Finished {
        exit_code: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    TimedOut,
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    if let Some(pid) = child.id() {
        // Safety: signalling a pid we own; a stale pid is at worst an ESRCH.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) {}

fn tail(bytes: &[u8], limit: usize) -> String {
    let start = bytes.len().saturating_sub(limit);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}

#[async_trait]
impl SimulationBackend for OpenDcDriver {
    async fn simulate(&self, spec: SimulationSpec) -> Result<SimulationResult> {
        self.run(spec).await
    }
}
