// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The simulation task: runs one stored request end to end.
//!
//! ```text
//! load ─▶ mark started ─▶ pre-fetch ─▶ run container ─▶ probe artifacts ─▶ mark finished ─▶ result mail
//! ```
//!
//! The started timestamp is persisted before anything slow happens; the
//! finished state (timestamp, trace, artifacts) is written in one update and
//! exactly one result mail follows it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use leeway_core::{FinishedUpdate, SimulationStatus, SimulationStore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, Vars};
use crate::error::{Error, Result};
use crate::notifier::Notifier;
use crate::queue::{JobHandler, SimulationJob};
use crate::runner::{
    ContainerRunnerConfig, LaunchOptions, LaunchResult, PrefetchMode, Prefetcher, Runner,
    RunnerError,
};

/// Simulation execution settings.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Host directory mounted into the container; artifacts land in `{root}/output`.
    pub root: PathBuf,
    /// Host path of the simulation script.
    pub script_path: PathBuf,
    /// Container CLI.
    pub container_runtime: String,
    /// Container image.
    pub container_image: String,
    /// Drifters seeded per run.
    pub number_drifters: u32,
    /// Pass `--no-web` to the script.
    pub no_web: bool,
    /// Limit for one container run. Kept below the queue's hard limit so the
    /// container is killed by the runner first.
    pub run_timeout: Duration,
    /// Pre-fetch behavior.
    pub prefetch_mode: PrefetchMode,
    /// Pre-fetch command line.
    pub prefetch_command: Option<String>,
    /// Limit for the pre-fetch command.
    pub prefetch_timeout: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("simulation"),
            script_path: PathBuf::from("simulation.py"),
            container_runtime: "docker".to_string(),
            container_image: "opendrift-leeway-custom:latest".to_string(),
            number_drifters: 100,
            no_web: true,
            run_timeout: Duration::from_secs(29 * 60),
            prefetch_mode: PrefetchMode::Off,
            prefetch_command: None,
            prefetch_timeout: Duration::from_secs(10 * 60),
        }
    }
}

impl SimulationConfig {
    /// Load from `LEEWAY_*` variables.
    ///
    /// - `LEEWAY_SIMULATION_ROOT` (default: `simulation`)
    /// - `LEEWAY_SIMULATION_SCRIPT_PATH` (default: `simulation.py`)
    /// - `LEEWAY_CONTAINER_RUNTIME` (default: `docker`)
    /// - `LEEWAY_CONTAINER_IMAGE` (default: `opendrift-leeway-custom:latest`)
    /// - `LEEWAY_OPENDRIFT_NUMBER_DRIFTERS` (default: 100)
    /// - `LEEWAY_SIMULATION_NO_WEB` (default: true)
    /// - `LEEWAY_SIMULATION_TIMEOUT_SECS` (default: 1740)
    /// - `LEEWAY_PREFETCH_MODE` (`off`, `best_effort`, `required`; default: off)
    /// - `LEEWAY_PREFETCH_COMMAND` (required unless the mode is off)
    /// - `LEEWAY_PREFETCH_TIMEOUT_SECS` (default: 600)
    pub fn from_vars(vars: &Vars) -> std::result::Result<Self, ConfigError> {
        let defaults = Self::default();
        let prefetch_mode = vars.parse("PREFETCH_MODE", defaults.prefetch_mode)?;
        let prefetch_command = vars.get("PREFETCH_COMMAND").map(str::to_string);
        if prefetch_mode != PrefetchMode::Off && prefetch_command.is_none() {
            return Err(ConfigError::MissingEnvVar("LEEWAY_PREFETCH_COMMAND"));
        }

        Ok(Self {
            root: vars.get("SIMULATION_ROOT").map(PathBuf::from).unwrap_or(defaults.root),
            script_path: vars
                .get("SIMULATION_SCRIPT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.script_path),
            container_runtime: vars.string("CONTAINER_RUNTIME", &defaults.container_runtime),
            container_image: vars.string("CONTAINER_IMAGE", &defaults.container_image),
            number_drifters: vars.parse("OPENDRIFT_NUMBER_DRIFTERS", defaults.number_drifters)?,
            no_web: vars.bool("SIMULATION_NO_WEB", defaults.no_web)?,
            run_timeout: vars.secs("SIMULATION_TIMEOUT_SECS", defaults.run_timeout.as_secs())?,
            prefetch_mode,
            prefetch_command,
            prefetch_timeout: vars
                .secs("PREFETCH_TIMEOUT_SECS", defaults.prefetch_timeout.as_secs())?,
        })
    }

    /// Where the script writes `{uuid}.png` and `{uuid}.nc`.
    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    /// Where pre-fetched forcing data goes.
    pub fn input_dir(&self) -> PathBuf {
        self.root.join("input")
    }

    /// Container runner settings. Bind mounts need absolute host paths.
    pub fn container_config(&self) -> ContainerRunnerConfig {
        ContainerRunnerConfig {
            runtime: self.container_runtime.clone(),
            image: self.container_image.clone(),
            simulation_root: absolute(&self.root),
            script_path: absolute(&self.script_path),
            remove: true,
        }
    }

    /// Pre-fetcher, if the mode and command call for one.
    pub fn prefetcher(&self) -> Option<Prefetcher> {
        if self.prefetch_mode == PrefetchMode::Off {
            return None;
        }
        let command = self.prefetch_command.as_deref()?;
        Prefetcher::new(command, self.input_dir(), self.prefetch_timeout)
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationOutcome {
    /// Request identifier.
    pub uuid: Uuid,
    /// Final status.
    pub status: SimulationStatus,
    /// Stored image reference.
    pub image: Option<String>,
    /// Stored NetCDF reference.
    pub netcdf: Option<String>,
    /// True when the result mail was delivered.
    pub notified: bool,
}

/// Runs stored requests.
pub struct SimulationTask {
    store: Arc<dyn SimulationStore>,
    runner: Arc<dyn Runner>,
    notifier: Notifier,
    prefetcher: Option<Prefetcher>,
    config: SimulationConfig,
}

impl SimulationTask {
    /// Create a task. The pre-fetcher is derived from the configuration.
    pub fn new(
        store: Arc<dyn SimulationStore>,
        runner: Arc<dyn Runner>,
        notifier: Notifier,
        config: SimulationConfig,
    ) -> Self {
        Self {
            prefetcher: config.prefetcher(),
            store,
            runner,
            notifier,
            config,
        }
    }

    /// Replace the pre-fetcher.
    pub fn with_prefetcher(mut self, prefetcher: Option<Prefetcher>) -> Self {
        self.prefetcher = prefetcher;
        self
    }

    /// Run one request and notify its owner.
    ///
    /// A runner timeout is returned as an error and leaves the request
    /// started; every other failure is recorded as the request's trace.
    pub async fn run_simulation(&self, uuid: Uuid) -> Result<SimulationOutcome> {
        let sim = self
            .store
            .get_simulation(uuid)
            .await?
            .ok_or(Error::SimulationNotFound(uuid))?;

        if !self.store.mark_started(uuid, Utc::now()).await? {
            return Err(Error::AlreadyStarted(uuid));
        }
        info!(uuid = %uuid, user_id = sim.user_id, "Simulation started");

        let update = match self.prefetch(&sim).await {
            Err(trace) => FinishedUpdate {
                finished_at: Utc::now(),
                traceback: trace,
                img: None,
                netcdf: None,
            },
            Ok(()) => {
                let options = LaunchOptions::for_request(
                    &sim,
                    self.config.number_drifters,
                    self.config.no_web,
                    self.config.run_timeout,
                );
                match self.runner.run(&options).await {
                    Ok(result) => self.finish_from_result(uuid, &result).await,
                    Err(RunnerError::Timeout) => {
                        warn!(uuid = %uuid, "Simulation timed out, leaving it started");
                        return Err(RunnerError::Timeout.into());
                    }
                    Err(e) => {
                        error!(uuid = %uuid, runner = self.runner.runner_type(), error = %e, "Simulation could not be run");
                        FinishedUpdate {
                            finished_at: Utc::now(),
                            traceback: e.to_string(),
                            img: None,
                            netcdf: None,
                        }
                    }
                }
            }
        };

        if !self.store.mark_finished(uuid, update).await? {
            return Err(Error::Other(format!(
                "Simulation {uuid} was finished by another worker"
            )));
        }

        let sim = self
            .store
            .get_simulation(uuid)
            .await?
            .ok_or(Error::SimulationNotFound(uuid))?;
        let status = sim.status();
        info!(uuid = %uuid, status = %status, "Simulation finished");

        let notified = match self.store.get_user(sim.user_id).await? {
            Some(user) => match self.notifier.send_result(&user.email, &sim).await {
                Ok(()) => true,
                Err(e) => {
                    error!(uuid = %uuid, error = %e, "Failed to send result mail");
                    false
                }
            },
            None => {
                warn!(uuid = %uuid, user_id = sim.user_id, "Owner of simulation no longer exists");
                false
            }
        };

        Ok(SimulationOutcome {
            uuid,
            status,
            image: sim.img,
            netcdf: sim.netcdf,
            notified,
        })
    }

    /// `Err` carries the trace when a required pre-fetch failed.
    async fn prefetch(&self, sim: &leeway_core::SimulationRequest) -> std::result::Result<(), String> {
        let Some(prefetcher) = &self.prefetcher else {
            return Ok(());
        };
        match prefetcher.fetch(sim.longitude, sim.latitude).await {
            Ok(()) => Ok(()),
            Err(e) if self.config.prefetch_mode == PrefetchMode::Required => {
                error!(uuid = %sim.uuid, error = %e, "Required ancillary data pre-fetch failed");
                Err(format!("Ancillary data pre-fetch failed: {e}"))
            }
            Err(e) => {
                warn!(uuid = %sim.uuid, error = %e, "Ancillary data pre-fetch failed, continuing");
                Ok(())
            }
        }
    }

    async fn finish_from_result(&self, uuid: Uuid, result: &LaunchResult) -> FinishedUpdate {
        debug!(uuid = %uuid, stdout = %result.stdout, "Output from simulation");

        let (img, netcdf) = if result.success {
            let output_dir = self.config.output_dir();
            (
                probe(&output_dir, format!("{uuid}.png")).await,
                probe(&output_dir, format!("{uuid}.nc")).await,
            )
        } else {
            (None, None)
        };

        let stderr = result.stderr.trim();
        let traceback = if !stderr.is_empty() {
            stderr.to_string()
        } else if !result.success {
            match result.exit_code {
                Some(code) => format!("Simulation exited with status {code}"),
                None => "Simulation was terminated by a signal".to_string(),
            }
        } else if img.is_none() {
            "Simulation finished without producing an image".to_string()
        } else {
            String::new()
        };
        let finished_at = Utc::now();

        FinishedUpdate {
            finished_at,
            traceback,
            img,
            netcdf,
        }
    }
}

async fn probe(dir: &Path, name: String) -> Option<String> {
    match tokio::fs::try_exists(dir.join(&name)).await {
        Ok(true) => Some(name),
        Ok(false) => None,
        Err(e) => {
            warn!(file = %name, error = %e, "Could not check simulation artifact");
            None
        }
    }
}

#[async_trait]
impl JobHandler for SimulationTask {
    async fn handle(&self, job: SimulationJob) -> Result<()> {
        self.run_simulation(job.uuid).await.map(|_| ())
    }
}
