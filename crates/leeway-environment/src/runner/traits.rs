// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner trait definitions.
//!
//! Defines the abstract interface for simulation runners.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leeway_core::SimulationRequest;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors from runner operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerError {
    /// Container runtime or helper binary was not found.
    #[error("Binary not found: {0}")]
    BinaryNotFound(String),

    /// Execution timed out.
    #[error("Execution timeout")]
    Timeout,

    /// Process failed to start.
    #[error("Process start failed: {0}")]
    StartFailed(String),

    /// Process exited with non-zero code.
    #[error("Exit code {exit_code}: {stderr}")]
    ExitCode {
        /// Exit code from the process.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Format of `--start-time` passed to the simulation script.
pub const START_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Options for one simulation run.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOptions {
    /// Request identifier; artifacts are named after it.
    pub uuid: Uuid,
    /// Decimal degrees.
    pub longitude: f64,
    /// Decimal degrees.
    pub latitude: f64,
    /// Seeding radius in meters.
    pub radius: i64,
    /// Number of simulated drifters.
    pub number: u32,
    /// Simulation start.
    pub start_time: DateTime<Utc>,
    /// Leeway object category.
    pub object_type: i64,
    /// Hours to simulate.
    pub duration: i64,
    /// Pass `--no-web` (skip the script's own web output).
    pub no_web: bool,
    /// Execution timeout.
    pub timeout: Duration,
}

impl LaunchOptions {
    /// Options for a stored request.
    pub fn for_request(
        sim: &SimulationRequest,
        number: u32,
        no_web: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            uuid: sim.uuid,
            longitude: sim.longitude,
            latitude: sim.latitude,
            radius: sim.radius,
            number,
            start_time: sim.start_time,
            object_type: sim.object_type,
            duration: sim.duration,
            no_web,
            timeout,
        }
    }

    /// Script arguments, in the order the simulation script expects them.
    pub fn simulation_args(&self) -> Vec<String> {
        let mut args = vec![
            "--longitude".to_string(),
            self.longitude.to_string(),
            "--latitude".to_string(),
            self.latitude.to_string(),
            "--radius".to_string(),
            self.radius.to_string(),
            "--number".to_string(),
            self.number.to_string(),
            "--start-time".to_string(),
            self.start_time.format(START_TIME_FORMAT).to_string(),
            "--object-type".to_string(),
            self.object_type.to_string(),
            "--duration".to_string(),
            self.duration.to_string(),
            "--id".to_string(),
            self.uuid.to_string(),
        ];
        if self.no_web {
            args.push("--no-web".to_string());
        }
        args
    }
}

/// Result of a completed simulation process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchResult {
    /// Request identifier.
    pub uuid: Uuid,
    /// Exit code; `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// True when the process exited with status 0.
    pub success: bool,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Trait for simulation runners.
///
/// Runners are PURE execution engines - they do NOT access the database.
/// Recording timestamps, traces and artifacts is done by the caller.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Runner type identifier (e.g., "container", "mock").
    fn runner_type(&self) -> &'static str;

    /// Run a simulation synchronously, waiting for completion.
    ///
    /// A non-zero exit is reported through [`LaunchResult::success`], not as
    /// an error. Errors mean the process could not be run or was killed.
    async fn run(&self, options: &LaunchOptions) -> Result<LaunchResult>;
}
