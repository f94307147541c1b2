// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock runner for testing.
//!
//! Simulates a run without containers: optionally writes fake artifacts into
//! the output directory and reports a configurable exit code and stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::traits::*;

/// First bytes of a PNG file.
pub const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Mock runner for testing.
pub struct MockRunner {
    /// Where fake artifacts are written.
    pub output_dir: PathBuf,
    /// Optional delay to simulate execution time (in milliseconds)
    pub execution_delay_ms: u64,
    /// Exit code reported by the fake process.
    pub exit_code: i32,
    /// Stdout reported by the fake process.
    pub stdout: String,
    /// Stderr reported by the fake process.
    pub stderr: String,
    /// Write `{uuid}.png`.
    pub write_image: bool,
    /// Write `{uuid}.nc`.
    pub write_netcdf: bool,
    /// If true, runs never finish and end with [`RunnerError::Timeout`].
    pub never_complete: bool,
    calls: Arc<Mutex<Vec<LaunchOptions>>>,
}

impl MockRunner {
    /// A clean run that writes both artifacts.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            execution_delay_ms: 10,
            exit_code: 0,
            stdout: "Simulation finished".to_string(),
            stderr: String::new(),
            write_image: true,
            write_netcdf: true,
            never_complete: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A run that exits 1 with the given stderr and writes nothing.
    pub fn failing(output_dir: impl Into<PathBuf>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            stderr: stderr.into(),
            write_image: false,
            write_netcdf: false,
            ..Self::new(output_dir)
        }
    }

    /// A run that only ends when its timeout expires.
    /// This is useful for testing timeout enforcement.
    pub fn never_completing(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            execution_delay_ms: 0,
            never_complete: true,
            ..Self::new(output_dir)
        }
    }

    /// Options of every run so far.
    pub async fn calls(&self) -> Vec<LaunchOptions> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl Runner for MockRunner {
    fn runner_type(&self) -> &'static str {
        "mock"
    }

    async fn run(&self, options: &LaunchOptions) -> Result<LaunchResult> {
        let start = std::time::Instant::now();
        self.calls.lock().await.push(options.clone());

        if self.never_complete {
            tokio::time::sleep(options.timeout).await;
            return Err(RunnerError::Timeout);
        }

        // Simulate execution
        if self.execution_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.execution_delay_ms)).await;
        }

        if self.write_image || self.write_netcdf {
            tokio::fs::create_dir_all(&self.output_dir).await?;
        }
        if self.write_image {
            tokio::fs::write(
                self.output_dir.join(format!("{}.png", options.uuid)),
                PNG_SIGNATURE,
            )
            .await?;
        }
        if self.write_netcdf {
            tokio::fs::write(
                self.output_dir.join(format!("{}.nc", options.uuid)),
                b"CDF\x01",
            )
            .await?;
        }

        Ok(LaunchResult {
            uuid: options.uuid,
            exit_code: Some(self.exit_code),
            success: self.exit_code == 0,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
