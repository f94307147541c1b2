// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ancillary data pre-fetch.
//!
//! Before a run, an external command can download forcing data (wind,
//! currents) for the area into `{root}/input`. It is invoked as
//! `{command} --longitude X --latitude Y --output-dir DIR`.

use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use super::{Result, RunnerError};

/// What to do around the pre-fetch step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrefetchMode {
    /// Skip the step.
    #[default]
    Off,
    /// Run it; failures are logged and the simulation continues.
    BestEffort,
    /// Run it; a failure fails the request without starting the container.
    Required,
}

impl FromStr for PrefetchMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "off" | "none" | "disabled" => Ok(Self::Off),
            "best_effort" | "besteffort" => Ok(Self::BestEffort),
            "required" => Ok(Self::Required),
            other => Err(format!("unknown prefetch mode '{other}'")),
        }
    }
}

/// Runs the pre-fetch command.
#[derive(Debug, Clone)]
pub struct Prefetcher {
    program: String,
    base_args: Vec<String>,
    output_dir: PathBuf,
    timeout: Duration,
}

impl Prefetcher {
    /// Build from a whitespace-separated command line. Returns `None` for a blank command.
    pub fn new(command: &str, output_dir: impl Into<PathBuf>, timeout: Duration) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            base_args: parts.collect(),
            output_dir: output_dir.into(),
            timeout,
        })
    }

    /// Directory the command writes into.
    pub fn output_dir(&self) -> &std::path::Path {
        &self.output_dir
    }

    /// Fetch data around a position.
    pub async fn fetch(&self, longitude: f64, latitude: f64) -> Result<()> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg("--longitude")
            .arg(longitude.to_string())
            .arg("--latitude")
            .arg(latitude.to_string())
            .arg("--output-dir")
            .arg(&self.output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %self.program, longitude, latitude, "Fetching ancillary data");

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RunnerError::BinaryNotFound(self.program.clone())
            } else {
                RunnerError::StartFailed(e.to_string())
            }
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| RunnerError::Timeout)??;

        if output.status.success() {
            info!(longitude, latitude, "Ancillary data fetched");
            Ok(())
        } else {
            Err(RunnerError::ExitCode {
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("off".parse(), Ok(PrefetchMode::Off));
        assert_eq!("best-effort".parse(), Ok(PrefetchMode::BestEffort));
        assert_eq!("BEST_EFFORT".parse(), Ok(PrefetchMode::BestEffort));
        assert_eq!("required".parse(), Ok(PrefetchMode::Required));
        assert!("sometimes".parse::<PrefetchMode>().is_err());
    }

    #[test]
    fn test_blank_command() {
        assert!(Prefetcher::new("   ", "/tmp", Duration::from_secs(1)).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fetch_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ok = Prefetcher::new("true", dir.path().join("input"), Duration::from_secs(5)).unwrap();
        ok.fetch(13.0, 54.0).await.unwrap();
        assert!(dir.path().join("input").is_dir());

        let bad = Prefetcher::new("false", dir.path().join("input"), Duration::from_secs(5)).unwrap();
        let err = bad.fetch(13.0, 54.0).await.unwrap_err();
        assert!(matches!(err, RunnerError::ExitCode { .. }), "{err:?}");
    }
}
