// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container runner implementation.
//!
//! Runs the OpenDrift simulation script inside the `opendrift-leeway-custom`
//! image. The simulation root is mounted at `/code/leeway`, so artifacts
//! written to `/code/leeway/output` land in `{root}/output` on the host.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::runner::{LaunchOptions, LaunchResult, Result, Runner, RunnerError};

/// Mount point of the simulation root inside the container.
pub const CONTAINER_ROOT: &str = "/code/leeway";

/// Container runner configuration.
#[derive(Debug, Clone)]
pub struct ContainerRunnerConfig {
    /// Container CLI (`docker` or `podman`).
    pub runtime: String,
    /// Image with OpenDrift installed.
    pub image: String,
    /// Host directory mounted at `/code/leeway`.
    pub simulation_root: PathBuf,
    /// Host path of the simulation script.
    pub script_path: PathBuf,
    /// Remove the container when it exits.
    pub remove: bool,
}

impl Default for ContainerRunnerConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            image: "opendrift-leeway-custom:latest".to_string(),
            simulation_root: PathBuf::from("simulation"),
            script_path: PathBuf::from("simulation.py"),
            remove: true,
        }
    }
}

/// Runs simulations with `docker run` (or a compatible CLI).
pub struct ContainerRunner {
    config: ContainerRunnerConfig,
}

impl ContainerRunner {
    /// Create a runner.
    pub fn new(config: ContainerRunnerConfig) -> Self {
        Self { config }
    }

    /// Container name for a request, used to kill it on timeout.
    pub fn container_name(&self, options: &LaunchOptions) -> String {
        format!("leeway-{}", options.uuid)
    }

    /// Full argument list passed to the container CLI.
    pub fn command_args(&self, options: &LaunchOptions) -> Vec<String> {
        let mut args = vec!["run".to_string()];
        if self.config.remove {
            args.push("--rm".to_string());
        }
        args.extend([
            "--name".to_string(),
            self.container_name(options),
            "--volume".to_string(),
            format!("{}:{CONTAINER_ROOT}", self.config.simulation_root.display()),
            "--volume".to_string(),
            format!(
                "{}:{CONTAINER_ROOT}/simulation.py",
                self.config.script_path.display()
            ),
            self.config.image.clone(),
            "python3".to_string(),
            format!("{CONTAINER_ROOT}/simulation.py"),
        ]);
        args.extend(options.simulation_args());
        args
    }

    /// Kill a running container. Returns false when the kill did not go through.
    async fn kill_container(&self, name: &str) -> bool {
        match Command::new(&self.config.runtime)
            .args(["kill", name])
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                debug!(container = %name, "Container killed");
                true
            }
            Ok(output) => {
                warn!(
                    container = %name,
                    exit_code = ?output.status.code(),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Failed to kill container, it may still be running"
                );
                false
            }
            Err(e) => {
                warn!(container = %name, error = %e, "Failed to kill container, it may still be running");
                false
            }
        }
    }
}

#[async_trait]
impl Runner for ContainerRunner {
    fn runner_type(&self) -> &'static str {
        "container"
    }

    async fn run(&self, options: &LaunchOptions) -> Result<LaunchResult> {
        let start = std::time::Instant::now();
        let name = self.container_name(options);
        let args = self.command_args(options);

        info!(
            uuid = %options.uuid,
            runtime = %self.config.runtime,
            command = %args.join(" "),
            "Launching simulation container"
        );

        let child = Command::new(&self.config.runtime)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RunnerError::BinaryNotFound(self.config.runtime.clone())
                } else {
                    RunnerError::StartFailed(e.to_string())
                }
            })?;

        let output = match tokio::time::timeout(options.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!(uuid = %options.uuid, error = %e, "Error waiting for simulation container");
                return Err(RunnerError::Io(e));
            }
            Err(_) => {
                warn!(uuid = %options.uuid, container = %name, "Simulation timed out, killing container");
                self.kill_container(&name).await;
                return Err(RunnerError::Timeout);
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code();

        debug!(uuid = %options.uuid, stdout = %stdout, "Output from simulation");
        if output.status.success() {
            info!(uuid = %options.uuid, duration_ms, "Simulation container completed");
        } else {
            error!(
                uuid = %options.uuid,
                exit_code = ?exit_code,
                stderr = %stderr.trim(),
                "Simulation container failed"
            );
        }

        Ok(LaunchResult {
            uuid: options.uuid,
            exit_code,
            success: output.status.success(),
            stdout,
            stderr,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use uuid::Uuid;

    fn options() -> LaunchOptions {
        LaunchOptions {
            uuid: Uuid::new_v4(),
            longitude: 13.5,
            latitude: 54.25,
            radius: 1000,
            number: 100,
            start_time: Utc::now(),
            object_type: 27,
            duration: 12,
            no_web: true,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_command_mounts_root_and_script() {
        let runner = ContainerRunner::new(ContainerRunnerConfig {
            simulation_root: PathBuf::from("/srv/leeway/simulation"),
            script_path: PathBuf::from("/srv/leeway/simulation.py"),
            ..Default::default()
        });
        let opts = options();
        let args = runner.command_args(&opts);

        let head: Vec<&str> = args.iter().take(12).map(String::as_str).collect();
        let name = format!("leeway-{}", opts.uuid);
        assert_eq!(
            head,
            vec![
                "run",
                "--rm",
                "--name",
                name.as_str(),
                "--volume",
                "/srv/leeway/simulation:/code/leeway",
                "--volume",
                "/srv/leeway/simulation.py:/code/leeway/simulation.py",
                "opendrift-leeway-custom:latest",
                "python3",
                "/code/leeway/simulation.py",
                "--longitude",
            ]
        );
        assert_eq!(args.last().map(String::as_str), Some("--no-web"));
    }

    #[tokio::test]
    async fn test_missing_runtime_binary() {
        let runner = ContainerRunner::new(ContainerRunnerConfig {
            runtime: "definitely-not-a-container-runtime".to_string(),
            ..Default::default()
        });
        let err = runner.run(&options()).await.unwrap_err();
        assert!(matches!(err, RunnerError::BinaryNotFound(_)), "{err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_failure_is_reported() {
        let missing = ContainerRunner::new(ContainerRunnerConfig {
            runtime: "definitely-not-a-container-runtime".to_string(),
            ..Default::default()
        });
        assert!(!missing.kill_container("leeway-test").await);

        // `false kill NAME` exits 1.
        let refusing = ContainerRunner::new(ContainerRunnerConfig {
            runtime: "false".to_string(),
            ..Default::default()
        });
        assert!(!refusing.kill_container("leeway-test").await);

        let accepting = ContainerRunner::new(ContainerRunnerConfig {
            runtime: "true".to_string(),
            ..Default::default()
        });
        assert!(accepting.kill_container("leeway-test").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_stderr_and_exit_code() {
        // `sh run ...` fails with a non-zero exit and a message on stderr.
        let runner = ContainerRunner::new(ContainerRunnerConfig {
            runtime: "sh".to_string(),
            ..Default::default()
        });
        let result = runner.run(&options()).await.unwrap();
        assert!(!result.success);
        assert_ne!(result.exit_code, Some(0));
        assert!(!result.stderr.is_empty());
    }
}
