// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for leeway-environment.

use thiserror::Error;
use uuid::Uuid;

/// Environment errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Runner (container/process execution) failed.
    #[error("Runner error: {0}")]
    Runner(#[from] crate::runner::RunnerError),

    /// Core persistence operation failed.
    #[error("Core error: {0}")]
    Core(#[from] leeway_core::CoreError),

    /// Job could not be enqueued.
    #[error("Queue error: {0}")]
    Queue(#[from] crate::queue::QueueError),

    /// Mailbox access failed.
    #[error("Mailbox error: {0}")]
    Mailbox(String),

    /// Request parameters were rejected.
    #[error("Invalid request:\n{0}")]
    Validation(#[from] leeway_core::ValidationErrors),

    /// Simulation request does not exist.
    #[error("Simulation not found: {0}")]
    SimulationNotFound(Uuid),

    /// Simulation was already picked up by a runner.
    #[error("Simulation already started: {0}")]
    AlreadyStarted(Uuid),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using Environment Error.
pub type Result<T> = std::result::Result<T, Error>;
