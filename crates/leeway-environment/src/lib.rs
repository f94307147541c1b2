// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Leeway Environment - drift simulation service
//!
//! This crate turns simulation requests into OpenDrift leeway runs and mails
//! the results back. Requests arrive through three channels, are stored by
//! `leeway-core`, queued, executed in a container and purged after the
//! retention period.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐  ┌───────────────┐  ┌───────────────┐
//! │   Web form    │  │   REST API    │  │  IMAP inbox   │
//! │ /simulations/ │  │ /api/v1/...   │  │ (poller)      │
//! └───────┬───────┘  └───────┬───────┘  └───────┬───────┘
//!         │                  │                  │
//!         └──────────────────┼──────────────────┘
//!                            ▼
//!                  ┌───────────────────┐       ┌──────────────┐
//!                  │      Intake       │──────►│   Notifier   │ confirmation,
//!                  │ validate + store  │       │(SMTP/console)│ rejection
//!                  └─────────┬─────────┘       └──────▲───────┘
//!                            │ enqueue                │ result
//!                            ▼                        │
//!                  ┌───────────────────┐       ┌──────┴───────┐
//!                  │    Task queue     │──────►│ Simulation   │
//!                  │ (bounded workers) │       │ task         │
//!                  └───────────────────┘       └──────┬───────┘
//!                                                     │ spawn
//!                                                     ▼
//!                                          ┌─────────────────────┐
//!                                          │ docker/podman run   │
//!                                          │ simulation.py       │
//!                                          └─────────────────────┘
//!
//!           ┌──────────────────┐         ┌─────────────────────┐
//!           │ Retention sweeper│────────►│ SQLite + output dir │
//!           └──────────────────┘         └─────────────────────┘
//! ```
//!
//! # Request Lifecycle
//!
//! | Status | Meaning |
//! |--------|---------|
//! | `pending` | Stored and queued |
//! | `started` | A worker claimed it |
//! | `finished` | Clean run, result mailed |
//! | `failed` | Finished with a trace; the result mail quotes it |
//!
//! # Configuration
//!
//! Settings are `LEEWAY_*` environment variables, falling back to
//! `/etc/opendrift-leeway-webgui.ini` (override with `LEEWAY_CONFIG_FILE`).
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `LEEWAY_DATABASE_URL` | `sqlite:leeway.db?mode=rwc` | SQLite database |
//! | `LEEWAY_HTTP_HOST` / `LEEWAY_HTTP_PORT` | `0.0.0.0` / `8000` | Listen address |
//! | `LEEWAY_DEBUG` | `false` | Console mail backend by default |
//! | `LEEWAY_ALLOWED_HOSTS` | localhost | Extra accepted Host values, one per line |
//! | `LEEWAY_SIMULATION_ROOT` | `simulation` | Holds `output/` and `input/` |
//! | `LEEWAY_CONTAINER_RUNTIME` | `docker` | `docker` or `podman` |
//! | `LEEWAY_CONTAINER_IMAGE` | `opendrift-leeway-custom:latest` | Simulation image |
//! | `LEEWAY_OPENDRIFT_NUMBER_DRIFTERS` | `100` | Particles per run |
//! | `LEEWAY_SIMULATION_TIMEOUT_SECS` | `1740` | Container run limit |
//! | `LEEWAY_PREFETCH_MODE` | `off` | `off`, `best-effort` or `required` |
//! | `LEEWAY_WORKER_CONCURRENCY` | `2` | Parallel simulations |
//! | `LEEWAY_TASK_TIME_LIMIT_SECS` | `1800` | Hard job limit |
//! | `LEEWAY_SIMULATION_RETENTION` | `7` | Days a request is kept |
//! | `LEEWAY_RETENTION_ANCHOR` | `submitted` | Age measured from submission or finish |
//! | `LEEWAY_EMAIL_BACKEND` | smtp | `smtp` or `console` |
//! | `LEEWAY_SERVER_EMAIL` | - | Sender and IMAP login |
//! | `LEEWAY_EMAIL_HOST_PASSWORD` | - | SMTP and IMAP password |
//! | `LEEWAY_MAILBOX_POLL_ENABLED` | `true` | Poll the inbox when IMAP is configured |
//!
//! # Modules
//!
//! - [`config`]: Settings from the environment and the ini file
//! - [`server`] and [`handlers`]: HTTP surface
//! - [`intake`]: Validation, storage and queueing shared by all channels
//! - [`email`] and [`mailbox`]: Inbound mail
//! - [`notifier`]: Outbound mail
//! - [`queue`]: Bounded in-process job queue
//! - [`tasks`]: The simulation job itself
//! - [`runner`]: Container execution and data pre-fetch
//! - [`retention`]: Expiry of old requests
//! - [`runtime`]: Embeddable service runtime

#![deny(missing_docs)]

/// Settings loaded from `LEEWAY_*` variables.
pub mod config;

/// Parsing of raw inbound e-mail.
pub mod email;

/// Error types for service operations.
pub mod error;

/// HTTP request handlers.
pub mod handlers;

/// Request intake shared by the form, API and mail channels.
pub mod intake;

/// Mailbox sources and the polling worker.
pub mod mailbox;

/// Confirmation, result and rejection mail.
pub mod notifier;

/// In-process job queue with bounded concurrency.
pub mod queue;

/// Background worker deleting expired requests.
pub mod retention;

/// Container execution backends.
pub mod runner;

/// Embeddable runtime for the leeway service.
pub mod runtime;

/// HTTP router and server.
pub mod server;

/// Simulation job execution.
pub mod tasks;

pub use config::Config;
pub use error::Error;
pub use intake::{EmailIntakeOutcome, Intake};
pub use queue::{JobQueue, SimulationJob, TaskQueue};
pub use runtime::{LeewayRuntime, LeewayRuntimeBuilder};
pub use tasks::{SimulationOutcome, SimulationTask};
