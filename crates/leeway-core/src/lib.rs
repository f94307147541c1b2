// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Leeway Core - Simulation Request Domain
//!
//! This crate holds everything about a leeway drift simulation request that
//! does not depend on how it is executed: the record itself, coordinate
//! normalization, parameter validation, the object-type catalog and the
//! persistence layer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//! │   Web form   │  │   REST API   │  │ Inbound mail │
//! └──────┬───────┘  └──────┬───────┘  └──────┬───────┘
//!        │   SimulationForm (raw text fields)  │
//!        └─────────────────┼───────────────────┘
//!                          ▼
//!              ┌───────────────────────┐
//!              │ SimulationParams      │  DMS → decimal, defaults,
//!              │   ::from_form         │  range checks
//!              └───────────┬───────────┘
//!                          ▼
//!              ┌───────────────────────┐
//!              │ SimulationStore       │  users + simulations
//!              │ (SqliteStore)         │
//!              └───────────────────────┘
//! ```
//!
//! Execution, mail and HTTP live in `leeway-environment`.
//!
//! # Request Lifecycle
//!
//! ```text
//!   insert_simulation     mark_started        mark_finished
//!  ─────────────────▶ PENDING ─────────▶ STARTED ─────────▶ FINISHED / FAILED
//! ```
//!
//! | Status | Condition |
//! |--------|-----------|
//! | `pending` | started unset |
//! | `started` | started set, finished unset |
//! | `finished` | finished set, empty trace |
//! | `failed` | finished set, non-empty trace |
//!
//! The store never writes a finished timestamp for a request that was not
//! started, and clamps it so it never precedes the started timestamp.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `duration` | `12` hours |
//! | `radius` | `1000` m |
//! | `object_type` | `27` (life-raft, no ballast, no canopy, no drogue) |
//! | `start_time` | now |
//!
//! # Modules
//!
//! - [`model`]: Records, status and the object catalog
//! - [`coords`]: DMS parsing
//! - [`params`]: Form validation and mail argument parsing
//! - [`persistence`]: Store trait and SQLite backend
//! - [`migrations`]: Embedded schema
//! - [`error`]: Error type

#![deny(missing_docs)]

/// Degrees-minutes-seconds conversion.
pub mod coords;

/// Error types for core operations.
pub mod error;

/// Embedded SQLite migrations.
pub mod migrations;

/// Simulation requests, users and the leeway object catalog.
pub mod model;

/// Validation of raw intake fields.
pub mod params;

/// Store trait and backends.
pub mod persistence;

pub use error::CoreError;
pub use model::{
    FinishedUpdate, NewSimulation, NewUser, OBJECT_TYPES, ObjectType, SimulationRequest,
    SimulationStatus, User,
};
pub use params::{SimulationForm, SimulationParams, ValidationErrors};
pub use persistence::{RetentionAnchor, SimulationStore, SqliteStore};
