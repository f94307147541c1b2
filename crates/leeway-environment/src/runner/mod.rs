// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner module - simulation execution backends.

pub mod container;
pub mod mock;
pub mod prefetch;
mod traits;

pub use container::{ContainerRunner, ContainerRunnerConfig};
pub use mock::MockRunner;
pub use prefetch::{PrefetchMode, Prefetcher};
pub use traits::*;
