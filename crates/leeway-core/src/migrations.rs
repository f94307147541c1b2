// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embedded database migrations.
//!
//! [`crate::persistence::SqliteStore`] runs these on connect. Callers that
//! manage their own pool can apply them directly:
//!
//! ```ignore
//! let pool = sqlx::SqlitePool::connect("sqlite:leeway.db?mode=rwc").await?;
//! leeway_core::migrations::run_sqlite(&pool).await?;
//! ```

use sqlx::migrate::MigrateError;

/// SQLite migrator with the users and simulations schema embedded.
pub static SQLITE: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Run SQLite migrations.
///
/// Applies all pending migrations to the database. Safe to call multiple times;
/// already-applied migrations are skipped.
pub async fn run_sqlite(pool: &sqlx::SqlitePool) -> Result<(), MigrateError> {
    SQLITE.run(pool).await
}
